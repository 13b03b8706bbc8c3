//! HTTP implementation of [`UpstreamGateway`] for Librus Synergia.
//!
//! Login goes through the OAuth portal, which leaves session cookies in the
//! client's jar; the gateway API then accepts those cookies until the session
//! expires.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use synergia_core::config::UpstreamConfig;
use synergia_core::WeekKey;
use tracing::debug;

use crate::gateway::{Credentials, GatewayError, UpstreamGateway};
use crate::records::{CategoryListing, HomeworkListing, SubjectListing, TimetablePage};

const USER_AGENT: &str = concat!("synergia-ics/", env!("CARGO_PKG_VERSION"));

pub struct LibrusClient {
    auth_url: String,
    api_url: String,
    client_id: String,
    /// Replaced wholesale on every login so stale cookies never leak into a
    /// new session.
    http: RwLock<reqwest::Client>,
}

impl LibrusClient {
    pub fn new(
        auth_url: impl Into<String>,
        api_url: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            auth_url: auth_url.into().trim_end_matches('/').to_string(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            http: RwLock::new(session_client()?),
        })
    }

    pub fn from_config(config: &UpstreamConfig) -> Result<Self, GatewayError> {
        Self::new(&config.auth_url, &config.api_url, &config.client_id)
    }

    fn http(&self) -> reqwest::Client {
        self.http
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        let url = format!("{}/{}", self.api_url, path);
        debug!("Librus request to {}", url);

        let response = self.http().get(&url).send().await?;
        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Auth(format!("{status}: {body}")));
        }
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api { status, body });
        }

        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| GatewayError::Parse(format!("{path}: {e}")))
    }
}

fn session_client() -> Result<reqwest::Client, GatewayError> {
    Ok(reqwest::Client::builder()
        .cookie_store(true)
        .user_agent(USER_AGENT)
        .build()?)
}

/// Pull the first error message out of a portal login response, if any.
fn login_error(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    if value["status"].as_str() != Some("error") {
        return None;
    }
    let message = value["errors"][0]["message"]
        .as_str()
        .unwrap_or("login rejected")
        .to_string();
    Some(message)
}

#[async_trait]
impl UpstreamGateway for LibrusClient {
    async fn authenticate(&self, credentials: &Credentials) -> Result<(), GatewayError> {
        if credentials.is_empty() {
            return Err(GatewayError::Auth("LOGIN/PASSWORD not configured".into()));
        }

        let client = session_client()?;
        let authorize = format!(
            "{}/OAuth/Authorization?client_id={}&response_type=code&scope=mydata",
            self.auth_url, self.client_id
        );
        let response = client.get(&authorize).send().await?;
        let status = response.status().as_u16();
        if !(200..400).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api { status, body });
        }

        let login = format!("{}/OAuth/Authorization?client_id={}", self.auth_url, self.client_id);
        let response = client
            .post(&login)
            .form(&[
                ("action", "login"),
                ("login", credentials.login.as_str()),
                ("pass", credentials.password.as_str()),
            ])
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        if let Some(message) = login_error(&body) {
            return Err(GatewayError::Auth(message));
        }
        if !(200..300).contains(&status) {
            return Err(GatewayError::Auth(format!("login returned {status}")));
        }

        let grant = format!(
            "{}/OAuth/Authorization/Grant?client_id={}",
            self.auth_url, self.client_id
        );
        let response = client.get(&grant).send().await?;
        let status = response.status().as_u16();
        if !(200..400).contains(&status) {
            return Err(GatewayError::Auth(format!("grant returned {status}")));
        }

        *self.http.write().unwrap_or_else(PoisonError::into_inner) = client;
        debug!(login = %credentials.login, "Librus session established");
        Ok(())
    }

    async fn fetch_timetable(&self, week: WeekKey) -> Result<TimetablePage, GatewayError> {
        self.get_json(&format!("Timetables?weekStart={week}")).await
    }

    async fn fetch_homework_categories(&self) -> Result<CategoryListing, GatewayError> {
        self.get_json("HomeWorks/Categories").await
    }

    async fn fetch_subjects(&self) -> Result<SubjectListing, GatewayError> {
        self.get_json("Subjects").await
    }

    async fn fetch_homeworks(&self) -> Result<HomeworkListing, GatewayError> {
        self.get_json("HomeWorks").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_error_extracts_message() {
        let body = r#"{"status":"error","errors":[{"message":"Nieprawidłowy login i/lub hasło."}]}"#;
        assert_eq!(login_error(body).as_deref(), Some("Nieprawidłowy login i/lub hasło."));
    }

    #[test]
    fn login_error_ignores_success_and_non_json() {
        assert_eq!(login_error(r#"{"status":"ok","goTo":"/grant"}"#), None);
        assert_eq!(login_error("<html></html>"), None);
    }

    #[test]
    fn base_urls_lose_trailing_slash() {
        let client = LibrusClient::new("http://auth/", "http://api/v2/", "46").unwrap();
        assert_eq!(client.auth_url, "http://auth");
        assert_eq!(client.api_url, "http://api/v2");
    }
}
