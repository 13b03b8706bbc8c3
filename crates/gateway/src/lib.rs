//! Upstream school-register gateway.
//!
//! [`UpstreamGateway`] is the capability the refresh pipeline consumes;
//! [`LibrusClient`] implements it against the Librus Synergia HTTP API.

pub mod client;
pub mod gateway;
pub mod records;

pub use client::LibrusClient;
pub use gateway::{Credentials, GatewayError, UpstreamGateway};
pub use records::*;
