//! CLI argument parsing and subcommand dispatch.

use std::path::PathBuf;

use anyhow::{bail, Context};
use synergia_core::Config;
use synergia_refresh::{Feed, RefreshError};
use tracing::info;

use crate::startup;

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Serve,
    Export { feed: Feed, path: Option<PathBuf> },
    Help,
}

pub fn parse(args: &[String]) -> anyhow::Result<Command> {
    match args.get(1).map(String::as_str) {
        None | Some("serve") => Ok(Command::Serve),
        Some("export") => {
            let feed = match args.get(2).map(String::as_str) {
                Some("lessons") => Feed::Lessons,
                Some("events") => Feed::Events,
                Some(other) => bail!("unknown feed '{other}', expected lessons or events"),
                None => bail!("Usage: synergia-server export <lessons|events> [path]"),
            };
            Ok(Command::Export {
                feed,
                path: args.get(3).map(PathBuf::from),
            })
        }
        Some("help" | "--help" | "-h") => Ok(Command::Help),
        Some(other) => bail!("unknown command '{other}'"),
    }
}

pub async fn dispatch(config: Config, args: &[String]) -> anyhow::Result<()> {
    match parse(args) {
        Ok(Command::Serve) => startup::serve(config).await,
        Ok(Command::Export { feed, path }) => export(config, feed, path).await,
        Ok(Command::Help) => {
            print_usage();
            Ok(())
        }
        Err(e) => {
            print_usage();
            Err(e)
        }
    }
}

/// Fetch one feed once and write the document to `path` or stdout.
async fn export(config: Config, feed: Feed, path: Option<PathBuf>) -> anyhow::Result<()> {
    let state = startup::build_app_state(config)?;
    let artifact = match feed {
        Feed::Lessons => {
            state.scheduler.run_near_cycle().await;
            state
                .pipeline()
                .lessons()
                .get()
                .ok_or(RefreshError::NotReady)?
        }
        Feed::Events => state.pipeline().events_feed().await?,
    };

    match path {
        Some(path) => {
            tokio::fs::write(&path, artifact.document.as_bytes())
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            info!("Exported {} calendar to {}", feed, path.display());
        }
        None => print!("{}", artifact.document),
    }
    Ok(())
}

fn print_usage() {
    println!("synergia-server v{}", env!("CARGO_PKG_VERSION"));
    println!("Usage: synergia-server [command]");
    println!("  serve                              Serve the calendar feeds (default)");
    println!("  export <lessons|events> [path]     Fetch one feed and write it to path or stdout");
}
