//! Replays a scripted chat session against the in-memory homeserver and prints the
//! resulting repository state as JSON.

mod config;
mod error;
mod fixture;
mod logging;
mod replay;

use std::env;

use tracing::info;

use crate::{config::ReplayConfig, error::ReplayError, fixture::Fixture, replay::Replay};

#[tokio::main]
async fn main() {
    logging::init();

    match run().await {
        Ok(report) => println!("{report}"),
        Err(err) => {
            eprintln!("chatsync-replay: {err}");
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<String, ReplayError> {
    let config = ReplayConfig::from_env(env::args().skip(1))?;
    let fixture = Fixture::load(&config.fixture_path).await?;
    info!(
        path = %config.fixture_path.display(),
        rooms = fixture.rooms.len(),
        actions = fixture.actions.len(),
        "fixture loaded"
    );

    let report = Replay::new(&fixture, &config)?.run(&fixture).await;
    Ok(serde_json::to_string_pretty(&report)?)
}
