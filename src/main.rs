//! Dry Weight Watchers companion - headless entry point
//!
//! Restores the stored session and runs one command against the API:
//!
//! ```text
//! dww-companion [status]       restore the session and show the profile
//! dww-companion record <kg>    record a weight in kilograms
//! dww-companion logout         clear the stored session
//! ```
//!
//! With no stored session, `DWW_EMAIL` and `DWW_PASSWORD` are used to log in.

use anyhow::{bail, Context};
use tracing::{info, warn};

use dww_companion::auth::{SessionEvent, SessionState};
use dww_companion::units::{format_weight, WeightUnit};
use dww_companion::{config::Config, logging, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    logging::init(&config.log_dir());
    info!("Dry Weight Watchers companion starting...");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let state = AppState::new(config).context("failed to initialise API client")?;

    let mut events = state.session.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if event == SessionEvent::Expired {
                warn!("Session expired, please log in again");
            }
        }
    });

    if args.first().map(String::as_str) == Some("logout") {
        state.session.logout().await;
        println!("Logged out");
        return Ok(());
    }

    if state.session.restore().await == SessionState::Unauthenticated {
        let (Ok(email), Ok(password)) = (std::env::var("DWW_EMAIL"), std::env::var("DWW_PASSWORD"))
        else {
            bail!("not logged in; set DWW_EMAIL and DWW_PASSWORD");
        };
        state
            .session
            .login_with_password(&email, &password)
            .await
            .context("login failed")?;
    }

    match args.first().map(String::as_str) {
        None | Some("status") => {
            let profile = state.api.profile().await.context("failed to fetch profile")?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }
        Some("record") => {
            let kg: f64 = args
                .get(1)
                .context("usage: dww-companion record <kg>")?
                .parse()
                .context("weight must be a number")?;
            state.api.record_weight(kg).await.context("failed to record weight")?;
            println!("Recorded {}", format_weight(kg, WeightUnit::Metric));
        }
        Some(other) => bail!("unknown command: {}", other),
    }

    Ok(())
}
