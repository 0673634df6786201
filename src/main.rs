//! feedgrab, a cron-driven RSS torrent grabber.
//!
//! ## Architecture overview
//!
//! ```text
//! ┌──────────┐  tick   ┌──────────┐  per subscription  ┌─────────────┐
//! │ poll.rs  │ ──────► │ cycle.rs │ ─────────────────► │ matcher.rs  │
//! │ (cron)   │         │ (Runner) │                    │ download.rs │
//! └──────────┘         └──────────┘                    └─────────────┘
//!                        │      │                             │
//!              cache.rs ◄┘      └► logging.rs      watermark.rs ◄┘
//! ```
//!
//! * **`source/`**: the `Fetcher` trait, the HTTP implementation and RSS
//!   parsing into `FeedItem`s.
//! * **`config`**: the JSON configuration file and its validation.
//! * **`poll`**: cron parsing and the scheduling loop.
//! * **`cycle`**: one pass over every subscription, with overlap guard and
//!   end-of-cycle cleanup.
//! * **`cache`**: per-cycle feed memoization.
//! * **`matcher`**: subscription title filters.
//! * **`download`**: watermark checks, payload download and saving.
//! * **`watermark`**: per-subscription "last downloaded" records.
//! * **`logging`**: tracing setup over a size-rotated log file.
//! * **`main`**: wires everything together and waits for Ctrl-C.

mod cache;
mod config;
mod cycle;
mod download;
mod error;
mod logging;
mod matcher;
mod poll;
mod source;
mod watermark;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use config::Config;
use cycle::Runner;
use poll::CronSchedule;
use source::HttpFetcher;

const DEFAULT_CONFIG_PATH: &str = "config.json";

#[tokio::main]
async fn main() -> Result<()> {
    // -- parse arguments -----------------------------------------------------
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.into());

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load configuration from {config_path}"))?;

    // -- logging (file sink is shared with the runner for housekeeping) -----
    let sink = logging::init(&config.log).context("failed to initialise logging")?;
    match sink.active_path() {
        Ok(path) => info!(config = %config_path, log = %path.display(), "Starting service"),
        Err(e) => warn!(config = %config_path, error = %e, "Starting service, log path unknown"),
    }

    // -- wire the runner -----------------------------------------------------
    let schedule = CronSchedule::parse(&config.cron)?;
    let fetcher = Arc::new(HttpFetcher::new(config.request_timeout())?);
    let runner = Arc::new(Runner::new(&config, fetcher, sink)?);

    // -- run until interrupted -----------------------------------------------
    tokio::select! {
        _ = poll::run(runner, schedule) => {}
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for Ctrl-C")?;
            info!("Interrupted");
        }
    }

    info!("Stopping");
    Ok(())
}
