//! Cron-driven cycle scheduling.
//!
//! [`run`] fires one cycle straight away and then one per tick of the
//! configured cron schedule, forever.  Ticks are computed in local time.
//!
//! ## For contributors
//!
//! Classic five-field expressions (`minute hour day month weekday`) are
//! accepted and normalized by pinning the seconds field to `0`.  The six
//! and seven field forms of the [`cron`] crate pass through untouched.
//! Each cycle is awaited before the next tick is computed, so ticks that
//! pass during a long cycle are skipped rather than queued.  Dropping the
//! future returned by [`run`] cancels the in-flight cycle, whose cleanup
//! still runs.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use cron::Schedule;
use tracing::{debug, info};

use crate::cycle::Runner;
use crate::error::{Error, Result};

/// A parsed, normalized cron schedule.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    schedule: Schedule,
    expression: String,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let fields = expression.split_whitespace().count();
        let normalized = match fields {
            5 => format!("0 {}", expression.trim()),
            6 | 7 => expression.trim().to_string(),
            n => {
                return Err(Error::config(
                    format!("cron expression must have 5, 6 or 7 fields, got {n}"),
                    "cron",
                ))
            }
        };
        let schedule = Schedule::from_str(&normalized)?;
        Ok(Self {
            schedule,
            expression: normalized,
        })
    }

    /// The expression as handed to the cron parser.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First tick strictly after `now`, if the schedule has one.
    pub fn next_after(&self, now: &DateTime<Local>) -> Option<DateTime<Local>> {
        self.schedule.after(now).next()
    }
}

/// Run cycles forever: once now, then on every schedule tick.
///
/// Returns only if the schedule runs out of ticks.
pub async fn run(runner: Arc<Runner>, schedule: CronSchedule) {
    info!(cron = %schedule.expression(), "Scheduler started");
    runner.run_cycle().await;

    loop {
        let now = Local::now();
        let Some(next) = schedule.next_after(&now) else {
            info!("Schedule has no further ticks, stopping");
            return;
        };
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        debug!(next = %next.to_rfc3339(), wait_secs = wait.as_secs(), "Waiting for next tick");
        tokio::time::sleep(wait).await;

        runner.run_cycle().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, LogSettings, Subscription};
    use crate::logging::LogSink;
    use crate::source::HttpFetcher;
    use chrono::{TimeZone, Timelike};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const EMPTY_FEED: &str = r#"<?xml version="1.0"?><rss version="2.0"><channel><title>t</title></channel></rss>"#;

    #[test]
    fn five_fields_get_a_zero_seconds_field() {
        let schedule = CronSchedule::parse("*/15 * * * *").unwrap();
        assert_eq!(schedule.expression(), "0 */15 * * * *");
    }

    #[test]
    fn six_and_seven_fields_pass_through() {
        assert_eq!(
            CronSchedule::parse("30 0 * * * *").unwrap().expression(),
            "30 0 * * * *"
        );
        assert!(CronSchedule::parse("0 0 12 * * * 2030").is_ok());
    }

    #[test]
    fn wrong_field_counts_are_config_errors() {
        for expr in ["", "* * *", "0 0 0 0 0 0 0 0"] {
            let err = CronSchedule::parse(expr).unwrap_err();
            assert!(matches!(err, Error::Config { .. }), "{expr:?}: {err:?}");
        }
    }

    #[test]
    fn garbage_fields_are_schedule_errors() {
        let err = CronSchedule::parse("every day at noon ok").unwrap_err();
        assert!(matches!(err, Error::Schedule(_)), "{err:?}");
    }

    #[test]
    fn next_tick_lands_on_the_schedule() {
        let schedule = CronSchedule::parse("*/15 * * * *").unwrap();
        let now = Local.with_ymd_and_hms(2024, 3, 10, 10, 7, 30).unwrap();

        let next = schedule.next_after(&now).unwrap();

        assert!(next > now);
        assert_eq!(next.minute(), 15);
        assert_eq!(next.second(), 0);
    }

    #[test]
    fn exhausted_schedule_has_no_next_tick() {
        let schedule = CronSchedule::parse("0 0 12 1 1 * 2020").unwrap();
        assert!(schedule.next_after(&Local::now()).is_none());
    }

    #[tokio::test]
    async fn stopping_the_scheduler_cancels_the_running_cycle() {
        let server = MockServer::start().await;
        // Eager cycle is quick, the first ticked one hangs on the feed.
        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string(EMPTY_FEED))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(EMPTY_FEED)
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let root = tempfile::tempdir().unwrap();
        let config = Config {
            cron: "* * * * * *".into(),
            done_directory: root.path().join("done"),
            request_timeout_seconds: 5,
            log: LogSettings {
                directory: root.path().join("logs"),
                ..LogSettings::default()
            },
            subscriptions: vec![Subscription {
                name: "show".into(),
                filter_pattern: "Show".into(),
                case_insensitive: true,
                feed_url: format!("{}/rss", server.uri()),
                save_location: root.path().join("save"),
            }],
        };
        let fetcher = Arc::new(HttpFetcher::new(config.request_timeout()).unwrap());
        let log = LogSink::open(&config.log).unwrap();
        let runner = Arc::new(Runner::new(&config, fetcher, log).unwrap());
        let schedule = CronSchedule::parse(&config.cron).unwrap();

        let stopped =
            tokio::time::timeout(Duration::from_millis(1800), run(Arc::clone(&runner), schedule))
                .await;
        assert!(stopped.is_err(), "scheduler runs until stopped");

        // Nothing left running in the background once the scheduler is gone.
        assert!(runner.run_cycle().await.is_some());
    }
}
