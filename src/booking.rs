use std::process::ExitCode;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::client::{BookingApi, CultClient, ScheduleOutcome};
use crate::config::Settings;
use crate::models::TargetCriteria;

/// When the loop sleeps and tries again instead of stopping.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub interval: Duration,
    /// Keep polling while the target date is not listed yet.
    pub retry_until_open: bool,
    /// Treat a failed schedule fetch as transient instead of "nothing to do".
    pub retry_on_network_error: bool,
    /// `None` polls until a terminal state.
    pub max_retries: Option<u32>,
}

impl RetryPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            interval: settings.poll_interval,
            retry_until_open: settings.retry_until_open,
            retry_on_network_error: settings.retry_on_network_error,
            max_retries: settings.max_retries,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Booked { class_id: String, attempts: u32 },
    /// Dry run found a class it would have booked.
    WouldBook { class_id: String },
    AuthFailed,
    /// The date has no classes, is closed without retry, or the fetch failed.
    NoClasses,
    NoMatch,
    Exhausted { retries: u32 },
}

impl RunOutcome {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            RunOutcome::Booked { .. } | RunOutcome::WouldBook { .. } => ExitCode::SUCCESS,
            RunOutcome::AuthFailed => ExitCode::from(2),
            RunOutcome::NoMatch => ExitCode::from(3),
            RunOutcome::NoClasses => ExitCode::from(4),
            RunOutcome::Exhausted { .. } => ExitCode::from(5),
        }
    }
}

enum Step {
    Done(RunOutcome),
    Retry(&'static str),
}

/// Poll the schedule for `criteria.date` and book the first matching class.
///
/// Sleeps `policy.interval` between attempts; the date is never recomputed.
pub(crate) async fn run_booking_loop<A: BookingApi>(
    api: &A,
    criteria: &TargetCriteria,
    policy: &RetryPolicy,
    dry_run: bool,
) -> RunOutcome {
    let date = criteria.date_key();
    let mut retries: u32 = 0;
    let mut attempts: u32 = 0;

    loop {
        let step = match api
            .fetch_available_classes(&criteria.center_id, &date)
            .await
        {
            ScheduleOutcome::AuthFailed(status) => {
                error!(
                    "Terminating due to authentication failure (status {}).",
                    status
                );
                Step::Done(RunOutcome::AuthFailed)
            }
            ScheduleOutcome::NotOpen if policy.retry_until_open => {
                Step::Retry("Booking date not yet available.")
            }
            ScheduleOutcome::NotOpen => {
                warn!("Target date {} is not open and retrying is disabled. Exiting.", date);
                Step::Done(RunOutcome::NoClasses)
            }
            ScheduleOutcome::NetworkError(_) if policy.retry_on_network_error => {
                Step::Retry("Could not reach the schedule.")
            }
            ScheduleOutcome::NetworkError(_) => {
                warn!("Could not retrieve any classes for the target date. Exiting.");
                Step::Done(RunOutcome::NoClasses)
            }
            ScheduleOutcome::Available(classes) if classes.is_empty() => {
                warn!("Could not retrieve any classes for the target date. Exiting.");
                Step::Done(RunOutcome::NoClasses)
            }
            ScheduleOutcome::Available(classes) => {
                match CultClient::find_target_class(
                    &classes,
                    &criteria.start_time,
                    &criteria.workout_name,
                ) {
                    None => {
                        info!("No target class found to book. Exiting.");
                        Step::Done(RunOutcome::NoMatch)
                    }
                    Some(class) if dry_run => {
                        info!("[DRY RUN] Would book class {}", class.class_id());
                        Step::Done(RunOutcome::WouldBook {
                            class_id: class.class_id(),
                        })
                    }
                    Some(class) => {
                        let class_id = class.class_id();
                        attempts += 1;
                        if api.book_class(&class_id).await {
                            info!("Booking successful. Terminating.");
                            Step::Done(RunOutcome::Booked { class_id, attempts })
                        } else {
                            Step::Retry("Booking attempt failed.")
                        }
                    }
                }
            }
        };

        match step {
            Step::Done(outcome) => return outcome,
            Step::Retry(reason) => {
                if policy.max_retries.is_some_and(|max| retries >= max) {
                    error!("{} Giving up after {} retries.", reason, retries);
                    return RunOutcome::Exhausted { retries };
                }
                retries += 1;
                warn!(
                    "{} Retrying in {}s (retry {})...",
                    reason,
                    policy.interval.as_secs(),
                    retries
                );
                tokio::time::sleep(policy.interval).await;
            }
        }
    }
}
