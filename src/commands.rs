use std::process::ExitCode;

use anyhow::Result;
use chrono::NaiveDate;
use tracing::info;

use crate::booking::{self, RetryPolicy, RunOutcome};
use crate::client::{CultClient, ScheduleOutcome};
use crate::config::Settings;
use crate::models::{ClassRecord, TargetCriteria};
use crate::scheduler;

fn build_client(settings: &Settings) -> Result<CultClient> {
    CultClient::new(
        &settings.base_url,
        &settings.credentials,
        settings.request_timeout,
    )
}

pub async fn run_book(settings: &Settings, dry_run: bool) -> Result<RunOutcome> {
    let client = build_client(settings)?;
    let criteria = settings.criteria(scheduler::today(settings.timezone))?;
    let policy = RetryPolicy::from_settings(settings);

    info!(
        "Target: '{}' at {} on {} (center {}, {} days ahead)",
        criteria.workout_name,
        criteria.start_time,
        criteria.date_key(),
        criteria.center_id,
        settings.days_in_advance
    );
    info!(
        "Polling every {}s, retry until open: {}, retry on network error: {}, max retries: {}",
        policy.interval.as_secs(),
        policy.retry_until_open,
        policy.retry_on_network_error,
        policy
            .max_retries
            .map_or_else(|| "unlimited".to_string(), |n| n.to_string())
    );

    let outcome = booking::run_booking_loop(&client, &criteria, &policy, dry_run).await;
    Ok(outcome)
}

/// Fetch the schedule once and print what is on offer for the target (or given) date.
pub async fn run_classes(settings: &Settings, date: Option<NaiveDate>) -> Result<ExitCode> {
    let client = build_client(settings)?;
    let mut criteria = settings.criteria(scheduler::today(settings.timezone))?;
    if let Some(d) = date {
        criteria.date = d;
    }

    let outcome = match client
        .fetch_available_classes(&criteria.center_id, &criteria.date_key())
        .await
    {
        ScheduleOutcome::Available(classes) if classes.is_empty() => {
            println!("No classes listed for {}.", criteria.date_key());
            RunOutcome::NoClasses
        }
        ScheduleOutcome::Available(classes) => {
            println!(
                "Classes at center {} on {}:\n",
                criteria.center_id,
                criteria.date_key()
            );
            for class in &classes {
                println!("{}", format_class_line(class, &criteria));
            }
            return Ok(ExitCode::SUCCESS);
        }
        ScheduleOutcome::NotOpen => {
            println!("{} is not open for booking yet.", criteria.date_key());
            RunOutcome::NoClasses
        }
        ScheduleOutcome::NetworkError(e) => {
            println!("Could not fetch the schedule: {}", e);
            RunOutcome::NoClasses
        }
        ScheduleOutcome::AuthFailed(status) => {
            println!("Schedule request rejected ({}). Refresh your tokens.", status);
            RunOutcome::AuthFailed
        }
    };

    Ok(outcome.exit_code())
}

fn format_class_line(class: &ClassRecord, criteria: &TargetCriteria) -> String {
    let matches = class.matches(&criteria.start_time, &criteria.workout_name);
    format!(
        "{} {} — {} [{}, {} seats] (ID: {})",
        if matches { "*" } else { " " },
        class.start_time.as_deref().unwrap_or("?"),
        class.workout_name.as_deref().unwrap_or("?"),
        class.state.as_deref().unwrap_or("?"),
        class.available_seats,
        class.class_id()
    )
}
