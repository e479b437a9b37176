use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use chrono_tz::Tz;
use reqwest::Url;
use tracing::{debug, warn};

use crate::models::{Credentials, FileConfig, TargetCriteria};
use crate::scheduler;

pub const DEFAULT_BASE_URL: &str = "https://www.cult.fit/api";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 180;

pub const ENV_API_KEY: &str = "CULT_API_KEY";
pub const ENV_AT_TOKEN: &str = "CULT_AT_TOKEN";
pub const ENV_ST_TOKEN: &str = "CULT_ST_TOKEN";
pub const ENV_CENTER_ID: &str = "CENTER_ID";
pub const ENV_PREFERRED_TIME: &str = "PREFERRED_TIME";
pub const ENV_WORKOUT_NAME: &str = "PREFERRED_WORKOUT_NAME";
pub const ENV_DAYS_IN_ADVANCE: &str = "DAYS_IN_ADVANCE";

/// Read the TOML config file. A missing file is only an error when `required`.
pub fn load_config(path: &Path, required: bool) -> Result<FileConfig> {
    if !required && !path.exists() {
        debug!("No config file at {}, using environment only", path.display());
        return Ok(FileConfig::default());
    }
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let config: FileConfig =
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(config)
}

/// Load `KEY=value` pairs from an env file into the process environment.
/// Variables already set in the environment are left alone.
pub fn load_env_file(path: &Path, required: bool) -> Result<()> {
    match dotenvy::from_path(path) {
        Ok(()) => {
            debug!("Loaded environment from {}", path.display());
            Ok(())
        }
        Err(e) if e.not_found() && !required => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to load {}", path.display())),
    }
}

/// Per-run overrides from the command line.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub center_id: Option<String>,
    pub preferred_time: Option<String>,
    pub workout_name: Option<String>,
    pub days_in_advance: Option<i64>,
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub credentials: Credentials,
    pub base_url: Url,
    pub request_timeout: Duration,
    pub center_id: String,
    pub preferred_time: String,
    pub workout_name: String,
    pub days_in_advance: i64,
    pub timezone: Option<Tz>,
    pub poll_interval: Duration,
    pub retry_until_open: bool,
    pub retry_on_network_error: bool,
    pub max_retries: Option<u32>,
}

impl Settings {
    /// Merge file, environment and command line (in increasing priority) and validate.
    pub fn resolve<F>(file: FileConfig, overrides: &Overrides, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let api_key = env(ENV_API_KEY).or(file.credentials.api_key);
        let at_token = env(ENV_AT_TOKEN).or(file.credentials.at_token);
        let st_token = env(ENV_ST_TOKEN).or(file.credentials.st_token);
        let credentials = Credentials::new(
            api_key.as_deref().unwrap_or_default(),
            at_token.as_deref().unwrap_or_default(),
            st_token.as_deref().unwrap_or_default(),
        )?;

        let center_id = required(
            "center id",
            ENV_CENTER_ID,
            overrides
                .center_id
                .clone()
                .or_else(|| env(ENV_CENTER_ID))
                .or(file.target.center_id),
        )?;
        let preferred_time = required(
            "preferred time",
            ENV_PREFERRED_TIME,
            overrides
                .preferred_time
                .clone()
                .or_else(|| env(ENV_PREFERRED_TIME))
                .or(file.target.preferred_time),
        )?;
        if !scheduler::is_vendor_time(&preferred_time) {
            warn!(
                "Preferred time '{}' is not in HH:MM:SS form; it must match the schedule's startTime exactly",
                preferred_time
            );
        }
        let workout_name = required(
            "workout name",
            ENV_WORKOUT_NAME,
            overrides
                .workout_name
                .clone()
                .or_else(|| env(ENV_WORKOUT_NAME))
                .or(file.target.workout_name),
        )?;

        let days_in_advance = match overrides.days_in_advance {
            Some(d) => d,
            None => match env(ENV_DAYS_IN_ADVANCE) {
                Some(raw) => scheduler::parse_days_in_advance(&raw)?,
                None => match file.target.days_in_advance {
                    Some(d) => d,
                    None => bail!("Days in advance is required (set {})", ENV_DAYS_IN_ADVANCE),
                },
            },
        };
        let days_in_advance = scheduler::check_days_in_advance(days_in_advance)?;

        let timezone = match file.target.timezone.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => Some(
                name.parse::<Tz>()
                    .map_err(|e| anyhow::anyhow!("Unknown timezone '{}': {}", name, e))?,
            ),
            _ => None,
        };

        let base_url_str = file.api.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let base_url = Url::parse(base_url_str)
            .with_context(|| format!("Invalid API base URL '{}'", base_url_str))?;

        let interval_secs = file
            .polling
            .interval_secs
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        if interval_secs == 0 {
            bail!("Poll interval must be at least one second");
        }

        let retry_until_open = file
            .polling
            .retry_until_open
            .unwrap_or(days_in_advance == scheduler::BOOKING_WINDOW_DAYS);

        Ok(Self {
            credentials,
            base_url,
            request_timeout: Duration::from_secs(
                file.api
                    .request_timeout_secs
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            center_id,
            preferred_time,
            workout_name,
            days_in_advance,
            timezone,
            poll_interval: Duration::from_secs(interval_secs),
            retry_until_open,
            // A failed fetch looks like "not open yet" unless configured otherwise.
            retry_on_network_error: file
                .polling
                .retry_on_network_error
                .unwrap_or(retry_until_open),
            max_retries: overrides.max_retries.or(file.polling.max_retries),
        })
    }

    /// Criteria for a run starting on `today`.
    pub fn criteria(&self, today: NaiveDate) -> Result<TargetCriteria> {
        Ok(TargetCriteria {
            center_id: self.center_id.clone(),
            date: scheduler::target_date(today, self.days_in_advance)?,
            start_time: self.preferred_time.clone(),
            workout_name: self.workout_name.clone(),
        })
    }
}

fn required(what: &str, env_key: &str, value: Option<String>) -> Result<String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => bail!("{} is required (set {} or the config file)", what, env_key),
    }
}
