use std::fmt;

use anyhow::{bail, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Class state the vendor reports for a slot that can still be booked.
pub const STATE_AVAILABLE: &str = "AVAILABLE";

/// On-disk configuration. Every field is optional so the environment can fill gaps.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FileConfig {
    pub credentials: CredentialsConfig,
    pub target: TargetConfig,
    pub api: ApiConfig,
    pub polling: PollingConfig,
}

#[derive(Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub api_key: Option<String>,
    pub at_token: Option<String>,
    pub st_token: Option<String>,
}

impl fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("at_token", &self.at_token.as_ref().map(|_| "<redacted>"))
            .field("st_token", &self.st_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TargetConfig {
    pub center_id: Option<String>,
    pub preferred_time: Option<String>,
    pub workout_name: Option<String>,
    pub days_in_advance: Option<i64>,
    /// IANA zone used to decide what "today" is, e.g. "Asia/Kolkata".
    pub timezone: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_secs: Option<u64>,
    pub retry_until_open: Option<bool>,
    pub retry_on_network_error: Option<bool>,
    pub max_retries: Option<u32>,
}

/// API key plus the two session cookies. Fixed for the lifetime of the process.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    at_token: String,
    st_token: String,
}

impl Credentials {
    pub fn new(api_key: &str, at_token: &str, st_token: &str) -> Result<Self> {
        let missing: Vec<&str> = [
            ("api key", api_key),
            ("at token", at_token),
            ("st token", st_token),
        ]
        .iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(name, _)| *name)
        .collect();

        if !missing.is_empty() {
            bail!(
                "API key and authentication tokens are required (missing: {})",
                missing.join(", ")
            );
        }

        Ok(Self {
            api_key: api_key.trim().to_string(),
            at_token: at_token.trim().to_string(),
            st_token: st_token.trim().to_string(),
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn at_token(&self) -> &str {
        &self.at_token
    }

    pub fn st_token(&self) -> &str {
        &self.st_token
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credentials { <redacted> }")
    }
}

/// What the run is trying to book. Computed once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetCriteria {
    pub center_id: String,
    pub date: NaiveDate,
    pub start_time: String,
    pub workout_name: String,
}

impl TargetCriteria {
    /// Date in the `YYYY-MM-DD` form the schedule keys days by.
    pub fn date_key(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }
}

/// Response of the schedule-by-center endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleResponse {
    #[serde(default)]
    pub class_by_date_list: Vec<DaySchedule>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaySchedule {
    pub id: String,
    #[serde(default)]
    pub class_by_time_list: Vec<TimeSlot>,
}

#[derive(Debug, Deserialize)]
pub struct TimeSlot {
    #[serde(default)]
    pub classes: Vec<ClassRecord>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRecord {
    /// `Null` when the vendor omits it; such a record is never booked.
    #[serde(default)]
    pub id: serde_json::Value,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub available_seats: i64,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub workout_name: Option<String>,
}

impl ClassRecord {
    /// The vendor sends ids as strings or numbers; either way we book by the bare text.
    pub fn class_id(&self) -> String {
        match &self.id {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    pub fn is_bookable(&self) -> bool {
        self.state.as_deref() == Some(STATE_AVAILABLE) && self.available_seats > 0
    }

    /// Bookable and exactly at `time` for `workout_name`. No partial matches.
    pub fn matches(&self, time: &str, workout_name: &str) -> bool {
        !self.id.is_null()
            && self.is_bookable()
            && self.start_time.as_deref() == Some(time)
            && self.workout_name.as_deref() == Some(workout_name)
    }
}
