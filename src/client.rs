use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode, Url};
use tracing::{debug, error, info, warn};

use crate::models::{ClassRecord, Credentials, ScheduleResponse};

const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/96.0.4664.110 Safari/537.36";

/// Result of polling the schedule for one date.
#[derive(Debug)]
pub enum ScheduleOutcome {
    /// The date is open; all of its classes in vendor order (may be empty).
    Available(Vec<ClassRecord>),
    /// The schedule does not list the date yet.
    NotOpen,
    /// Transport failure, timeout or an unreadable body.
    NetworkError(String),
    /// Any non-200 response. Usually expired `at`/`st` tokens.
    AuthFailed(StatusCode),
}

/// The two calls the booking loop needs.
pub(crate) trait BookingApi {
    async fn fetch_available_classes(&self, center_id: &str, date: &str) -> ScheduleOutcome;
    async fn book_class(&self, class_id: &str) -> bool;
}

pub struct CultClient {
    client: Client,
    base_url: String,
}

impl CultClient {
    pub fn new(base_url: &Url, credentials: &Credentials, timeout: Duration) -> Result<Self> {
        let jar = Jar::default();
        jar.add_cookie_str(&format!("at={}", credentials.at_token()), base_url);
        jar.add_cookie_str(&format!("st={}", credentials.st_token()), base_url);

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_UA));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        let mut api_key = HeaderValue::from_str(credentials.api_key())
            .context("API key contains characters not allowed in a header")?;
        api_key.set_sensitive(true);
        headers.insert("apikey", api_key);

        let client = Client::builder()
            .default_headers(headers)
            .cookie_provider(Arc::new(jar))
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
        })
    }

    /// Fetch the center's schedule and return the classes listed for `date` (`YYYY-MM-DD`).
    pub async fn fetch_available_classes(&self, center_id: &str, date: &str) -> ScheduleOutcome {
        let url = format!("{}/cult/classes", self.base_url);
        info!("Fetching classes for center {} on {}...", center_id, date);

        let resp = match self
            .client
            .get(&url)
            .query(&[("center", center_id)])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!("Failed to fetch classes: {}", e);
                error!("No response received from server.");
                return ScheduleOutcome::NetworkError(e.to_string());
            }
        };

        let status = resp.status();
        let text = match resp.text().await {
            Ok(t) => t,
            Err(e) => {
                error!("Failed to read schedule response (status {}): {}", status, e);
                return ScheduleOutcome::NetworkError(e.to_string());
            }
        };

        if status != StatusCode::OK {
            error!(
                "Authentication failed (status {}). Your 'at' and 'st' tokens have likely expired.",
                status
            );
            error!("Log in to cult.fit manually and update your tokens.");
            debug!("Schedule response body: {}", text);
            return ScheduleOutcome::AuthFailed(status);
        }
        debug!("Schedule response: {}", text);

        let schedule: ScheduleResponse = match serde_json::from_str(&text) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to parse schedule response: {}", e);
                error!("Response content: {}", text);
                return ScheduleOutcome::NetworkError(format!("malformed schedule: {e}"));
            }
        };

        match schedule
            .class_by_date_list
            .into_iter()
            .find(|day| day.id == date)
        {
            Some(day) => {
                let classes: Vec<ClassRecord> = day
                    .class_by_time_list
                    .into_iter()
                    .flat_map(|slot| slot.classes)
                    .collect();
                info!(
                    "Found {} total classes for the target date {}.",
                    classes.len(),
                    date
                );
                ScheduleOutcome::Available(classes)
            }
            None => {
                info!("Target date {} is not yet available for booking.", date);
                ScheduleOutcome::NotOpen
            }
        }
    }

    /// First class in `classes` that is open, has a seat, and matches both the
    /// start time and the workout name exactly.
    pub fn find_target_class<'a>(
        classes: &'a [ClassRecord],
        time: &str,
        workout_name: &str,
    ) -> Option<&'a ClassRecord> {
        info!("Searching for workout '{}' at {}...", workout_name, time);
        let found = classes.iter().find(|c| c.matches(time, workout_name));
        match found {
            Some(c) => info!(
                "Found matching class: ID {}, Seats: {}",
                c.class_id(),
                c.available_seats
            ),
            None => warn!("No matching, available class found for the specified criteria."),
        }
        found
    }

    /// Book a class by id. True only on HTTP 200.
    pub async fn book_class(&self, class_id: &str) -> bool {
        let url = format!(
            "{}/cult/class/{}/book",
            self.base_url,
            urlencoding::encode(class_id)
        );
        info!("Attempting to book class with ID: {}", class_id);

        let resp = match self.client.post(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                error!("An error occurred during booking request: {}", e);
                return false;
            }
        };

        let status = resp.status();
        if status == StatusCode::OK {
            info!("Successfully booked class!");
            return true;
        }

        let text = resp.text().await.unwrap_or_default();
        error!("Booking failed. Status code: {}", status);
        error!("Response: {}", text);
        false
    }
}

impl BookingApi for CultClient {
    async fn fetch_available_classes(&self, center_id: &str, date: &str) -> ScheduleOutcome {
        CultClient::fetch_available_classes(self, center_id, date).await
    }

    async fn book_class(&self, class_id: &str) -> bool {
        CultClient::book_class(self, class_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn creds() -> Credentials {
        Credentials::new("test-key", "at-123", "st-456").unwrap()
    }

    fn client_for(server: &MockServer) -> CultClient {
        let base = Url::parse(&server.base_url()).unwrap();
        CultClient::new(&base, &creds(), Duration::from_secs(5)).unwrap()
    }

    fn class(id: u64, state: &str, seats: i64, time: &str, name: &str) -> ClassRecord {
        serde_json::from_value(json!({
            "id": id,
            "state": state,
            "availableSeats": seats,
            "startTime": time,
            "workoutName": name,
        }))
        .unwrap()
    }

    fn ids(classes: &[ClassRecord]) -> Vec<String> {
        classes.iter().map(|c| c.class_id()).collect()
    }

    #[tokio::test]
    async fn test_fetch_flattens_time_slots_in_order() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/cult/classes")
                    .query_param("center", "42")
                    .header("apikey", "test-key")
                    .header_exists("cookie");
                then.status(200).json_body(json!({
                    "classByDateList": [
                        {"id": "2024-05-31", "classByTimeList": [
                            {"classes": [{"id": 99}]}
                        ]},
                        {"id": "2024-06-01", "classByTimeList": [
                            {"classes": [{"id": 1}, {"id": 2}]},
                            {"classes": []},
                            {"classes": [{"id": "3"}]}
                        ]}
                    ]
                }));
            })
            .await;

        let client = client_for(&server);
        match client.fetch_available_classes("42", "2024-06-01").await {
            ScheduleOutcome::Available(classes) => assert_eq!(ids(&classes), ["1", "2", "3"]),
            other => panic!("unexpected outcome: {:?}", other),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_tolerates_record_without_id() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/cult/classes");
                then.status(200).json_body(json!({
                    "classByDateList": [{"id": "2024-06-01", "classByTimeList": [
                        {"classes": [
                            {"state": "AVAILABLE", "availableSeats": 1,
                             "startTime": "19:00:00", "workoutName": "HRX"},
                            {"id": 5, "state": "AVAILABLE", "availableSeats": 1,
                             "startTime": "19:00:00", "workoutName": "HRX"}
                        ]}
                    ]}]
                }));
            })
            .await;

        let client = client_for(&server);
        match client.fetch_available_classes("42", "2024-06-01").await {
            ScheduleOutcome::Available(classes) => {
                assert_eq!(classes.len(), 2);
                let found = CultClient::find_target_class(&classes, "19:00:00", "HRX").unwrap();
                assert_eq!(found.class_id(), "5");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_empty_day_is_available_but_empty() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/cult/classes");
                then.status(200).json_body(json!({
                    "classByDateList": [{"id": "2024-06-01", "classByTimeList": []}]
                }));
            })
            .await;

        let client = client_for(&server);
        match client.fetch_available_classes("42", "2024-06-01").await {
            ScheduleOutcome::Available(classes) => assert!(classes.is_empty()),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_missing_date_is_not_open() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/cult/classes");
                then.status(200).json_body(json!({
                    "classByDateList": [{"id": "2024-06-1", "classByTimeList": [
                        {"classes": [{"id": 1}]}
                    ]}]
                }));
            })
            .await;

        let client = client_for(&server);
        assert!(matches!(
            client.fetch_available_classes("42", "2024-06-01").await,
            ScheduleOutcome::NotOpen
        ));
    }

    #[tokio::test]
    async fn test_fetch_non_200_is_auth_failure_regardless_of_body() {
        for status in [401u16, 403, 404, 500] {
            let server = MockServer::start_async().await;
            server
                .mock_async(|when, then| {
                    when.method(GET).path("/cult/classes");
                    then.status(status).json_body(json!({
                        "classByDateList": [{"id": "2024-06-01", "classByTimeList": []}]
                    }));
                })
                .await;

            let client = client_for(&server);
            match client.fetch_available_classes("42", "2024-06-01").await {
                ScheduleOutcome::AuthFailed(code) => assert_eq!(code.as_u16(), status),
                other => panic!("status {}: unexpected outcome {:?}", status, other),
            }
        }
    }

    #[tokio::test]
    async fn test_fetch_malformed_body_is_network_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/cult/classes");
                then.status(200).body("<html>maintenance</html>");
            })
            .await;

        let client = client_for(&server);
        assert!(matches!(
            client.fetch_available_classes("42", "2024-06-01").await,
            ScheduleOutcome::NetworkError(_)
        ));
    }

    #[tokio::test]
    async fn test_fetch_unreachable_host_is_network_error() {
        let base = Url::parse("http://127.0.0.1:9").unwrap();
        let client = CultClient::new(&base, &creds(), Duration::from_secs(2)).unwrap();
        assert!(matches!(
            client.fetch_available_classes("42", "2024-06-01").await,
            ScheduleOutcome::NetworkError(_)
        ));
    }

    #[tokio::test]
    async fn test_book_class_true_only_on_200() {
        let server = MockServer::start_async().await;
        let ok = server
            .mock_async(|when, then| {
                when.method(POST).path("/cult/class/1001/book");
                then.status(200).json_body(json!({"status": "BOOKED"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/cult/class/1002/book");
                then.status(409).body("already booked");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/cult/class/1003/book");
                then.status(500).body("oops");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/cult/class/1004/book");
                then.status(201);
            })
            .await;

        let client = client_for(&server);
        assert!(client.book_class("1001").await);
        assert!(!client.book_class("1002").await);
        assert!(!client.book_class("1003").await);
        assert!(!client.book_class("1004").await);
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn test_book_class_network_error_is_false() {
        let base = Url::parse("http://127.0.0.1:9").unwrap();
        let client = CultClient::new(&base, &creds(), Duration::from_secs(2)).unwrap();
        assert!(!client.book_class("1001").await);
    }

    #[test]
    fn test_find_requires_all_four_conditions() {
        let classes = vec![
            class(1, "FULL", 3, "19:00:00", "HRX"),
            class(2, "AVAILABLE", 0, "19:00:00", "HRX"),
            class(3, "AVAILABLE", 3, "18:00:00", "HRX"),
            class(4, "AVAILABLE", 3, "19:00:00", "YOGA"),
        ];
        assert!(CultClient::find_target_class(&classes, "19:00:00", "HRX").is_none());
    }

    #[test]
    fn test_find_returns_first_match() {
        let classes = vec![
            class(1, "AVAILABLE", 0, "19:00:00", "HRX"),
            class(2, "AVAILABLE", 1, "19:00:00", "HRX"),
            class(3, "AVAILABLE", 9, "19:00:00", "HRX"),
        ];
        let found = CultClient::find_target_class(&classes, "19:00:00", "HRX").unwrap();
        assert_eq!(found.class_id(), "2");
    }

    #[test]
    fn test_find_is_position_independent_for_sole_match() {
        let target = class(7, "AVAILABLE", 2, "07:00:00", "BOXING");
        let others = vec![
            class(1, "AVAILABLE", 2, "07:00:00", "YOGA"),
            class(2, "SEAT_NOT_AVAILABLE", 0, "07:00:00", "BOXING"),
            class(3, "AVAILABLE", 2, "08:00:00", "BOXING"),
        ];
        for pos in 0..=others.len() {
            let mut classes = others.clone();
            classes.insert(pos, target.clone());
            let found = CultClient::find_target_class(&classes, "07:00:00", "BOXING").unwrap();
            assert_eq!(found.class_id(), "7");
        }
    }

    #[test]
    fn test_find_is_exact_match() {
        let classes = vec![class(1, "AVAILABLE", 2, "19:00:00", "HRX Workout")];
        assert!(CultClient::find_target_class(&classes, "19:00", "HRX Workout").is_none());
        assert!(CultClient::find_target_class(&classes, "19:00:00", "hrx workout").is_none());
        assert!(CultClient::find_target_class(&[], "19:00:00", "HRX Workout").is_none());
    }
}
