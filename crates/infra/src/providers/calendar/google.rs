//! Google Calendar adapter
//!
//! Talks to the Calendar v3 REST API. All-day events arrive as bare
//! dates on `start.date`/`end.date`; timed events carry RFC 3339
//! offsets on `dateTime` and are normalized to UTC here.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use relay_domain::{
    AttendeeResponse, CalendarEvent, CalendarEventDraft, EventAttendee, EventStatus,
    ProviderConfig, ProviderCredentials, RelayError, Result, SyncPage,
};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::super::{CalendarAdapter, ProviderSession, SyncWindow};
use crate::errors::InfraError;

const GOOGLE_CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const MAX_PAGE_SIZE: usize = 250;

/// Google Calendar adapter
pub struct GoogleCalendarAdapter {
    client: Client,
    credentials: ProviderCredentials,
    calendar_id: String,
    api_base: String,
    token_url: String,
}

impl GoogleCalendarAdapter {
    pub fn new(config: &ProviderConfig) -> Self {
        Self::with_base_urls(config, GOOGLE_CALENDAR_API_BASE, GOOGLE_TOKEN_URL)
    }

    /// Constructor with explicit endpoints, used by tests
    pub fn with_base_urls(config: &ProviderConfig, api_base: &str, token_url: &str) -> Self {
        Self {
            client: Client::new(),
            credentials: config.credentials.clone(),
            calendar_id: config.calendar_id.clone().unwrap_or_else(|| "primary".to_string()),
            api_base: api_base.trim_end_matches('/').to_string(),
            token_url: token_url.to_string(),
        }
    }

    fn events_url(&self) -> String {
        format!("{}/calendars/{}/events", self.api_base, self.calendar_id)
    }

    async fn check_response(response: reqwest::Response, context: &str) -> Result<reqwest::Response> {
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RelayError::Network(format!(
                "Google API error during {context} ({status}): {error_text}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl ProviderSession for GoogleCalendarAdapter {
    async fn connect(&mut self) -> Result<bool> {
        let url = format!("{}/calendars/{}", self.api_base, self.calendar_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.credentials.access_token)
            .send()
            .await
            .map_err(|e| RelayError::from(InfraError::from(e)))?;

        match response.status().as_u16() {
            200..=299 => Ok(true),
            401 | 403 => Ok(false),
            status => Err(RelayError::Network(format!(
                "Google API probe returned unexpected status {status}"
            ))),
        }
    }

    async fn disconnect(&mut self) {
        // Stateless HTTP session; nothing to tear down.
    }

    fn refresh_capable(&self) -> bool {
        true
    }

    async fn refresh_token(&mut self) -> Result<ProviderCredentials> {
        let refresh_token = self
            .credentials
            .refresh_token
            .clone()
            .ok_or_else(|| RelayError::Auth("no refresh token on Google account".into()))?;

        let client_id = std::env::var("RELAY_GOOGLE_CLIENT_ID")
            .map_err(|_| RelayError::Auth("RELAY_GOOGLE_CLIENT_ID not set".into()))?;
        let client_secret = std::env::var("RELAY_GOOGLE_CLIENT_SECRET")
            .map_err(|_| RelayError::Auth("RELAY_GOOGLE_CLIENT_SECRET not set".into()))?;

        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| RelayError::Auth(format!("token refresh request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RelayError::Auth(format!("token refresh failed ({status}): {error_text}")));
        }

        let refreshed: GoogleTokenRefreshResponse = response
            .json()
            .await
            .map_err(|e| RelayError::Auth(format!("failed to parse token response: {e}")))?;

        self.credentials.access_token = refreshed.access_token;
        if let Some(new_refresh) = refreshed.refresh_token {
            self.credentials.refresh_token = Some(new_refresh);
        }

        debug!(calendar_id = %self.calendar_id, "refreshed Google access token");
        Ok(self.credentials.clone())
    }
}

#[async_trait]
impl CalendarAdapter for GoogleCalendarAdapter {
    async fn sync_events(
        &self,
        window: SyncWindow,
        cursor: Option<&str>,
    ) -> Result<SyncPage<CalendarEvent>> {
        let mut query: Vec<(&str, String)> = vec![
            ("timeMin", window.start.to_rfc3339()),
            ("timeMax", window.end.to_rfc3339()),
            ("singleEvents", "true".to_string()),
            ("maxResults", MAX_PAGE_SIZE.to_string()),
        ];
        if let Some(token) = cursor {
            query.push(("pageToken", token.to_string()));
        }

        let response = self
            .client
            .get(self.events_url())
            .bearer_auth(&self.credentials.access_token)
            .query(&query)
            .send()
            .await
            .map_err(|e| RelayError::from(InfraError::from(e)))?;
        let response = Self::check_response(response, "event sync").await?;

        let google_response: GoogleEventsResponse = response
            .json()
            .await
            .map_err(|e| RelayError::InvalidInput(format!("failed to parse Google response: {e}")))?;

        let events = google_response
            .items
            .into_iter()
            .map(|event| normalize_event(event, &self.calendar_id))
            .collect::<Result<Vec<_>>>()?;

        let has_more = google_response.next_page_token.is_some();
        Ok(SyncPage { items: events, cursor: google_response.next_page_token, has_more })
    }

    async fn create_event(&self, draft: &CalendarEventDraft) -> Result<String> {
        let payload = draft_to_payload(draft);

        let response = self
            .client
            .post(self.events_url())
            .bearer_auth(&self.credentials.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| RelayError::from(InfraError::from(e)))?;
        let response = Self::check_response(response, "event create").await?;

        let created: GoogleCreatedEvent = response
            .json()
            .await
            .map_err(|e| RelayError::InvalidInput(format!("failed to parse created event: {e}")))?;
        Ok(created.id)
    }

    async fn update_event(&self, event_id: &str, draft: &CalendarEventDraft) -> Result<()> {
        let payload = draft_to_payload(draft);

        let response = self
            .client
            .patch(format!("{}/{}", self.events_url(), event_id))
            .bearer_auth(&self.credentials.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| RelayError::from(InfraError::from(e)))?;
        Self::check_response(response, "event update").await?;
        Ok(())
    }

    async fn delete_event(&self, event_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/{}", self.events_url(), event_id))
            .bearer_auth(&self.credentials.access_token)
            .send()
            .await
            .map_err(|e| RelayError::from(InfraError::from(e)))?;
        Self::check_response(response, "event delete").await?;
        Ok(())
    }
}

/// Normalize a raw Google event into the canonical type
fn normalize_event(event: GoogleCalendarEvent, calendar_id: &str) -> Result<CalendarEvent> {
    let is_all_day = event.start.date.is_some();
    let start = parse_event_time(&event.start)?;
    let end = parse_event_time(&event.end)?;

    let attendees = event
        .attendees
        .unwrap_or_default()
        .into_iter()
        .filter_map(|attendee| {
            let email = attendee.email.trim();
            if email.is_empty() {
                warn!(event_id = %event.id, "dropping attendee with empty email");
                return None;
            }
            Some(EventAttendee {
                email: email.to_string(),
                name: attendee.display_name,
                response: match attendee.response_status.as_deref() {
                    Some("accepted") => AttendeeResponse::Accepted,
                    Some("declined") => AttendeeResponse::Declined,
                    Some("tentative") => AttendeeResponse::Tentative,
                    _ => AttendeeResponse::NeedsAction,
                },
            })
        })
        .collect();

    Ok(CalendarEvent {
        id: event.id,
        title: event.summary.filter(|s| !s.trim().is_empty()).unwrap_or_default(),
        description: event.description,
        location: event.location,
        start,
        end,
        all_day: is_all_day,
        status: match event.status.as_deref() {
            Some("tentative") => EventStatus::Tentative,
            Some("cancelled") => EventStatus::Cancelled,
            _ => EventStatus::Confirmed,
        },
        organizer: event.organizer.and_then(|o| o.email),
        attendees,
        recurrence: event.recurrence.and_then(|rules| rules.into_iter().next()),
        calendar_id: calendar_id.to_string(),
    })
}

/// Parse either shape of a Google event time.
///
/// All-day `date` values have no zone and are pinned to UTC midnight.
fn parse_event_time(time: &EventDateTime) -> Result<DateTime<Utc>> {
    if let Some(date_time) = &time.date_time {
        let parsed = DateTime::parse_from_rfc3339(date_time)
            .map_err(|e| RelayError::from(InfraError::from(e)))?;
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Some(date) = &time.date {
        let parsed =
            NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|e| RelayError::from(InfraError::from(e)))?;
        let midnight = parsed
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| RelayError::InvalidInput(format!("invalid all-day date: {date}")))?;
        return Ok(midnight.and_utc());
    }
    Err(RelayError::InvalidInput("event time missing both date and dateTime".into()))
}

fn draft_to_payload(draft: &CalendarEventDraft) -> serde_json::Value {
    let all_day = draft.all_day.unwrap_or(false);
    let mut payload = serde_json::Map::new();

    if let Some(title) = &draft.title {
        payload.insert("summary".into(), json!(title));
    }
    if let Some(description) = &draft.description {
        payload.insert("description".into(), json!(description));
    }
    if let Some(location) = &draft.location {
        payload.insert("location".into(), json!(location));
    }
    if let Some(start) = draft.start {
        payload.insert("start".into(), time_payload(start, all_day));
    }
    if let Some(end) = draft.end {
        payload.insert("end".into(), time_payload(end, all_day));
    }
    if let Some(attendees) = &draft.attendees {
        let list: Vec<_> = attendees.iter().map(|email| json!({"email": email})).collect();
        payload.insert("attendees".into(), json!(list));
    }
    if let Some(recurrence) = &draft.recurrence {
        payload.insert("recurrence".into(), json!([recurrence]));
    }

    serde_json::Value::Object(payload)
}

fn time_payload(instant: DateTime<Utc>, all_day: bool) -> serde_json::Value {
    if all_day {
        json!({"date": instant.format("%Y-%m-%d").to_string()})
    } else {
        json!({"dateTime": instant.to_rfc3339()})
    }
}

#[derive(Debug, Deserialize)]
struct GoogleEventsResponse {
    #[serde(default)]
    items: Vec<GoogleCalendarEvent>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleCalendarEvent {
    id: String,
    summary: Option<String>,
    description: Option<String>,
    location: Option<String>,
    status: Option<String>,
    start: EventDateTime,
    end: EventDateTime,
    organizer: Option<GoogleOrganizer>,
    recurrence: Option<Vec<String>>,
    attendees: Option<Vec<GoogleAttendee>>,
}

#[derive(Debug, Deserialize)]
struct EventDateTime {
    #[serde(rename = "dateTime")]
    date_time: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleOrganizer {
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleAttendee {
    email: String,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
    #[serde(rename = "responseStatus")]
    response_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleCreatedEvent {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GoogleTokenRefreshResponse {
    access_token: String,
    refresh_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use relay_domain::ProviderKind;
    use wiremock::matchers::{bearer_token, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn test_config() -> ProviderConfig {
        ProviderConfig {
            id: "acct-google".to_string(),
            kind: ProviderKind::GoogleCalendar,
            credentials: ProviderCredentials {
                access_token: "test-token".to_string(),
                refresh_token: Some("refresh".to_string()),
            },
            username: None,
            calendar_id: None,
            caldav_url: None,
            imap: None,
            smtp: None,
        }
    }

    fn adapter_for(server: &MockServer) -> GoogleCalendarAdapter {
        GoogleCalendarAdapter::with_base_urls(
            &test_config(),
            &server.uri(),
            &format!("{}/token", server.uri()),
        )
    }

    fn window() -> SyncWindow {
        SyncWindow {
            start: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).single().expect("valid"),
            end: Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).single().expect("valid"),
        }
    }

    #[tokio::test]
    async fn normalizes_timed_and_all_day_events() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/calendars/primary/events"))
            .and(bearer_token("test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    {
                        "id": "evt-1",
                        "summary": "Design review",
                        "status": "confirmed",
                        "start": {"dateTime": "2024-03-05T10:00:00+02:00"},
                        "end": {"dateTime": "2024-03-05T11:00:00+02:00"},
                        "organizer": {"email": "host@example.com"},
                        "attendees": [
                            {"email": "ada@example.com", "displayName": "Ada", "responseStatus": "accepted"},
                            {"email": "  ", "responseStatus": "declined"}
                        ]
                    },
                    {
                        "id": "evt-2",
                        "summary": "Offsite",
                        "status": "tentative",
                        "start": {"date": "2024-03-10"},
                        "end": {"date": "2024-03-11"},
                        "recurrence": ["RRULE:FREQ=YEARLY"]
                    }
                ]
            })))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let page = adapter.sync_events(window(), None).await.expect("sync succeeds");

        assert!(!page.has_more);
        assert_eq!(page.items.len(), 2);

        let timed = &page.items[0];
        // +02:00 offset normalized to UTC.
        assert_eq!(timed.start, Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).single().expect("valid"));
        assert!(!timed.all_day);
        assert_eq!(timed.status, EventStatus::Confirmed);
        assert_eq!(timed.organizer.as_deref(), Some("host@example.com"));
        assert_eq!(timed.attendees.len(), 1, "empty attendee emails are dropped");
        assert_eq!(timed.attendees[0].response, AttendeeResponse::Accepted);

        let all_day = &page.items[1];
        assert!(all_day.all_day);
        assert_eq!(
            all_day.start,
            Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).single().expect("valid")
        );
        assert_eq!(all_day.status, EventStatus::Tentative);
        assert_eq!(all_day.recurrence.as_deref(), Some("RRULE:FREQ=YEARLY"));
    }

    #[tokio::test]
    async fn pagination_visits_every_item_exactly_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/calendars/primary/events"))
            .and(query_param("pageToken", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"id": "evt-b", "start": {"date": "2024-03-02"}, "end": {"date": "2024-03-03"}}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/calendars/primary/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"id": "evt-a", "start": {"date": "2024-03-01"}, "end": {"date": "2024-03-02"}}],
                "nextPageToken": "page-2"
            })))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page =
                adapter.sync_events(window(), cursor.as_deref()).await.expect("sync succeeds");
            seen.extend(page.items.into_iter().map(|event| event.id));
            if !page.has_more {
                break;
            }
            cursor = page.cursor;
        }

        assert_eq!(seen, vec!["evt-a".to_string(), "evt-b".to_string()]);
    }

    #[tokio::test]
    async fn connect_reports_auth_failure_without_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/calendars/primary"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let mut adapter = adapter_for(&server);
        assert!(!adapter.connect().await.expect("auth failure is not a fault"));
    }

    #[tokio::test]
    async fn create_event_returns_provider_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/calendars/primary/events"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "evt-new"})),
            )
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let draft = CalendarEventDraft {
            title: Some("Kickoff".to_string()),
            start: Some(Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).single().expect("valid")),
            end: Some(Utc.with_ymd_and_hms(2024, 4, 1, 10, 0, 0).single().expect("valid")),
            ..CalendarEventDraft::default()
        };

        let id = adapter.create_event(&draft).await.expect("create succeeds");
        assert_eq!(id, "evt-new");
    }
}
