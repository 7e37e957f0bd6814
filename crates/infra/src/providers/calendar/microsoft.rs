//! Microsoft Graph calendar adapter
//!
//! Graph returns naive `dateTime`/`timeZone` pairs; the `Prefer`
//! header pins responses to UTC, and any other advertised zone is
//! resolved through chrono-tz. Continuation uses the `@odata.nextLink`
//! URL verbatim as the sync cursor.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use relay_domain::{
    AttendeeResponse, CalendarEvent, CalendarEventDraft, EventAttendee, EventStatus,
    ProviderConfig, ProviderCredentials, RelayError, Result, SyncPage,
};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::super::{CalendarAdapter, ProviderSession, SyncWindow};
use crate::errors::InfraError;

const MICROSOFT_GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";
const MICROSOFT_TOKEN_URL: &str =
    "https://login.microsoftonline.com/common/oauth2/v2.0/token";
const OUTLOOK_TIMEZONE_HEADER: &str = r#"outlook.timezone="UTC""#;
const MAX_PAGE_SIZE: usize = 50;

/// Microsoft Graph calendar adapter
pub struct MicrosoftCalendarAdapter {
    client: Client,
    credentials: ProviderCredentials,
    calendar_id: Option<String>,
    api_base: String,
    token_url: String,
}

impl MicrosoftCalendarAdapter {
    pub fn new(config: &ProviderConfig) -> Self {
        Self::with_base_urls(config, MICROSOFT_GRAPH_API_BASE, MICROSOFT_TOKEN_URL)
    }

    /// Constructor with explicit endpoints, used by tests
    pub fn with_base_urls(config: &ProviderConfig, api_base: &str, token_url: &str) -> Self {
        let calendar_id =
            config.calendar_id.clone().filter(|id| !id.eq_ignore_ascii_case("primary"));
        Self {
            client: Client::new(),
            credentials: config.credentials.clone(),
            calendar_id,
            api_base: api_base.trim_end_matches('/').to_string(),
            token_url: token_url.to_string(),
        }
    }

    fn calendar_view_url(&self) -> String {
        match &self.calendar_id {
            Some(id) => format!("{}/me/calendars/{}/calendarView", self.api_base, id),
            None => format!("{}/me/calendarView", self.api_base),
        }
    }

    fn events_url(&self) -> String {
        match &self.calendar_id {
            Some(id) => format!("{}/me/calendars/{}/events", self.api_base, id),
            None => format!("{}/me/events", self.api_base),
        }
    }

    async fn check_response(response: reqwest::Response, context: &str) -> Result<reqwest::Response> {
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RelayError::Network(format!(
                "Microsoft API error during {context} ({status}): {error_text}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl ProviderSession for MicrosoftCalendarAdapter {
    async fn connect(&mut self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/me", self.api_base))
            .bearer_auth(&self.credentials.access_token)
            .send()
            .await
            .map_err(|e| RelayError::from(InfraError::from(e)))?;

        match response.status().as_u16() {
            200..=299 => Ok(true),
            401 | 403 => Ok(false),
            status => Err(RelayError::Network(format!(
                "Microsoft API probe returned unexpected status {status}"
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
            .ok_or_else(|| RelayError::Auth("no refresh token on Microsoft account".into()))?;

        let client_id = std::env::var("RELAY_MICROSOFT_CLIENT_ID")
            .map_err(|_| RelayError::Auth("RELAY_MICROSOFT_CLIENT_ID not set".into()))?;
        let client_secret = std::env::var("RELAY_MICROSOFT_CLIENT_SECRET")
            .map_err(|_| RelayError::Auth("RELAY_MICROSOFT_CLIENT_SECRET not set".into()))?;

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

        let refreshed: MicrosoftTokenResponse = response
            .json()
            .await
            .map_err(|e| RelayError::Auth(format!("failed to parse token response: {e}")))?;

        self.credentials.access_token = refreshed.access_token;
        // Microsoft rotates refresh tokens on every grant.
        if let Some(new_refresh) = refreshed.refresh_token {
            self.credentials.refresh_token = Some(new_refresh);
        }

        debug!("refreshed Microsoft access token");
        Ok(self.credentials.clone())
    }
}

#[async_trait]
impl CalendarAdapter for MicrosoftCalendarAdapter {
    async fn sync_events(
        &self,
        window: SyncWindow,
        cursor: Option<&str>,
    ) -> Result<SyncPage<CalendarEvent>> {
        // A continuation cursor is a complete nextLink URL; follow it as-is.
        let request = match cursor {
            Some(next_link) => self.client.get(next_link),
            None => self.client.get(self.calendar_view_url()).query(&[
                ("startDateTime", window.start.to_rfc3339()),
                ("endDateTime", window.end.to_rfc3339()),
                ("$top", MAX_PAGE_SIZE.to_string()),
            ]),
        };

        let response = request
            .bearer_auth(&self.credentials.access_token)
            .header("Prefer", OUTLOOK_TIMEZONE_HEADER)
            .send()
            .await
            .map_err(|e| RelayError::from(InfraError::from(e)))?;
        let response = Self::check_response(response, "event sync").await?;

        let graph_response: MicrosoftEventsResponse = response.json().await.map_err(|e| {
            RelayError::InvalidInput(format!("failed to parse Microsoft response: {e}"))
        })?;

        let events = graph_response
            .value
            .into_iter()
            .map(|event| normalize_event(event, self.calendar_id.as_deref()))
            .collect::<Result<Vec<_>>>()?;

        let has_more = graph_response.next_link.is_some();
        Ok(SyncPage { items: events, cursor: graph_response.next_link, has_more })
    }

    async fn create_event(&self, draft: &CalendarEventDraft) -> Result<String> {
        let response = self
            .client
            .post(self.events_url())
            .bearer_auth(&self.credentials.access_token)
            .json(&draft_to_payload(draft))
            .send()
            .await
            .map_err(|e| RelayError::from(InfraError::from(e)))?;
        let response = Self::check_response(response, "event create").await?;

        let created: MicrosoftCreatedEvent = response
            .json()
            .await
            .map_err(|e| RelayError::InvalidInput(format!("failed to parse created event: {e}")))?;
        Ok(created.id)
    }

    async fn update_event(&self, event_id: &str, draft: &CalendarEventDraft) -> Result<()> {
        let response = self
            .client
            .patch(format!("{}/me/events/{}", self.api_base, event_id))
            .bearer_auth(&self.credentials.access_token)
            .json(&draft_to_payload(draft))
            .send()
            .await
            .map_err(|e| RelayError::from(InfraError::from(e)))?;
        Self::check_response(response, "event update").await?;
        Ok(())
    }

    async fn delete_event(&self, event_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/me/events/{}", self.api_base, event_id))
            .bearer_auth(&self.credentials.access_token)
            .send()
            .await
            .map_err(|e| RelayError::from(InfraError::from(e)))?;
        Self::check_response(response, "event delete").await?;
        Ok(())
    }
}

/// Normalize a raw Graph event into the canonical type
fn normalize_event(event: MicrosoftEvent, calendar_id: Option<&str>) -> Result<CalendarEvent> {
    let start = parse_graph_time(&event.start)?;
    let end = parse_graph_time(&event.end)?;

    let attendees = event
        .attendees
        .unwrap_or_default()
        .into_iter()
        .filter_map(|attendee| {
            let email = attendee.email_address.address?;
            if email.trim().is_empty() {
                return None;
            }
            Some(EventAttendee {
                email,
                name: attendee.email_address.name,
                response: match attendee
                    .status
                    .and_then(|status| status.response)
                    .as_deref()
                {
                    Some("accepted" | "organizer") => AttendeeResponse::Accepted,
                    Some("declined") => AttendeeResponse::Declined,
                    Some("tentativelyAccepted") => AttendeeResponse::Tentative,
                    _ => AttendeeResponse::NeedsAction,
                },
            })
        })
        .collect();

    let status = if event.is_cancelled.unwrap_or(false) {
        EventStatus::Cancelled
    } else if event.show_as.as_deref() == Some("tentative") {
        EventStatus::Tentative
    } else {
        EventStatus::Confirmed
    };

    Ok(CalendarEvent {
        id: event.id,
        title: event.subject.filter(|s| !s.trim().is_empty()).unwrap_or_default(),
        description: event.body_preview.filter(|s| !s.is_empty()),
        location: event.location.and_then(|l| l.display_name).filter(|s| !s.is_empty()),
        start,
        end,
        all_day: event.is_all_day.unwrap_or(false),
        status,
        organizer: event.organizer.and_then(|o| o.email_address.address),
        attendees,
        // Graph models recurrence structurally rather than as an RRULE.
        recurrence: None,
        calendar_id: calendar_id.unwrap_or("primary").to_string(),
    })
}

/// Parse a Graph `dateTime`/`timeZone` pair into a UTC instant
fn parse_graph_time(time: &GraphDateTime) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(&time.date_time, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(|e| RelayError::from(InfraError::from(e)))?;

    match time.time_zone.as_deref() {
        None | Some("UTC") => Ok(naive.and_utc()),
        Some(zone_name) => {
            let zone: Tz = zone_name
                .parse()
                .map_err(|_| RelayError::InvalidInput(format!("unknown timezone: {zone_name}")))?;
            zone.from_local_datetime(&naive)
                .earliest()
                .map(|local| local.with_timezone(&Utc))
                .ok_or_else(|| {
                    RelayError::InvalidInput(format!(
                        "unrepresentable local time {} in {zone_name}",
                        time.date_time
                    ))
                })
        }
    }
}

fn draft_to_payload(draft: &CalendarEventDraft) -> serde_json::Value {
    let all_day = draft.all_day.unwrap_or(false);
    let mut payload = serde_json::Map::new();

    if let Some(title) = &draft.title {
        payload.insert("subject".into(), json!(title));
    }
    if let Some(description) = &draft.description {
        payload.insert("body".into(), json!({"contentType": "text", "content": description}));
    }
    if let Some(location) = &draft.location {
        payload.insert("location".into(), json!({"displayName": location}));
    }
    if let Some(start) = draft.start {
        payload.insert("start".into(), graph_time_payload(start));
    }
    if let Some(end) = draft.end {
        payload.insert("end".into(), graph_time_payload(end));
    }
    if all_day {
        payload.insert("isAllDay".into(), json!(true));
    }
    if let Some(attendees) = &draft.attendees {
        let list: Vec<_> = attendees
            .iter()
            .map(|email| json!({"emailAddress": {"address": email}, "type": "required"}))
            .collect();
        payload.insert("attendees".into(), json!(list));
    }

    serde_json::Value::Object(payload)
}

fn graph_time_payload(instant: DateTime<Utc>) -> serde_json::Value {
    json!({
        "dateTime": instant.format("%Y-%m-%dT%H:%M:%S").to_string(),
        "timeZone": "UTC"
    })
}

#[derive(Debug, Deserialize)]
struct MicrosoftEventsResponse {
    #[serde(default)]
    value: Vec<MicrosoftEvent>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MicrosoftEvent {
    id: String,
    subject: Option<String>,
    #[serde(rename = "bodyPreview")]
    body_preview: Option<String>,
    start: GraphDateTime,
    end: GraphDateTime,
    #[serde(rename = "isAllDay")]
    is_all_day: Option<bool>,
    #[serde(rename = "isCancelled")]
    is_cancelled: Option<bool>,
    #[serde(rename = "showAs")]
    show_as: Option<String>,
    location: Option<GraphLocation>,
    organizer: Option<GraphOrganizer>,
    attendees: Option<Vec<GraphAttendee>>,
}

#[derive(Debug, Deserialize)]
struct GraphDateTime {
    #[serde(rename = "dateTime")]
    date_time: String,
    #[serde(rename = "timeZone")]
    time_zone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphLocation {
    #[serde(rename = "displayName")]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphOrganizer {
    #[serde(rename = "emailAddress")]
    email_address: GraphEmailAddress,
}

#[derive(Debug, Deserialize)]
struct GraphAttendee {
    #[serde(rename = "emailAddress")]
    email_address: GraphEmailAddress,
    status: Option<GraphResponseStatus>,
}

#[derive(Debug, Deserialize)]
struct GraphEmailAddress {
    address: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphResponseStatus {
    response: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MicrosoftCreatedEvent {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MicrosoftTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use relay_domain::ProviderKind;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn test_config() -> ProviderConfig {
        ProviderConfig {
            id: "acct-ms".to_string(),
            kind: ProviderKind::MicrosoftCalendar,
            credentials: ProviderCredentials {
                access_token: "test-token".to_string(),
                refresh_token: Some("refresh".to_string()),
            },
            username: None,
            calendar_id: Some("primary".to_string()),
            caldav_url: None,
            imap: None,
            smtp: None,
        }
    }

    fn window() -> SyncWindow {
        SyncWindow {
            start: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).single().expect("valid"),
            end: Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).single().expect("valid"),
        }
    }

    #[tokio::test]
    async fn normalizes_naive_times_against_the_advertised_zone() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me/calendarView"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": [
                    {
                        "id": "evt-utc",
                        "subject": "Standup",
                        "start": {"dateTime": "2024-03-05T09:00:00.0000000", "timeZone": "UTC"},
                        "end": {"dateTime": "2024-03-05T09:15:00.0000000", "timeZone": "UTC"},
                        "isAllDay": false,
                        "attendees": [
                            {
                                "emailAddress": {"address": "ada@example.com", "name": "Ada"},
                                "status": {"response": "tentativelyAccepted"}
                            }
                        ]
                    },
                    {
                        "id": "evt-berlin",
                        "subject": "Lunch",
                        "start": {"dateTime": "2024-03-05T12:00:00.0000000", "timeZone": "Europe/Berlin"},
                        "end": {"dateTime": "2024-03-05T13:00:00.0000000", "timeZone": "Europe/Berlin"},
                        "isCancelled": true
                    }
                ]
            })))
            .mount(&server)
            .await;

        let adapter = MicrosoftCalendarAdapter::with_base_urls(
            &test_config(),
            &server.uri(),
            &format!("{}/token", server.uri()),
        );
        let page = adapter.sync_events(window(), None).await.expect("sync succeeds");

        assert_eq!(page.items.len(), 2);
        assert_eq!(
            page.items[0].start,
            Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).single().expect("valid")
        );
        assert_eq!(page.items[0].attendees[0].response, AttendeeResponse::Tentative);

        // Berlin noon in March (CET, +01:00) is 11:00 UTC.
        assert_eq!(
            page.items[1].start,
            Utc.with_ymd_and_hms(2024, 3, 5, 11, 0, 0).single().expect("valid")
        );
        assert_eq!(page.items[1].status, EventStatus::Cancelled);
    }

    #[tokio::test]
    async fn next_link_is_surfaced_as_the_cursor() {
        let server = MockServer::start().await;
        let next = format!("{}/me/calendarView?$skiptoken=abc", server.uri());
        Mock::given(method("GET"))
            .and(path("/me/calendarView"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": [],
                "@odata.nextLink": next
            })))
            .mount(&server)
            .await;

        let adapter = MicrosoftCalendarAdapter::with_base_urls(
            &test_config(),
            &server.uri(),
            &format!("{}/token", server.uri()),
        );
        let page = adapter.sync_events(window(), None).await.expect("sync succeeds");

        assert!(page.has_more);
        assert_eq!(page.cursor.as_deref(), Some(next.as_str()));
    }
}
