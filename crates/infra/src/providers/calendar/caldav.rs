//! CalDAV calendar adapter
//!
//! Speaks WebDAV against a single calendar collection: REPORT
//! calendar-query for sync, PUT/DELETE of `<uid>.ics` resources for
//! writes, Basic authentication throughout. The multistatus envelope is
//! parsed with quick-xml; embedded iCalendar payloads are handled by
//! the VEVENT helpers at the bottom of this module.
//!
//! CalDAV has no native paging, so sync always returns a single
//! complete page.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use quick_xml::events::Event;
use quick_xml::Reader;
use relay_domain::{
    AttendeeResponse, CalendarEvent, CalendarEventDraft, EventAttendee, EventStatus,
    ProviderConfig, RelayError, Result, SyncPage,
};
use reqwest::{Client, Method};
use tracing::warn;
use uuid::Uuid;

use super::super::{CalendarAdapter, ProviderSession, SyncWindow};
use crate::errors::InfraError;

/// CalDAV calendar adapter
pub struct CaldavAdapter {
    client: Client,
    collection_url: String,
    username: String,
    password: String,
    calendar_id: String,
}

impl CaldavAdapter {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let collection_url = config
            .caldav_url
            .clone()
            .ok_or_else(|| RelayError::Config("CalDAV account is missing its collection URL".into()))?;
        let username = config
            .username
            .clone()
            .ok_or_else(|| RelayError::Config("CalDAV account is missing a username".into()))?;

        Ok(Self {
            client: Client::new(),
            calendar_id: config.calendar_id.clone().unwrap_or_else(|| collection_url.clone()),
            collection_url: collection_url.trim_end_matches('/').to_string(),
            username,
            password: config.credentials.access_token.clone(),
        })
    }

    /// Events are addressed as `<uid>.ics` relative to the collection.
    fn event_url(&self, event_id: &str) -> String {
        format!("{}/{}.ics", self.collection_url, event_id)
    }

    fn dav_method(name: &str) -> Result<Method> {
        Method::from_bytes(name.as_bytes())
            .map_err(|_| RelayError::Internal(format!("invalid HTTP method {name}")))
    }
}

#[async_trait]
impl ProviderSession for CaldavAdapter {
    async fn connect(&mut self) -> Result<bool> {
        let response = self
            .client
            .request(Self::dav_method("PROPFIND")?, &self.collection_url)
            .basic_auth(&self.username, Some(&self.password))
            .header("Depth", "0")
            .send()
            .await
            .map_err(|e| RelayError::from(InfraError::from(e)))?;

        match response.status().as_u16() {
            200..=299 => Ok(true),
            401 | 403 => Ok(false),
            status => Err(RelayError::Network(format!(
                "CalDAV probe returned unexpected status {status}"
            ))),
        }
    }

    async fn disconnect(&mut self) {
        // Stateless HTTP session; nothing to tear down.
    }
}

#[async_trait]
impl CalendarAdapter for CaldavAdapter {
    async fn sync_events(
        &self,
        window: SyncWindow,
        _cursor: Option<&str>,
    ) -> Result<SyncPage<CalendarEvent>> {
        let body = calendar_query(window);

        let response = self
            .client
            .request(Self::dav_method("REPORT")?, &self.collection_url)
            .basic_auth(&self.username, Some(&self.password))
            .header("Depth", "1")
            .header("Content-Type", "application/xml; charset=utf-8")
            .body(body)
            .send()
            .await
            .map_err(|e| RelayError::from(InfraError::from(e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RelayError::Network(format!(
                "CalDAV REPORT failed ({status}): {error_text}"
            )));
        }

        let text = response.text().await.map_err(|e| RelayError::from(InfraError::from(e)))?;
        let events = extract_calendar_data(&text)?
            .iter()
            .filter_map(|ics| match parse_vevent(ics, &self.calendar_id) {
                Ok(Some(event)) => Some(event),
                Ok(None) => None,
                Err(err) => {
                    warn!(error = %err, "skipping unparseable VEVENT");
                    None
                }
            })
            .collect();

        Ok(SyncPage::complete(events))
    }

    async fn create_event(&self, draft: &CalendarEventDraft) -> Result<String> {
        let uid = Uuid::new_v4().to_string();
        let ics = build_vevent(&uid, draft);

        let response = self
            .client
            .put(self.event_url(&uid))
            .basic_auth(&self.username, Some(&self.password))
            .header("Content-Type", "text/calendar; charset=utf-8")
            .header("If-None-Match", "*")
            .body(ics)
            .send()
            .await
            .map_err(|e| RelayError::from(InfraError::from(e)))?;

        if !response.status().is_success() {
            return Err(RelayError::Network(format!(
                "CalDAV event create failed ({})",
                response.status()
            )));
        }
        Ok(uid)
    }

    async fn update_event(&self, event_id: &str, draft: &CalendarEventDraft) -> Result<()> {
        let ics = build_vevent(event_id, draft);

        let response = self
            .client
            .put(self.event_url(event_id))
            .basic_auth(&self.username, Some(&self.password))
            .header("Content-Type", "text/calendar; charset=utf-8")
            .body(ics)
            .send()
            .await
            .map_err(|e| RelayError::from(InfraError::from(e)))?;

        if response.status().as_u16() == 404 {
            return Err(RelayError::NotFound(format!("CalDAV event {event_id} not found")));
        }
        if !response.status().is_success() {
            return Err(RelayError::Network(format!(
                "CalDAV event update failed ({})",
                response.status()
            )));
        }
        Ok(())
    }

    async fn delete_event(&self, event_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.event_url(event_id))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| RelayError::from(InfraError::from(e)))?;

        if response.status().as_u16() == 404 {
            return Err(RelayError::NotFound(format!("CalDAV event {event_id} not found")));
        }
        if !response.status().is_success() {
            return Err(RelayError::Network(format!(
                "CalDAV event delete failed ({})",
                response.status()
            )));
        }
        Ok(())
    }
}

fn calendar_query(window: SyncWindow) -> String {
    let format = "%Y%m%dT%H%M%SZ";
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="utf-8" ?>"#,
            r#"<C:calendar-query xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">"#,
            r#"<D:prop><D:getetag/><C:calendar-data/></D:prop>"#,
            r#"<C:filter><C:comp-filter name="VCALENDAR"><C:comp-filter name="VEVENT">"#,
            r#"<C:time-range start="{start}" end="{end}"/>"#,
            r#"</C:comp-filter></C:comp-filter></C:filter>"#,
            r#"</C:calendar-query>"#
        ),
        start = window.start.format(format),
        end = window.end.format(format),
    )
}

/// Pull every `<calendar-data>` text payload out of a multistatus body
fn extract_calendar_data(xml: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);

    let mut payloads = Vec::new();
    let mut inside_calendar_data = false;
    let mut current = String::new();

    loop {
        match reader
            .read_event()
            .map_err(|e| RelayError::InvalidInput(format!("invalid multistatus XML: {e}")))?
        {
            Event::Start(element) if element.local_name().as_ref() == b"calendar-data" => {
                inside_calendar_data = true;
                current.clear();
            }
            Event::End(element) if element.local_name().as_ref() == b"calendar-data" => {
                inside_calendar_data = false;
                if !current.trim().is_empty() {
                    payloads.push(current.clone());
                }
            }
            Event::Text(text) if inside_calendar_data => {
                current.push_str(&text.unescape().map_err(|e| {
                    RelayError::InvalidInput(format!("invalid multistatus XML: {e}"))
                })?);
            }
            Event::CData(cdata) if inside_calendar_data => {
                current.push_str(&String::from_utf8_lossy(&cdata.into_inner()));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(payloads)
}

/* -------------------------------------------------------------------------- */
/* iCalendar VEVENT handling */
/* -------------------------------------------------------------------------- */

/// One unfolded iCalendar content line, split into name, params, value
struct ContentLine {
    name: String,
    params: Vec<(String, String)>,
    value: String,
}

/// Unfold RFC 5545 continuation lines (leading space or tab)
fn unfold_lines(ics: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in ics.lines() {
        if (raw.starts_with(' ') || raw.starts_with('\t')) && !lines.is_empty() {
            if let Some(last) = lines.last_mut() {
                last.push_str(&raw[1..]);
            }
        } else {
            lines.push(raw.to_string());
        }
    }
    lines
}

fn parse_content_line(line: &str) -> Option<ContentLine> {
    // Split at the first ':' outside double quotes; param values may
    // contain colons when quoted.
    let mut in_quotes = false;
    let mut split_at = None;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ':' if !in_quotes => {
                split_at = Some(index);
                break;
            }
            _ => {}
        }
    }
    let split_at = split_at?;
    let (head, value) = (&line[..split_at], &line[split_at + 1..]);

    let mut sections = head.split(';');
    let name = sections.next()?.trim().to_ascii_uppercase();
    let params = sections
        .filter_map(|param| {
            let (key, value) = param.split_once('=')?;
            Some((key.trim().to_ascii_uppercase(), value.trim_matches('"').to_string()))
        })
        .collect();

    Some(ContentLine { name, params, value: value.to_string() })
}

fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n' | 'N') => out.push('\n'),
            Some(escaped) => out.push(escaped),
            None => out.push('\\'),
        }
    }
    out
}

fn escape_text(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace(',', "\\,")
        .replace(';', "\\;")
}

/// Parse the first VEVENT in an iCalendar payload.
///
/// Returns `Ok(None)` when the payload holds no VEVENT component.
fn parse_vevent(ics: &str, calendar_id: &str) -> Result<Option<CalendarEvent>> {
    let mut in_event = false;
    let mut uid = None;
    let mut title = String::new();
    let mut description = None;
    let mut location = None;
    let mut status = EventStatus::Confirmed;
    let mut organizer = None;
    let mut recurrence = None;
    let mut attendees = Vec::new();
    let mut start = None;
    let mut end = None;
    let mut all_day = false;

    for line in unfold_lines(ics) {
        let Some(content) = parse_content_line(&line) else { continue };

        match (in_event, content.name.as_str()) {
            (false, "BEGIN") if content.value.eq_ignore_ascii_case("VEVENT") => in_event = true,
            (true, "END") if content.value.eq_ignore_ascii_case("VEVENT") => break,
            (true, "UID") => uid = Some(content.value.trim().to_string()),
            (true, "SUMMARY") => title = unescape_text(content.value.trim()),
            (true, "DESCRIPTION") => description = Some(unescape_text(content.value.trim())),
            (true, "LOCATION") => location = Some(unescape_text(content.value.trim())),
            (true, "STATUS") => {
                status = match content.value.trim().to_ascii_uppercase().as_str() {
                    "TENTATIVE" => EventStatus::Tentative,
                    "CANCELLED" => EventStatus::Cancelled,
                    _ => EventStatus::Confirmed,
                }
            }
            (true, "RRULE") => recurrence = Some(format!("RRULE:{}", content.value.trim())),
            (true, "ORGANIZER") => {
                organizer =
                    Some(content.value.trim().trim_start_matches("mailto:").to_string())
            }
            (true, "ATTENDEE") => {
                let email = content.value.trim().trim_start_matches("mailto:").to_string();
                if email.is_empty() {
                    continue;
                }
                let name = content
                    .params
                    .iter()
                    .find(|(key, _)| key == "CN")
                    .map(|(_, value)| value.clone());
                let response = match content
                    .params
                    .iter()
                    .find(|(key, _)| key == "PARTSTAT")
                    .map(|(_, value)| value.to_ascii_uppercase())
                    .as_deref()
                {
                    Some("ACCEPTED") => AttendeeResponse::Accepted,
                    Some("DECLINED") => AttendeeResponse::Declined,
                    Some("TENTATIVE") => AttendeeResponse::Tentative,
                    _ => AttendeeResponse::NeedsAction,
                };
                attendees.push(EventAttendee { email, name, response });
            }
            (true, "DTSTART") => {
                let (instant, is_date) = parse_ics_time(&content)?;
                all_day = is_date;
                start = Some(instant);
            }
            (true, "DTEND") => {
                let (instant, _) = parse_ics_time(&content)?;
                end = Some(instant);
            }
            _ => {}
        }
    }

    let Some(uid) = uid else { return Ok(None) };
    let start = start
        .ok_or_else(|| RelayError::InvalidInput(format!("VEVENT {uid} is missing DTSTART")))?;
    let end = end.unwrap_or(start);

    Ok(Some(CalendarEvent {
        id: uid,
        title,
        description,
        location,
        start,
        end,
        all_day,
        status,
        organizer,
        attendees,
        recurrence,
        calendar_id: calendar_id.to_string(),
    }))
}

/// Parse an iCalendar date or date-time property.
///
/// Returns the UTC instant plus whether the value was a bare date.
/// `TZID` parameters are resolved through chrono-tz; zoneless local
/// times are treated as UTC.
fn parse_ics_time(content: &ContentLine) -> Result<(DateTime<Utc>, bool)> {
    let value = content.value.trim();
    let is_date = content.params.iter().any(|(key, val)| key == "VALUE" && val == "DATE")
        || (value.len() == 8 && !value.contains('T'));

    if is_date {
        let date = NaiveDate::parse_from_str(value, "%Y%m%d")
            .map_err(|e| RelayError::from(InfraError::from(e)))?;
        let midnight = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| RelayError::InvalidInput(format!("invalid all-day date: {value}")))?;
        return Ok((midnight.and_utc(), true));
    }

    if let Some(utc_value) = value.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(utc_value, "%Y%m%dT%H%M%S")
            .map_err(|e| RelayError::from(InfraError::from(e)))?;
        return Ok((naive.and_utc(), false));
    }

    let naive = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S")
        .map_err(|e| RelayError::from(InfraError::from(e)))?;

    match content.params.iter().find(|(key, _)| key == "TZID").map(|(_, tzid)| tzid) {
        Some(tzid) => {
            let zone: Tz = tzid
                .parse()
                .map_err(|_| RelayError::InvalidInput(format!("unknown TZID: {tzid}")))?;
            zone.from_local_datetime(&naive)
                .earliest()
                .map(|local| (local.with_timezone(&Utc), false))
                .ok_or_else(|| {
                    RelayError::InvalidInput(format!("unrepresentable local time {value} in {tzid}"))
                })
        }
        None => Ok((naive.and_utc(), false)),
    }
}

/// Serialize a draft into a single-VEVENT iCalendar payload
fn build_vevent(uid: &str, draft: &CalendarEventDraft) -> String {
    let all_day = draft.all_day.unwrap_or(false);
    let mut lines = vec![
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        "PRODID:-//Relay//Automation Core//EN".to_string(),
        "BEGIN:VEVENT".to_string(),
        format!("UID:{uid}"),
        format!("DTSTAMP:{}", Utc::now().format("%Y%m%dT%H%M%SZ")),
    ];

    if let Some(start) = draft.start {
        lines.push(if all_day {
            format!("DTSTART;VALUE=DATE:{}", start.format("%Y%m%d"))
        } else {
            format!("DTSTART:{}", start.format("%Y%m%dT%H%M%SZ"))
        });
    }
    if let Some(end) = draft.end {
        lines.push(if all_day {
            format!("DTEND;VALUE=DATE:{}", end.format("%Y%m%d"))
        } else {
            format!("DTEND:{}", end.format("%Y%m%dT%H%M%SZ"))
        });
    }
    if let Some(title) = &draft.title {
        lines.push(format!("SUMMARY:{}", escape_text(title)));
    }
    if let Some(description) = &draft.description {
        lines.push(format!("DESCRIPTION:{}", escape_text(description)));
    }
    if let Some(location) = &draft.location {
        lines.push(format!("LOCATION:{}", escape_text(location)));
    }
    if let Some(recurrence) = &draft.recurrence {
        lines.push(recurrence.strip_prefix("RRULE:").map_or_else(
            || format!("RRULE:{recurrence}"),
            |rule| format!("RRULE:{rule}"),
        ));
    }
    for attendee in draft.attendees.iter().flatten() {
        lines.push(format!("ATTENDEE:mailto:{attendee}"));
    }

    lines.push("END:VEVENT".to_string());
    lines.push("END:VCALENDAR".to_string());
    lines.join("\r\n")
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use relay_domain::{ProviderCredentials, ProviderKind};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const TIMED_EVENT_ICS: &str = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nBEGIN:VEVENT\r\nUID:ev-100\r\nSUMMARY:Team sync\\, weekly\r\nDTSTART;TZID=Europe/Berlin:20240305T120000\r\nDTEND;TZID=Europe/Berlin:20240305T130000\r\nSTATUS:TENTATIVE\r\nORGANIZER:mailto:host@example.com\r\nATTENDEE;CN=Ada Lovelace;PARTSTAT=ACCEPTED:mailto:ada@example.com\r\nRRULE:FREQ=WEEKLY;BYDAY=TU\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";

    const ALL_DAY_ICS: &str = "BEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\nUID:ev-200\r\nSUMMARY:Company holiday\r\nDTSTART;VALUE=DATE:20240310\r\nDTEND;VALUE=DATE:20240311\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";

    fn test_config(url: &str) -> ProviderConfig {
        ProviderConfig {
            id: "acct-dav".to_string(),
            kind: ProviderKind::Caldav,
            credentials: ProviderCredentials {
                access_token: "secret".to_string(),
                refresh_token: None,
            },
            username: Some("ada".to_string()),
            calendar_id: Some("work".to_string()),
            caldav_url: Some(url.to_string()),
            imap: None,
            smtp: None,
        }
    }

    #[test]
    fn parses_timed_event_with_tzid_and_folding() {
        // Fold the summary over two lines the way servers emit it.
        let folded = TIMED_EVENT_ICS.replace("SUMMARY:Team sync\\, weekly", "SUMMARY:Team sy\r\n nc\\, weekly");
        let event = parse_vevent(&folded, "work").expect("parses").expect("has VEVENT");

        assert_eq!(event.id, "ev-100");
        assert_eq!(event.title, "Team sync, weekly");
        // Berlin noon in March (CET, +01:00) is 11:00 UTC.
        assert_eq!(event.start, Utc.with_ymd_and_hms(2024, 3, 5, 11, 0, 0).single().expect("valid"));
        assert!(!event.all_day);
        assert_eq!(event.status, EventStatus::Tentative);
        assert_eq!(event.organizer.as_deref(), Some("host@example.com"));
        assert_eq!(event.attendees.len(), 1);
        assert_eq!(event.attendees[0].name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(event.attendees[0].response, AttendeeResponse::Accepted);
        assert_eq!(event.recurrence.as_deref(), Some("RRULE:FREQ=WEEKLY;BYDAY=TU"));
    }

    #[test]
    fn parses_all_day_event() {
        let event = parse_vevent(ALL_DAY_ICS, "work").expect("parses").expect("has VEVENT");

        assert!(event.all_day);
        assert_eq!(event.start, Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).single().expect("valid"));
        assert_eq!(event.end, Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).single().expect("valid"));
    }

    #[test]
    fn built_events_round_trip_through_the_parser() {
        let draft = CalendarEventDraft {
            title: Some("Planning, part 2".to_string()),
            description: Some("line one\nline two".to_string()),
            start: Some(Utc.with_ymd_and_hms(2024, 4, 2, 9, 0, 0).single().expect("valid")),
            end: Some(Utc.with_ymd_and_hms(2024, 4, 2, 10, 0, 0).single().expect("valid")),
            ..CalendarEventDraft::default()
        };

        let ics = build_vevent("uid-1", &draft);
        let event = parse_vevent(&ics, "work").expect("parses").expect("has VEVENT");

        assert_eq!(event.id, "uid-1");
        assert_eq!(event.title, "Planning, part 2");
        assert_eq!(event.description.as_deref(), Some("line one\nline two"));
        assert_eq!(event.start, draft.start.expect("set"));
    }

    #[tokio::test]
    async fn report_multistatus_is_normalized_into_events() {
        let server = MockServer::start().await;
        let body = format!(
            concat!(
                r#"<?xml version="1.0" encoding="utf-8"?>"#,
                r#"<D:multistatus xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">"#,
                r#"<D:response><D:href>/cal/ev-100.ics</D:href><D:propstat><D:prop>"#,
                r#"<C:calendar-data>{first}</C:calendar-data>"#,
                r#"</D:prop></D:propstat></D:response>"#,
                r#"<D:response><D:href>/cal/ev-200.ics</D:href><D:propstat><D:prop>"#,
                r#"<C:calendar-data>{second}</C:calendar-data>"#,
                r#"</D:prop></D:propstat></D:response>"#,
                r#"</D:multistatus>"#
            ),
            first = TIMED_EVENT_ICS,
            second = ALL_DAY_ICS,
        );
        Mock::given(method("REPORT"))
            .and(path("/cal"))
            .respond_with(ResponseTemplate::new(207).set_body_string(body))
            .mount(&server)
            .await;

        let adapter =
            CaldavAdapter::new(&test_config(&format!("{}/cal", server.uri()))).expect("config ok");
        let window = SyncWindow {
            start: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).single().expect("valid"),
            end: Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).single().expect("valid"),
        };
        let page = adapter.sync_events(window, None).await.expect("sync succeeds");

        assert!(!page.has_more);
        assert!(page.cursor.is_none());
        let ids: Vec<&str> = page.items.iter().map(|event| event.id.as_str()).collect();
        assert_eq!(ids, vec!["ev-100", "ev-200"]);
    }

    #[tokio::test]
    async fn connect_reports_auth_failure_without_error() {
        let server = MockServer::start().await;
        Mock::given(method("PROPFIND"))
            .and(path("/cal"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let mut adapter =
            CaldavAdapter::new(&test_config(&format!("{}/cal", server.uri()))).expect("config ok");
        assert!(!adapter.connect().await.expect("auth failure is not a fault"));
    }
}
