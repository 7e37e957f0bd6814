//! Canonical calendar event types, independent of any provider wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event confirmation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Confirmed,
    Tentative,
    Cancelled,
}

/// Attendee response status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendeeResponse {
    NeedsAction,
    Accepted,
    Declined,
    Tentative,
}

/// A single attendee on a calendar event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttendee {
    pub email: String,
    pub name: Option<String>,
    pub response: AttendeeResponse,
}

/// Canonical representation of a scheduled event.
///
/// Produced only by provider adapters; callers supply a
/// [`CalendarEventDraft`] for create/update operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub all_day: bool,
    pub status: EventStatus,
    /// Organizer email, when the provider exposes one
    pub organizer: Option<String>,
    /// Attendees in provider order
    pub attendees: Vec<EventAttendee>,
    /// Recurrence rule (RRULE) passed through verbatim
    pub recurrence: Option<String>,
    /// Identifier of the owning calendar
    pub calendar_id: String,
}

/// Partial event payload for create/update operations.
///
/// Absent fields are left untouched on update and defaulted on create.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalendarEventDraft {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub all_day: Option<bool>,
    pub attendees: Option<Vec<String>>,
    pub recurrence: Option<String>,
}
