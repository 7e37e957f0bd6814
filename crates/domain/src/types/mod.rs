//! Domain types and models

pub mod calendar;
pub mod email;
pub mod entity;
pub mod provider;
pub mod workflow;

pub use calendar::{AttendeeResponse, CalendarEvent, CalendarEventDraft, EventAttendee, EventStatus};
pub use email::{EmailMessage, OutgoingEmail};
pub use entity::{EntityKind, EntityRecord};
pub use provider::{MailServer, ProviderConfig, ProviderCredentials, ProviderKind, SyncPage};
pub use workflow::{
    ActionConfig, ActionKind, AddNoteAction, Condition, ConditionOperator, CreateRecordAction,
    CreateTaskAction, DelayAction, DeleteRecordAction, ExecutionStatus, HttpRequestAction,
    SendEmailAction, TagAction, TriggerConfig, TriggerType, UpdateRecordAction, WorkflowDefinition,
    WorkflowExecution,
};
