//! # Relay Core
//!
//! Pure business logic layer - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port/adapter interfaces (traits) for persistence and outbound I/O
//! - The workflow execution engine and trigger dispatcher
//! - Condition evaluation and string interpolation
//!
//! ## Architecture Principles
//! - Only depends on `relay-domain`
//! - No database, HTTP, or provider code
//! - All external dependencies via traits
//! - Pure, testable business logic

pub mod automation;

// Re-export specific items to avoid ambiguity
pub use automation::condition::evaluate_condition;
pub use automation::dispatcher::TriggerDispatcher;
pub use automation::engine::{ExecutionOutcome, WorkflowEngine};
pub use automation::interpolate::{interpolate, interpolate_value, resolve_path};
pub use automation::ports::{
    EmailDispatcher, EntityStore, ExecutionRepository, HttpCallOutcome, HttpDispatcher,
    OutboundRequest, WorkflowRepository,
};
