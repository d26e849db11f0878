//! MCP Tools
//!
//! One module per tool in the external tool surface. Each exposes a
//! `schema()` describing its input and an `execute()` that runs it against
//! the shared [`crate::state::AppState`].

pub mod add_memory;
pub mod checklist;
pub mod delete_memory;
pub mod get_constitution;
pub mod log_event;
pub mod promote_to_fact;
pub mod propose_constitution_change;
pub mod refine_memory;
pub mod scan_conflicts;
pub mod search_events;
pub mod search_memory;
pub mod search_operations;
