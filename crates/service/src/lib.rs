//! Service host: starts the dashboard and API servers around a shared socket
//! hub and keeps them running until interrupted.
//!
//! Lifecycle (see [`orchestrator::Orchestrator::run`]):
//! 1. Derive a lifecycle token and listen for interrupts
//! 2. Load the mod workspace and check the install environment
//! 3. Create the socket hub, then the dashboard and API servers on it
//! 4. Start dashboard init and the API listener under supervision
//! 5. Wait for cancellation or a task failure, then drain

pub mod api;
pub mod components;
pub mod dashboard;
pub mod environment;
pub mod error;
pub mod hub;
pub mod orchestrator;
pub mod protocol;
pub mod signal;
pub mod supervisor;
pub mod workspace;
pub mod ws;

pub use {
    components::{ApiService, DashboardService, LocalComponents, ServiceComponents},
    error::ServiceError,
    hub::SocketHub,
    orchestrator::{Orchestrator, Started, StartupOptions},
};
