//! Warden Node Library
//!
//! HTTP service around the warden decision pipeline: collects visitor telemetry,
//! resolves IP reputation, persists visits and answers with the verdict.

pub mod api;
pub mod notify;
pub mod reputation;
pub mod state;
pub mod telemetry;

// Re-export commonly used types
pub use api::create_api_router;
pub use notify::{BlockNotification, Notifier};
pub use reputation::ReputationClient;
pub use state::{AppState, VisitorSession};
