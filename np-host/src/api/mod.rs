//! HTTP control API for the Neural Pitch UI

pub mod artifact;
pub mod health;
pub mod session;
pub mod sse;

pub use artifact::artifact_routes;
pub use health::health_routes;
pub use session::session_routes;
pub use sse::event_routes;
