//! Conversion session: parameters, request fencing, debounce and the actor
//! that drives the state machine

pub mod controller;
pub mod debounce;
pub mod fence;
pub mod parameters;
pub mod state;

pub use controller::{spawn_session, SessionClosed, SessionHandle, SessionSettings};
pub use debounce::Debouncer;
pub use fence::{RequestFence, RequestId};
pub use parameters::{ConversionParameters, ParameterEdit, Preset};
pub use state::{ConversionSession, Effect, IssuedRequest, SelectedFile, SessionEvent, SessionSnapshot};
