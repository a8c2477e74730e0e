#![doc = include_str!("../README.md")]
//! asp-session
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cancel;
pub mod capability;
pub mod continuation;
pub mod driver;
pub mod event;
pub mod harness_session;
pub mod jsonl;
pub mod process_session;
pub mod result;
pub mod session_registry;
pub mod spec;
pub mod stream;
pub mod validate;

pub use asp_error::AspError;
pub use cancel::RunHandle;
pub use capability::{capability_of, model_is_allowed, FrontendCapability, Provider, FRONTENDS};
pub use continuation::ContinuationRef;
pub use driver::{run_turn_non_interactive, RunTurnInput};
pub use event::{ContentBlock, Event, EventKind, MessageRole, MessageUpdate, OnEvent, RunState};
pub use harness_session::{AutoAllowHandler, HarnessSession, PermissionDecision, PermissionHandler, PermissionRequest, SendPromptOptions};
pub use process_session::{EventMapper, ProcessHarnessSession, ProcessSessionSpec};
pub use result::{RunError, RunResult};
pub use session_registry::{SessionFactory, SessionRegistry};
pub use spec::ComposeSpec;
pub use stream::event_stream;

/// Result alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, AspError>;
