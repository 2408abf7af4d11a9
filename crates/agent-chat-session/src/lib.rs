//! Session identity, history loading and conversation control.
//!
//! Provides:
//! - `route` / `LocationBinder` - Session identity from the location path
//! - `SessionProvisioner` - Create sessions for the configured agent
//! - `HistoryLoader` - Fetch a session's log, discarding stale results
//! - `ConversationController` - Keep all of the above bound to one session
//! - Backend implementations (memory)

pub mod backend;
pub mod controller;
pub mod history;
pub mod location;
pub mod provisioner;
pub mod route;

pub use controller::{ControllerError, ConversationController, ConversationState};
pub use history::{Generation, HistoryLoader, HistoryUpdate};
pub use location::{LocationBinder, MemoryLocation};
pub use provisioner::{ProvisionError, SessionProvisioner};
pub use route::{ROOT_PATH, derive_session_id, path_for, session_path};
