//! Sift Channel - Progress channel protocol and event fan-out.
//!
//! [`ProgressHub`] is the [`sift_core::EventSink`] handed to the scheduler;
//! every connection subscribes to it. [`protocol`] defines the JSON frames
//! exchanged with clients.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

#[allow(missing_docs)]
pub mod error;
#[allow(missing_docs)]
pub mod hub;
pub mod protocol;

// Re-export commonly used types
pub use error::{ProtocolError, Result};
pub use hub::{ProgressHub, SubscriberId, Subscription};
pub use protocol::{parse_command, Command, ControlMessage, ServerMessage};
