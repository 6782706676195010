//! Domain layer: value objects and the error taxonomy of the chat core.
//!
//! Nothing in here performs I/O. Validation rules for display names and chat
//! content live on the value objects, so an instance of `Username` or
//! `MessageContent` is always valid and already sanitized.

pub mod error;
pub mod value_object;

pub use error::{ChatError, RegistryError, UsernameIssue, ValidationIssue};
pub use value_object::{ConnectionId, MessageContent, Timestamp, Username, sanitize_html};
