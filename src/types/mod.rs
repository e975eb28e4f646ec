//! Core types used throughout the library.

pub mod config;
pub mod conversation;
pub mod message;
pub mod streaming;

// Re-export commonly used types
pub use config::*;
pub use conversation::*;
pub use message::*;
pub use streaming::*;
