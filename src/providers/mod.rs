//! Backend implementations.

pub mod openai_compatible;

pub use openai_compatible::{Delivery, OpenAiCompatibleBackend};
