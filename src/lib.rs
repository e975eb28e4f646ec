//! One ordered, typed event stream over many interchangeable LLM backends.
//!
//! A request names a model from the [`registry`]; the [`controller`] runs
//! it against the bound backend through its [`middleware`], executes the
//! [`tools`] the backend calls, and emits every event through the
//! [`multiplexer`]. Outbound HTTP goes through [`resilience`]. The
//! [`server`] exposes all of it as server-sent events.

pub mod accumulator;
pub mod config;
pub mod controller;
pub mod error;
pub mod factory;
pub mod middleware;
pub mod multiplexer;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod resilience;
pub mod response;
pub mod server;
pub mod sse_stream;
pub mod tools;
pub mod transport;
pub mod types;

pub use config::GatewayConfig;
pub use controller::{
    GenerationController, GenerationHandle, GenerationOutcome, GenerationRequest, GenerationState,
};
pub use error::Error;
pub use provider::LanguageModel;
pub use registry::{ModelDescriptor, ProviderBinding, ProviderRegistry};
pub use response::*;
pub use types::*;
