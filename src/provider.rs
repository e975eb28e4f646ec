use crate::{BackendRequest, Error, Response};

/// A language-model backend.
///
/// Every backend answers with a stream, including ones with no incremental
/// delivery (those emit a single buffered event). Use `response.stream()`
/// for events or `response.buffer().await` for the complete turn.
#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync + 'static {
    /// Vendor name used in logs and error messages.
    fn provider_name(&self) -> &str;

    /// Start one round of generation. Resolving this future means the
    /// upstream accepted the request; output arrives on the stream.
    async fn generate(&self, request: &BackendRequest) -> Result<Response, Error>;
}
