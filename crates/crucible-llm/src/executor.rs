//! The executor seam between the runner and the provider SDK.

use crate::types::{GenerateOutcome, GenerateRequest};
use crucible_core::Result;
use futures::future::BoxFuture;
use futures::Stream;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

pub type TextStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// A streaming segment: text deltas plus a tail future resolving to the same
/// outcome shape `generate` returns.
pub struct StreamHandle {
    pub text_stream: TextStream,
    pub final_result: BoxFuture<'static, Result<GenerateOutcome>>,
}

/// Runs one segment of model steps with the tool registry bound. The
/// executor owns the inner tool-call loop; the runner only sees the segment
/// outcome.
#[async_trait::async_trait]
pub trait ModelExecutor: Send + Sync {
    async fn generate(
        &self,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<GenerateOutcome>;

    async fn stream(
        &self,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<StreamHandle>;
}
