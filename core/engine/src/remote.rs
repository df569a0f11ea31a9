//! Remote store seam.
//!
//! The backend is reached through three operations. Implementations decide
//! the transport; the engine only relies on the inputs and outputs below and
//! bounds every call with [`with_timeout`].

use async_trait::async_trait;
use runtrack_protocol::{
    CompletionReceipt, CompletionRequest, SegmentAck, SegmentUpload, SessionId,
};
use std::future::Future;
use std::time::Duration;

use crate::error::ApiError;

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn create_session(&self) -> Result<SessionId, ApiError>;

    async fn append_segment(&self, upload: &SegmentUpload) -> Result<SegmentAck, ApiError>;

    async fn complete_session(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionReceipt, ApiError>;
}

pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ApiError::Network(format!(
            "request timed out after {}s",
            limit.as_secs()
        ))),
    }
}
