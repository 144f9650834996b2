//! Timeout middleware for operations.
//!
//! Rejects operations that exceed their `call_timeout_ms` with
//! `DispatchError::Timeout` and cancels the operation's token so module code
//! observing the context can stop early.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tower::{Layer, Service};

use crate::service::operation::{DispatchError, Operation, OperationResponse};

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

/// Tower layer that wraps services with per-operation timeout enforcement.
///
/// The timeout is read from each operation's `ctx.call_timeout_ms` field.
#[derive(Debug, Clone)]
pub struct TimeoutLayer;

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService { inner }
    }
}

// ---------------------------------------------------------------------------
// TimeoutService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
}

impl<S> Service<Operation> for TimeoutService<S>
where
    S: Service<Operation, Response = OperationResponse, Error = DispatchError> + Send,
    S::Future: Send + 'static,
{
    type Response = OperationResponse;
    type Error = DispatchError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, DispatchError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let timeout_ms = op.ctx().call_timeout_ms;
        let cancel = op.ctx().cancel.clone();
        let fut = self.inner.call(op);
        Box::pin(async move {
            let duration = Duration::from_millis(timeout_ms);
            match tokio::time::timeout(duration, fut).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    cancel.cancel();
                    Err(DispatchError::Timeout { timeout_ms })
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use linna_core::CancellationToken;
    use tower::ServiceExt;

    use super::*;
    use crate::service::operation::{OperationContext, RequestMeta};

    /// Service that takes a configurable delay before responding.
    struct SlowService {
        delay_ms: u64,
    }

    impl Service<Operation> for SlowService {
        type Response = OperationResponse;
        type Error = DispatchError;
        type Future =
            Pin<Box<dyn Future<Output = Result<OperationResponse, DispatchError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _op: Operation) -> Self::Future {
            let delay = self.delay_ms;
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(OperationResponse::Rpc("done".into()))
            })
        }
    }

    fn make_op(timeout_ms: u64) -> (Operation, CancellationToken) {
        let ctx = OperationContext::new(1, RequestMeta::default(), timeout_ms);
        let cancel = ctx.cancel.clone();
        let op = Operation::Rpc {
            ctx,
            id: "slow".into(),
            payload: String::new(),
        };
        (op, cancel)
    }

    #[tokio::test]
    async fn completes_within_timeout() {
        let svc = TimeoutLayer.layer(SlowService { delay_ms: 10 });
        let (op, cancel) = make_op(1000);
        let resp = svc.oneshot(op).await.unwrap();
        assert!(matches!(resp, OperationResponse::Rpc(ref body) if body == "done"));
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn exceeds_timeout_returns_error_and_cancels() {
        let svc = TimeoutLayer.layer(SlowService { delay_ms: 200 });
        let (op, cancel) = make_op(50);
        let err = svc.oneshot(op).await.unwrap_err();
        assert!(matches!(err, DispatchError::Timeout { timeout_ms: 50 }));
        assert!(cancel.is_cancelled());
    }
}
