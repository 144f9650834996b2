//! Pipeline composition: combines all middleware layers into a single service stack.

use tower::ServiceBuilder;

use super::load_shed::{LoadShedLayer, LoadShedService};
use super::metrics::{MetricsLayer, MetricsService};
use super::timeout::{TimeoutLayer, TimeoutService};
use crate::service::config::ServerConfig;
use crate::service::host::Host;

/// The composed operation pipeline. Cloning shares the load-shed semaphore.
pub type OperationPipeline = LoadShedService<TimeoutService<MetricsService<Host>>>;

/// Wrap `host` with the operation middleware.
///
/// Layer order (outermost to innermost):
/// 1. `LoadShedLayer` -- reject when overloaded (fail fast before doing any work)
/// 2. `TimeoutLayer` -- enforce per-operation timeouts
/// 3. `MetricsLayer` -- record timing and outcome (closest to the actual handler)
#[must_use]
pub fn build_operation_pipeline(host: Host, config: &ServerConfig) -> OperationPipeline {
    ServiceBuilder::new()
        .layer(LoadShedLayer::new(config.max_concurrent_operations))
        .layer(TimeoutLayer)
        .layer(MetricsLayer)
        .service(host)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use linna_core::{
        DbHandle, Initializer, InitializerExt, LinnaModule, Logger, MemorySink, ModuleConfig,
        RuntimeContext,
    };
    use tower::ServiceExt;

    use super::*;
    use crate::service::operation::{
        DispatchError, Operation, OperationContext, OperationResponse, RequestMeta,
    };
    use crate::service::registry::HostBuilder;
    use crate::storage::memory::MemoryDatabase;

    struct Waits;

    #[async_trait]
    impl LinnaModule for Waits {
        fn name(&self) -> &str {
            "waits"
        }

        fn init(
            &self,
            _ctx: &RuntimeContext,
            _logger: &Logger,
            _db: &DbHandle,
            _config: &ModuleConfig,
            initializer: &mut dyn Initializer,
        ) -> anyhow::Result<()> {
            initializer.register_rpc_fn("wait", |ctx, _logger, _db, _module, _payload| async move {
                ctx.cancellation().cancelled().await;
                anyhow::Ok(String::new())
            })?;
            initializer.register_rpc_fn("echo", |_ctx, _logger, _db, _module, payload| async move {
                anyhow::Ok(payload)
            })?;
            Ok(())
        }
    }

    fn pipeline(config: &ServerConfig) -> OperationPipeline {
        let mut builder = HostBuilder::new(
            config.clone(),
            Arc::new(MemoryDatabase::new()),
            Arc::new(MemorySink::new()),
        );
        builder.load_module(Arc::new(Waits)).unwrap();
        build_operation_pipeline(builder.build(), config)
    }

    fn op(id: &str, timeout_ms: u64) -> Operation {
        Operation::Rpc {
            ctx: OperationContext::new(1, RequestMeta::default(), timeout_ms),
            id: id.into(),
            payload: "ping".into(),
        }
    }

    #[tokio::test]
    async fn pipeline_routes_through_all_layers() {
        let config = ServerConfig::default();
        let resp = pipeline(&config).oneshot(op("echo", 1000)).await.unwrap();
        assert!(matches!(resp, OperationResponse::Rpc(ref body) if body == "ping"));
    }

    #[tokio::test]
    async fn stuck_handler_times_out() {
        let config = ServerConfig::default();
        let err = pipeline(&config).oneshot(op("wait", 20)).await.unwrap_err();
        assert!(matches!(err, DispatchError::Timeout { timeout_ms: 20 }));
    }

    #[tokio::test]
    async fn zero_capacity_sheds_everything() {
        let config = ServerConfig {
            max_concurrent_operations: 0,
            ..ServerConfig::default()
        };
        let err = pipeline(&config).oneshot(op("echo", 1000)).await.unwrap_err();
        assert!(matches!(err, DispatchError::Overloaded));
    }
}
