//! Network module with deferred startup lifecycle.
//!
//! `new()` assembles shared state, `start()` binds the TCP listener, and
//! `serve()` accepts connections until shutdown. The bound port is known
//! between `start()` and `serve()`, so callers can log or publish it.

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{info, warn};

use super::handlers::{
    authenticate_handler, healthcheck_handler, readiness_handler, rpc_handler,
    session_refresh_handler, AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;
use crate::service::host::Host;
use crate::service::middleware::build_operation_pipeline;

/// Owns the HTTP listener and the state handlers share.
pub struct NetworkModule {
    state: AppState,
    listener: Option<TcpListener>,
}

impl NetworkModule {
    /// Wraps `host` in the operation pipeline without binding any port.
    #[must_use]
    pub fn new(host: Host) -> Self {
        let pipeline = build_operation_pipeline(host.clone(), host.config());
        let shutdown = Arc::new(ShutdownController::new());
        Self {
            state: AppState::new(host, pipeline, shutdown),
            listener: None,
        }
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.state.shutdown)
    }

    /// Assembles the axum router with all routes and middleware.
    ///
    /// Routes:
    /// - `GET /healthcheck` -- liveness, always `{}`
    /// - `GET /health/ready` -- readiness with lifecycle state
    /// - `POST /v2/rpc/{id}` -- invoke a registered RPC
    /// - `POST /v2/account/authenticate/{provider}` -- provider login
    /// - `POST /v2/account/session/refresh` -- re-mint a session
    pub fn build_router(&self) -> Router {
        let layers = build_http_layers(self.state.host.config());

        Router::new()
            .route("/healthcheck", get(healthcheck_handler))
            .route("/health/ready", get(readiness_handler))
            .route("/v2/rpc/{id}", post(rpc_handler))
            .route(
                "/v2/account/authenticate/{provider}",
                post(authenticate_handler),
            )
            .route("/v2/account/session/refresh", post(session_refresh_handler))
            .layer(layers)
            .with_state(self.state.clone())
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the bound port, which differs from the configured one when
    /// port 0 is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let config = self.state.host.config();
        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!(host = %config.host, port, "TCP listener bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves, then drains in-flight operations.
    ///
    /// Readiness flips to draining the moment `shutdown` resolves, while
    /// accepted requests are still running. Once they finish the state is
    /// stopped. If they outlast the drain timeout, `serve` returns anyway
    /// and the state stays draining.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called or the server hits a
    /// fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;
        let router = self.build_router();
        let controller = self.shutdown_controller();
        let drain_timeout = self.state.host.config().drain_timeout();

        controller.set_ready();
        info!(rpcs = self.state.host.rpc_table().len(), "serving");

        let (fired_tx, fired_rx) = oneshot::channel::<()>();
        let signal_controller = Arc::clone(&controller);
        let signal = async move {
            shutdown.await;
            signal_controller.begin_drain();
            info!(
                in_flight = signal_controller.in_flight_count(),
                "shutdown requested, draining"
            );
            let _ = fired_tx.send(());
        };

        let server = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .into_future();
        let deadline = async move {
            if fired_rx.await.is_ok() {
                tokio::time::sleep(drain_timeout).await;
            } else {
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            result = server => {
                result?;
                if controller.wait_for_drain(drain_timeout).await {
                    info!("all operations drained");
                } else {
                    warn!(
                        in_flight = controller.in_flight_count(),
                        "operations still in flight after connections closed"
                    );
                }
            }
            () = deadline => {
                warn!(
                    in_flight = controller.in_flight_count(),
                    "drain timeout expired with operations in flight"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use linna_core::{
        DbHandle, Initializer, InitializerExt, LinnaModule, Logger, MemorySink, ModuleConfig,
        RuntimeContext,
    };
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use super::*;
    use crate::network::handlers::test_state;
    use crate::network::shutdown::HealthState;
    use crate::service::config::ServerConfig;
    use crate::service::registry::HostBuilder;
    use crate::storage::memory::MemoryDatabase;

    /// `slow` takes 800ms, `stall` takes 30s.
    struct Sleepy;

    #[async_trait]
    impl LinnaModule for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        fn init(
            &self,
            _ctx: &RuntimeContext,
            _logger: &Logger,
            _db: &DbHandle,
            _config: &ModuleConfig,
            initializer: &mut dyn Initializer,
        ) -> anyhow::Result<()> {
            initializer.register_rpc_fn("slow", |_ctx, _logger, _db, _module, _payload| async move {
                tokio::time::sleep(Duration::from_millis(800)).await;
                anyhow::Ok("done".to_string())
            })?;
            initializer.register_rpc_fn("stall", |_ctx, _logger, _db, _module, _payload| async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                anyhow::Ok(String::new())
            })?;
            Ok(())
        }
    }

    struct Running {
        port: u16,
        controller: Arc<ShutdownController>,
        stop: oneshot::Sender<()>,
        server: tokio::task::JoinHandle<anyhow::Result<()>>,
    }

    async fn run_sleepy(drain_timeout_secs: u64) -> Running {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            drain_timeout_secs,
            ..ServerConfig::default()
        };
        let mut builder = HostBuilder::new(
            config,
            Arc::new(MemoryDatabase::new()),
            Arc::new(MemorySink::new()),
        );
        builder.load_module(Arc::new(Sleepy)).unwrap();
        let mut module = NetworkModule::new(builder.build());
        let port = module.start().await.unwrap();
        let controller = module.shutdown_controller();
        let (stop, rx) = oneshot::channel::<()>();
        let server = tokio::spawn(module.serve(async {
            let _ = rx.await;
        }));
        Running {
            port,
            controller,
            stop,
            server,
        }
    }

    async fn call_rpc(port: u16, id: &str) -> TcpStream {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let request =
            format!("POST /v2/rpc/{id} HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        stream
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    fn module() -> NetworkModule {
        NetworkModule::new(test_state().host)
    }

    #[test]
    fn new_creates_module_without_binding() {
        let module = module();
        assert!(module.listener.is_none());
    }

    #[test]
    fn shutdown_controller_returns_shared_arc() {
        let module = module();
        assert!(Arc::ptr_eq(
            &module.shutdown_controller(),
            &module.shutdown_controller()
        ));
    }

    #[test]
    fn build_router_creates_router() {
        let _router = module().build_router();
    }

    #[tokio::test]
    async fn serve_fails_without_start() {
        let module = module();
        let err = module
            .serve(std::future::pending::<()>())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("start()"));
    }

    #[tokio::test]
    async fn serves_and_drains_on_shutdown() {
        use crate::modules::accounts::AccountsModule;
        use crate::service::registry::HostBuilder;
        use crate::storage::memory::MemoryDatabase;
        use linna_core::MemorySink;

        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..ServerConfig::default()
        };
        let mut builder = HostBuilder::new(
            config,
            Arc::new(MemoryDatabase::new()),
            Arc::new(MemorySink::new()),
        );
        let accounts = AccountsModule::new(builder.sessions());
        builder.load_module(Arc::new(accounts)).unwrap();

        let mut module = NetworkModule::new(builder.build());
        let port = module.start().await.unwrap();
        assert!(port > 0);

        let controller = module.shutdown_controller();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(module.serve(async {
            let _ = rx.await;
        }));

        tokio::time::timeout(Duration::from_secs(5), async {
            while controller.health_state() != HealthState::Ready {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        tx.send(()).unwrap();
        server.await.unwrap().unwrap();
        assert_eq!(controller.health_state(), HealthState::Stopped);
    }

    #[tokio::test]
    async fn readiness_reports_draining_while_requests_finish() {
        let running = run_sleepy(30).await;
        let controller = Arc::clone(&running.controller);
        let mut stream = call_rpc(running.port, "slow").await;
        wait_until(|| controller.in_flight_count() == 1).await;

        running.stop.send(()).unwrap();
        wait_until(|| controller.health_state() == HealthState::Draining).await;
        assert_eq!(controller.in_flight_count(), 1);

        let mut response = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
            .await
            .unwrap()
            .unwrap();
        let response = String::from_utf8_lossy(&response);
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.ends_with("done"), "{response}");

        running.server.await.unwrap().unwrap();
        assert_eq!(controller.health_state(), HealthState::Stopped);
        assert_eq!(controller.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn drain_timeout_bounds_shutdown() {
        let running = run_sleepy(0).await;
        let controller = Arc::clone(&running.controller);
        let _stream = call_rpc(running.port, "stall").await;
        wait_until(|| controller.in_flight_count() == 1).await;

        running.stop.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), running.server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(controller.health_state(), HealthState::Draining);
    }
}
