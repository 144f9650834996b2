//! Load-time registration of module callbacks and the frozen RPC table.
//!
//! Modules register RPCs only while their `init` runs. Each init gets its own
//! [`RpcRegistrar`]; after init returns the registrar is closed and its
//! entries are merged into the builder. [`HostBuilder::build`] freezes the
//! table, after which nothing can be added.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::Context as _;
use linna_core::{
    DbHandle, ExecutionMode, Initializer, LogSink, Logger, ModuleRef, RegistrationError,
    RpcHandler, RuntimeContext,
};
use tracing::{debug, info};

use super::config::ServerConfig;
use super::host::Host;
use crate::session::SessionIssuer;

// ---------------------------------------------------------------------------
// RpcEntry / RpcTable
// ---------------------------------------------------------------------------

/// A registered handler and the module that registered it.
#[derive(Clone)]
pub struct RpcEntry {
    pub handler: RpcHandler,
    pub module: ModuleRef,
}

/// Immutable id to handler table, shared by every dispatch after startup.
#[derive(Clone, Default)]
pub struct RpcTable {
    entries: HashMap<String, RpcEntry>,
}

impl RpcTable {
    /// Case-insensitive lookup.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&RpcEntry> {
        self.entries.get(&id.to_lowercase())
    }

    /// Registered ids, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// RpcRegistrar
// ---------------------------------------------------------------------------

/// [`Initializer`] handed to a single module's init call.
pub struct RpcRegistrar<'a> {
    existing: &'a HashMap<String, RpcEntry>,
    module: &'a str,
    pending: Vec<(String, RpcHandler)>,
    closed: bool,
}

impl<'a> RpcRegistrar<'a> {
    /// `existing` is the table built so far; ids already there are duplicates.
    #[must_use]
    pub fn new(existing: &'a HashMap<String, RpcEntry>, module: &'a str) -> Self {
        Self {
            existing,
            module,
            pending: Vec::new(),
            closed: false,
        }
    }

    /// End the registration window. Later registrations fail with `Closed`.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Registrations in the order they were made, ids lower-cased.
    #[must_use]
    pub fn into_entries(self) -> Vec<(String, RpcHandler)> {
        self.pending
    }
}

impl Initializer for RpcRegistrar<'_> {
    fn register_rpc(&mut self, id: &str, handler: RpcHandler) -> Result<(), RegistrationError> {
        let id = id.to_lowercase();
        if self.closed {
            return Err(RegistrationError::Closed { id });
        }
        if id.is_empty() {
            return Err(RegistrationError::EmptyId);
        }
        if self.existing.contains_key(&id) || self.pending.iter().any(|(k, _)| *k == id) {
            return Err(RegistrationError::Duplicate { id });
        }
        debug!(module = self.module, rpc_id = %id, "rpc registered");
        self.pending.push((id, handler));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HostBuilder
// ---------------------------------------------------------------------------

/// Loads modules one at a time, then freezes everything into a [`Host`].
pub struct HostBuilder {
    config: Arc<ServerConfig>,
    env: HashMap<String, String>,
    entries: HashMap<String, RpcEntry>,
    modules: Vec<ModuleRef>,
    db: DbHandle,
    sink: Arc<dyn LogSink>,
    sessions: Arc<SessionIssuer>,
}

impl HostBuilder {
    #[must_use]
    pub fn new(config: ServerConfig, db: DbHandle, sink: Arc<dyn LogSink>) -> Self {
        let sessions = Arc::new(SessionIssuer::new(
            &config.session_key,
            config.session_expiry_secs,
        ));
        Self {
            env: config.env_map(),
            config: Arc::new(config),
            entries: HashMap::new(),
            modules: Vec::new(),
            db,
            sink,
            sessions,
        }
    }

    /// Session issuer shared with the host. Modules that mint sessions
    /// themselves take it at construction.
    #[must_use]
    pub fn sessions(&self) -> Arc<SessionIssuer> {
        Arc::clone(&self.sessions)
    }

    #[must_use]
    pub fn db(&self) -> DbHandle {
        Arc::clone(&self.db)
    }

    /// Run `module`'s init and merge what it registered.
    ///
    /// # Errors
    ///
    /// Returns the init error (or a panic report). Nothing the module
    /// registered is kept and the module is not loaded.
    pub fn load_module(&mut self, module: ModuleRef) -> anyhow::Result<()> {
        let name = module.name().to_string();
        let ctx = RuntimeContext::builder()
            .env(self.env.clone())
            .execution_mode(ExecutionMode::RunOnce)
            .node(self.config.node.clone())
            .build();
        let logger = Logger::new(Arc::clone(&self.sink)).with_field("module", name.clone());
        let module_config = self.config.module_config(&name);

        let mut registrar = RpcRegistrar::new(&self.entries, &name);
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            module.init(&ctx, &logger, &self.db, &module_config, &mut registrar)
        }));
        registrar.close();
        let registered = registrar.into_entries();

        match outcome {
            Ok(result) => result.with_context(|| format!("module {name} failed to initialize"))?,
            Err(_) => anyhow::bail!("module {name} panicked during init"),
        }

        let count = registered.len();
        for (id, handler) in registered {
            self.entries.insert(
                id,
                RpcEntry {
                    handler,
                    module: Arc::clone(&module),
                },
            );
        }
        info!(
            module = %name,
            rpcs = count,
            providers = ?module.capabilities(),
            "module loaded"
        );
        self.modules.push(module);
        Ok(())
    }

    /// Freeze the table and produce the serving host.
    #[must_use]
    pub fn build(self) -> Host {
        Host::new(
            self.config,
            self.env,
            RpcTable {
                entries: self.entries,
            },
            self.modules,
            self.db,
            self.sink,
            self.sessions,
        )
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use linna_core::{DbHandle, InitializerExt, LinnaModule, ModuleConfig};

    use super::*;
    use crate::storage::memory::MemoryDatabase;

    fn noop_handler() -> RpcHandler {
        Arc::new(
            |_ctx: RuntimeContext, _logger: Logger, _db: DbHandle, _m: ModuleRef, p: String| async move {
                Ok::<_, anyhow::Error>(p)
            },
        )
    }

    fn builder() -> HostBuilder {
        HostBuilder::new(
            ServerConfig::default(),
            Arc::new(MemoryDatabase::new()),
            Arc::new(linna_core::MemorySink::new()),
        )
    }

    /// Registers the given ids, then optionally fails.
    struct Registers {
        name: &'static str,
        ids: Vec<&'static str>,
        fail: bool,
    }

    #[async_trait]
    impl LinnaModule for Registers {
        fn name(&self) -> &str {
            self.name
        }

        fn init(
            &self,
            ctx: &RuntimeContext,
            _logger: &Logger,
            _db: &DbHandle,
            config: &ModuleConfig,
            initializer: &mut dyn Initializer,
        ) -> anyhow::Result<()> {
            assert_eq!(ctx.execution_mode(), Some(ExecutionMode::RunOnce));
            assert_eq!(config.name, self.name);
            for id in &self.ids {
                initializer.register_rpc_fn(id, |_ctx, _logger, _db, _module, payload| async move {
                    anyhow::Ok(payload)
                })?;
            }
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(())
        }
    }

    struct Panics;

    #[async_trait]
    impl LinnaModule for Panics {
        fn name(&self) -> &str {
            "panics"
        }

        fn init(
            &self,
            _ctx: &RuntimeContext,
            _logger: &Logger,
            _db: &DbHandle,
            _config: &ModuleConfig,
            _initializer: &mut dyn Initializer,
        ) -> anyhow::Result<()> {
            panic!("init exploded");
        }
    }

    #[test]
    fn registrar_rejects_empty_duplicate_and_closed() {
        let existing = HashMap::new();
        let mut registrar = RpcRegistrar::new(&existing, "test");

        assert_eq!(
            registrar.register_rpc("", noop_handler()),
            Err(RegistrationError::EmptyId)
        );
        registrar.register_rpc("Echo", noop_handler()).unwrap();
        assert_eq!(
            registrar.register_rpc("ECHO", noop_handler()),
            Err(RegistrationError::Duplicate { id: "echo".into() })
        );

        registrar.close();
        assert_eq!(
            registrar.register_rpc("late", noop_handler()),
            Err(RegistrationError::Closed { id: "late".into() })
        );

        let entries = registrar.into_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "echo");
    }

    #[test]
    fn loads_modules_and_detects_cross_module_duplicates() {
        let mut builder = builder();
        builder
            .load_module(Arc::new(Registers {
                name: "a",
                ids: vec!["one", "two"],
                fail: false,
            }))
            .unwrap();

        let err = builder
            .load_module(Arc::new(Registers {
                name: "b",
                ids: vec!["three", "ONE"],
                fail: false,
            }))
            .unwrap_err();
        assert!(err
            .chain()
            .any(|e| e.downcast_ref::<RegistrationError>().is_some()));

        let host = builder.build();
        assert_eq!(host.rpc_ids(), vec!["one", "two"]);
        assert_eq!(host.modules().len(), 1);
    }

    #[test]
    fn failed_init_leaves_table_untouched() {
        let mut builder = builder();
        let err = builder
            .load_module(Arc::new(Registers {
                name: "broken",
                ids: vec!["half"],
                fail: true,
            }))
            .unwrap_err();
        assert!(err.to_string().contains("broken"));

        let host = builder.build();
        assert!(host.rpc_ids().is_empty());
        assert!(host.modules().is_empty());
    }

    #[test]
    fn panicking_init_is_reported_as_error() {
        let mut builder = builder();
        let err = builder.load_module(Arc::new(Panics)).unwrap_err();
        assert!(err.to_string().contains("panicked"));
        assert!(builder.build().modules().is_empty());
    }

    #[test]
    fn table_lookup_is_case_insensitive() {
        let mut builder = builder();
        builder
            .load_module(Arc::new(Registers {
                name: "a",
                ids: vec!["Profile_Get"],
                fail: false,
            }))
            .unwrap();
        let host = builder.build();
        assert!(host.rpc_table().get("PROFILE_GET").is_some());
        assert!(host.rpc_table().get("profile_set").is_none());
        assert_eq!(host.rpc_table().len(), 1);
    }
}
