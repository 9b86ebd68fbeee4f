//! Zones: isolated script-execution domains over a fixed worker pool.
//!
//! A zone owns its workers (dedicated OS threads, one engine each), a small
//! tokio runtime for timeout supervision and broadcast aggregation, the
//! broadcast replay history, and a per-zone native module cache. Both the
//! callback and synchronous API surfaces funnel into the same scheduler, so
//! every operation resolves to exactly one response either way.

pub mod broadcast;
pub mod execute;
pub mod pool;
pub mod worker;

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::runtime::Runtime;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::api::{ExecuteRequest, ExecuteResponse, ResponseCode};
use crate::config::{Config, ZoneSettings};
use crate::engine::{EngineFactory, MiniEngine};
use crate::module::{ModuleCache, NativeModule, RegistryResolver};
use crate::{elog, Error, Result};

pub use broadcast::BroadcastCoordinator;
pub use execute::ExecuteScheduler;
pub use pool::WorkerPool;
pub use worker::{TaskOutcome, Worker, WorkerState};

pub struct Zone {
    name: String,
    settings: ZoneSettings,
    runtime: Runtime,
    pool: Arc<WorkerPool>,
    coordinator: Arc<BroadcastCoordinator>,
    scheduler: ExecuteScheduler,
    modules: Arc<ModuleCache>,
    cancel: CancellationToken,
    destroyed: AtomicBool,
}

impl Zone {
    /// Create a zone with the bundled engine. `settings` is the flag-style
    /// settings string (`--workers <n> --bootstrapFile <path>`); unset
    /// values fall back to the user config file, then to defaults.
    pub fn new(name: impl Into<String>, settings: &str) -> Result<Self> {
        let config = Config::load().unwrap_or_default();
        let settings = ZoneSettings::parse_with_config(settings, &config)?;
        let modules = Arc::new(ModuleCache::new());
        let cache = modules.clone();
        let factory: EngineFactory =
            Arc::new(move || Box::new(MiniEngine::new().with_modules(cache.clone())));
        Self::build(name.into(), settings, factory, modules)
    }

    /// Create a zone backed by a custom engine. The factory is called once
    /// per worker; engines produced by it are never shared.
    pub fn with_engine_factory(
        name: impl Into<String>,
        settings: &str,
        factory: EngineFactory,
    ) -> Result<Self> {
        let settings = ZoneSettings::parse(settings)?;
        Self::build(name.into(), settings, factory, Arc::new(ModuleCache::new()))
    }

    fn build(
        name: String,
        settings: ZoneSettings,
        factory: EngineFactory,
        modules: Arc<ModuleCache>,
    ) -> Result<Self> {
        let bootstrap = match &settings.bootstrap_file {
            Some(path) => Some(fs::read_to_string(path).map_err(|e| {
                Error::Validation(format!(
                    "cannot read bootstrap file {}: {}",
                    path.display(),
                    e
                ))
            })?),
            None => None,
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_time()
            .thread_name(format!("enclave-{}", name))
            .build()?;

        let pool = Arc::new(WorkerPool::new(
            settings.workers,
            &factory,
            bootstrap.as_deref(),
            &[],
        )?);
        let coordinator = Arc::new(BroadcastCoordinator::new(pool.clone()));
        let cancel = CancellationToken::new();
        let resolver = Arc::new(RegistryResolver::new(modules.clone()));
        let scheduler = ExecuteScheduler::new(
            pool.clone(),
            resolver,
            runtime.handle().clone(),
            cancel.clone(),
        );

        elog!("Zone '{}' created with {} worker(s)", name, settings.workers);
        Ok(Self {
            name,
            settings,
            runtime,
            pool,
            coordinator,
            scheduler,
            modules,
            cancel,
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &ZoneSettings {
        &self.settings
    }

    pub fn worker_count(&self) -> usize {
        self.pool.len()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Register a native module on this zone. Later registrations with the
    /// same name shadow earlier ones; nothing is ever unloaded.
    pub fn register_module(&self, module: NativeModule) {
        elog!("Zone '{}': registering module '{}'", self.name, module.name());
        self.modules.insert(Arc::new(module));
    }

    /// Apply a script to every worker; `callback` receives the aggregated
    /// code once all workers have answered.
    pub fn broadcast(
        &self,
        script: impl Into<String>,
        callback: impl FnOnce(ResponseCode) + Send + 'static,
    ) {
        if self.is_destroyed() {
            callback(ResponseCode::InternalError);
            return;
        }
        let coordinator = self.coordinator.clone();
        let script = script.into();
        self.runtime.spawn(async move {
            let code = coordinator.broadcast(script).await;
            callback(code);
        });
    }

    /// Blocking form of [`Zone::broadcast`]. Must not be called from inside
    /// an async runtime.
    pub fn broadcast_sync(&self, script: impl Into<String>) -> ResponseCode {
        let (tx, rx) = oneshot::channel();
        self.broadcast(script, move |code| {
            let _ = tx.send(code);
        });
        rx.blocking_recv().unwrap_or(ResponseCode::InternalError)
    }

    /// Dispatch a function call to one worker; `callback` receives the
    /// single response.
    pub fn execute(
        &self,
        request: ExecuteRequest,
        callback: impl FnOnce(ExecuteResponse) + Send + 'static,
    ) {
        if self.is_destroyed() {
            callback(ExecuteResponse::failure(
                ResponseCode::InternalError,
                Error::ZoneDestroyed(self.name.clone()).to_string(),
            ));
            return;
        }
        self.scheduler.execute(request, Box::new(callback));
    }

    /// Blocking form of [`Zone::execute`]. Must not be called from inside an
    /// async runtime.
    pub fn execute_sync(&self, request: ExecuteRequest) -> ExecuteResponse {
        let (tx, rx) = oneshot::channel();
        self.execute(request, move |response| {
            let _ = tx.send(response);
        });
        rx.blocking_recv().unwrap_or_else(|_| {
            ExecuteResponse::failure(ResponseCode::InternalError, "response channel closed")
        })
    }

    /// Tear the zone down: cancel timeout supervisors, then stop, interrupt,
    /// drain, and join every worker. Idempotent; every pending request still
    /// receives a response.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        elog!("Destroying zone '{}'", self.name);
        self.cancel.cancel();
        self.pool.shutdown();
    }
}

impl Drop for Zone {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Zone")
            .field("name", &self.name)
            .field("workers", &self.pool.len())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

/// Cheaply clonable handle to a shared [`Zone`].
///
/// Proxies delegate every operation to the underlying zone; dropping the
/// last handle destroys it.
#[derive(Clone, Debug)]
pub struct ZoneProxy {
    zone: Arc<Zone>,
}

impl ZoneProxy {
    pub fn new(name: impl Into<String>, settings: &str) -> Result<Self> {
        Ok(Self {
            zone: Arc::new(Zone::new(name, settings)?),
        })
    }

    pub fn with_engine_factory(
        name: impl Into<String>,
        settings: &str,
        factory: EngineFactory,
    ) -> Result<Self> {
        Ok(Self {
            zone: Arc::new(Zone::with_engine_factory(name, settings, factory)?),
        })
    }

    pub fn from_zone(zone: Arc<Zone>) -> Self {
        Self { zone }
    }

    pub fn name(&self) -> &str {
        self.zone.name()
    }

    pub fn zone(&self) -> &Zone {
        &self.zone
    }

    pub fn broadcast(
        &self,
        script: impl Into<String>,
        callback: impl FnOnce(ResponseCode) + Send + 'static,
    ) {
        self.zone.broadcast(script, callback)
    }

    pub fn broadcast_sync(&self, script: impl Into<String>) -> ResponseCode {
        self.zone.broadcast_sync(script)
    }

    pub fn execute(
        &self,
        request: ExecuteRequest,
        callback: impl FnOnce(ExecuteResponse) + Send + 'static,
    ) {
        self.zone.execute(request, callback)
    }

    pub fn execute_sync(&self, request: ExecuteRequest) -> ExecuteResponse {
        self.zone.execute_sync(request)
    }

    pub fn register_module(&self, module: NativeModule) {
        self.zone.register_module(module)
    }

    pub fn destroy(&self) {
        self.zone.destroy()
    }
}
