use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::lifecycle::{self, ModuleInfo};
use crate::plan::Plan;
use crate::reconcile::{self, Direction};
use crate::registry::ModuleRegistry;
use cloudrow_db::Database;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::info;
use uuid::Uuid;

/// Entry point for every operation on a target.
///
/// Runs against one target are serialized: a second `apply`, `sync`,
/// `install` or `uninstall` on the same target waits for the first to
/// finish. Runs on different targets proceed independently.
pub struct Engine {
    registry: ModuleRegistry,
    config: EngineConfig,
    /// Target id → run lock. Entries live only while a run holds or waits
    /// for them.
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Engine {
    /// Creates an engine with the default configuration.
    pub fn new(registry: ModuleRegistry) -> Self {
        Self::with_config(registry, EngineConfig::default())
    }

    pub fn with_config(registry: ModuleRegistry, config: EngineConfig) -> Self {
        Self {
            registry,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Pushes the database's desired state to the cloud.
    pub async fn apply(&self, db: &Database, dry_run: bool) -> EngineResult<Plan> {
        self.reconcile(db, Direction::Apply, dry_run).await
    }

    /// Pulls the cloud's actual state into the database.
    pub async fn sync(&self, db: &Database, dry_run: bool) -> EngineResult<Plan> {
        self.reconcile(db, Direction::Sync, dry_run).await
    }

    async fn reconcile(&self, db: &Database, direction: Direction, dry_run: bool) -> EngineResult<Plan> {
        let _guard = self.lock_target(db).await;
        ensure_not_upgrading(db)?;
        info!(
            "Starting {} run {} on {}{}",
            direction.as_str(),
            Uuid::now_v7(),
            db.id(),
            if dry_run { " (dry run)" } else { "" }
        );
        reconcile::run(&self.registry, db, direction, dry_run, self.config.plateau_limit).await
    }

    /// Installs the named modules, then imports their cloud state.
    pub async fn install(&self, db: &Database, names: &[&str]) -> EngineResult<&'static str> {
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        let _guard = self.lock_target(db).await;
        ensure_not_upgrading(db)?;
        info!("Starting install run {} on {}: {:?}", Uuid::now_v7(), db.id(), names);
        lifecycle::install(&self.registry, &self.config, db, &names).await
    }

    /// Installs every registered module that is not installed yet.
    pub async fn install_all(&self, db: &Database) -> EngineResult<&'static str> {
        let _guard = self.lock_target(db).await;
        ensure_not_upgrading(db)?;
        info!("Starting install-all run {} on {}", Uuid::now_v7(), db.id());
        lifecycle::install_all(&self.registry, &self.config, db).await
    }

    /// Removes the named modules and their tables.
    pub async fn uninstall(&self, db: &Database, names: &[&str]) -> EngineResult<&'static str> {
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        let _guard = self.lock_target(db).await;
        ensure_not_upgrading(db)?;
        info!("Starting uninstall run {} on {}: {:?}", Uuid::now_v7(), db.id(), names);
        lifecycle::uninstall(&self.registry, db, &names).await
    }

    /// Lists every registered module (`all`) or the ones installed in `db`.
    pub async fn list_modules(
        &self,
        db: &Database,
        all: bool,
        installed: bool,
    ) -> EngineResult<Vec<ModuleInfo>> {
        ensure_not_upgrading(db)?;
        lifecycle::list_modules(&self.registry, db, all, installed).await
    }

    /// Number of targets with a run in progress or waiting.
    pub fn busy_targets(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    async fn lock_target(&self, db: &Database) -> TargetGuard<'_> {
        let target = db.id().to_string();
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks
                .entry(target.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = lock.clone().lock_owned().await;
        TargetGuard {
            guard: Some(guard),
            lock,
            target,
            locks: &self.locks,
        }
    }
}

/// Holds a target's run lock and drops the map entry once nobody else needs it.
struct TargetGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    lock: Arc<AsyncMutex<()>>,
    target: String,
    locks: &'a Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Drop for TargetGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Clones are only taken under the map lock: the map and this guard
        // are the last two holders.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.target);
        }
    }
}

fn ensure_not_upgrading(db: &Database) -> EngineResult<()> {
    if db.is_upgrading() {
        return Err(EngineError::Upgrading(db.id().to_string()));
    }
    Ok(())
}
