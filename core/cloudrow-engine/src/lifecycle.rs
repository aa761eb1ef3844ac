//! Installing, removing and listing modules on a target.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, ModuleRequestError};
use crate::lazy_loader::{self, Task};
use crate::module_sort;
use crate::reconcile::{self, Direction};
use crate::registry::ModuleRegistry;
use cloudrow_db::{Database, metadata};
use cloudrow_model::{Context, Mapper, Module, Side};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, warn};

/// What install and uninstall return on success.
pub const DONE: &str = "Done!";

/// A module as reported by `list_modules`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub name: String,
    pub dependencies: Vec<String>,
}

pub(crate) async fn install(
    registry: &ModuleRegistry,
    config: &EngineConfig,
    db: &Database,
    names: &[String],
) -> EngineResult<&'static str> {
    let requested = registry.resolve(names)?;
    let installed: BTreeSet<String> = db.installed_modules().await?.into_iter().collect();

    let to_install: Vec<Arc<Module>> = requested
        .into_iter()
        .filter(|m| !installed.contains(&m.name))
        .collect();
    if to_install.is_empty() {
        warn!("All modules already installed: {:?}", names);
        return Ok(DONE);
    }

    let incoming: BTreeSet<&str> = to_install.iter().map(|m| m.name.as_str()).collect();
    let missing: BTreeMap<String, Vec<String>> = to_install
        .iter()
        .filter_map(|m| {
            let unmet: Vec<String> = m
                .dependencies
                .iter()
                .filter(|d| !installed.contains(*d) && !incoming.contains(d.as_str()))
                .cloned()
                .collect();
            (!unmet.is_empty()).then(|| (m.name.clone(), unmet))
        })
        .collect();
    if !missing.is_empty() {
        return Err(ModuleRequestError::MissingDependencies { missing }.into());
    }

    let existing: BTreeSet<String> = db.existing_tables().await?.into_iter().collect();
    let collisions: BTreeMap<String, Vec<String>> = to_install
        .iter()
        .filter_map(|m| {
            let taken: Vec<String> = m
                .provided_tables
                .iter()
                .filter(|t| existing.contains(*t))
                .cloned()
                .collect();
            (!taken.is_empty()).then(|| (m.name.clone(), taken))
        })
        .collect();
    if !collisions.is_empty() {
        return Err(ModuleRequestError::TableCollision { collisions }.into());
    }

    if config.sync_before_install && !installed.is_empty() {
        info!("Syncing installed modules before install");
        reconcile::run(registry, db, Direction::Sync, false, config.plateau_limit).await?;
    }

    let sorted = module_sort::sort(&to_install, &installed)?;
    info!(
        "Installing {}",
        sorted.iter().map(|m| m.name.as_str()).collect::<Vec<_>>().join(", ")
    );

    let migrating = sorted.clone();
    db.transaction(move |tx| {
        for module in &migrating {
            if let Some(preinstall) = &module.migrations.preinstall {
                preinstall(tx).map_err(|e| hook_failed("preinstall", &module.name, e))?;
            }
            let dependencies: Vec<String> = module.dependencies.iter().cloned().collect();
            metadata::record_module(tx, &module.name, &dependencies, &module.provided_tables)?;
        }
        for module in migrating.iter().rev() {
            if let Some(postinstall) = &module.migrations.postinstall {
                postinstall(tx).map_err(|e| hook_failed("postinstall", &module.name, e))?;
            }
        }
        Ok(())
    })
    .await
    .map_err(|e| EngineError::Migration(e.to_string()))?;

    if config.import_on_install {
        import_cloud_state(registry, db, &sorted).await?;
    }

    Ok(DONE)
}

pub(crate) async fn install_all(
    registry: &ModuleRegistry,
    config: &EngineConfig,
    db: &Database,
) -> EngineResult<&'static str> {
    let installed: BTreeSet<String> = db.installed_modules().await?.into_iter().collect();
    let names: Vec<String> = registry
        .names()
        .into_iter()
        .filter(|n| !installed.contains(n))
        .collect();
    install(registry, config, db, &names).await
}

pub(crate) async fn uninstall(
    registry: &ModuleRegistry,
    db: &Database,
    names: &[String],
) -> EngineResult<&'static str> {
    let requested = registry.resolve(names)?;
    let recorded = db.installed_dependencies().await?;

    let to_remove: Vec<Arc<Module>> = requested
        .into_iter()
        .filter(|m| recorded.contains_key(&m.name))
        .collect();
    if to_remove.is_empty() {
        warn!("All modules already uninstalled: {:?}", names);
        return Ok(DONE);
    }

    let leaving: BTreeSet<&str> = to_remove.iter().map(|m| m.name.as_str()).collect();
    let remaining: BTreeSet<String> = recorded
        .keys()
        .filter(|n| !leaving.contains(n.as_str()))
        .cloned()
        .collect();
    let dependents: BTreeMap<String, Vec<String>> = recorded
        .iter()
        .filter(|(name, _)| remaining.contains(*name))
        .filter_map(|(name, deps)| {
            let blocking: Vec<String> = deps
                .iter()
                .filter(|d| leaving.contains(d.as_str()))
                .cloned()
                .collect();
            (!blocking.is_empty()).then(|| (name.clone(), blocking))
        })
        .collect();
    if !dependents.is_empty() {
        return Err(ModuleRequestError::DependentsRemain { dependents }.into());
    }

    let sorted = module_sort::sort(&to_remove, &remaining)?;
    info!(
        "Uninstalling {}",
        sorted.iter().rev().map(|m| m.name.as_str()).collect::<Vec<_>>().join(", ")
    );

    db.transaction(move |tx| {
        for module in sorted.iter().rev() {
            if let Some(preremove) = &module.migrations.preremove {
                preremove(tx).map_err(|e| hook_failed("preremove", &module.name, e))?;
            }
            metadata::remove_module(tx, &module.name)?;
        }
        for module in &sorted {
            if let Some(postremove) = &module.migrations.postremove {
                postremove(tx).map_err(|e| hook_failed("postremove", &module.name, e))?;
            }
        }
        Ok(())
    })
    .await
    .map_err(|e| EngineError::Migration(e.to_string()))?;

    Ok(DONE)
}

pub(crate) async fn list_modules(
    registry: &ModuleRegistry,
    db: &Database,
    all: bool,
    installed: bool,
) -> EngineResult<Vec<ModuleInfo>> {
    let listed = if all {
        registry.dependency_map()
    } else if installed {
        db.installed_dependencies().await?
    } else {
        return Err(ModuleRequestError::InvalidListRequest.into());
    };
    Ok(listed
        .into_iter()
        .map(|(name, dependencies)| ModuleInfo { name, dependencies })
        .collect())
}

fn hook_failed(hook: &str, module: &str, e: cloudrow_db::DbError) -> cloudrow_db::DbError {
    cloudrow_db::DbError::migration(format!("{hook} of {module} failed: {e}"))
}

/// Reads the cloud state of freshly installed modules into the database,
/// module by module in install order.
async fn import_cloud_state(
    registry: &ModuleRegistry,
    db: &Database,
    modules: &[Arc<Module>],
) -> EngineResult<()> {
    let installed = db.installed_modules().await?;
    let context_modules = registry.resolve_installed(&installed)?;
    let ctx = registry.context_for(&context_modules, db);

    for module in modules {
        let tasks: Vec<Task<'_>> = module
            .mappers()
            .map(|mapper| {
                let mapper: &dyn Mapper = &**mapper;
                let ctx: &Context = &ctx;
                Task::new(format!("import {}", mapper.table()), move || async move {
                    let records = ctx.read_all(mapper, Side::Cloud).await?;
                    if records.is_empty() {
                        info!("No cloud records for {}", mapper.table());
                        return Ok(());
                    }
                    mapper.db().create(records, ctx).await?;
                    Ok(())
                })
            })
            .collect();
        let report = lazy_loader::run(tasks).await?;
        info!("Imported {} table(s) for {}", report.succeeded, module.name);
    }
    Ok(())
}
