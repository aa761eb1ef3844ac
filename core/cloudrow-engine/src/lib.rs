//! Reconciliation core for cloudrow.
//!
//! Keeps a SQLite target and a cloud provider's resources consistent:
//!
//! - [`diff`]: identity/equality three-way diff of two collections
//! - [`lazy_loader`]: bounded-retry concurrent executor
//! - [`module_sort`]: dependency ordering of modules
//! - [`reconcile`]: the nested apply/sync convergence loop
//! - [`Engine`]: install, uninstall, apply, sync and list on a target
//!
//! ```no_run
//! use cloudrow_db::Database;
//! use cloudrow_engine::{Engine, ModuleRegistry};
//! use cloudrow_model::Module;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = ModuleRegistry::new().with(Module::new("aws_account"))?;
//! let engine = Engine::new(registry);
//! let db = Database::open(std::path::Path::new("staging.db"))?;
//!
//! engine.install(&db, &["aws_account"]).await?;
//! let plan = engine.apply(&db, true).await?;
//! println!("{} change(s) pending", plan.record_count());
//! # Ok(())
//! # }
//! ```

mod config;
pub mod diff;
mod engine;
mod error;
pub mod lazy_loader;
mod lifecycle;
pub mod module_sort;
mod plan;
pub mod reconcile;
mod registry;

pub use config::EngineConfig;
pub use diff::{Changed, DiffResult, diff};
pub use engine::Engine;
pub use error::{
    EngineError, EngineResult, ModuleRequestError, ModuleSortError, StallError, TaskFailure,
};
pub use lazy_loader::{LoaderReport, Task};
pub use lifecycle::{DONE, ModuleInfo};
pub use plan::{Plan, PlanAction, PlanCounts, PlanRow, PlanTable};
pub use reconcile::{Direction, reconcile};
pub use registry::ModuleRegistry;
