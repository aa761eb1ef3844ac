//! Error types for the reconciliation engine.

use crate::plan::Plan;
use cloudrow_db::DbError;
use std::collections::BTreeMap;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced to callers of the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A round of the lazy loader made no progress at all.
    #[error(transparent)]
    ExecutorStall(#[from] StallError),

    /// The pending change count stopped moving across inner-loop iterations.
    #[error(
        "forward progress halted: {pending} change(s) keep failing to apply (tables: {})",
        unresolved_tables(.unresolved)
    )]
    ConvergencePlateau {
        /// Everything planned over the run.
        plan: Box<Plan>,
        pending: usize,
        /// Table name to pending change count, for the tables still out of sync.
        unresolved: BTreeMap<String, usize>,
    },

    /// The install/uninstall/list request itself is invalid.
    #[error(transparent)]
    ModuleRequest(#[from] ModuleRequestError),

    /// A migration failed; the enclosing transaction was rolled back.
    #[error("migration failed: {0}")]
    Migration(String),

    #[error(transparent)]
    ModuleSort(#[from] ModuleSortError),

    #[error("database error: {0}")]
    Db(#[from] DbError),

    /// The target is being upgraded and refuses every operation.
    #[error("target {0} is being upgraded")]
    Upgrading(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// One task still failing when the lazy loader gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub label: String,
    pub message: String,
}

/// Raised by the lazy loader when a round produced zero successes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "no forward progress after {rounds} round(s): {remaining} task(s) still failing [{}]",
    failure_labels(.failures)
)]
pub struct StallError {
    pub remaining: usize,
    pub failures: Vec<TaskFailure>,
    pub rounds: usize,
}

fn unresolved_tables(unresolved: &BTreeMap<String, usize>) -> String {
    unresolved
        .iter()
        .map(|(table, pending)| format!("{table} ({pending})"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn failure_labels(failures: &[TaskFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.label, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Structural problems with a module request. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModuleRequestError {
    /// Names that resolve to no registered module, with the closest
    /// registered name for each where one exists.
    #[error("the following modules do not exist: {}", .missing.join(", "))]
    UnknownModules {
        missing: Vec<String>,
        suggestions: BTreeMap<String, String>,
    },

    /// Module → dependencies that are neither installed nor requested.
    #[error("missing dependencies: {:?}", .missing)]
    MissingDependencies {
        missing: BTreeMap<String, Vec<String>>,
    },

    /// Module → provided tables that already exist in the target.
    #[error("collision with existing tables: {:?}", .collisions)]
    TableCollision {
        collisions: BTreeMap<String, Vec<String>>,
    },

    /// Remaining module → modules being removed that it still depends on.
    #[error("cannot uninstall, installed modules still depend on them: {:?}", .dependents)]
    DependentsRemain {
        dependents: BTreeMap<String, Vec<String>>,
    },

    /// The target records modules that are not registered with the engine.
    #[error("installed modules are not registered: {}", .modules.join(", "))]
    Unregistered { modules: Vec<String> },

    #[error("module {0} is already registered")]
    Duplicate(String),

    #[error("invalid request: list either all or installed modules")]
    InvalidListRequest,
}

/// The module dependency graph cannot be ordered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModuleSortError {
    /// A dependency that is neither already present nor being sorted.
    #[error("module {module} depends on {dependency}, which is not available")]
    MissingDependency { module: String, dependency: String },

    /// A full pass over the queue placed nothing.
    #[error("dependency cycle between modules: {}", .modules.join(", "))]
    Cycle { modules: Vec<String> },
}

impl EngineError {
    /// The plan carried by a convergence plateau, if this is one.
    pub fn plan(&self) -> Option<&Plan> {
        match self {
            EngineError::ConvergencePlateau { plan, .. } => Some(plan),
            _ => None,
        }
    }
}
