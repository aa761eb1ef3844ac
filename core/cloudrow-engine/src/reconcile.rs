//! The apply/sync convergence loop.
//!
//! Both directions share one loop; they differ only in which side is
//! authoritative:
//! - `Apply`: the database is the truth, the cloud is brought in line.
//! - `Sync`: the cloud is the truth, the database is brought in line.
//!
//! The outer loop refreshes the authoritative side. The inner loop refreshes
//! the other side, diffs every table, and pushes the differences through the
//! lazy loader until nothing is left to do or the pending count plateaus.

use crate::diff::{DiffResult, diff};
use crate::error::{EngineError, EngineResult};
use crate::lazy_loader::{self, Task};
use crate::module_sort;
use crate::plan::{Plan, PlanAction};
use crate::registry::ModuleRegistry;
use cloudrow_db::Database;
use cloudrow_model::{ChangeKind, Context, Mapper, Module, Record, Side};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Which side wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Apply,
    Sync,
}

impl Direction {
    /// The side that holds the desired state.
    pub fn authoritative(self) -> Side {
        match self {
            Direction::Apply => Side::Db,
            Direction::Sync => Side::Cloud,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Apply => "apply",
            Direction::Sync => "sync",
        }
    }

    /// Apply only drives types the database owns; sync pulls everything.
    fn includes(self, mapper: &dyn Mapper) -> bool {
        match self {
            Direction::Apply => mapper.source() == Side::Db,
            Direction::Sync => true,
        }
    }
}

/// Diff of one mapper's table for the current inner-loop iteration.
struct TableDiff<'a> {
    mapper: &'a dyn Mapper,
    diff: DiffResult<Record>,
}

/// Runs a full reconciliation against the modules installed in `db`.
pub(crate) async fn run(
    registry: &ModuleRegistry,
    db: &Database,
    direction: Direction,
    dry_run: bool,
    plateau_limit: usize,
) -> EngineResult<Plan> {
    let started = Instant::now();
    let installed = db.installed_modules().await?;
    let modules = registry.resolve_installed(&installed)?;
    let ordered = module_sort::sort(&modules, &BTreeSet::new())?;
    let ctx = registry.context_for(&ordered, db);
    let mappers = mappers_for(&ordered, direction);
    info!("Setup took {}ms", started.elapsed().as_millis());

    let plan = reconcile(&mappers, &ctx, direction, dry_run, plateau_limit).await?;
    info!(
        "{} of {} finished in {}ms",
        direction.as_str(),
        db.id(),
        started.elapsed().as_millis()
    );
    Ok(plan)
}

/// Mappers of `modules` in module order, filtered for `direction`.
pub fn mappers_for(modules: &[Arc<Module>], direction: Direction) -> Vec<Arc<dyn Mapper>> {
    modules
        .iter()
        .flat_map(|m| m.mappers().cloned())
        .filter(|m| direction.includes(&**m))
        .collect()
}

/// Converges the two sides of every mapper's table.
///
/// In dry-run mode the plan of the first diff is returned without touching
/// either side.
pub async fn reconcile(
    mappers: &[Arc<dyn Mapper>],
    ctx: &Context,
    direction: Direction,
    dry_run: bool,
    plateau_limit: usize,
) -> EngineResult<Plan> {
    let mut plan = Plan::new();
    if mappers.is_empty() {
        return Ok(plan);
    }

    let authoritative = direction.authoritative();
    let other = authoritative.other();
    let mut last_pending: Option<usize> = None;
    let mut spin = 0;

    loop {
        debug!("Starting outer loop");
        ctx.memo().flush(authoritative);
        read_side(mappers, ctx, authoritative).await?;

        let mut mutated = false;
        loop {
            debug!("Starting inner loop");
            let started = Instant::now();
            ctx.memo().flush(other);
            read_side(mappers, ctx, other).await?;
            info!("Record acquisition took {}ms", started.elapsed().as_millis());

            let diffed = Instant::now();
            let diffs = diff_tables(mappers, ctx, authoritative);
            record_plan(&mut plan, &diffs, direction);
            if dry_run {
                return Ok(plan);
            }

            let pending: usize = diffs.iter().map(|t| t.diff.pending()).sum();
            if pending > 0 && last_pending == Some(pending) {
                spin += 1;
            } else {
                last_pending = Some(pending);
                spin = 0;
            }
            if spin >= plateau_limit {
                warn!(
                    "{} stopped converging with {} change(s) pending",
                    direction.as_str(),
                    pending
                );
                let unresolved = diffs
                    .iter()
                    .filter(|t| t.diff.pending() > 0)
                    .map(|t| (t.mapper.table().to_string(), t.diff.pending()))
                    .collect();
                return Err(EngineError::ConvergencePlateau {
                    plan: Box::new(plan),
                    pending,
                    unresolved,
                });
            }
            info!("Diff took {}ms", diffed.elapsed().as_millis());

            let tasks = mutation_tasks(&diffs, ctx, direction);
            if tasks.is_empty() {
                break;
            }
            mutated = true;
            let mutating = Instant::now();
            let count = tasks.len();
            match lazy_loader::run(tasks).await {
                Ok(report) => debug!(
                    "Ran {} mutation(s) in {} round(s)",
                    report.succeeded, report.rounds
                ),
                // Leftovers are picked up by the next iteration's diff.
                Err(stall) => warn!("{} of {} mutation(s) stalled: {}", stall.remaining, count, stall),
            }
            info!("Mutation took {}ms", mutating.elapsed().as_millis());
        }

        if !mutated {
            break;
        }
    }

    Ok(plan)
}

/// Reads every mapper's table on one side into the memo.
async fn read_side(mappers: &[Arc<dyn Mapper>], ctx: &Context, side: Side) -> EngineResult<()> {
    let tasks = mappers
        .iter()
        .map(|mapper| {
            let mapper: &dyn Mapper = &**mapper;
            Task::new(format!("read {} {}", side, mapper.table()), move || async move {
                ctx.read_all(mapper, side).await.map(|_| ())
            })
        })
        .collect();
    lazy_loader::run(tasks).await?;
    Ok(())
}

fn diff_tables<'a>(
    mappers: &'a [Arc<dyn Mapper>],
    ctx: &Context,
    authoritative: Side,
) -> Vec<TableDiff<'a>> {
    mappers
        .iter()
        .map(|mapper| {
            let mapper: &dyn Mapper = &**mapper;
            let wanted = ctx.memo().table(authoritative, mapper.table());
            let actual = ctx.memo().table(authoritative.other(), mapper.table());
            let diff = diff(
                &wanted,
                &actual,
                |e| mapper.entity_id(e),
                |a, b| mapper.equals(a, b),
            );
            TableDiff { mapper, diff }
        })
        .collect()
}

/// Whether a changed pair is replaced rather than updated. Only the cloud
/// decides, and only when it is the side being changed.
fn change_kind(mapper: &dyn Mapper, direction: Direction, wanted: &Record, actual: &Record) -> ChangeKind {
    match direction {
        Direction::Apply => mapper.cloud().update_or_replace(actual, wanted),
        Direction::Sync => ChangeKind::Update,
    }
}

fn record_plan(plan: &mut Plan, diffs: &[TableDiff<'_>], direction: Direction) {
    for TableDiff { mapper, diff } in diffs {
        let table = mapper.table();
        for e in &diff.only_in_a {
            plan.record(PlanAction::Create, table, &mapper.entity_id(e), &mapper.entity_print(e));
        }
        for e in &diff.only_in_b {
            plan.record(PlanAction::Delete, table, &mapper.entity_id(e), &mapper.entity_print(e));
        }
        for c in &diff.changed {
            let action = match change_kind(*mapper, direction, &c.a, &c.b) {
                ChangeKind::Update => PlanAction::Update,
                ChangeKind::Replace => PlanAction::Replace,
            };
            plan.record(action, table, &mapper.entity_id(&c.a), &mapper.entity_print(&c.a));
        }
    }
}

/// Creates and updates in mapper order, then deletes in reverse mapper order.
fn mutation_tasks<'a>(
    diffs: &[TableDiff<'a>],
    ctx: &'a Context,
    direction: Direction,
) -> Vec<Task<'a>> {
    let authoritative = direction.authoritative();
    let target = authoritative.other();
    let mut tasks = Vec::new();

    for TableDiff { mapper, diff } in diffs {
        let mapper: &'a dyn Mapper = *mapper;
        if !diff.only_in_a.is_empty() {
            debug!("{} has {} record(s) to create", mapper.table(), diff.only_in_a.len());
        }
        for wanted in &diff.only_in_a {
            let id = mapper.entity_id(wanted);
            let wanted = wanted.clone();
            tasks.push(Task::new(
                format!("create {} {}", mapper.table(), id),
                move || {
                    let record = wanted.clone();
                    let id = id.clone();
                    async move {
                        let returned = mapper.crud(target).create(vec![record], ctx).await?;
                        merge_back(ctx, mapper, authoritative, &id, returned);
                        Ok(())
                    }
                },
            ));
        }

        if !diff.changed.is_empty() {
            debug!("{} has {} record(s) to update", mapper.table(), diff.changed.len());
        }
        for changed in &diff.changed {
            let id = mapper.entity_id(&changed.a);
            let mut wanted = changed.a.clone();
            if direction == Direction::Sync {
                keep_db_id(mapper, &mut wanted, &changed.b);
            }
            tasks.push(Task::new(
                format!("update {} {}", mapper.table(), id),
                move || {
                    let record = wanted.clone();
                    let id = id.clone();
                    async move {
                        let returned = mapper.crud(target).update(vec![record], ctx).await?;
                        merge_back(ctx, mapper, authoritative, &id, returned);
                        Ok(())
                    }
                },
            ));
        }
    }

    for TableDiff { mapper, diff } in diffs.iter().rev() {
        let mapper: &'a dyn Mapper = *mapper;
        if !diff.only_in_b.is_empty() {
            debug!("{} has {} record(s) to delete", mapper.table(), diff.only_in_b.len());
        }
        for unwanted in &diff.only_in_b {
            let unwanted = unwanted.clone();
            tasks.push(Task::new(
                format!("delete {} {}", mapper.table(), mapper.entity_id(&unwanted)),
                move || {
                    let record = unwanted.clone();
                    async move {
                        mapper.crud(target).delete(vec![record.clone()], ctx).await?;
                        ctx.unmemoize(mapper, target, &record);
                        Ok(())
                    }
                },
            ));
        }
    }

    tasks
}

/// The database row keeps its own key when the cloud version overwrites it.
fn keep_db_id(mapper: &dyn Mapper, cloud: &mut Record, db: &Record) {
    if let Some(field) = &mapper.descriptor().db_id_field {
        if let Some(id) = db.get(field) {
            if !id.is_null() {
                cloud.set(field.clone(), id.clone());
            }
        }
    }
}

/// Folds what the changed side returned into the memoized authoritative
/// record, so the next diff compares against it.
fn merge_back(
    ctx: &Context,
    mapper: &dyn Mapper,
    authoritative: Side,
    id: &str,
    returned: Option<Vec<Record>>,
) {
    for record in returned.into_iter().flatten() {
        if !ctx.memo().merge_into(authoritative, mapper.table(), id, &record) {
            debug!("No memoized {} {} to merge into", mapper.table(), id);
        }
    }
}
