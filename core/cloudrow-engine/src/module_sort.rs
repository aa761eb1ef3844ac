//! Dependency ordering of modules.

use crate::error::ModuleSortError;
use cloudrow_model::Module;
use std::borrow::Borrow;
use std::collections::{BTreeSet, VecDeque};

/// Orders `modules` so every module comes after its dependencies.
///
/// `already_present` seeds the satisfied set: installed modules when
/// installing, the modules that stay when uninstalling. The reverse of the
/// result is the dependents-first order.
///
/// A full pass over the work queue that places nothing fails immediately,
/// either naming a dependency that can never be satisfied or reporting the
/// modules left in the cycle.
pub fn sort<M>(modules: &[M], already_present: &BTreeSet<String>) -> Result<Vec<M>, ModuleSortError>
where
    M: Borrow<Module> + Clone,
{
    let mut satisfied = already_present.clone();
    let mut queue: VecDeque<&M> = modules.iter().collect();
    let mut out = Vec::with_capacity(modules.len());
    let mut skipped = 0;

    while let Some(entry) = queue.pop_front() {
        let module = <M as Borrow<Module>>::borrow(entry);
        if module.dependencies.iter().all(|d| satisfied.contains(d)) {
            satisfied.insert(module.name.clone());
            out.push(entry.clone());
            skipped = 0;
        } else {
            queue.push_back(entry);
            skipped += 1;
            if skipped >= queue.len() {
                return Err(diagnose(&queue, &satisfied));
            }
        }
    }

    Ok(out)
}

fn diagnose<M: Borrow<Module>>(queue: &VecDeque<&M>, satisfied: &BTreeSet<String>) -> ModuleSortError {
    let queued: BTreeSet<&str> = queue
        .iter()
        .map(|m| <M as Borrow<Module>>::borrow(*m).name.as_str())
        .collect();
    for entry in queue {
        let module = <M as Borrow<Module>>::borrow(*entry);
        if let Some(dependency) = module
            .dependencies
            .iter()
            .find(|d| !satisfied.contains(*d) && !queued.contains(d.as_str()))
        {
            return ModuleSortError::MissingDependency {
                module: module.name.clone(),
                dependency: dependency.clone(),
            };
        }
    }
    ModuleSortError::Cycle {
        modules: queued.into_iter().map(String::from).collect(),
    }
}
