//! The set of modules known to an engine.

use crate::error::ModuleRequestError;
use cloudrow_db::Database;
use cloudrow_model::{Context, Extensions, Module};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Modules declared at startup, in registration order.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    modules: Vec<Arc<Module>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module. Names are unique.
    pub fn register(&mut self, module: Module) -> Result<(), ModuleRequestError> {
        if self.get(&module.name).is_some() {
            return Err(ModuleRequestError::Duplicate(module.name));
        }
        debug!("Registered module {}", module.name);
        self.modules.push(Arc::new(module));
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, module: Module) -> Result<Self, ModuleRequestError> {
        self.register(module)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Module>> {
        self.modules.iter().find(|m| m.name == name)
    }

    pub fn modules(&self) -> &[Arc<Module>] {
        &self.modules
    }

    pub fn names(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Resolves every name, in request order with duplicates dropped.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Arc<Module>>, ModuleRequestError> {
        let mut seen = BTreeSet::new();
        let mut found = Vec::new();
        let mut missing = Vec::new();
        for name in names {
            let name = name.as_ref();
            if !seen.insert(name) {
                continue;
            }
            match self.get(name) {
                Some(module) => found.push(module.clone()),
                None => missing.push(name.to_string()),
            }
        }

        if missing.is_empty() {
            return Ok(found);
        }
        let suggestions = missing
            .iter()
            .filter_map(|m| self.closest(m).map(|c| (m.clone(), c.to_string())))
            .collect();
        Err(ModuleRequestError::UnknownModules {
            missing,
            suggestions,
        })
    }

    /// Resolves names recorded in a target. Names the registry does not know
    /// are reported as unregistered rather than as a bad request.
    pub fn resolve_installed(
        &self,
        installed: &[String],
    ) -> Result<Vec<Arc<Module>>, ModuleRequestError> {
        self.resolve(installed).map_err(|e| match e {
            ModuleRequestError::UnknownModules { missing, .. } => {
                ModuleRequestError::Unregistered { modules: missing }
            }
            other => other,
        })
    }

    /// The registered name with the smallest edit distance to `name`.
    pub fn closest(&self, name: &str) -> Option<&str> {
        self.modules
            .iter()
            .map(|m| (edit_distance(name, &m.name), m.name.as_str()))
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, n)| n)
    }

    /// Builds a run context holding the target database and every value the
    /// given modules contribute.
    pub fn context_for(&self, modules: &[Arc<Module>], db: &Database) -> Context {
        let mut extensions = Extensions::new();
        extensions.insert(db.clone());
        for module in modules {
            if let Some(provide) = &module.context {
                provide(&mut extensions);
            }
        }
        Context::new(extensions)
    }

    /// Name → dependencies of every registered module.
    pub fn dependency_map(&self) -> BTreeMap<String, Vec<String>> {
        self.modules
            .iter()
            .map(|m| (m.name.clone(), m.dependencies.iter().cloned().collect()))
            .collect()
    }
}

/// Levenshtein distance over chars.
fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != *cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}
