//! The record of pending (or performed) changes of a run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// What a plan entry does to its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanAction {
    Create,
    Update,
    Replace,
    Delete,
}

impl PlanAction {
    pub const ALL: [PlanAction; 4] = [
        PlanAction::Create,
        PlanAction::Update,
        PlanAction::Replace,
        PlanAction::Delete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PlanAction::Create => "create",
            PlanAction::Update => "update",
            PlanAction::Replace => "replace",
            PlanAction::Delete => "delete",
        }
    }
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rows planned for one table. `records[i][j]` is the value of `columns[j]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanTable {
    pub columns: Vec<String>,
    pub records: Vec<Vec<String>>,
    #[serde(skip)]
    ids: Vec<String>,
}

impl PlanTable {
    /// Adds a printed record unless its identity is already planned.
    /// Columns first seen on this record are appended, and earlier rows are
    /// padded with empty values.
    pub fn add(&mut self, id: &str, printed: &BTreeMap<String, String>) -> bool {
        if self.ids.iter().any(|known| known == id) {
            return false;
        }
        for column in printed.keys() {
            if !self.columns.contains(column) {
                self.columns.push(column.clone());
                for row in &mut self.records {
                    row.push(String::new());
                }
            }
        }
        let row = self
            .columns
            .iter()
            .map(|c| printed.get(c).cloned().unwrap_or_default())
            .collect();
        self.records.push(row);
        self.ids.push(id.to_string());
        true
    }

    /// Identities in planning order. Empty on a deserialized plan.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// One flattened plan entry, for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRow {
    pub action: PlanAction,
    pub table_name: String,
    pub id: String,
}

/// Per-action record counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanCounts {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
}

/// Pending changes per action and table.
///
/// Serialized as `{ toCreate, toUpdate, toReplace, toDelete }`, each a map
/// from table name to `{ columns, records }`. Records are deduplicated by
/// identity, so a record that stays pending across iterations of a run is
/// listed once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub to_create: BTreeMap<String, PlanTable>,
    pub to_update: BTreeMap<String, PlanTable>,
    pub to_replace: BTreeMap<String, PlanTable>,
    pub to_delete: BTreeMap<String, PlanTable>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn section(&self, action: PlanAction) -> &BTreeMap<String, PlanTable> {
        match action {
            PlanAction::Create => &self.to_create,
            PlanAction::Update => &self.to_update,
            PlanAction::Replace => &self.to_replace,
            PlanAction::Delete => &self.to_delete,
        }
    }

    fn section_mut(&mut self, action: PlanAction) -> &mut BTreeMap<String, PlanTable> {
        match action {
            PlanAction::Create => &mut self.to_create,
            PlanAction::Update => &mut self.to_update,
            PlanAction::Replace => &mut self.to_replace,
            PlanAction::Delete => &mut self.to_delete,
        }
    }

    /// Records a planned change. Returns false if it was already planned.
    pub fn record(
        &mut self,
        action: PlanAction,
        table: &str,
        id: &str,
        printed: &BTreeMap<String, String>,
    ) -> bool {
        self.section_mut(action)
            .entry(table.to_string())
            .or_default()
            .add(id, printed)
    }

    pub fn counts(&self) -> PlanCounts {
        let count = |action: PlanAction| -> usize {
            self.section(action).values().map(PlanTable::len).sum()
        };
        PlanCounts {
            create: count(PlanAction::Create),
            update: count(PlanAction::Update),
            replace: count(PlanAction::Replace),
            delete: count(PlanAction::Delete),
        }
    }

    pub fn record_count(&self) -> usize {
        let c = self.counts();
        c.create + c.update + c.replace + c.delete
    }

    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }

    /// Tables with at least one planned record, sorted and deduplicated.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = PlanAction::ALL
            .iter()
            .flat_map(|a| self.section(*a).iter())
            .filter(|(_, t)| !t.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Flat listing: creates, updates, replaces, then deletes.
    pub fn rows(&self) -> Vec<PlanRow> {
        let mut rows = Vec::new();
        for action in PlanAction::ALL {
            for (table, planned) in self.section(action) {
                for id in planned.ids() {
                    rows.push(PlanRow {
                        action,
                        table_name: table.clone(),
                        id: id.clone(),
                    });
                }
            }
        }
        rows
    }
}
