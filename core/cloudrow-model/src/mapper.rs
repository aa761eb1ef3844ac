use crate::context::Context;
use crate::descriptor::EntityDescriptor;
use crate::record::Record;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Error returned by `Crud` implementations.
///
/// Any failure is treated as transient by the reconciliation core and retried;
/// authors are free to attach context with `anyhow`.
pub type CrudError = anyhow::Error;

/// Result type for `Crud` operations.
pub type CrudResult<T> = Result<T, CrudError>;

/// One side of the reconciliation: the database or the cloud provider.
///
/// A mapper's `source` is the side that is authoritative for a pure
/// pass-through table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Db,
    Cloud,
}

impl Side {
    /// The opposite side.
    pub fn other(self) -> Side {
        match self {
            Side::Db => Side::Cloud,
            Side::Cloud => Side::Db,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Db => "db",
            Side::Cloud => "cloud",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a changed entity has to be brought in line with the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// The resource can be modified in place.
    Update,
    /// The resource must be deleted and recreated.
    Replace,
}

/// The four batch-capable operations for one resource type on one side.
///
/// `create` and `update` may return the stored records, including any fields
/// the server assigned; the core folds those back into the record it sent.
#[async_trait]
pub trait Crud: Send + Sync {
    /// Creates the given records.
    async fn create(&self, records: Vec<Record>, ctx: &Context) -> CrudResult<Option<Vec<Record>>>;

    /// Reads every record, or only the given identities.
    async fn read(&self, ctx: &Context, ids: Option<&[String]>) -> CrudResult<Vec<Record>>;

    /// Updates the given records in place.
    async fn update(&self, records: Vec<Record>, ctx: &Context) -> CrudResult<Option<Vec<Record>>>;

    /// Deletes the given records.
    async fn delete(&self, records: Vec<Record>, ctx: &Context) -> CrudResult<()>;

    /// Classifies a changed pair. Only consulted on the cloud side during apply.
    fn update_or_replace(&self, cloud: &Record, db: &Record) -> ChangeKind {
        let _ = (cloud, db);
        ChangeKind::Update
    }
}

/// Bridge for one resource type between the database and the cloud.
///
/// Only [`descriptor`](Mapper::descriptor), [`source`](Mapper::source) and
/// the two `Crud` accessors are required. Identity, comparison and printing
/// default to what the descriptor declares; override them when a type needs
/// something the descriptor can't express (say, comparing a policy document
/// after canonicalising it).
pub trait Mapper: Send + Sync {
    /// Static description of the resource type.
    fn descriptor(&self) -> &EntityDescriptor;

    /// Which side is authoritative for this type.
    fn source(&self) -> Side;

    /// Database-side operations.
    fn db(&self) -> &dyn Crud;

    /// Cloud-side operations.
    fn cloud(&self) -> &dyn Crud;

    fn table(&self) -> &str {
        &self.descriptor().table
    }

    fn crud(&self, side: Side) -> &dyn Crud {
        match side {
            Side::Db => self.db(),
            Side::Cloud => self.cloud(),
        }
    }

    /// Stable identity key, independent of any auto-increment id.
    fn entity_id(&self, entity: &Record) -> String {
        self.descriptor().identity_of(entity)
    }

    /// Structural comparison that ignores generated fields.
    fn equals(&self, a: &Record, b: &Record) -> bool {
        self.descriptor().structurally_equal(a, b)
    }

    /// Flat rendering for plans.
    fn entity_print(&self, entity: &Record) -> BTreeMap<String, String> {
        self.descriptor().print(entity)
    }
}
