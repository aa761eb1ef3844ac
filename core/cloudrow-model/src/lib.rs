//! Core model for cloudrow.
//!
//! Defines the types every module author and the reconciliation core share:
//! - [`Record`]: one entity instance, a flat-ish JSON object
//! - [`EntityDescriptor`]: declares a resource type's table, identity key and
//!   the fields that structural comparison ignores
//! - [`FieldTable`]: typed `(field, extractor)` pairs that turn raw provider
//!   payloads into records
//! - [`Mapper`] / [`Crud`]: the bridge to one resource type on the database
//!   side and the cloud side
//! - [`Module`]: a named bundle of tables, mappers and migrations
//! - [`Memo`] / [`Context`]: the per-run cache and the handle passed to every
//!   `Crud` call
//!
//! The core never looks inside a record beyond what the descriptor and the
//! mapper tell it, which is what lets one diff/convergence algorithm work over
//! an open set of resource types.

mod context;
mod descriptor;
mod error;
mod mapper;
mod module;
mod record;

pub use context::{Context, Extensions, Memo};
pub use descriptor::{EntityDescriptor, Extracted, FieldTable};
pub use error::{MappingError, MappingResult};
pub use mapper::{ChangeKind, Crud, CrudError, CrudResult, Mapper, Side};
pub use module::{ContextProvider, Migration, Migrations, Module};
pub use record::Record;
