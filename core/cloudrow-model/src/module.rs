use crate::context::Extensions;
use crate::mapper::Mapper;
use cloudrow_db::{DbResult, Transaction};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// A schema migration step, run inside the install/uninstall transaction.
pub type Migration = Arc<dyn Fn(&Transaction<'_>) -> DbResult<()> + Send + Sync>;

/// Adds a module's values (provider clients, settings) to the run context.
pub type ContextProvider = Arc<dyn Fn(&mut Extensions) + Send + Sync>;

/// The four migration hooks of a module. All optional.
#[derive(Clone, Default)]
pub struct Migrations {
    pub preinstall: Option<Migration>,
    pub postinstall: Option<Migration>,
    pub preremove: Option<Migration>,
    pub postremove: Option<Migration>,
}

impl fmt::Debug for Migrations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migrations")
            .field("preinstall", &self.preinstall.is_some())
            .field("postinstall", &self.postinstall.is_some())
            .field("preremove", &self.preremove.is_some())
            .field("postremove", &self.postremove.is_some())
            .finish()
    }
}

/// A named bundle of tables, mappers and migrations with declared
/// dependencies on other modules.
///
/// Modules are declared once at startup and handed to the engine's registry.
///
/// ```
/// use cloudrow_model::Module;
///
/// let vpc = Module::new("aws_vpc")
///     .depends_on(&["aws_account"])
///     .provides_tables(&["vpc", "subnet"])
///     .preinstall(|tx| {
///         tx.execute_batch("CREATE TABLE vpc (vpc_id TEXT PRIMARY KEY, cidr_block TEXT)")?;
///         tx.execute_batch("CREATE TABLE subnet (subnet_id TEXT PRIMARY KEY, vpc_id TEXT)")?;
///         Ok(())
///     })
///     .preremove(|tx| {
///         tx.execute_batch("DROP TABLE subnet; DROP TABLE vpc;")?;
///         Ok(())
///     });
///
/// assert!(vpc.dependencies.contains("aws_account"));
/// ```
#[derive(Clone)]
pub struct Module {
    pub name: String,
    pub dependencies: BTreeSet<String>,
    pub provided_tables: Vec<String>,
    /// Mappers keyed by name, in declaration order.
    pub mappers: Vec<(String, Arc<dyn Mapper>)>,
    pub migrations: Migrations,
    pub context: Option<ContextProvider>,
}

impl Module {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            dependencies: BTreeSet::new(),
            provided_tables: Vec::new(),
            mappers: Vec::new(),
            migrations: Migrations::default(),
            context: None,
        }
    }

    pub fn depends_on(mut self, dependencies: &[&str]) -> Self {
        self.dependencies
            .extend(dependencies.iter().map(|d| d.to_string()));
        self
    }

    pub fn provides_tables(mut self, tables: &[&str]) -> Self {
        self.provided_tables
            .extend(tables.iter().map(|t| t.to_string()));
        self
    }

    pub fn mapper(mut self, key: &str, mapper: Arc<dyn Mapper>) -> Self {
        self.mappers.push((key.into(), mapper));
        self
    }

    pub fn preinstall<F>(mut self, f: F) -> Self
    where
        F: Fn(&Transaction<'_>) -> DbResult<()> + Send + Sync + 'static,
    {
        self.migrations.preinstall = Some(Arc::new(f));
        self
    }

    pub fn postinstall<F>(mut self, f: F) -> Self
    where
        F: Fn(&Transaction<'_>) -> DbResult<()> + Send + Sync + 'static,
    {
        self.migrations.postinstall = Some(Arc::new(f));
        self
    }

    pub fn preremove<F>(mut self, f: F) -> Self
    where
        F: Fn(&Transaction<'_>) -> DbResult<()> + Send + Sync + 'static,
    {
        self.migrations.preremove = Some(Arc::new(f));
        self
    }

    pub fn postremove<F>(mut self, f: F) -> Self
    where
        F: Fn(&Transaction<'_>) -> DbResult<()> + Send + Sync + 'static,
    {
        self.migrations.postremove = Some(Arc::new(f));
        self
    }

    /// Registers values this module contributes to every run context.
    pub fn provides_context<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Extensions) + Send + Sync + 'static,
    {
        self.context = Some(Arc::new(f));
        self
    }

    /// Looks up a mapper by key.
    pub fn get_mapper(&self, key: &str) -> Option<&Arc<dyn Mapper>> {
        self.mappers.iter().find(|(k, _)| k == key).map(|(_, m)| m)
    }

    /// Mappers in declaration order.
    pub fn mappers(&self) -> impl Iterator<Item = &Arc<dyn Mapper>> {
        self.mappers.iter().map(|(_, m)| m)
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("provided_tables", &self.provided_tables)
            .field(
                "mappers",
                &self.mappers.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
            )
            .field("migrations", &self.migrations)
            .finish()
    }
}
