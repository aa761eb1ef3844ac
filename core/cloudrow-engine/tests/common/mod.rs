//! Shared test helpers for engine tests: in-memory and SQLite-backed `Crud`
//! fakes, a configurable mapper, and module builders.

#![allow(dead_code)]

use anyhow::anyhow;
use async_trait::async_trait;
use cloudrow_db::{Database, DbError, params};
use cloudrow_engine::{EngineConfig, ModuleRegistry};
use cloudrow_model::{
    ChangeKind, Context, Crud, CrudResult, EntityDescriptor, Mapper, Module, Record, Side,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Guard = Box<dyn Fn(&Record) -> Result<(), String> + Send + Sync>;

/// Installs a tracing subscriber once, honouring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Builds a record from `(field, value)` pairs.
pub fn record(pairs: &[(&str, serde_json::Value)]) -> Record {
    pairs.iter().map(|(k, v)| (*k, v.clone())).collect()
}

// ── Call counters ────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Calls {
    pub create: AtomicUsize,
    pub read: AtomicUsize,
    pub update: AtomicUsize,
    pub delete: AtomicUsize,
}

impl Calls {
    pub fn creates(&self) -> usize {
        self.create.load(Ordering::SeqCst)
    }
    pub fn updates(&self) -> usize {
        self.update.load(Ordering::SeqCst)
    }
    pub fn deletes(&self) -> usize {
        self.delete.load(Ordering::SeqCst)
    }
    pub fn reads(&self) -> usize {
        self.read.load(Ordering::SeqCst)
    }
    pub fn mutations(&self) -> usize {
        self.creates() + self.updates() + self.deletes()
    }
}

// ── In-memory store ──────────────────────────────────────────────

/// A table held in memory, keyed by identity.
pub struct MemStore {
    descriptor: EntityDescriptor,
    rows: Mutex<BTreeMap<String, Record>>,
    pub calls: Calls,
    create_guard: Mutex<Option<Guard>>,
    delete_guard: Mutex<Option<Guard>>,
    read_failure: Mutex<Option<String>>,
    /// Field → prefix; created records get `prefix + identity` in that field.
    assigned: Mutex<Vec<(String, String)>>,
    /// Fields whose change forces a replace instead of an update.
    replace_on: Mutex<Vec<String>>,
    /// Whether creates fill in the descriptor's db id field.
    assigns_db_id: bool,
    next_id: AtomicI64,
}

impl MemStore {
    /// A cloud-side store.
    pub fn new(descriptor: &EntityDescriptor) -> Arc<Self> {
        Self::build(descriptor, false)
    }

    /// A database-side store that numbers created rows.
    pub fn with_db_ids(descriptor: &EntityDescriptor) -> Arc<Self> {
        Self::build(descriptor, true)
    }

    fn build(descriptor: &EntityDescriptor, assigns_db_id: bool) -> Arc<Self> {
        Arc::new(Self {
            descriptor: descriptor.clone(),
            rows: Mutex::new(BTreeMap::new()),
            calls: Calls::default(),
            create_guard: Mutex::new(None),
            delete_guard: Mutex::new(None),
            read_failure: Mutex::new(None),
            assigned: Mutex::new(Vec::new()),
            replace_on: Mutex::new(Vec::new()),
            assigns_db_id,
            next_id: AtomicI64::new(1),
        })
    }

    /// Seeds rows without counting calls.
    pub fn seed(&self, records: &[Record]) {
        let mut rows = self.rows.lock().unwrap();
        for r in records {
            rows.insert(self.descriptor.identity_of(r), r.clone());
        }
    }

    pub fn rows(&self) -> Vec<Record> {
        self.rows.lock().unwrap().values().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<Record> {
        self.rows.lock().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    /// Rejects creates for which `guard` returns an error.
    pub fn guard_creates<F>(&self, guard: F)
    where
        F: Fn(&Record) -> Result<(), String> + Send + Sync + 'static,
    {
        *self.create_guard.lock().unwrap() = Some(Box::new(guard));
    }

    /// Rejects deletes for which `guard` returns an error.
    pub fn guard_deletes<F>(&self, guard: F)
    where
        F: Fn(&Record) -> Result<(), String> + Send + Sync + 'static,
    {
        *self.delete_guard.lock().unwrap() = Some(Box::new(guard));
    }

    /// Every read fails with `message`.
    pub fn fail_reads(&self, message: &str) {
        *self.read_failure.lock().unwrap() = Some(message.to_string());
    }

    /// Created records come back with `field = prefix + identity`.
    pub fn assign_on_create(&self, field: &str, prefix: &str) {
        self.assigned
            .lock()
            .unwrap()
            .push((field.to_string(), prefix.to_string()));
    }

    pub fn replace_on(&self, field: &str) {
        self.replace_on.lock().unwrap().push(field.to_string());
    }
}

#[async_trait]
impl Crud for MemStore {
    async fn create(&self, records: Vec<Record>, _ctx: &Context) -> CrudResult<Option<Vec<Record>>> {
        self.calls.create.fetch_add(1, Ordering::SeqCst);
        if let Some(guard) = self.create_guard.lock().unwrap().as_ref() {
            for r in &records {
                guard(r).map_err(|e| anyhow!(e))?;
            }
        }
        let assigned = self.assigned.lock().unwrap().clone();
        let mut out = Vec::with_capacity(records.len());
        let mut rows = self.rows.lock().unwrap();
        for mut r in records {
            let id = self.descriptor.identity_of(&r);
            for (field, prefix) in &assigned {
                r.set(field.clone(), format!("{prefix}{id}"));
            }
            if let Some(db_id) = self.descriptor.db_id_field.as_ref().filter(|_| self.assigns_db_id) {
                r.set(db_id.clone(), self.next_id.fetch_add(1, Ordering::SeqCst));
            }
            rows.insert(id, r.clone());
            out.push(r);
        }
        Ok(Some(out))
    }

    async fn read(&self, _ctx: &Context, ids: Option<&[String]>) -> CrudResult<Vec<Record>> {
        self.calls.read.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.read_failure.lock().unwrap().as_ref() {
            return Err(anyhow!(message.clone()));
        }
        let rows = self.rows.lock().unwrap();
        Ok(match ids {
            None => rows.values().cloned().collect(),
            Some(ids) => ids.iter().filter_map(|id| rows.get(id).cloned()).collect(),
        })
    }

    async fn update(&self, records: Vec<Record>, _ctx: &Context) -> CrudResult<Option<Vec<Record>>> {
        self.calls.update.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.lock().unwrap();
        for r in &records {
            rows.insert(self.descriptor.identity_of(r), r.clone());
        }
        Ok(Some(records))
    }

    async fn delete(&self, records: Vec<Record>, _ctx: &Context) -> CrudResult<()> {
        self.calls.delete.fetch_add(1, Ordering::SeqCst);
        if let Some(guard) = self.delete_guard.lock().unwrap().as_ref() {
            for r in &records {
                guard(r).map_err(|e| anyhow!(e))?;
            }
        }
        let mut rows = self.rows.lock().unwrap();
        for r in &records {
            rows.remove(&self.descriptor.identity_of(r));
        }
        Ok(())
    }

    fn update_or_replace(&self, cloud: &Record, db: &Record) -> ChangeKind {
        let replace_on = self.replace_on.lock().unwrap();
        if replace_on.iter().any(|f| cloud.get(f) != db.get(f)) {
            ChangeKind::Replace
        } else {
            ChangeKind::Update
        }
    }
}

/// A cloud side that writes what the provider returned on create back into
/// the database side, the way provider modules persist generated fields.
pub struct WriteBack {
    pub cloud: Arc<MemStore>,
    pub db: Arc<MemStore>,
}

#[async_trait]
impl Crud for WriteBack {
    async fn create(&self, records: Vec<Record>, ctx: &Context) -> CrudResult<Option<Vec<Record>>> {
        let created = self.cloud.create(records, ctx).await?;
        if let Some(rows) = &created {
            self.db.update(rows.clone(), ctx).await?;
        }
        Ok(created)
    }

    async fn read(&self, ctx: &Context, ids: Option<&[String]>) -> CrudResult<Vec<Record>> {
        self.cloud.read(ctx, ids).await
    }

    async fn update(&self, records: Vec<Record>, ctx: &Context) -> CrudResult<Option<Vec<Record>>> {
        self.cloud.update(records, ctx).await
    }

    async fn delete(&self, records: Vec<Record>, ctx: &Context) -> CrudResult<()> {
        self.cloud.delete(records, ctx).await
    }
}

// ── SQLite-backed store ──────────────────────────────────────────

/// A resource table in the target database, stored as `(key, body)` with
/// the record serialized as JSON. Reaches the database through the context.
pub struct SqlTable {
    descriptor: EntityDescriptor,
    pub calls: Calls,
}

impl SqlTable {
    pub fn new(descriptor: &EntityDescriptor) -> Arc<Self> {
        Arc::new(Self {
            descriptor: descriptor.clone(),
            calls: Calls::default(),
        })
    }

    /// DDL for the backing table.
    pub fn create_sql(table: &str) -> String {
        format!(
            "CREATE TABLE {table} (id INTEGER PRIMARY KEY AUTOINCREMENT, key TEXT NOT NULL UNIQUE, body TEXT NOT NULL)"
        )
    }

    fn db<'c>(&self, ctx: &'c Context) -> CrudResult<&'c Database> {
        ctx.extension::<Database>()
            .ok_or_else(|| anyhow!("no database in context"))
    }

    /// Reads every row straight from the database, outside any run.
    pub async fn dump(db: &Database, table: &str) -> Vec<Record> {
        let sql = format!("SELECT id, body FROM {table} ORDER BY key");
        db.with_connection(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows
                .into_iter()
                .map(|(id, body)| {
                    let mut r: Record = serde_json::from_str(&body).unwrap();
                    r.set("id", id);
                    r
                })
                .collect())
        })
        .await
        .unwrap()
    }
}

fn body_of(record: &Record, db_id: Option<&str>) -> String {
    let mut body = record.clone();
    if let Some(field) = db_id {
        body.remove(field);
    }
    serde_json::to_string(&body).unwrap()
}

#[async_trait]
impl Crud for SqlTable {
    async fn create(&self, records: Vec<Record>, ctx: &Context) -> CrudResult<Option<Vec<Record>>> {
        self.calls.create.fetch_add(1, Ordering::SeqCst);
        let db = self.db(ctx)?;
        let table = self.descriptor.table.clone();
        let db_id = self.descriptor.db_id_field.clone();
        let rows: Vec<(String, String)> = records
            .iter()
            .map(|r| (self.descriptor.identity_of(r), body_of(r, db_id.as_deref())))
            .collect();
        let ids = db
            .with_connection(move |conn| {
                let sql = format!("INSERT INTO {table} (key, body) VALUES (?1, ?2)");
                let mut ids = Vec::with_capacity(rows.len());
                for (key, body) in &rows {
                    conn.execute(&sql, params![key, body])?;
                    ids.push(conn.last_insert_rowid());
                }
                Ok::<_, DbError>(ids)
            })
            .await?;
        let field = self.descriptor.db_id_field.clone().unwrap_or_else(|| "id".into());
        Ok(Some(
            records
                .into_iter()
                .zip(ids)
                .map(|(r, id)| r.with(field.clone(), id))
                .collect(),
        ))
    }

    async fn read(&self, ctx: &Context, ids: Option<&[String]>) -> CrudResult<Vec<Record>> {
        self.calls.read.fetch_add(1, Ordering::SeqCst);
        let db = self.db(ctx)?;
        let wanted: Option<Vec<String>> = ids.map(|ids| ids.to_vec());
        let field = self.descriptor.db_id_field.clone().unwrap_or_else(|| "id".into());
        let sql = format!("SELECT id, key, body FROM {} ORDER BY key", self.descriptor.table);
        let rows = db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        let mut out = Vec::new();
        for (id, key, body) in rows {
            if wanted.as_ref().is_some_and(|w| !w.contains(&key)) {
                continue;
            }
            let r: Record = serde_json::from_str(&body)?;
            out.push(r.with(field.clone(), id));
        }
        Ok(out)
    }

    async fn update(&self, records: Vec<Record>, ctx: &Context) -> CrudResult<Option<Vec<Record>>> {
        self.calls.update.fetch_add(1, Ordering::SeqCst);
        let db = self.db(ctx)?;
        let table = self.descriptor.table.clone();
        let db_id = self.descriptor.db_id_field.clone();
        let rows: Vec<(String, String)> = records
            .iter()
            .map(|r| (self.descriptor.identity_of(r), body_of(r, db_id.as_deref())))
            .collect();
        db.with_connection(move |conn| {
            let sql = format!("UPDATE {table} SET body = ?2 WHERE key = ?1");
            for (key, body) in &rows {
                conn.execute(&sql, params![key, body])?;
            }
            Ok(())
        })
        .await?;
        Ok(None)
    }

    async fn delete(&self, records: Vec<Record>, ctx: &Context) -> CrudResult<()> {
        self.calls.delete.fetch_add(1, Ordering::SeqCst);
        let db = self.db(ctx)?;
        let table = self.descriptor.table.clone();
        let keys: Vec<String> = records.iter().map(|r| self.descriptor.identity_of(r)).collect();
        db.with_connection(move |conn| {
            let sql = format!("DELETE FROM {table} WHERE key = ?1");
            for key in &keys {
                conn.execute(&sql, params![key])?;
            }
            Ok(())
        })
        .await?;
        Ok(())
    }
}

// ── Mapper ───────────────────────────────────────────────────────

/// A mapper over any two `Crud` sides.
pub struct TestMapper {
    descriptor: EntityDescriptor,
    source: Side,
    db: Arc<dyn Crud>,
    cloud: Arc<dyn Crud>,
}

impl TestMapper {
    pub fn new(descriptor: &EntityDescriptor, source: Side, db: Arc<dyn Crud>, cloud: Arc<dyn Crud>) -> Arc<Self> {
        Arc::new(Self {
            descriptor: descriptor.clone(),
            source,
            db,
            cloud,
        })
    }
}

impl Mapper for TestMapper {
    fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }
    fn source(&self) -> Side {
        self.source
    }
    fn db(&self) -> &dyn Crud {
        self.db.as_ref()
    }
    fn cloud(&self) -> &dyn Crud {
        self.cloud.as_ref()
    }
}

/// Both sides of one in-memory resource type.
pub struct MemPair {
    pub db: Arc<MemStore>,
    pub cloud: Arc<MemStore>,
    pub mapper: Arc<TestMapper>,
}

pub fn mem_pair(descriptor: &EntityDescriptor, source: Side) -> MemPair {
    let db = MemStore::with_db_ids(descriptor);
    let cloud = MemStore::new(descriptor);
    let mapper = TestMapper::new(descriptor, source, db.clone(), cloud.clone());
    MemPair { db, cloud, mapper }
}

pub fn vpc_descriptor() -> EntityDescriptor {
    EntityDescriptor::new("vpc", &["vpc_id"]).with_db_id("id")
}

pub fn subnet_descriptor() -> EntityDescriptor {
    EntityDescriptor::new("subnet", &["subnet_id"]).with_db_id("id")
}

// ── Modules ──────────────────────────────────────────────────────

/// A module providing one SQLite-backed resource table, with a cloud side
/// held in memory.
pub struct SqlModule {
    pub module: Module,
    pub table: Arc<SqlTable>,
    pub cloud: Arc<MemStore>,
}

pub fn sql_module(name: &str, deps: &[&str], descriptor: EntityDescriptor) -> SqlModule {
    let table = SqlTable::new(&descriptor);
    let cloud = MemStore::new(&descriptor);
    let mapper = TestMapper::new(&descriptor, Side::Db, table.clone(), cloud.clone());
    let create = SqlTable::create_sql(&descriptor.table);
    let drop = format!("DROP TABLE {}", descriptor.table);
    let module = Module::new(name)
        .depends_on(deps)
        .provides_tables(&[descriptor.table.as_str()])
        .mapper(&descriptor.table, mapper)
        .preinstall(move |tx| {
            tx.execute_batch(&create)?;
            Ok(())
        })
        .preremove(move |tx| {
            tx.execute_batch(&drop)?;
            Ok(())
        });
    SqlModule {
        module,
        table,
        cloud,
    }
}

pub fn registry_of(modules: Vec<Module>) -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    for m in modules {
        registry.register(m).unwrap();
    }
    registry
}

pub fn quiet_config() -> EngineConfig {
    EngineConfig {
        sync_before_install: false,
        import_on_install: false,
        ..EngineConfig::default()
    }
}

pub fn open_db() -> Database {
    Database::open_in_memory("test-target").unwrap()
}

pub fn plain_module(name: &str, deps: &[&str]) -> Module {
    Module::new(name).depends_on(deps)
}
