use crate::mapper::{CrudResult, Mapper, Side};
use crate::record::Record;
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

type SideMemo = BTreeMap<String, BTreeMap<String, Record>>;

/// Per-run cache of entities: side → table → identity → record.
///
/// Shared by every task of a run. The lock is only taken for map access and
/// never held across an await.
#[derive(Clone, Default)]
pub struct Memo {
    inner: Arc<Mutex<HashMap<Side, SideMemo>>>,
}

impl Memo {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Side, SideMemo>> {
        // A task that panicked mid-insert leaves a valid map behind.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops every cached entity for one side.
    pub fn flush(&self, side: Side) {
        self.lock().remove(&side);
    }

    pub fn get(&self, side: Side, table: &str, id: &str) -> Option<Record> {
        self.lock()
            .get(&side)
            .and_then(|tables| tables.get(table))
            .and_then(|entities| entities.get(id))
            .cloned()
    }

    /// Caches an entity. If the identity is already cached, the new fields are
    /// merged into the cached record instead of replacing it.
    pub fn store(&self, side: Side, table: &str, id: &str, record: Record) {
        let mut guard = self.lock();
        let entities = guard
            .entry(side)
            .or_default()
            .entry(table.to_string())
            .or_default();
        match entities.get_mut(id) {
            Some(existing) => existing.merge_from(&record),
            None => {
                entities.insert(id.to_string(), record);
            }
        }
    }

    /// Merges `fields` into an already cached entity. Returns false when the
    /// identity is not cached.
    pub fn merge_into(&self, side: Side, table: &str, id: &str, fields: &Record) -> bool {
        let mut guard = self.lock();
        match guard
            .get_mut(&side)
            .and_then(|tables| tables.get_mut(table))
            .and_then(|entities| entities.get_mut(id))
        {
            Some(existing) => {
                existing.merge_from(fields);
                true
            }
            None => false,
        }
    }

    /// Removes one entity.
    pub fn forget(&self, side: Side, table: &str, id: &str) -> Option<Record> {
        self.lock()
            .get_mut(&side)
            .and_then(|tables| tables.get_mut(table))
            .and_then(|entities| entities.remove(id))
    }

    /// Every cached entity of a table, in identity order.
    pub fn table(&self, side: Side, table: &str) -> Vec<Record> {
        self.lock()
            .get(&side)
            .and_then(|tables| tables.get(table))
            .map(|entities| entities.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of cached entities on one side.
    pub fn len(&self, side: Side) -> usize {
        self.lock()
            .get(&side)
            .map(|tables| tables.values().map(BTreeMap::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, side: Side) -> bool {
        self.len(side) == 0
    }
}

impl fmt::Debug for Memo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("db", &self.len(Side::Db))
            .field("cloud", &self.len(Side::Cloud))
            .finish()
    }
}

/// Typed values contributed by installed modules (provider clients, settings).
#[derive(Default)]
pub struct Extensions {
    values: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, replacing any earlier value of the same type.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) -> Option<T> {
        self.values
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.values.len())
            .finish()
    }
}

/// Handle passed to every `Crud` call of a run.
#[derive(Clone, Debug, Default)]
pub struct Context {
    memo: Memo,
    extensions: Arc<Extensions>,
}

impl Context {
    pub fn new(extensions: Extensions) -> Self {
        Self {
            memo: Memo::new(),
            extensions: Arc::new(extensions),
        }
    }

    pub fn memo(&self) -> &Memo {
        &self.memo
    }

    /// A value contributed by an installed module.
    pub fn extension<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.extensions.get::<T>()
    }

    /// Caches an entity under its mapper's identity.
    pub fn memoize(&self, mapper: &dyn Mapper, side: Side, record: Record) {
        let id = mapper.entity_id(&record);
        self.memo.store(side, mapper.table(), &id, record);
    }

    /// Drops an entity from the cache, typically after a delete.
    pub fn unmemoize(&self, mapper: &dyn Mapper, side: Side, record: &Record) {
        let id = mapper.entity_id(record);
        self.memo.forget(side, mapper.table(), &id);
    }

    /// Reads every entity of a mapper's type from one side and caches them.
    pub async fn read_all(&self, mapper: &dyn Mapper, side: Side) -> CrudResult<Vec<Record>> {
        let records = mapper.crud(side).read(self, None).await?;
        debug!("Read {} {} entities from {}", records.len(), mapper.table(), side);
        for record in &records {
            self.memoize(mapper, side, record.clone());
        }
        Ok(records)
    }

    /// Returns one entity, from the cache when present, otherwise by reading
    /// just that identity and caching the result.
    pub async fn read_by_id(
        &self,
        mapper: &dyn Mapper,
        side: Side,
        id: &str,
    ) -> CrudResult<Option<Record>> {
        if let Some(hit) = self.memo.get(side, mapper.table(), id) {
            return Ok(Some(hit));
        }
        let ids = [id.to_string()];
        let found = mapper
            .crud(side)
            .read(self, Some(&ids[..]))
            .await?
            .into_iter()
            .find(|r| mapper.entity_id(r) == id);
        if let Some(record) = &found {
            self.memo.store(side, mapper.table(), id, record.clone());
        }
        Ok(found)
    }
}
