//! Database abstraction layer
//!
//! Provides a unified key-value interface over the storage engines the kernel
//! can persist its registry into (in-memory, redb, sled). The engine itself is
//! a collaborator: the kernel only issues reads, batched writes and ordered
//! scans.

use anyhow::Result;
use std::path::Path;

/// Names of the trees the registry uses
pub const MODULES_TREE: &str = "modules";
pub const MODULE_EVENTS_TREE: &str = "module_events";

/// Database abstraction trait
pub trait Database: Send + Sync {
    /// Open a named tree/table
    fn open_tree(&self, name: &str) -> Result<Box<dyn Tree>>;

    /// Apply every write of `batch` in one transaction
    ///
    /// Either all writes become visible or none do, even when the batch
    /// spans several trees.
    fn apply_batch(&self, batch: &WriteBatch) -> Result<()>;

    /// Flush all pending writes
    fn flush(&self) -> Result<()>;
}

/// One pending write of a `WriteBatch`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchWrite {
    pub tree: String,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Writes to one or more trees that commit together
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    writes: Vec<BatchWrite>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an insert; later writes to the same key win
    pub fn insert(&mut self, tree: &str, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.writes.push(BatchWrite {
            tree: tree.to_string(),
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn writes(&self) -> &[BatchWrite] {
        &self.writes
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }
}

/// Tree/Table abstraction trait
///
/// Iteration yields entries in ascending key order.
pub trait Tree: Send + Sync {
    /// Insert a key-value pair
    fn insert(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Get a value by key
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Remove a key-value pair
    fn remove(&self, key: &[u8]) -> Result<()>;

    /// Check if a key exists
    fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Get number of entries
    fn len(&self) -> Result<usize>;

    /// Check if tree is empty
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Iterate over all key-value pairs
    fn iter(&self) -> Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + '_>;
}

/// Database backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseBackend {
    Memory,
    Redb,
    Sled,
}

/// Create a database instance based on backend type
pub fn create_database<P: AsRef<Path>>(
    data_dir: P,
    backend: DatabaseBackend,
) -> Result<Box<dyn Database>> {
    match backend {
        DatabaseBackend::Memory => {
            let _ = data_dir;
            Ok(Box::new(memory_impl::MemoryDatabase::new()))
        }
        #[cfg(feature = "redb")]
        DatabaseBackend::Redb => Ok(Box::new(redb_impl::RedbDatabase::new(data_dir)?)),
        #[cfg(not(feature = "redb"))]
        DatabaseBackend::Redb => Err(anyhow::anyhow!(
            "Redb backend not available (feature not enabled)"
        )),
        #[cfg(feature = "sled")]
        DatabaseBackend::Sled => Ok(Box::new(sled_impl::SledDatabase::new(data_dir)?)),
        #[cfg(not(feature = "sled"))]
        DatabaseBackend::Sled => Err(anyhow::anyhow!(
            "Sled backend not available (feature not enabled)"
        )),
    }
}

/// Get fallback database backend
///
/// Durable backends fall back to each other when available, never to memory:
/// silently losing durability is worse than failing to start.
pub fn fallback_backend(primary: DatabaseBackend) -> Option<DatabaseBackend> {
    match primary {
        DatabaseBackend::Memory => None,
        DatabaseBackend::Redb => {
            #[cfg(feature = "sled")]
            {
                Some(DatabaseBackend::Sled)
            }
            #[cfg(not(feature = "sled"))]
            {
                None
            }
        }
        DatabaseBackend::Sled => {
            #[cfg(feature = "redb")]
            {
                Some(DatabaseBackend::Redb)
            }
            #[cfg(not(feature = "redb"))]
            {
                None
            }
        }
    }
}

pub use memory_impl::MemoryDatabase;

mod memory_impl {
    use super::{Database, Tree, WriteBatch};
    use anyhow::Result;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};

    type Entries = Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>;

    /// Process-local database; contents are lost on drop
    #[derive(Default)]
    pub struct MemoryDatabase {
        trees: RwLock<HashMap<String, Entries>>,
    }

    impl MemoryDatabase {
        pub fn new() -> Self {
            Self::default()
        }

        fn entries(&self, name: &str) -> Entries {
            let mut trees = self.trees.write().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(trees.entry(name.to_string()).or_default())
        }
    }

    impl Database for MemoryDatabase {
        fn open_tree(&self, name: &str) -> Result<Box<dyn Tree>> {
            Ok(Box::new(MemoryTree {
                entries: self.entries(name),
            }))
        }

        fn apply_batch(&self, batch: &WriteBatch) -> Result<()> {
            // Hold the write lock of every touched tree, taken in name order
            let touched: BTreeMap<&str, Entries> = batch
                .writes()
                .iter()
                .map(|w| (w.tree.as_str(), self.entries(&w.tree)))
                .collect();
            let mut guards: BTreeMap<&str, RwLockWriteGuard<'_, BTreeMap<Vec<u8>, Vec<u8>>>> =
                touched
                    .iter()
                    .map(|(name, entries)| {
                        (*name, entries.write().unwrap_or_else(PoisonError::into_inner))
                    })
                    .collect();

            for write in batch.writes() {
                if let Some(entries) = guards.get_mut(write.tree.as_str()) {
                    entries.insert(write.key.clone(), write.value.clone());
                }
            }
            Ok(())
        }

        fn flush(&self) -> Result<()> {
            Ok(())
        }
    }

    struct MemoryTree {
        entries: Entries,
    }

    impl Tree for MemoryTree {
        fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
            self.entries
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key.to_vec(), value.to_vec());
            Ok(())
        }

        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
            Ok(self
                .entries
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(key)
                .cloned())
        }

        fn remove(&self, key: &[u8]) -> Result<()> {
            self.entries
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(key);
            Ok(())
        }

        fn len(&self) -> Result<usize> {
            Ok(self
                .entries
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len())
        }

        fn iter(&self) -> Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + '_> {
            // Snapshot so the lock is not held across the caller's iteration
            let items: Vec<_> = self
                .entries
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .map(|(k, v)| Ok((k.clone(), v.clone())))
                .collect();
            Box::new(items.into_iter())
        }
    }
}

// Sled implementation
#[cfg(feature = "sled")]
mod sled_impl {
    use super::{BatchWrite, Database, Tree, WriteBatch};
    use anyhow::Result;
    use sled::transaction::{
        ConflictableTransactionResult, TransactionError, TransactionalTree,
    };
    use sled::{Db, Transactional};
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::Arc;

    pub struct SledDatabase {
        db: Arc<Db>,
    }

    impl SledDatabase {
        pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
            let db = sled::open(data_dir.as_ref().join("registry.sled"))?;
            Ok(Self { db: Arc::new(db) })
        }
    }

    impl Database for SledDatabase {
        fn open_tree(&self, name: &str) -> Result<Box<dyn Tree>> {
            let tree = self.db.open_tree(name)?;
            Ok(Box::new(SledTree { tree }))
        }

        fn apply_batch(&self, batch: &WriteBatch) -> Result<()> {
            let mut by_tree: BTreeMap<&str, Vec<&BatchWrite>> = BTreeMap::new();
            for write in batch.writes() {
                by_tree.entry(write.tree.as_str()).or_default().push(write);
            }
            let groups: Vec<(&str, Vec<&BatchWrite>)> = by_tree.into_iter().collect();

            match groups.as_slice() {
                [] => Ok(()),
                [(name, writes)] => {
                    let tree = self.db.open_tree(name)?;
                    tree.transaction(|t| apply_writes(t, writes))
                        .map_err(transaction_error)
                }
                [(first, first_writes), (second, second_writes)] => {
                    let a = self.db.open_tree(first)?;
                    let b = self.db.open_tree(second)?;
                    (&a, &b)
                        .transaction(|(a, b)| {
                            apply_writes(a, first_writes)?;
                            apply_writes(b, second_writes)
                        })
                        .map_err(transaction_error)
                }
                _ => Err(anyhow::anyhow!(
                    "Sled batches may span at most two trees, got {}",
                    groups.len()
                )),
            }
        }

        fn flush(&self) -> Result<()> {
            self.db.flush()?;
            Ok(())
        }
    }

    fn apply_writes(
        tree: &TransactionalTree,
        writes: &[&BatchWrite],
    ) -> ConflictableTransactionResult<(), ()> {
        for write in writes {
            tree.insert(write.key.as_slice(), write.value.as_slice())?;
        }
        Ok(())
    }

    fn transaction_error(e: TransactionError<()>) -> anyhow::Error {
        anyhow::anyhow!("Sled transaction failed: {:?}", e)
    }

    struct SledTree {
        tree: sled::Tree,
    }

    impl Tree for SledTree {
        fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
            self.tree.insert(key, value)?;
            Ok(())
        }

        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
            Ok(self.tree.get(key)?.map(|v| v.to_vec()))
        }

        fn remove(&self, key: &[u8]) -> Result<()> {
            self.tree.remove(key)?;
            Ok(())
        }

        fn contains_key(&self, key: &[u8]) -> Result<bool> {
            Ok(self.tree.contains_key(key)?)
        }

        fn len(&self) -> Result<usize> {
            Ok(self.tree.len())
        }

        fn iter(&self) -> Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + '_> {
            Box::new(self.tree.iter().map(|item| {
                item.map(|(k, v)| (k.to_vec(), v.to_vec()))
                    .map_err(|e| anyhow::anyhow!("Sled iteration error: {}", e))
            }))
        }
    }
}

// Redb implementation
#[cfg(feature = "redb")]
mod redb_impl {
    use super::{Database, Tree, WriteBatch, MODULES_TREE, MODULE_EVENTS_TREE};
    use anyhow::Result;
    use redb::{Database as RedbDb, ReadableTable, TableDefinition};
    use std::path::Path;
    use std::sync::Arc;

    // Redb requires static table definitions
    static MODULES_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new(MODULES_TREE);
    static MODULE_EVENTS_TABLE: TableDefinition<&[u8], &[u8]> =
        TableDefinition::new(MODULE_EVENTS_TREE);

    pub struct RedbDatabase {
        db: Arc<RedbDb>,
    }

    impl RedbDatabase {
        pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
            std::fs::create_dir_all(data_dir.as_ref())?;
            let db_path = data_dir.as_ref().join("registry.redb");
            let db = RedbDb::create(&db_path)?;

            // Create tables up front so read transactions never miss them
            let write_txn = db.begin_write()?;
            {
                let _ = write_txn.open_table(MODULES_TABLE)?;
                let _ = write_txn.open_table(MODULE_EVENTS_TABLE)?;
            }
            write_txn.commit()?;

            Ok(Self { db: Arc::new(db) })
        }

        fn get_table_def(
            &self,
            name: &str,
        ) -> Result<&'static TableDefinition<'static, &'static [u8], &'static [u8]>> {
            match name {
                MODULES_TREE => Ok(&MODULES_TABLE),
                MODULE_EVENTS_TREE => Ok(&MODULE_EVENTS_TABLE),
                _ => Err(anyhow::anyhow!(
                    "Unknown table name: {}. Redb requires pre-defined tables.",
                    name
                )),
            }
        }
    }

    impl Database for RedbDatabase {
        fn open_tree(&self, name: &str) -> Result<Box<dyn Tree>> {
            let table_def = self.get_table_def(name)?;
            Ok(Box::new(RedbTree {
                db: Arc::clone(&self.db),
                table_def,
            }))
        }

        fn apply_batch(&self, batch: &WriteBatch) -> Result<()> {
            // Dropping an uncommitted transaction discards every write in it
            let write_txn = self.db.begin_write()?;
            for write in batch.writes() {
                let table_def = self.get_table_def(&write.tree)?;
                let mut table = write_txn.open_table(*table_def)?;
                table.insert(write.key.as_slice(), write.value.as_slice())?;
            }
            write_txn.commit()?;
            Ok(())
        }

        fn flush(&self) -> Result<()> {
            // Redb is durable on commit; an empty write transaction syncs
            let write_txn = self.db.begin_write()?;
            write_txn.commit()?;
            Ok(())
        }
    }

    struct RedbTree {
        db: Arc<RedbDb>,
        table_def: &'static TableDefinition<'static, &'static [u8], &'static [u8]>,
    }

    impl Tree for RedbTree {
        fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
            let write_txn = self.db.begin_write()?;
            {
                let mut table = write_txn.open_table(*self.table_def)?;
                table.insert(key, value)?;
            }
            write_txn.commit()?;
            Ok(())
        }

        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(*self.table_def)?;
            let result = table.get(key)?.map(|v| v.value().to_vec());
            Ok(result)
        }

        fn remove(&self, key: &[u8]) -> Result<()> {
            let write_txn = self.db.begin_write()?;
            {
                let mut table = write_txn.open_table(*self.table_def)?;
                table.remove(key)?;
            }
            write_txn.commit()?;
            Ok(())
        }

        fn len(&self) -> Result<usize> {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(*self.table_def)?;
            Ok(table.len()? as usize)
        }

        fn iter(&self) -> Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + '_> {
            // The read transaction must outlive the range, so collect eagerly
            let read_txn = match self.db.begin_read() {
                Ok(txn) => txn,
                Err(e) => {
                    return Box::new(std::iter::once(Err(anyhow::anyhow!(
                        "Failed to begin read transaction: {}",
                        e
                    ))));
                }
            };

            let table = match read_txn.open_table(*self.table_def) {
                Ok(tbl) => tbl,
                Err(e) => {
                    return Box::new(std::iter::once(Err(anyhow::anyhow!(
                        "Failed to open table: {}",
                        e
                    ))));
                }
            };

            let mut items = Vec::new();
            match table.range::<&[u8]>(..) {
                Ok(range_iter) => {
                    for item_result in range_iter {
                        items.push(
                            item_result
                                .map(|(key, value)| {
                                    (key.value().to_vec(), value.value().to_vec())
                                })
                                .map_err(|e| anyhow::anyhow!("Redb iteration error: {}", e)),
                        );
                    }
                }
                Err(e) => {
                    items.push(Err(anyhow::anyhow!("Failed to create range: {}", e)));
                }
            }

            Box::new(items.into_iter())
        }
    }
}
