//! In-memory record store and container tree.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use super::store::{
    AccessRule, AssetRecord, AssetUpsert, Container, ContainerId, ContainerTree, RecordId,
    RecordStore,
};
use crate::{DepotError, Result};

/// In-memory catalog of containers and asset records.
///
/// Intended for tests and embedding. Identities increase monotonically and
/// `(container, name)` is kept unique, mirroring the SQLite catalog.
pub struct MemoryCatalog {
    containers: RwLock<HashMap<ContainerId, Container>>,
    records: RwLock<BTreeMap<RecordId, AssetRecord>>,
    next_container: AtomicI64,
    next_record: AtomicI64,
}

impl MemoryCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self {
            containers: RwLock::new(HashMap::new()),
            records: RwLock::new(BTreeMap::new()),
            next_container: AtomicI64::new(1),
            next_record: AtomicI64::new(1),
        }
    }

    /// Add a container and return its handle.
    pub fn add_container(
        &self,
        name: impl Into<String>,
        parent: Option<ContainerId>,
        access_rule: AccessRule,
    ) -> ContainerId {
        let id = ContainerId(self.next_container.fetch_add(1, Ordering::SeqCst));
        let container = Container {
            id,
            name: name.into(),
            parent,
            access_rule,
        };
        self.containers
            .write()
            .expect("lock poisoned")
            .insert(id, container);
        id
    }

    /// Re-parent a container. Returns `false` if it does not exist.
    pub fn set_parent(&self, id: ContainerId, parent: Option<ContainerId>) -> bool {
        let mut containers = self.containers.write().expect("lock poisoned");
        match containers.get_mut(&id) {
            Some(container) => {
                container.parent = parent;
                true
            }
            None => false,
        }
    }

    /// Change a container's access rule. Returns `false` if it does not exist.
    pub fn set_access_rule(&self, id: ContainerId, rule: AccessRule) -> bool {
        let mut containers = self.containers.write().expect("lock poisoned");
        match containers.get_mut(&id) {
            Some(container) => {
                container.access_rule = rule;
                true
            }
            None => false,
        }
    }

    /// Records in a container, oldest first.
    pub fn records_in(&self, container: ContainerId) -> Vec<AssetRecord> {
        self.records
            .read()
            .expect("lock poisoned")
            .values()
            .filter(|r| r.container == container)
            .cloned()
            .collect()
    }

    /// Total number of records.
    pub fn len(&self) -> usize {
        self.records.read().expect("lock poisoned").len()
    }

    /// Returns `true` if there are no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryCatalog {
    async fn name_exists(&self, container: ContainerId, name: &str) -> Result<bool> {
        let records = self.records.read().expect("lock poisoned");
        Ok(records
            .values()
            .any(|r| r.container == container && r.name == name))
    }

    async fn upsert(&self, upsert: &AssetUpsert) -> Result<AssetRecord> {
        let mut records = self.records.write().expect("lock poisoned");

        let conflict = records.values().any(|r| {
            r.container == upsert.container && r.name == upsert.name && Some(r.id) != upsert.id
        });
        if conflict {
            return Err(DepotError::RecordConflict {
                container: upsert.container,
                name: upsert.name.clone(),
            });
        }

        let now = Utc::now();
        let record = match upsert.id {
            Some(id) => {
                let existing = records
                    .get(&id)
                    .ok_or_else(|| DepotError::NotFound(format!("asset {id}")))?;
                AssetRecord {
                    id,
                    container: upsert.container,
                    name: upsert.name.clone(),
                    visibility: upsert.visibility,
                    location: upsert.location.clone(),
                    created_at: existing.created_at,
                    updated_at: now,
                }
            }
            None => AssetRecord {
                id: RecordId(self.next_record.fetch_add(1, Ordering::SeqCst)),
                container: upsert.container,
                name: upsert.name.clone(),
                visibility: upsert.visibility,
                location: upsert.location.clone(),
                created_at: now,
                updated_at: now,
            },
        };

        records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: RecordId) -> Result<Option<AssetRecord>> {
        Ok(self.records.read().expect("lock poisoned").get(&id).cloned())
    }

    async fn find(&self, container: ContainerId, name: &str) -> Result<Option<AssetRecord>> {
        let records = self.records.read().expect("lock poisoned");
        Ok(records
            .values()
            .find(|r| r.container == container && r.name == name)
            .cloned())
    }
}

#[async_trait]
impl ContainerTree for MemoryCatalog {
    async fn container(&self, id: ContainerId) -> Result<Option<Container>> {
        Ok(self
            .containers
            .read()
            .expect("lock poisoned")
            .get(&id)
            .cloned())
    }
}
