//! Persistent object storage abstraction.
//!
//! The engine persists two kinds of objects (job statuses and slow-tracking
//! records) through a small key-value store interface with access-control
//! annotations. The in-memory backend is the default; a real deployment
//! swaps in a durable implementation of [`ObjectStore`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde_json::{Map as JsonMap, Value as JsonValue};

use canopy_core::ObjectId;

/// Collection holding slow-execution forensic records. Privileged-read only.
pub const SLOW_TRACKING_COLLECTION: &str = "_SlowTracking";
/// Collection holding job lifecycle statuses.
pub const JOB_STATUS_COLLECTION: &str = "_JobStatus";

/// Read-access annotation persisted with each object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acl {
    /// Anyone may read.
    Public,
    /// Only master-key callers may read.
    MasterOnly,
}

/// Privilege level of the reader issuing a get/query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadAccess {
    Public,
    Master,
}

impl ReadAccess {
    pub fn can_read(self, acl: Acl) -> bool {
        matches!(self, ReadAccess::Master) || acl == Acl::Public
    }
}

/// A persisted object: identifier, owning collection, JSON fields, ACL.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub id: ObjectId,
    pub collection: String,
    pub fields: JsonMap<String, JsonValue>,
    pub acl: Acl,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredObject {
    pub fn new(id: ObjectId, collection: impl Into<String>, fields: JsonMap<String, JsonValue>, acl: Acl) -> Self {
        let now = Utc::now();
        Self {
            id,
            collection: collection.into(),
            fields,
            acl,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ObjectStoreError {
    #[error("object not found: {0}")]
    NotFound(ObjectId),
    #[error("object already exists: {0}")]
    AlreadyExists(ObjectId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Object store abstraction.
pub trait ObjectStore: Send + Sync {
    /// Insert a new object. Fails if the id already exists in the collection.
    fn create(&self, object: StoredObject) -> Result<ObjectId, ObjectStoreError>;

    /// Atomic read-modify-write keyed by `(collection, id)`.
    ///
    /// Inserts an empty object (with `acl`) when absent, then applies
    /// `mutate` to its fields under the store's write lock. Racing writers
    /// to the same id are serialized here; first-writer-wins field rules
    /// and per-job status updates rely on that.
    fn upsert_with(
        &self,
        collection: &str,
        id: &ObjectId,
        acl: Acl,
        mutate: &mut dyn FnMut(&mut JsonMap<String, JsonValue>),
    ) -> Result<StoredObject, ObjectStoreError>;

    /// Fetch one object, honoring its ACL against the reader's privilege.
    fn get(
        &self,
        collection: &str,
        id: &ObjectId,
        access: ReadAccess,
    ) -> Result<Option<StoredObject>, ObjectStoreError>;

    /// All objects in a collection readable at the given privilege, oldest
    /// first.
    fn query(&self, collection: &str, access: ReadAccess)
        -> Result<Vec<StoredObject>, ObjectStoreError>;
}

/// In-memory object store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    collections: RwLock<HashMap<String, HashMap<ObjectId, StoredObject>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn create(&self, object: StoredObject) -> Result<ObjectId, ObjectStoreError> {
        let mut collections = self.collections.write().expect("store lock poisoned");
        let collection = collections.entry(object.collection.clone()).or_default();
        if collection.contains_key(&object.id) {
            return Err(ObjectStoreError::AlreadyExists(object.id));
        }
        let id = object.id.clone();
        collection.insert(id.clone(), object);
        Ok(id)
    }

    fn upsert_with(
        &self,
        collection: &str,
        id: &ObjectId,
        acl: Acl,
        mutate: &mut dyn FnMut(&mut JsonMap<String, JsonValue>),
    ) -> Result<StoredObject, ObjectStoreError> {
        let mut collections = self.collections.write().expect("store lock poisoned");
        let objects = collections.entry(collection.to_string()).or_default();
        let object = objects
            .entry(id.clone())
            .or_insert_with(|| StoredObject::new(id.clone(), collection, JsonMap::new(), acl));
        mutate(&mut object.fields);
        object.updated_at = Utc::now();
        Ok(object.clone())
    }

    fn get(
        &self,
        collection: &str,
        id: &ObjectId,
        access: ReadAccess,
    ) -> Result<Option<StoredObject>, ObjectStoreError> {
        let collections = self.collections.read().expect("store lock poisoned");
        let found = collections
            .get(collection)
            .and_then(|objects| objects.get(id))
            .filter(|object| access.can_read(object.acl))
            .cloned();
        Ok(found)
    }

    fn query(
        &self,
        collection: &str,
        access: ReadAccess,
    ) -> Result<Vec<StoredObject>, ObjectStoreError> {
        let collections = self.collections.read().expect("store lock poisoned");
        let mut found: Vec<StoredObject> = collections
            .get(collection)
            .map(|objects| {
                objects
                    .values()
                    .filter(|object| access.can_read(object.acl))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        found.sort_by_key(|object| object.created_at);
        Ok(found)
    }
}
