//! In-memory store for tests

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::{unix_now, CaseStore, StoreError};

type DocKey = (String, String, String);

/// A [`CaseStore`] held entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<BTreeMap<DocKey, String>>,
    leases: RwLock<HashMap<String, (String, u64)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn key(case_id: &str, collection: &str, doc_id: &str) -> DocKey {
    (
        case_id.to_string(),
        collection.to_string(),
        doc_id.to_string(),
    )
}

impl CaseStore for MemoryStore {
    fn get(
        &self,
        case_id: &str,
        collection: &str,
        doc_id: &str,
    ) -> Result<Option<String>, StoreError> {
        let docs = self.docs.read().map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(docs.get(&key(case_id, collection, doc_id)).cloned())
    }

    fn set(
        &self,
        case_id: &str,
        collection: &str,
        doc_id: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        let mut docs = self
            .docs
            .write()
            .map_err(|e| StoreError::Io(e.to_string()))?;
        docs.insert(key(case_id, collection, doc_id), value.to_string());
        Ok(())
    }

    fn delete(&self, case_id: &str, collection: &str, doc_id: &str) -> Result<(), StoreError> {
        let mut docs = self
            .docs
            .write()
            .map_err(|e| StoreError::Io(e.to_string()))?;
        docs.remove(&key(case_id, collection, doc_id));
        Ok(())
    }

    fn list(&self, case_id: &str, collection: &str) -> Result<Vec<(String, String)>, StoreError> {
        let docs = self.docs.read().map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(docs
            .iter()
            .filter(|((case, coll, _), _)| case == case_id && coll == collection)
            .map(|((_, _, id), value)| (id.clone(), value.clone()))
            .collect())
    }

    fn delete_all(&self, case_id: &str, collection: &str) -> Result<(), StoreError> {
        let mut docs = self
            .docs
            .write()
            .map_err(|e| StoreError::Io(e.to_string()))?;
        docs.retain(|(case, coll, _), _| !(case == case_id && coll == collection));
        Ok(())
    }

    fn list_case_ids(&self) -> Result<Vec<String>, StoreError> {
        let docs = self.docs.read().map_err(|e| StoreError::Io(e.to_string()))?;
        let mut ids: Vec<String> = docs.keys().map(|(case, _, _)| case.clone()).collect();
        ids.dedup();
        Ok(ids)
    }

    fn acquire_lease(
        &self,
        case_id: &str,
        holder: &str,
        ttl_secs: u64,
    ) -> Result<bool, StoreError> {
        let mut leases = self
            .leases
            .write()
            .map_err(|e| StoreError::Io(e.to_string()))?;
        let now = unix_now();
        if let Some((current, expires_at)) = leases.get(case_id) {
            if *expires_at > now && current != holder {
                return Ok(false);
            }
        }
        leases.insert(case_id.to_string(), (holder.to_string(), now + ttl_secs));
        Ok(true)
    }

    fn release_lease(&self, case_id: &str, holder: &str) -> Result<(), StoreError> {
        let mut leases = self
            .leases
            .write()
            .map_err(|e| StoreError::Io(e.to_string()))?;
        if let Some((current, _)) = leases.get(case_id) {
            if current == holder {
                leases.remove(case_id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_and_scoping() {
        let store = MemoryStore::new();
        store.set("case-1", "items", "b", "{\"v\":2}").unwrap();
        store.set("case-1", "items", "a", "{\"v\":1}").unwrap();
        store.set("case-1", "other", "a", "{\"v\":9}").unwrap();
        store.set("case-2", "items", "a", "{\"v\":8}").unwrap();

        assert_eq!(
            store.get("case-1", "items", "a").unwrap().as_deref(),
            Some("{\"v\":1}")
        );
        assert!(store.get("case-1", "items", "zzz").unwrap().is_none());

        // Listing is collection-scoped and ordered by doc id
        let listed = store.list("case-1", "items").unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].0, "a");
        assert_eq!(listed[1].0, "b");
    }

    #[test]
    fn test_delete_and_delete_all() {
        let store = MemoryStore::new();
        store.set("case-1", "items", "a", "1").unwrap();
        store.set("case-1", "items", "b", "2").unwrap();
        store.set("case-1", "state", "s", "3").unwrap();

        store.delete("case-1", "items", "a").unwrap();
        assert!(store.get("case-1", "items", "a").unwrap().is_none());

        store.delete_all("case-1", "items").unwrap();
        assert!(store.list("case-1", "items").unwrap().is_empty());
        assert!(store.get("case-1", "state", "s").unwrap().is_some());
    }

    #[test]
    fn test_list_case_ids_distinct_and_ordered() {
        let store = MemoryStore::new();
        store.set("case-b", "items", "a", "1").unwrap();
        store.set("case-a", "items", "a", "1").unwrap();
        store.set("case-a", "state", "s", "1").unwrap();

        assert_eq!(store.list_case_ids().unwrap(), vec!["case-a", "case-b"]);
    }

    #[test]
    fn test_lease_contention_and_release() {
        let store = MemoryStore::new();
        assert!(store.acquire_lease("case-1", "holder-a", 60).unwrap());
        assert!(!store.acquire_lease("case-1", "holder-b", 60).unwrap());

        // Releasing under the wrong holder changes nothing
        store.release_lease("case-1", "holder-b").unwrap();
        assert!(!store.acquire_lease("case-1", "holder-b", 60).unwrap());

        store.release_lease("case-1", "holder-a").unwrap();
        assert!(store.acquire_lease("case-1", "holder-b", 60).unwrap());
    }

    #[test]
    fn test_expired_lease_is_stolen() {
        let store = MemoryStore::new();
        // ttl 0 expires immediately
        assert!(store.acquire_lease("case-1", "holder-a", 0).unwrap());
        assert!(store.acquire_lease("case-1", "holder-b", 60).unwrap());
    }
}
