//! Keirloom Case Store
//!
//! Durable documents for the execution pipeline, addressed by
//! `(case id, collection, document id)` and stored as JSON text. Two
//! implementations: [`memory::MemoryStore`] for tests and
//! [`sqlite::SqliteStore`] for deployment.
//!
//! The store also hands out per-case execution leases
//! ([`lease::CaseLease`]); every pipeline entry point takes one so that a
//! case is never executed from two places at once.

pub mod lease;
pub mod memory;
pub mod sqlite;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub use lease::CaseLease;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store I/O failed: {0}")]
    Io(String),
    #[error("Document codec failed: {0}")]
    Codec(String),
    #[error("Case {0} is being executed elsewhere")]
    CaseBusy(String),
}

/// JSON document storage scoped by case.
pub trait CaseStore: Send + Sync {
    fn get(
        &self,
        case_id: &str,
        collection: &str,
        doc_id: &str,
    ) -> Result<Option<String>, StoreError>;

    /// Insert or replace a document.
    fn set(
        &self,
        case_id: &str,
        collection: &str,
        doc_id: &str,
        value: &str,
    ) -> Result<(), StoreError>;

    fn delete(&self, case_id: &str, collection: &str, doc_id: &str) -> Result<(), StoreError>;

    /// All documents of one collection, as `(doc_id, value)` pairs ordered
    /// by document id.
    fn list(&self, case_id: &str, collection: &str) -> Result<Vec<(String, String)>, StoreError>;

    /// Drop a whole collection for a case.
    fn delete_all(&self, case_id: &str, collection: &str) -> Result<(), StoreError>;

    /// Distinct case ids present in the store, ordered.
    fn list_case_ids(&self) -> Result<Vec<String>, StoreError>;

    /// Try to take the execution lease for a case. Returns `false` while
    /// another holder's unexpired lease exists.
    fn acquire_lease(
        &self,
        case_id: &str,
        holder: &str,
        ttl_secs: u64,
    ) -> Result<bool, StoreError>;

    /// Give the lease back. A no-op when `holder` no longer holds it.
    fn release_lease(&self, case_id: &str, holder: &str) -> Result<(), StoreError>;
}

/// Read one document into a typed value.
pub fn get_doc<T: DeserializeOwned>(
    store: &dyn CaseStore,
    case_id: &str,
    collection: &str,
    doc_id: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(case_id, collection, doc_id)? {
        Some(text) => {
            let value = serde_json::from_str(&text).map_err(|e| StoreError::Codec(e.to_string()))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Write a typed value as one document.
pub fn set_doc<T: Serialize>(
    store: &dyn CaseStore,
    case_id: &str,
    collection: &str,
    doc_id: &str,
    value: &T,
) -> Result<(), StoreError> {
    let text = serde_json::to_string(value).map_err(|e| StoreError::Codec(e.to_string()))?;
    store.set(case_id, collection, doc_id, &text)
}

/// Read a whole collection into typed values, ordered by document id.
pub fn list_docs<T: DeserializeOwned>(
    store: &dyn CaseStore,
    case_id: &str,
    collection: &str,
) -> Result<Vec<T>, StoreError> {
    store
        .list(case_id, collection)?
        .into_iter()
        .map(|(_, text)| serde_json::from_str(&text).map_err(|e| StoreError::Codec(e.to_string())))
        .collect()
}

/// Read-modify-write one document. The closure sees the current value (or
/// `None`) and returns the replacement.
pub fn update_doc<T, F>(
    store: &dyn CaseStore,
    case_id: &str,
    collection: &str,
    doc_id: &str,
    f: F,
) -> Result<T, StoreError>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce(Option<T>) -> T,
{
    let current = get_doc(store, case_id, collection, doc_id)?;
    let next = f(current);
    set_doc(store, case_id, collection, doc_id, &next)?;
    Ok(next)
}

pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Doc {
        name: String,
        count: u32,
    }

    #[test]
    fn test_typed_helpers_round_trip() {
        let store = MemoryStore::new();
        let doc = Doc {
            name: "first".into(),
            count: 3,
        };

        set_doc(&store, "case-1", "items", "a", &doc).unwrap();
        let loaded: Doc = get_doc(&store, "case-1", "items", "a").unwrap().unwrap();
        assert_eq!(loaded, doc);

        let missing: Option<Doc> = get_doc(&store, "case-1", "items", "zzz").unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_update_doc_sees_current_value() {
        let store = MemoryStore::new();
        set_doc(
            &store,
            "case-1",
            "items",
            "a",
            &Doc {
                name: "first".into(),
                count: 1,
            },
        )
        .unwrap();

        let updated: Doc = update_doc(&store, "case-1", "items", "a", |current: Option<Doc>| {
            let mut doc = current.unwrap();
            doc.count += 1;
            doc
        })
        .unwrap();
        assert_eq!(updated.count, 2);

        let fresh: Doc = update_doc(&store, "case-1", "items", "new", |current: Option<Doc>| {
            assert!(current.is_none());
            Doc {
                name: "made".into(),
                count: 0,
            }
        })
        .unwrap();
        assert_eq!(fresh.name, "made");
    }

    #[test]
    fn test_get_doc_rejects_bad_json() {
        let store = MemoryStore::new();
        store.set("case-1", "items", "a", "not json").unwrap();
        let result: Result<Option<Doc>, _> = get_doc(&store, "case-1", "items", "a");
        assert!(matches!(result, Err(StoreError::Codec(_))));
    }
}
