// crates/core/src/store.rs
//! Keyed result buffers shared by every job that streams into them.
//!
//! Slots are addressed by `(namespace, key)`. Namespaces are fully
//! independent: the same key string in two namespaces names two slots.
//!
//! The store does not serialize writers. Exactly one job is expected to
//! write a given slot at a time, normally by keying the slot with the job's
//! own query identifier. `claim_writer` turns that convention into a checked
//! lease for callers that want it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;

use crate::error::StoreError;

type Slots<T> = HashMap<String, HashMap<String, Arc<Vec<T>>>>;

/// `namespace -> key -> ordered element list`.
pub struct ResultStore<T = Value> {
    slots: RwLock<Slots<T>>,
    writers: Mutex<HashMap<(String, String), String>>,
}

impl<T: Clone> ResultStore<T> {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            writers: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the slot's contents with an empty list, creating it if absent.
    pub fn reset(&self, namespace: &str, key: &str) {
        self.write_slots()
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), Arc::new(Vec::new()));
    }

    /// Append `elements` to the slot in call order, creating it if absent.
    ///
    /// Outstanding `get` views keep the contents they were taken with.
    pub fn append(&self, namespace: &str, key: &str, elements: Vec<T>) {
        let mut slots = self.write_slots();
        let slot = slots
            .entry(namespace.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default();
        Arc::make_mut(slot).extend(elements);
    }

    /// Element count of the slot, `0` if it does not exist.
    pub fn size(&self, namespace: &str, key: &str) -> usize {
        self.read_slots()
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .map_or(0, |slot| slot.len())
    }

    /// Current contents of the slot, empty if it does not exist.
    pub fn get(&self, namespace: &str, key: &str) -> Arc<Vec<T>> {
        self.read_slots()
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .cloned()
            .unwrap_or_default()
    }

    pub fn contains(&self, namespace: &str, key: &str) -> bool {
        self.read_slots()
            .get(namespace)
            .is_some_and(|ns| ns.contains_key(key))
    }

    /// Drop a slot entirely. Returns whether it existed.
    pub fn remove(&self, namespace: &str, key: &str) -> bool {
        let mut slots = self.write_slots();
        let Some(ns) = slots.get_mut(namespace) else {
            return false;
        };
        let removed = ns.remove(key).is_some();
        if ns.is_empty() {
            slots.remove(namespace);
        }
        removed
    }

    /// Drop every slot in a namespace. Returns how many slots were released.
    pub fn drop_namespace(&self, namespace: &str) -> usize {
        self.write_slots()
            .remove(namespace)
            .map_or(0, |ns| ns.len())
    }

    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_slots().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn keys(&self, namespace: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .read_slots()
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Take the exclusive writer lease on a slot.
    ///
    /// Fails with `StoreError::WriterBusy` while another `SlotWriter` for the
    /// same slot is alive. The lease is released when the writer is dropped.
    pub fn claim_writer(
        self: &Arc<Self>,
        namespace: &str,
        key: &str,
        holder: impl Into<String>,
    ) -> Result<SlotWriter<T>, StoreError> {
        let holder = holder.into();
        let lease = (namespace.to_string(), key.to_string());
        let mut writers = self.lock_writers();
        if let Some(current) = writers.get(&lease) {
            return Err(StoreError::WriterBusy {
                namespace: lease.0,
                key: lease.1,
                holder: current.clone(),
            });
        }
        writers.insert(lease, holder.clone());
        Ok(SlotWriter {
            store: Arc::clone(self),
            namespace: namespace.to_string(),
            key: key.to_string(),
            holder,
        })
    }

    /// Holder of the slot's writer lease, if any.
    pub fn writer_of(&self, namespace: &str, key: &str) -> Option<String> {
        self.lock_writers()
            .get(&(namespace.to_string(), key.to_string()))
            .cloned()
    }
}

impl<T> ResultStore<T> {
    fn read_slots(&self) -> RwLockReadGuard<'_, Slots<T>> {
        self.slots.read().unwrap_or_else(|e| {
            tracing::error!("RwLock poisoned reading result slots: {e}");
            e.into_inner()
        })
    }

    fn write_slots(&self) -> RwLockWriteGuard<'_, Slots<T>> {
        self.slots.write().unwrap_or_else(|e| {
            tracing::error!("RwLock poisoned writing result slots: {e}");
            e.into_inner()
        })
    }

    fn lock_writers(&self) -> MutexGuard<'_, HashMap<(String, String), String>> {
        self.writers.lock().unwrap_or_else(|e| {
            tracing::error!("Mutex poisoned on slot writer leases: {e}");
            e.into_inner()
        })
    }
}

impl<T: Clone> Default for ResultStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive writer for one slot, obtained from `ResultStore::claim_writer`.
pub struct SlotWriter<T: Clone = Value> {
    store: Arc<ResultStore<T>>,
    namespace: String,
    key: String,
    holder: String,
}

impl<T: Clone> SlotWriter<T> {
    pub fn reset(&self) {
        self.store.reset(&self.namespace, &self.key);
    }

    pub fn append(&self, elements: Vec<T>) {
        self.store.append(&self.namespace, &self.key, elements);
    }

    pub fn size(&self) -> usize {
        self.store.size(&self.namespace, &self.key)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }
}

impl<T: Clone> Drop for SlotWriter<T> {
    fn drop(&mut self) {
        self.store
            .lock_writers()
            .remove(&(std::mem::take(&mut self.namespace), std::mem::take(&mut self.key)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_reset_then_appends_sum_sizes() {
        let store: ResultStore = ResultStore::new();
        store.reset("query_content", "q1");
        store.append("query_content", "q1", vec![json!(1), json!(2), json!(3)]);
        store.append(
            "query_content",
            "q1",
            vec![json!(4), json!(5), json!(6), json!(7), json!(8)],
        );
        assert_eq!(store.size("query_content", "q1"), 8);
        assert_eq!(store.size("other_ns", "q1"), 0);
    }

    #[test]
    fn test_append_preserves_call_order() {
        let store: ResultStore<u32> = ResultStore::new();
        store.append("ns", "k", vec![1, 2]);
        store.append("ns", "k", vec![3]);
        store.append("ns", "k", vec![]);
        store.append("ns", "k", vec![4, 5]);
        assert_eq!(*store.get("ns", "k"), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_missing_slot_is_empty() {
        let store: ResultStore<u32> = ResultStore::new();
        assert_eq!(store.size("nope", "nothing"), 0);
        assert!(store.get("nope", "nothing").is_empty());
        assert!(!store.contains("nope", "nothing"));
    }

    #[test]
    fn test_reset_clears_but_keeps_identity() {
        let store: ResultStore<u32> = ResultStore::new();
        store.append("ns", "k", vec![1, 2, 3]);
        store.reset("ns", "k");
        assert!(store.contains("ns", "k"));
        assert_eq!(store.size("ns", "k"), 0);

        // Idempotent.
        store.reset("ns", "k");
        assert_eq!(store.size("ns", "k"), 0);
        assert_eq!(store.keys("ns"), vec!["k".to_string()]);
    }

    #[test]
    fn test_namespaces_are_independent() {
        let store: ResultStore<&'static str> = ResultStore::new();
        store.append("a", "shared", vec!["from-a"]);
        store.append("b", "shared", vec!["from-b", "again-b"]);
        assert_eq!(*store.get("a", "shared"), vec!["from-a"]);
        assert_eq!(*store.get("b", "shared"), vec!["from-b", "again-b"]);
        store.reset("a", "shared");
        assert_eq!(store.size("b", "shared"), 2);
        assert_eq!(store.namespaces(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_get_view_is_not_affected_by_later_appends() {
        let store: ResultStore<u32> = ResultStore::new();
        store.append("ns", "k", vec![1, 2]);
        let view = store.get("ns", "k");
        store.append("ns", "k", vec![3]);
        assert_eq!(*view, vec![1, 2]);
        assert_eq!(*store.get("ns", "k"), vec![1, 2, 3]);
    }

    #[test]
    fn test_remove_and_drop_namespace() {
        let store: ResultStore<u32> = ResultStore::new();
        store.append("ns", "a", vec![1]);
        store.append("ns", "b", vec![2]);
        store.append("other", "a", vec![3]);

        assert!(store.remove("ns", "a"));
        assert!(!store.remove("ns", "a"));
        assert_eq!(store.keys("ns"), vec!["b".to_string()]);

        assert_eq!(store.drop_namespace("ns"), 1);
        assert_eq!(store.drop_namespace("ns"), 0);
        assert_eq!(store.namespaces(), vec!["other".to_string()]);

        // Removing the last key drops the namespace entry too.
        assert!(store.remove("other", "a"));
        assert!(store.namespaces().is_empty());
    }

    #[test]
    fn test_writer_lease_rejects_second_writer() {
        let store: Arc<ResultStore<u32>> = Arc::new(ResultStore::new());
        let writer = store.claim_writer("ns", "k", "job-1").unwrap();
        writer.append(vec![1, 2]);

        let busy = store.claim_writer("ns", "k", "job-2");
        match busy {
            Err(StoreError::WriterBusy { holder, .. }) => assert_eq!(holder, "job-1"),
            Ok(_) => panic!("second writer should be rejected"),
        }
        // Other slots are unaffected.
        assert!(store.claim_writer("ns", "other", "job-2").is_ok());
        assert_eq!(store.writer_of("ns", "k").as_deref(), Some("job-1"));

        drop(writer);
        assert!(store.writer_of("ns", "k").is_none());
        let again = store.claim_writer("ns", "k", "job-2").unwrap();
        assert_eq!(again.size(), 2);
        assert_eq!(again.holder(), "job-2");
    }

    #[test]
    fn test_concurrent_readers_with_single_writer() {
        let store: Arc<ResultStore<usize>> = Arc::new(ResultStore::new());
        let writer = Arc::clone(&store);
        let handle = std::thread::spawn(move || {
            for i in 0..100 {
                writer.append("ns", "k", vec![i]);
            }
        });
        for _ in 0..100 {
            let view = store.get("ns", "k");
            // Whatever a reader sees is always an ordered prefix.
            assert!(view.iter().enumerate().all(|(idx, v)| idx == *v));
        }
        handle.join().unwrap();
        assert_eq!(store.size("ns", "k"), 100);
    }

    proptest! {
        #[test]
        fn prop_size_is_sum_of_appends_since_reset(
            before in proptest::collection::vec(0usize..20, 0..5),
            after in proptest::collection::vec(0usize..20, 0..10),
        ) {
            let store: ResultStore<u8> = ResultStore::new();
            for len in &before {
                store.append("ns", "k", vec![0; *len]);
            }
            store.reset("ns", "k");
            for len in &after {
                store.append("ns", "k", vec![1; *len]);
            }
            prop_assert_eq!(store.size("ns", "k"), after.iter().sum::<usize>());
        }
    }
}
