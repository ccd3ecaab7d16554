//! Helpers shared by the mock's object stores

use crate::error::ClusterError;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Store key: (namespace, name)
pub(crate) type Key = (String, String);

/// Lock a store, recovering the data if a panicking test poisoned it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Namespace and name of an object about to be stored
pub(crate) fn key_of<K: Resource>(object: &K) -> Result<Key, ClusterError> {
    let namespace = object
        .namespace()
        .ok_or_else(|| ClusterError::InvalidObject(format!("{} has no namespace", object.name_any())))?;
    let name = object
        .meta()
        .name
        .clone()
        .ok_or_else(|| ClusterError::InvalidObject("object has no name".to_string()))?;
    Ok((namespace, name))
}

/// Fill in the server-side metadata a real API server would assign on create
pub(crate) fn stamp_created<K: Resource>(object: &mut K, resource_version: u64) {
    let meta = object.meta_mut();
    if meta.uid.is_none() {
        meta.uid = Some(uuid::Uuid::new_v4().to_string());
    }
    meta.resource_version = Some(resource_version.to_string());
}

/// Evaluate an equality-based label selector (`a=b,c!=d,e`) against labels
pub(crate) fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            if let Some((key, value)) = term.split_once("!=") {
                labels.get(key.trim()).map(String::as_str) != Some(value.trim())
            } else if let Some((key, value)) = term.split_once("==").or_else(|| term.split_once('=')) {
                labels.get(key.trim()).map(String::as_str) == Some(value.trim())
            } else if let Some(key) = term.strip_prefix('!') {
                !labels.contains_key(key)
            } else {
                labels.contains_key(term)
            }
        })
}

/// Objects in `namespace` whose labels match `selector`
pub(crate) fn select<K: Resource + Clone>(
    store: &BTreeMap<Key, K>,
    namespace: &str,
    selector: &str,
) -> Vec<K> {
    store
        .iter()
        .filter(|((ns, _), object)| ns == namespace && matches_selector(object.labels(), selector))
        .map(|(_, object)| object.clone())
        .collect()
}
