use std::{collections::HashMap, fmt};

use parking_lot::RwLock;

use crate::{ContentError, Digest, Labels};

/// Storage for blob labels, used to decorate a [`LocalStore`](crate::LocalStore).
pub trait LabelStore: fmt::Debug + Send + Sync {
    /// Get the labels for a blob, empty if none were set.
    fn get(&self, digest: &Digest) -> Result<Labels, ContentError>;

    /// Merge `update` into the labels for a blob, returning the result.
    ///
    /// A label with an empty value is removed.
    fn update(&self, digest: &Digest, update: Labels) -> Result<Labels, ContentError>;

    /// Forget every label for a blob.
    fn remove(&self, digest: &Digest) -> Result<(), ContentError>;
}

/// Label store which keeps labels in memory only.
///
/// Labels are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryLabelStore {
    labels: RwLock<HashMap<Digest, Labels>>,
}

impl MemoryLabelStore {
    /// Create an empty label store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LabelStore for MemoryLabelStore {
    fn get(&self, digest: &Digest) -> Result<Labels, ContentError> {
        Ok(self.labels.read().get(digest).cloned().unwrap_or_default())
    }

    fn update(&self, digest: &Digest, update: Labels) -> Result<Labels, ContentError> {
        let mut labels = self.labels.write();
        let entry = labels.entry(digest.clone()).or_default();
        merge_labels(entry, update);
        let merged = entry.clone();
        if merged.is_empty() {
            labels.remove(digest);
        }
        Ok(merged)
    }

    fn remove(&self, digest: &Digest) -> Result<(), ContentError> {
        self.labels.write().remove(digest);
        Ok(())
    }
}

/// Merge `update` into `labels`, dropping keys whose new value is empty.
pub fn merge_labels(labels: &mut Labels, update: Labels) {
    for (key, value) in update {
        if value.is_empty() {
            labels.remove(&key);
        } else {
            labels.insert(key, value);
        }
    }
}
