//! Moves consumed `updated/` snapshots out of the transform's way.

use tracing::info;

use floe_core::emit;
use floe_core::metrics::events::ObjectsRelocated;
use floe_core::snapshot::{SnapshotKey, SnapshotPrefix};
use floe_core::{StorageError, StorageProviderRef};

pub struct Relocator {
    storage: StorageProviderRef,
    target: SnapshotPrefix,
}

impl Relocator {
    pub fn new(storage: StorageProviderRef, target: SnapshotPrefix) -> Self {
        Self { storage, target }
    }

    /// Destination of `key` under the relocation prefix, keeping the file name.
    pub fn destination(&self, key: &str) -> Option<String> {
        SnapshotKey::parse(key)
            .filter(|k| k.prefix == SnapshotPrefix::Updated)
            .map(|k| k.with_prefix(self.target).to_string())
    }

    /// Copy each key to its destination, then delete the original.
    ///
    /// Keys that are not `updated/` snapshots, or that are already gone, are
    /// left alone. Returns the keys that were moved.
    pub async fn relocate(&self, keys: &[String]) -> Result<Vec<String>, StorageError> {
        let mut moved = Vec::new();
        for key in keys {
            let Some(destination) = self.destination(key) else {
                continue;
            };
            match self.storage.copy(key, &destination).await {
                Ok(()) => {}
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err),
            }
            self.storage.delete(key).await?;
            info!(from = %key, to = %destination, "Relocated snapshot");
            moved.push(key.clone());
        }

        emit!(ObjectsRelocated {
            count: moved.len() as u64,
        });
        Ok(moved)
    }
}
