//! Lock-protected store for the set of force-rotation packages.
//!
//! The set is replaced wholesale by each completed refresh. Readers only ever
//! see membership answers or a copied snapshot, never the set itself.

use rotation_core::{AllowList, RotationError, RotationResult};
use rotation_provider::ConfigSource;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;

pub struct AllowListStore {
    source: Arc<dyn ConfigSource>,
    packages: RwLock<AllowList>,
    cancel: CancellationToken,
}

impl AllowListStore {
    /// Empty store. `cancel` is the owning service's stop token.
    pub fn new(source: Arc<dyn ConfigSource>, cancel: CancellationToken) -> Self {
        Self {
            source,
            packages: RwLock::new(AllowList::new()),
            cancel,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, AllowList> {
        self.packages.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, AllowList> {
        self.packages.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetches the effective set and swaps it in. Returns the new size.
    ///
    /// On fetch failure the current set is left untouched. Once the store is
    /// closed, a fetch that completes is discarded with
    /// [`RotationError::Cancelled`]. Concurrent refreshes race; whichever
    /// completes last wins, but a stored set always comes from one fetch.
    pub async fn refresh(&self) -> RotationResult<usize> {
        if self.cancel.is_cancelled() {
            return Err(RotationError::Cancelled);
        }

        let fetched = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(RotationError::Cancelled),
            result = self.source.fetch_effective_packages() => result?,
        };

        let mut packages = self.write();
        // Checked under the write lock so close() cannot interleave.
        if self.cancel.is_cancelled() {
            tracing::debug!("store closed during fetch; discarding result");
            return Err(RotationError::Cancelled);
        }

        tracing::debug!(packages = ?fetched.sorted(), "allow-list refreshed");
        let count = fetched.len();
        *packages = fetched;
        Ok(count)
    }

    /// Membership against the most recently completed refresh. Never does I/O.
    pub fn contains(&self, pkg: &str) -> bool {
        self.read().contains(pkg)
    }

    pub fn snapshot(&self) -> AllowList {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Cancels in-flight refreshes and drops the set. No refresh can write
    /// once this returns.
    pub fn close(&self) {
        self.cancel.cancel();
        *self.write() = AllowList::new();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
