mod rpc;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use storage::repository::MinisterDirectory;
use trust_core::model::{MinisterStatus, UserId};

pub use rpc::{RpcMinisterConfig, RpcMinisterDirectory};

/// Read-through cache over a `MinisterDirectory`.
///
/// Failed lookups are not cached and resolve to `MinisterStatus::unverified()`.
pub struct MinisterStatusService {
    directory: Arc<dyn MinisterDirectory>,
    cache: Mutex<HashMap<UserId, MinisterStatus>>,
}

impl MinisterStatusService {
    #[must_use]
    pub fn new(directory: Arc<dyn MinisterDirectory>) -> Self {
        Self {
            directory,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Minister status for `user_id`, from cache when present.
    pub async fn status(&self, user_id: UserId) -> MinisterStatus {
        if let Some(hit) = self.cached(user_id) {
            return hit;
        }

        match self.directory.minister_status(user_id).await {
            Ok(found) => {
                let status = found.unwrap_or_else(MinisterStatus::unverified);
                self.cache
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(user_id, status.clone());
                status
            }
            Err(err) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %err,
                    "minister lookup failed; treating user as unverified"
                );
                MinisterStatus::unverified()
            }
        }
    }

    /// Drops the cached entry so the next call hits the directory.
    pub fn invalidate(&self, user_id: UserId) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&user_id);
    }

    fn cached(&self, user_id: UserId) -> Option<MinisterStatus> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user_id)
            .cloned()
    }
}
