//! Keyed async mutexes. A conversation turn and a scheduler job touching the
//! same phone serialize on `phone:<digits>`; a turn additionally holds
//! `conversation:<id>` so two events of one conversation never interleave.
//! Lock order is always conversation before phone.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

const PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Default)]
pub struct KeyedLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if map.len() > PRUNE_THRESHOLD {
                // Entries only referenced by the map are idle.
                map.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            map.entry(key.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

pub fn phone_key(phone: &str) -> String {
    format!("phone:{phone}")
}

pub fn conversation_key(conversation_id: &str) -> String {
    format!("conversation:{conversation_id}")
}
