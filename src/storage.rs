//! Session-scoped key/value storage.
//!
//! Holds the values that live exactly as long as one player session: the
//! bearer token and the local device id. Nothing is written to disk; a reset
//! or logout clears everything.
//!
//! The storage is cheaply cloneable and all clones share the same contents,
//! so the token provider, the API client and the session driver can each
//! hold one.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

/// Key under which the bearer token is stored.
pub const ACCESS_TOKEN: &str = "accessToken";

/// Key under which the local device id is stored.
pub const LOCAL_DEVICE_ID: &str = "localDeviceId";

#[derive(Clone, Debug, Default)]
pub struct SessionStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl SessionStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.lock().insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.lock().remove(key)
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // The map holds plain strings; a panic mid-insert cannot leave it in
        // a state worth refusing to read.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
