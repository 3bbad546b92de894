// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Key-value stores handed to plugins.
//!
//! `SessionState` lives inside one exchange and is dropped with it.
//! `GlobalState` lives for the whole process and is the only channel plugins
//! have for sharing artifacts across exchanges.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Per-exchange scratch space. Owned by the exchange, never shared.
#[derive(Debug, Default, Clone)]
pub struct SessionState {
    values: HashMap<String, Value>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.values.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Thread-safe, process-lifetime store. Cloning shares the same map.
#[derive(Debug, Clone, Default)]
pub struct GlobalState {
    store: Arc<RwLock<HashMap<String, Value>>>,
}

impl GlobalState {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Value>> {
        self.store.read().unwrap_or_else(|poisoned| {
            tracing::warn!("GlobalState lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Value>> {
        self.store.write().unwrap_or_else(|poisoned| {
            tracing::warn!("GlobalState lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.write().insert(key.into(), value)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.write().remove(key)
    }

    /// Read-modify-write a single key under one write lock.
    ///
    /// `f` receives the current value (if any) and returns the new one;
    /// returning `None` removes the key. A panic in `f` leaves the map as it
    /// was before the call.
    pub fn update<F>(&self, key: &str, f: F) -> Option<Value>
    where
        F: FnOnce(Option<&Value>) -> Option<Value>,
    {
        let mut store = self.write();
        match f(store.get(key)) {
            Some(v) => {
                store.insert(key.to_string(), v.clone());
                Some(v)
            }
            None => {
                store.remove(key);
                None
            }
        }
    }

    /// Sorted snapshot of all keys.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}
