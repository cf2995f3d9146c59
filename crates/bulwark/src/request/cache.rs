// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::any::Any;
use std::collections::HashMap;

use parking_lot::Mutex;

use crate::CommandKey;

type Entry = Box<dyn Any + Send + Sync>;

/// Request-scoped de-duplication of command results.
///
/// Entries are keyed by command key and a caller-supplied string. The value type is erased so a
/// single cache can serve commands with different outputs; a lookup with the wrong type behaves
/// like a miss.
#[derive(Default)]
pub(crate) struct RequestCache {
    entries: Mutex<HashMap<(CommandKey, String), Entry>>,
}

impl std::fmt::Debug for RequestCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCache")
            .field("len", &self.entries.lock().len())
            .finish()
    }
}

/// The outcome of [`RequestCache::get_or_publish`].
#[derive(Debug)]
pub(crate) enum Lookup<T> {
    /// Another command already published a value.
    Hit(T),
    /// The value produced by `publish` was stored and later lookups will see it.
    Published,
    /// An entry exists under the key but holds a different type. Nothing was published.
    Conflict,
}

impl RequestCache {
    /// Returns the entry under `key`, or publishes the value produced by `publish`.
    ///
    /// Lookup and publication happen under one lock, so exactly one caller publishes.
    pub(crate) fn get_or_publish<T>(&self, command_key: &CommandKey, cache_key: &str, publish: impl FnOnce() -> T) -> Lookup<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut entries = self.entries.lock();

        if let Some(existing) = entries.get(&(command_key.clone(), cache_key.to_string())) {
            return existing
                .downcast_ref::<T>()
                .map_or(Lookup::Conflict, |value| Lookup::Hit(value.clone()));
        }

        entries.insert((command_key.clone(), cache_key.to_string()), Box::new(publish()));
        Lookup::Published
    }

    pub(crate) fn remove(&self, command_key: &CommandKey, cache_key: &str) -> bool {
        self.entries
            .lock()
            .remove(&(command_key.clone(), cache_key.to_string()))
            .is_some()
    }

    /// Removes the entry under the key only while `matches` accepts it, so a caller holding a stale
    /// entry never evicts one published after it.
    pub(crate) fn remove_if<T>(&self, command_key: &CommandKey, cache_key: &str, matches: impl FnOnce(&T) -> bool) -> bool
    where
        T: 'static,
    {
        let mut entries = self.entries.lock();
        let key = (command_key.clone(), cache_key.to_string());

        let current = entries
            .get(&key)
            .and_then(|entry| entry.downcast_ref::<T>())
            .is_some_and(matches);

        if current {
            // Dropped after the lock is released.
            let removed = entries.remove(&key);
            drop(entries);
            drop(removed);
        }

        current
    }

    pub(crate) fn clear(&self) {
        // Entries are dropped outside the lock.
        let entries = std::mem::take(&mut *self.entries.lock());
        drop(entries);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
