//! Process-local key store with the same contract as etcd.
//!
//! Used by tests and in-process clusters. Every mutation bumps a global
//! index and is appended to an event log that `wait` replays.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::{KeyStore, RegistryError, StoreNode};

#[derive(Default)]
struct State {
    index: u64,
    /// key → (value, modified index)
    entries: BTreeMap<String, (String, u64)>,
    /// (index, key) of every mutation, oldest first.
    events: Vec<(u64, String)>,
}

pub struct MemoryStore {
    state: Mutex<State>,
    changed: watch::Sender<u64>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            state: Mutex::new(State::default()),
            changed,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the store going down (or coming back).
    ///
    /// Waits already blocked are not interrupted.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Index of the most recent mutation.
    pub fn index(&self) -> u64 {
        self.state.lock().index
    }

    fn check_available(&self) -> Result<(), RegistryError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RegistryError::Unavailable("memory store offline".into()))
        }
    }

    fn record(&self, state: &mut State, key: &str) -> u64 {
        state.index += 1;
        let index = state.index;
        state.events.push((index, key.to_string()));
        self.changed.send_replace(index);
        index
    }
}

fn normalize(key: &str) -> String {
    format!("/{}", key.trim_matches('/'))
}

fn is_under(candidate: &str, key: &str) -> bool {
    candidate == key
        || candidate
            .strip_prefix(key)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn node_at(entries: &BTreeMap<String, (String, u64)>, key: &str) -> Option<StoreNode> {
    if let Some((value, index)) = entries.get(key) {
        return Some(StoreNode::leaf(key, value.clone(), *index));
    }

    let prefix = format!("{key}/");
    let children: BTreeSet<String> = entries
        .range(prefix.clone()..)
        .take_while(|(k, _)| k.starts_with(&prefix))
        .filter_map(|(k, _)| k[prefix.len()..].split('/').next())
        .map(|child| format!("{prefix}{child}"))
        .collect();

    if children.is_empty() {
        return None;
    }

    Some(StoreNode {
        key: key.to_string(),
        value: None,
        dir: true,
        nodes: children
            .iter()
            .filter_map(|child| node_at(entries, child))
            .collect(),
        modified_index: 0,
    })
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn set(&self, key: &str, value: &str) -> Result<(), RegistryError> {
        self.check_available()?;
        let key = normalize(key);
        let mut state = self.state.lock();
        let index = state.index + 1;
        state.entries.insert(key.clone(), (value.to_string(), index));
        self.record(&mut state, &key);
        Ok(())
    }

    async fn delete(&self, key: &str, recursive: bool) -> Result<(), RegistryError> {
        self.check_available()?;
        let key = normalize(key);
        let mut state = self.state.lock();

        let doomed: Vec<String> = state
            .entries
            .keys()
            .filter(|k| if recursive { is_under(k, &key) } else { **k == key })
            .cloned()
            .collect();
        if doomed.is_empty() {
            return Err(RegistryError::KeyNotFound(key));
        }
        for k in &doomed {
            state.entries.remove(k);
        }
        self.record(&mut state, &key);
        Ok(())
    }

    async fn get(&self, key: &str, _recursive: bool) -> Result<StoreNode, RegistryError> {
        self.check_available()?;
        let key = normalize(key);
        let state = self.state.lock();
        node_at(&state.entries, &key).ok_or(RegistryError::KeyNotFound(key))
    }

    async fn wait(&self, key: &str, after_index: Option<u64>) -> Result<u64, RegistryError> {
        self.check_available()?;
        let key = normalize(key);
        let mut rx = self.changed.subscribe();
        let after = after_index.unwrap_or_else(|| self.index());

        loop {
            let found = {
                let state = self.state.lock();
                state
                    .events
                    .iter()
                    .find(|(index, k)| *index > after && (is_under(k, &key) || is_under(&key, k)))
                    .map(|(index, _)| *index)
            };
            if let Some(index) = found {
                return Ok(index);
            }
            rx.changed()
                .await
                .map_err(|_| RegistryError::Unavailable("memory store closed".into()))?;
        }
    }

    async fn current_index(&self) -> Result<u64, RegistryError> {
        self.check_available()?;
        Ok(self.index())
    }
}
