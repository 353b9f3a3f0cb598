//! Watch-synchronized local cache of Cluster objects.
//!
//! The cache is the controller's read path: reconcile workers and health
//! probes always consult it instead of the API. It is fed by
//! `kube::runtime::watcher` events and reports each mutation back to the
//! caller as a [`CacheDelta`] so the controller shell can drive its event
//! handlers. `wait_until_synced` is the barrier the shell blocks on before
//! starting workers; it opens once the first full relist has been applied.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use kube::runtime::watcher;
use kube::ResourceExt;
use tokio::sync::watch;

use crate::crd::Cluster;

/// A single cache mutation, paired with the state it replaced.
pub enum CacheDelta {
    Added(Arc<Cluster>),
    Updated {
        old: Arc<Cluster>,
        new: Arc<Cluster>,
    },
    Removed(Arc<Cluster>),
}

pub struct ClusterCache {
    store: RwLock<HashMap<String, Arc<Cluster>>>,
    synced: watch::Sender<bool>,
}

impl Default for ClusterCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterCache {
    pub fn new() -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            store: RwLock::new(HashMap::new()),
            synced,
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Cluster>> {
        self.store.read().unwrap().get(name).cloned()
    }

    pub fn list(&self) -> Vec<Arc<Cluster>> {
        self.store.read().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.store.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.read().unwrap().is_empty()
    }

    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Block until the first full relist has been applied.
    pub async fn wait_until_synced(&self) {
        let mut rx = self.synced.subscribe();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Apply one watch event and report the resulting mutations.
    pub fn apply(&self, event: watcher::Event<Cluster>) -> Vec<CacheDelta> {
        let mut deltas = Vec::new();
        match event {
            watcher::Event::Applied(cluster) => {
                let key = cluster.name_any();
                let cluster = Arc::new(cluster);
                let old = self
                    .store
                    .write()
                    .unwrap()
                    .insert(key, Arc::clone(&cluster));
                deltas.push(match old {
                    Some(old) => CacheDelta::Updated { old, new: cluster },
                    None => CacheDelta::Added(cluster),
                });
            }
            watcher::Event::Deleted(cluster) => {
                let key = cluster.name_any();
                if let Some(old) = self.store.write().unwrap().remove(&key) {
                    deltas.push(CacheDelta::Removed(old));
                }
            }
            watcher::Event::Restarted(clusters) => {
                let mut replacement: HashMap<String, Arc<Cluster>> = clusters
                    .into_iter()
                    .map(|c| (c.name_any(), Arc::new(c)))
                    .collect();
                let mut store = self.store.write().unwrap();
                for (key, old) in store.drain() {
                    match replacement.remove(&key) {
                        Some(new) => deltas.push(CacheDelta::Updated { old, new }),
                        None => deltas.push(CacheDelta::Removed(old)),
                    }
                }
                for new in replacement.values() {
                    deltas.push(CacheDelta::Added(Arc::clone(new)));
                }
                store.extend(
                    deltas
                        .iter()
                        .filter_map(|delta| match delta {
                            CacheDelta::Added(c) | CacheDelta::Updated { new: c, .. } => {
                                Some((c.name_any(), Arc::clone(c)))
                            }
                            CacheDelta::Removed(_) => None,
                        }),
                );
                self.synced.send_replace(true);
            }
        }
        deltas
    }
}
