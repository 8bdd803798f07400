//! In-memory index of containers by id and name.

use std::collections::{HashMap, HashSet, VecDeque};

use parking_lot::RwLock;

use dockhand_shared::errors::{DockhandError, DockhandResult};

use super::handle::SharedHandle;
use crate::runtime::types::ContainerId;
use crate::util::find_by_prefix;

/// How many removed ids are remembered.
const REMOVED_IDS_CAPACITY: usize = 1024;

/// Most recently removed ids, oldest evicted first.
struct RemovedIds {
    capacity: usize,
    order: VecDeque<ContainerId>,
    ids: HashSet<ContainerId>,
}

impl RemovedIds {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            ids: HashSet::new(),
        }
    }

    fn insert(&mut self, id: ContainerId) {
        if self.capacity == 0 || !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    fn remove(&mut self, id: &ContainerId) {
        if self.ids.remove(id) {
            self.order.retain(|other| other != id);
        }
    }

    fn contains(&self, id: &ContainerId) -> bool {
        self.ids.contains(id)
    }
}

impl Default for RemovedIds {
    fn default() -> Self {
        Self::with_capacity(REMOVED_IDS_CAPACITY)
    }
}

#[derive(Default)]
struct RegistryState {
    by_id: HashMap<ContainerId, SharedHandle>,
    names: HashMap<String, ContainerId>,
    removed: RemovedIds,
}

#[derive(Default)]
pub(crate) struct ContainerRegistry {
    state: RwLock<RegistryState>,
}

fn normalize_name(name: &str) -> &str {
    name.strip_prefix('/').unwrap_or(name)
}

impl ContainerRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Claim `name` for `id`.
    pub(crate) fn reserve_name(&self, name: &str, id: &ContainerId) -> DockhandResult<()> {
        let name = normalize_name(name);
        let mut state = self.state.write();
        match state.names.get(name) {
            Some(owner) if owner == id => Ok(()),
            Some(owner) => Err(DockhandError::Conflict(format!(
                "The container name \"/{}\" is already in use by container \"{}\". \
                 You have to remove (or rename) that container to be able to reuse that name.",
                name, owner
            ))),
            None => {
                state.names.insert(name.to_string(), id.clone());
                Ok(())
            }
        }
    }

    pub(crate) fn release_name(&self, name: &str) {
        self.state.write().names.remove(normalize_name(name));
    }

    pub(crate) fn name_in_use(&self, name: &str) -> bool {
        self.state.read().names.contains_key(normalize_name(name))
    }

    pub(crate) fn add(&self, handle: SharedHandle) {
        let mut state = self.state.write();
        state.removed.remove(handle.id());
        state.by_id.insert(handle.id().clone(), handle);
    }

    /// Drop the container and its name; remember the id as removed.
    pub(crate) fn remove(&self, id: &ContainerId) -> Option<SharedHandle> {
        let mut state = self.state.write();
        let handle = state.by_id.remove(id)?;
        state.names.retain(|_, owner| owner != id);
        state.removed.insert(id.clone());
        Some(handle)
    }

    /// Whether `id` names a container removed earlier.
    pub(crate) fn was_removed(&self, id: &str) -> bool {
        ContainerId::parse(id).is_some_and(|id| self.state.read().removed.contains(&id))
    }

    /// Resolve a full id, a name (with or without the leading slash) or an
    /// unambiguous id prefix.
    pub(crate) fn get(&self, key: &str) -> DockhandResult<SharedHandle> {
        let state = self.state.read();

        if let Some(id) = ContainerId::parse(key)
            && let Some(handle) = state.by_id.get(&id)
        {
            return Ok(handle.clone());
        }

        if let Some(id) = state.names.get(normalize_name(key))
            && let Some(handle) = state.by_id.get(id)
        {
            return Ok(handle.clone());
        }

        let not_found = || DockhandError::NotFound(format!("No such container: {}", key));
        if key.is_empty() {
            return Err(not_found());
        }
        let matched = find_by_prefix(key, state.by_id.keys().map(|id| id.as_str()))?;
        matched
            .and_then(|id| ContainerId::parse(&id))
            .and_then(|id| state.by_id.get(&id).cloned())
            .ok_or_else(not_found)
    }

    pub(crate) fn list(&self) -> Vec<SharedHandle> {
        self.state.read().by_id.values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.state.read().by_id.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{Container, ContainerConfig, ContainerHandle, HostConfig};
    use crate::digest::Digest;

    fn add(registry: &ContainerRegistry, name: &str) -> SharedHandle {
        let container = Container::new(
            ContainerId::new(),
            name.into(),
            Digest::from_bytes(b"img"),
            ContainerConfig::new("busybox"),
            HostConfig::default(),
        );
        registry.reserve_name(name, &container.id).unwrap();
        let handle = ContainerHandle::new(container, None);
        registry.add(handle.clone());
        handle
    }

    #[test]
    fn test_lookup_by_id_name_and_prefix() {
        let registry = ContainerRegistry::new();
        let handle = add(&registry, "web");
        let id = handle.id().as_str().to_string();

        assert_eq!(registry.get(&id).unwrap().id(), handle.id());
        assert_eq!(registry.get("web").unwrap().id(), handle.id());
        assert_eq!(registry.get("/web").unwrap().id(), handle.id());
        assert_eq!(registry.get(&id[..8]).unwrap().id(), handle.id());
        assert!(registry.get("nope").unwrap_err().is_not_found());
        assert!(registry.get("").unwrap_err().is_not_found());
    }

    #[test]
    fn test_name_conflict() {
        let registry = ContainerRegistry::new();
        add(&registry, "web");
        let err = registry.reserve_name("/web", &ContainerId::new()).unwrap_err();
        assert!(matches!(err, DockhandError::Conflict(_)));
        assert!(err.to_string().contains("already in use"));
    }

    #[test]
    fn test_remove_frees_name_and_remembers_id() {
        let registry = ContainerRegistry::new();
        let handle = add(&registry, "web");
        let id = handle.id().clone();

        assert!(registry.remove(&id).is_some());
        assert!(registry.remove(&id).is_none());
        assert!(!registry.name_in_use("web"));
        assert!(registry.was_removed(id.as_str()));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_removed_ids_evict_oldest_past_capacity() {
        let mut removed = RemovedIds::with_capacity(2);
        let ids: Vec<ContainerId> = (0..3).map(|_| ContainerId::new()).collect();
        for id in &ids {
            removed.insert(id.clone());
        }
        removed.insert(ids[2].clone());

        assert!(!removed.contains(&ids[0]));
        assert!(removed.contains(&ids[1]));
        assert!(removed.contains(&ids[2]));
        assert_eq!(removed.order.len(), 2);

        removed.remove(&ids[1]);
        assert!(!removed.contains(&ids[1]));
        assert_eq!(removed.order.len(), 1);
    }

    #[test]
    fn test_removed_ids_capacity_is_bounded() {
        let registry = ContainerRegistry::new();
        let first = add(&registry, "first").id().clone();
        registry.remove(&first);
        for i in 0..REMOVED_IDS_CAPACITY {
            let id = add(&registry, &format!("c{i}")).id().clone();
            registry.remove(&id);
        }

        assert!(!registry.was_removed(first.as_str()));
        assert_eq!(registry.state.read().removed.ids.len(), REMOVED_IDS_CAPACITY);
    }
}
