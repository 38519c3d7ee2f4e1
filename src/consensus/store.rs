use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::instance::PaxosInstance;
use super::message::InstanceId;

/// Registry of running agreement instances.
#[derive(Default)]
pub struct Store {
    instances: RwLock<HashMap<InstanceId, Arc<PaxosInstance>>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &InstanceId) -> Option<Arc<PaxosInstance>> {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Returns the instance, creating it with `create` if it does not exist.
    /// The boolean reports whether it was created by this call.
    pub fn get_or_insert_with(
        &self,
        id: &InstanceId,
        create: impl FnOnce() -> PaxosInstance,
    ) -> (Arc<PaxosInstance>, bool) {
        if let Some(instance) = self.get(id) {
            return (instance, false);
        }
        let mut instances = self.instances.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(instance) = instances.get(id) {
            return (instance.clone(), false);
        }
        let instance = Arc::new(create());
        instances.insert(id.clone(), instance.clone());
        (instance, true)
    }

    pub fn remove(&self, id: &InstanceId) -> Option<Arc<PaxosInstance>> {
        self.instances
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    pub fn len(&self) -> usize {
        self.instances.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::execution::NoTimers;
    use crate::consensus::message::ParticipantId;
    use crate::consensus::peers::Peers;

    fn create(id: &str) -> PaxosInstance {
        PaxosInstance::new(id.into(), Peers::new([ParticipantId::from("a")]), &NoTimers)
    }

    #[test]
    fn test_get_or_insert() {
        let store = Store::new();
        let id = InstanceId::from("epoch-1");

        let (first, created) = store.get_or_insert_with(&id, || create("epoch-1"));
        assert!(created);
        let (second, created) = store.get_or_insert_with(&id, || panic!("must not create twice"));
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove() {
        let store = Store::new();
        let id = InstanceId::from("epoch-1");
        store.get_or_insert_with(&id, || create("epoch-1"));

        assert!(store.remove(&id).is_some());
        assert!(store.get(&id).is_none());
        assert!(store.is_empty());
    }
}
