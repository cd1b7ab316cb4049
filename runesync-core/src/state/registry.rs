//! Process-wide lookup of collections by component id.

use dashmap::DashMap;

use super::collection::StateCollection;

/// Concurrent map from component id to its collection.
#[derive(Debug, Default)]
pub struct StateRegistry {
    collections: DashMap<String, StateCollection>,
}

impl StateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the collection for `component_id`, creating it if needed.
    pub fn get_or_create(&self, component_id: &str) -> StateCollection {
        self.collections
            .entry(component_id.to_string())
            .or_insert_with(|| StateCollection::new(component_id))
            .clone()
    }

    pub fn get(&self, component_id: &str) -> Option<StateCollection> {
        self.collections.get(component_id).map(|entry| entry.clone())
    }

    pub fn insert(&self, collection: StateCollection) -> Option<StateCollection> {
        self.collections
            .insert(collection.component_id().to_string(), collection)
    }

    pub fn remove(&self, component_id: &str) -> Option<StateCollection> {
        self.collections.remove(component_id).map(|(_, collection)| collection)
    }

    pub fn component_ids(&self) -> Vec<String> {
        self.collections.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}
