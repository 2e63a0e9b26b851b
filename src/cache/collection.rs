use std::collections::{BTreeMap, HashMap};

/// Keyed collection of entities which iterates in insertion order.
///
/// Replacing an entity keeps its original position, deleting and re-inserting moves it to the end.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection<T> {
    entries: HashMap<String, (u64, T)>,
    order: BTreeMap<u64, String>,
    next_position: u64,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_position: 0,
        }
    }
}

impl<T> Collection<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.entries.get(id).map(|(_, value)| value)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut T> {
        self.entries.get_mut(id).map(|(_, value)| value)
    }

    /// Inserts or replaces the entity stored under `id`, returning the replaced one.
    pub fn set(&mut self, id: impl Into<String>, value: T) -> Option<T> {
        let id = id.into();
        if let Some((_, existing)) = self.entries.get_mut(&id) {
            return Some(std::mem::replace(existing, value));
        }

        let position = self.next_position;
        self.next_position += 1;
        self.order.insert(position, id.clone());
        self.entries.insert(id, (position, value));
        None
    }

    /// The entity stored under `id`, inserting the result of `create` when there is none.
    pub fn get_or_insert_with(&mut self, id: impl Into<String>, create: impl FnOnce() -> T) -> &mut T {
        let next_position = &mut self.next_position;
        let order = &mut self.order;
        let (_, value) = self.entries.entry(id.into()).or_insert_with_key(|id| {
            let position = *next_position;
            *next_position += 1;
            order.insert(position, id.clone());
            (position, create())
        });
        value
    }

    pub fn delete(&mut self, id: &str) -> Option<T> {
        let (position, value) = self.entries.remove(id)?;
        self.order.remove(&position);
        Some(value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> + '_ {
        self.order.values().filter_map(move |id| {
            self.entries.get(id).map(|(_, value)| (id.as_str(), value))
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.order.values().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &T> + '_ {
        self.iter().map(|(_, value)| value)
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> + '_ {
        self.entries.values_mut().map(|(_, value)| value)
    }

    pub fn first(&self) -> Option<&T> {
        self.values().next()
    }

    /// First entity in insertion order matching the predicate.
    pub fn find(&self, mut predicate: impl FnMut(&T) -> bool) -> Option<&T> {
        self.values().find(|value| predicate(*value))
    }

    /// Removes every entity the predicate rejects, returning how many were removed.
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &T) -> bool) -> usize {
        let doomed: Vec<String> = self.iter()
            .filter(|(id, value)| !keep(*id, *value))
            .map(|(id, _)| id.to_owned())
            .collect();

        for id in &doomed {
            self.delete(id);
        }
        doomed.len()
    }
}

/// Ordered set of ids scoping a global [`Collection`] to one owner, e.g. a guild's channels.
///
/// The entities themselves stay in the global collection; [`crate::cache::Cache`] keeps both sides in sync.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    ids: Collection<()>,
}

impl Scope {
    pub fn insert(&mut self, id: impl Into<String>) {
        self.ids.set(id, ());
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.ids.delete(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.has(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.ids.keys()
    }

    /// Resolves the scoped ids against the global collection.
    pub fn resolve<'a, T>(&'a self, global: &'a Collection<T>) -> impl Iterator<Item = &'a T> + 'a {
        self.ids().filter_map(move |id| global.get(id))
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iterates_in_insertion_order() {
        let mut collection = Collection::new();
        collection.set("b", 1);
        collection.set("a", 2);
        collection.set("c", 3);
        assert_eq!(collection.keys().collect::<Vec<_>>(), ["b", "a", "c"]);
    }

    #[test]
    fn replacing_keeps_position() {
        let mut collection = Collection::new();
        collection.set("a", 1);
        collection.set("b", 2);
        assert_eq!(collection.set("a", 10), Some(1));
        assert_eq!(collection.values().copied().collect::<Vec<_>>(), [10, 2]);
        assert_eq!(collection.len(), 2);
    }

    #[test]
    fn delete_and_reinsert_moves_to_the_end() {
        let mut collection = Collection::new();
        collection.set("a", 1);
        collection.set("b", 2);
        assert_eq!(collection.delete("a"), Some(1));
        assert_eq!(collection.delete("a"), None);
        collection.set("a", 3);
        assert_eq!(collection.keys().collect::<Vec<_>>(), ["b", "a"]);
    }

    #[test]
    fn find_and_retain() {
        let mut collection = Collection::new();
        for (id, value) in [("1", 5), ("2", 8), ("3", 13)] {
            collection.set(id, value);
        }
        assert_eq!(collection.find(|value| *value > 6), Some(&8));
        assert_eq!(collection.retain(|_, value| value % 2 == 1), 1);
        assert_eq!(collection.keys().collect::<Vec<_>>(), ["1", "3"]);
    }

    #[test]
    fn scope_resolves_against_global() {
        let mut global = Collection::new();
        global.set("1", "general");
        global.set("2", "random");
        let mut scope = Scope::default();
        scope.insert("2");
        scope.insert("3");
        assert_eq!(scope.resolve(&global).collect::<Vec<_>>(), [&"random"]);
    }
}
