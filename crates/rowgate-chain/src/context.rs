//! Request-scoped state shared by a chain and every nested chain it spawns

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use tracing::debug;

/// Typed handle to a context entry
pub struct ContextKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ContextKey<T> {}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextKey({})", self.name)
    }
}

/// Mutable bag owned by the root invocation.
///
/// Entries inserted with [`ChainContext::insert_scoped`] are removed by
/// [`ChainContext::teardown`], which the root chain runs when it finishes,
/// successful or not.
#[derive(Default)]
pub struct ChainContext {
    entries: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
    scoped: HashSet<&'static str>,
}

impl ChainContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T: Any + Send + Sync>(&self, key: &ContextKey<T>) -> Option<&T> {
        self.entries.get(key.name).and_then(|v| v.downcast_ref())
    }

    pub fn get_mut<T: Any + Send + Sync>(&mut self, key: &ContextKey<T>) -> Option<&mut T> {
        self.entries.get_mut(key.name).and_then(|v| v.downcast_mut())
    }

    pub fn contains<T>(&self, key: &ContextKey<T>) -> bool {
        self.entries.contains_key(key.name)
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, key: &ContextKey<T>, value: T) -> Option<T> {
        self.entries
            .insert(key.name, Box::new(value))
            .and_then(|old| old.downcast().ok())
            .map(|old| *old)
    }

    /// Insert an entry that lives until the root invocation completes
    pub fn insert_scoped<T: Any + Send + Sync>(&mut self, key: &ContextKey<T>, value: T) -> Option<T> {
        self.scoped.insert(key.name);
        self.insert(key, value)
    }

    pub fn remove<T: Any + Send + Sync>(&mut self, key: &ContextKey<T>) -> Option<T> {
        self.scoped.remove(key.name);
        self.entries
            .remove(key.name)
            .and_then(|v| v.downcast().ok())
            .map(|v| *v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every scoped entry
    pub fn teardown(&mut self) {
        for name in self.scoped.drain() {
            if self.entries.remove(name).is_some() {
                debug!("Removed scoped context entry '{}'", name);
            }
        }
    }
}

impl fmt::Debug for ChainContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.entries.keys().collect();
        names.sort();
        f.debug_struct("ChainContext")
            .field("entries", &names)
            .field("scoped", &self.scoped.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COUNTER: ContextKey<u32> = ContextKey::new("counter");
    const NAMES: ContextKey<Vec<String>> = ContextKey::new("names");

    #[test]
    fn test_typed_entries() {
        let mut context = ChainContext::new();
        assert!(context.insert(&COUNTER, 1).is_none());
        *context.get_mut(&COUNTER).unwrap() += 1;
        assert_eq!(context.get(&COUNTER), Some(&2));
        assert_eq!(context.insert(&COUNTER, 7), Some(2));
        assert_eq!(context.remove(&COUNTER), Some(7));
        assert!(context.is_empty());
    }

    #[test]
    fn test_mismatched_type_is_absent() {
        let mut context = ChainContext::new();
        context.insert(&COUNTER, 3);
        let alias: ContextKey<String> = ContextKey::new("counter");
        assert!(context.get(&alias).is_none());
        assert!(context.contains(&alias));
    }

    #[test]
    fn test_teardown_only_drops_scoped_entries() {
        let mut context = ChainContext::new();
        context.insert(&COUNTER, 1);
        context.insert_scoped(&NAMES, vec!["a".to_string()]);
        assert_eq!(context.len(), 2);

        context.teardown();
        assert!(!context.contains(&NAMES));
        assert_eq!(context.get(&COUNTER), Some(&1));
    }
}
