//! Lookup of handlers by type tag.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use crate::{Error, ErrorKind, Result};

type AllowFn<K> = Arc<dyn Fn(K) -> bool + Send + Sync>;

/// Fixed registry mapping a type tag to its handler.
///
/// Built once at startup from every handler the process ships with. An
/// optional allow-list predicate hides handlers that are registered but not
/// enabled (for example destinations outside the current edition).
pub struct TypeResolver<K, V> {
    handlers: HashMap<K, V>,
    allow: AllowFn<K>,
}

impl<K, V> TypeResolver<K, V>
where
    K: Copy + Eq + Hash + fmt::Display,
{
    /// Creates a resolver that allows every registered handler.
    pub fn new(handlers: impl IntoIterator<Item = (K, V)>) -> Self {
        Self {
            handlers: handlers.into_iter().collect(),
            allow: Arc::new(|_| true),
        }
    }

    /// Restricts resolution to tags accepted by `allow`.
    #[must_use]
    pub fn with_filter(mut self, allow: impl Fn(K) -> bool + Send + Sync + 'static) -> Self {
        self.allow = Arc::new(allow);
        self
    }

    /// Returns the handler registered for `key`.
    ///
    /// Fails with `UnsupportedType` if no handler is registered or the
    /// allow-list rejects the tag.
    pub fn resolve(&self, key: K) -> Result<&V> {
        self.handlers
            .get(&key)
            .filter(|_| (self.allow)(key))
            .ok_or_else(|| {
                Error::new(ErrorKind::UnsupportedType)
                    .with_message(format!("No handler for type {key}"))
            })
    }

    /// Returns whether `key` resolves.
    pub fn contains(&self, key: K) -> bool {
        self.resolve(key).is_ok()
    }

    /// Returns the resolvable tags.
    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        self.handlers.keys().copied().filter(|key| (self.allow)(*key))
    }
}

impl<K, V> Clone for TypeResolver<K, V>
where
    K: Clone,
    V: Clone,
{
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
            allow: Arc::clone(&self.allow),
        }
    }
}

impl<K: fmt::Debug, V> fmt::Debug for TypeResolver<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeResolver")
            .field("types", &self.handlers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use martex_postgres::types::DestinationType;

    use super::*;

    fn resolver() -> TypeResolver<DestinationType, &'static str> {
        TypeResolver::new([
            (DestinationType::GoogleSheets, "sheets"),
            (DestinationType::Slack, "slack"),
        ])
    }

    #[test]
    fn test_resolve_registered() {
        let resolver = resolver();
        assert_eq!(*resolver.resolve(DestinationType::Slack).unwrap(), "slack");
        assert!(resolver.contains(DestinationType::GoogleSheets));
    }

    #[test]
    fn test_resolve_missing() {
        let error = resolver().resolve(DestinationType::Email).unwrap_err();
        assert_eq!(error.kind, ErrorKind::UnsupportedType);
        assert!(error.to_string().contains("EMAIL"));
    }

    #[test]
    fn test_allow_list_hides_handler() {
        let resolver = resolver().with_filter(|destination_type: DestinationType| {
            !destination_type.is_messaging()
        });

        assert!(resolver.contains(DestinationType::GoogleSheets));
        let error = resolver.resolve(DestinationType::Slack).unwrap_err();
        assert_eq!(error.kind, ErrorKind::UnsupportedType);
        assert_eq!(resolver.keys().collect::<Vec<_>>(), [DestinationType::GoogleSheets]);
    }
}
