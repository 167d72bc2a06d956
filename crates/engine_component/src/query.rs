//! Mask-based entity queries and system access descriptors.
//!
//! A [`Query`] lists the component types an entity must have (`all`), may
//! have at least one of (`any`), and must not have (`none`). Resolving it
//! against a [`ComponentRegistry`] turns the lists into three [`BitSet`]s,
//! after which matching an entity mask is a few word-wise operations:
//!
//! ```text
//! mask ⊇ all  AND  (any = ∅ OR mask ∩ any ≠ ∅)  AND  mask ∩ none = ∅
//! ```
//!
//! An [`AccessDescriptor`] declares which component types a system reads and
//! writes, so the stage runner can tell which systems may share a batch.

use crate::bitset::BitSet;
use crate::component::{Component, ComponentKey};
use crate::registry::ComponentRegistry;

/// A declarative filter over entity component masks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    /// Types an entity must have.
    pub all: Vec<ComponentKey>,
    /// Types of which an entity must have at least one (ignored when empty).
    pub any: Vec<ComponentKey>,
    /// Types an entity must not have.
    pub none: Vec<ComponentKey>,
}

impl Query {
    /// Create an empty query, matching every entity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require component `T`.
    #[must_use]
    pub fn with<T: Component>(mut self) -> Self {
        self.all.push(T::key());
        self
    }

    /// Require at least one of the `any_of` components, `T` included.
    #[must_use]
    pub fn any_of<T: Component>(mut self) -> Self {
        self.any.push(T::key());
        self
    }

    /// Exclude entities having component `T`.
    #[must_use]
    pub fn without<T: Component>(mut self) -> Self {
        self.none.push(T::key());
        self
    }

    /// Resolve the key lists into masks against `registry`.
    ///
    /// Unregistered types never error. An unregistered type in any of the
    /// three lists makes that list's check fail, so the resolved query
    /// matches nothing.
    #[must_use]
    pub fn resolve(&self, registry: &ComponentRegistry) -> ResolvedQuery {
        ResolvedQuery {
            all: registry.try_mask(&self.all),
            any: registry.try_mask(&self.any),
            none: registry.try_mask(&self.none),
            any_is_empty: self.any.is_empty(),
            epoch: registry.epoch(),
        }
    }
}

/// A [`Query`] whose key lists have been turned into masks.
///
/// A `None` mask marks a list that referenced an unregistered type.
#[derive(Debug, Clone)]
pub struct ResolvedQuery {
    all: Option<BitSet>,
    any: Option<BitSet>,
    none: Option<BitSet>,
    any_is_empty: bool,
    epoch: u64,
}

impl ResolvedQuery {
    /// Returns `true` if an entity with component `mask` satisfies the query.
    #[must_use]
    pub fn matches(&self, mask: &BitSet) -> bool {
        let all = self.all.as_ref().is_some_and(|all| mask.contains_all(all));
        let any = self.any_is_empty || self.any.as_ref().is_some_and(|any| mask.contains_any(any));
        let none = self.none.as_ref().is_some_and(|none| mask.excludes_all(none));
        all && any && none
    }

    /// Returns `true` if the query can never match, because it referenced a
    /// type unknown to the registry it was resolved against.
    #[must_use]
    pub fn is_unsatisfiable(&self) -> bool {
        self.all.is_none() || (!self.any_is_empty && self.any.is_none()) || self.none.is_none()
    }

    /// Returns `true` if `registry` has been cleared since this query was
    /// resolved.
    #[must_use]
    pub fn is_stale(&self, registry: &ComponentRegistry) -> bool {
        self.epoch != registry.epoch()
    }
}

/// Describes the data access requirements of a system.
///
/// Two systems whose descriptors conflict must not run in the same batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessDescriptor {
    /// Component types the system reads immutably.
    pub reads: Vec<ComponentKey>,
    /// Component types the system writes.
    pub writes: Vec<ComponentKey>,
    /// Component types the system handles whether present or not.
    pub optionals: Vec<ComponentKey>,
}

impl AccessDescriptor {
    /// Create a new empty descriptor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a read-only component requirement.
    #[must_use]
    pub fn read<T: Component>(mut self) -> Self {
        self.reads.push(T::key());
        self
    }

    /// Add a mutable component requirement.
    #[must_use]
    pub fn write<T: Component>(mut self) -> Self {
        self.writes.push(T::key());
        self
    }

    /// Add an optional component.
    #[must_use]
    pub fn optional<T: Component>(mut self) -> Self {
        self.optionals.push(T::key());
        self
    }

    /// Returns the set of required component types (reads + writes).
    #[must_use]
    pub fn required_types(&self) -> Vec<ComponentKey> {
        let mut types = Vec::with_capacity(self.reads.len() + self.writes.len());
        types.extend_from_slice(&self.reads);
        types.extend_from_slice(&self.writes);
        types
    }

    /// Build a [`Query`] matching the entities this system touches.
    #[must_use]
    pub fn to_query(&self) -> Query {
        Query {
            all: self.required_types(),
            ..Query::default()
        }
    }

    /// Checks whether this descriptor conflicts with another.
    ///
    /// Two descriptors conflict when one writes a component type that the
    /// other reads, writes, or optionally accesses:
    ///
    /// ```text
    /// A.writes ∩ (B.reads ∪ B.writes ∪ B.optionals) ≠ ∅  OR
    /// B.writes ∩ (A.reads ∪ A.writes ∪ A.optionals) ≠ ∅
    /// ```
    #[must_use]
    pub fn conflicts_with(&self, other: &AccessDescriptor) -> bool {
        self.writes.iter().any(|w| other.touches(w)) || other.writes.iter().any(|w| self.touches(w))
    }

    fn touches(&self, key: &ComponentKey) -> bool {
        self.reads.contains(key) || self.writes.contains(key) || self.optionals.contains(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Transform;
    impl Component for Transform {}

    #[derive(Debug, Default)]
    struct Velocity;
    impl Component for Velocity {}

    #[derive(Debug, Default)]
    struct AiState;
    impl Component for AiState {}

    #[derive(Debug, Default)]
    struct Hidden;
    impl Component for Hidden {}

    fn registry() -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        registry.register::<Transform>().unwrap();
        registry.register::<Velocity>().unwrap();
        registry.register::<AiState>().unwrap();
        registry
    }

    fn mask(registry: &ComponentRegistry, keys: &[ComponentKey]) -> BitSet {
        registry.create_mask(keys).unwrap()
    }

    #[test]
    fn test_empty_query_matches_everything() {
        let registry = registry();
        let query = Query::new().resolve(&registry);
        assert!(query.matches(&mask(&registry, &[])));
        assert!(query.matches(&mask(&registry, &[Transform::key()])));
    }

    #[test]
    fn test_all_any_none() {
        let registry = registry();
        let query = Query::new()
            .with::<Transform>()
            .any_of::<Velocity>()
            .any_of::<AiState>()
            .resolve(&registry);

        assert!(query.matches(&mask(&registry, &[Transform::key(), Velocity::key()])));
        assert!(query.matches(&mask(&registry, &[Transform::key(), AiState::key()])));
        assert!(!query.matches(&mask(&registry, &[Transform::key()])));
        assert!(!query.matches(&mask(&registry, &[Velocity::key()])));

        let moving = Query::new()
            .with::<Velocity>()
            .without::<AiState>()
            .resolve(&registry);
        assert!(moving.matches(&mask(&registry, &[Velocity::key()])));
        assert!(!moving.matches(&mask(&registry, &[Velocity::key(), AiState::key()])));
    }

    #[test]
    fn test_unregistered_type_matches_nothing() {
        let registry = registry();
        let all = Query::new().with::<Hidden>().resolve(&registry);
        let none = Query::new().without::<Hidden>().resolve(&registry);
        let any = Query::new().any_of::<Hidden>().resolve(&registry);
        let m = mask(&registry, &[Transform::key()]);
        for query in [all, none, any] {
            assert!(query.is_unsatisfiable());
            assert!(!query.matches(&m));
        }
    }

    #[test]
    fn test_stale_after_registry_clear() {
        let mut registry = registry();
        let query = Query::new().with::<Transform>().resolve(&registry);
        assert!(!query.is_stale(&registry));
        registry.clear();
        assert!(query.is_stale(&registry));
    }

    #[test]
    fn test_no_conflict_both_read() {
        let q1 = AccessDescriptor::new().read::<Transform>();
        let q2 = AccessDescriptor::new().read::<Transform>();
        assert!(!q1.conflicts_with(&q2));
    }

    #[test]
    fn test_conflict_read_vs_write() {
        let q1 = AccessDescriptor::new().read::<Transform>();
        let q2 = AccessDescriptor::new().write::<Transform>();
        assert!(q1.conflicts_with(&q2));
        assert!(q2.conflicts_with(&q1));
    }

    #[test]
    fn test_conflict_optional_vs_write() {
        let q1 = AccessDescriptor::new().optional::<Velocity>();
        let q2 = AccessDescriptor::new().write::<Velocity>();
        assert!(q1.conflicts_with(&q2));
    }

    #[test]
    fn test_no_conflict_different_types() {
        // Physics: reads Transform, writes Velocity
        let physics = AccessDescriptor::new().read::<Transform>().write::<Velocity>();
        // AI: reads Transform, writes AiState
        let ai = AccessDescriptor::new().read::<Transform>().write::<AiState>();
        assert!(!physics.conflicts_with(&ai));
    }

    #[test]
    fn test_required_types_and_query() {
        let access = AccessDescriptor::new()
            .read::<Transform>()
            .write::<Velocity>()
            .optional::<AiState>();
        let required = access.required_types();
        assert!(required.contains(&Transform::key()));
        assert!(required.contains(&Velocity::key()));
        assert!(!required.contains(&AiState::key()));
        assert_eq!(access.to_query().all, required);
    }
}
