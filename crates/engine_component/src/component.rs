//! Core [`Component`] trait and associated metadata.
//!
//! Every piece of data stored in the ECS must implement [`Component`]. The
//! registry never stores instances, only a [`ComponentKey`] naming the
//! concrete type and the [`ComponentInfo`] assigned to it at registration.

use std::any::TypeId;
use std::alloc::Layout;

use serde::{Deserialize, Serialize};

/// A registry-assigned identifier for a component type.
///
/// IDs are handed out by a monotonic counter in registration order. They are
/// only meaningful for the registry that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentTypeId(pub u32);

impl std::fmt::Display for ComponentTypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ComponentType({})", self.0)
    }
}

/// The core component trait.
///
/// Components are plain data. They must be constructible without arguments
/// so storages can hand out defaults, and `Send + Sync + 'static` so a world
/// can be moved between threads.
///
/// # Examples
///
/// ```rust
/// use engine_component::Component;
///
/// #[derive(Debug, Default, Clone)]
/// struct Health {
///     current: f32,
///     max: f32,
/// }
///
/// impl Component for Health {
///     fn type_name() -> &'static str { "Health" }
/// }
/// ```
pub trait Component: Default + Send + Sync + 'static {
    /// A human-readable name for this component type.
    ///
    /// Defaults to the Rust type path.
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Returns the [`ComponentKey`] naming this type.
    fn key() -> ComponentKey {
        ComponentKey::of::<Self>()
    }
}

/// A type-erased handle naming a concrete component type.
///
/// Keys are how heterogeneous lists of component types are passed to the
/// registry and to queries (`&[ComponentKey]`). Equality and hashing use the
/// Rust [`TypeId`]; the name is carried for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct ComponentKey {
    type_id: TypeId,
    name: &'static str,
    layout: Layout,
}

impl ComponentKey {
    /// The key for component type `T`.
    #[must_use]
    pub fn of<T: Component>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: T::type_name(),
            layout: Layout::new::<T>(),
        }
    }

    /// The Rust type identity behind this key.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The component's human-readable name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Memory layout of one component instance.
    #[must_use]
    pub fn layout(&self) -> Layout {
        self.layout
    }
}

impl PartialEq for ComponentKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ComponentKey {}

impl std::hash::Hash for ComponentKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl std::fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

/// Metadata the registry keeps for each registered component type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentInfo {
    /// The key this info was registered for.
    pub key: ComponentKey,
    /// Monotonic type identifier.
    pub type_id: ComponentTypeId,
    /// Bit position of this type in component masks.
    pub bit_index: usize,
}

impl ComponentInfo {
    /// The component's human-readable name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.key.name()
    }

    /// Size of one component instance in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.key.layout().size()
    }
}
