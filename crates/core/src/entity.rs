//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Orders and products are entities: two orders with identical contents are
/// still different orders if their identifiers differ.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
