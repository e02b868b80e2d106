//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Live connections are entities: two registry entries with the same
/// [`ConnectionId`](crate::ConnectionId) are the same connection, whatever
/// sink they currently hold.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
