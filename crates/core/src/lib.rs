//! `storefront-core`: shared primitives for the storefront realtime stack.
//!
//! This crate contains identifiers, value objects and the domain error model
//! (no infrastructure concerns).

pub mod channel;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use channel::ChannelName;
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::ConnectionId;
pub use value_object::ValueObject;
