//! `clientdesk-core`: shared building blocks.
//!
//! This crate contains **pure** primitives (no infrastructure concerns):
//! identifiers, the domain error model and pagination types.

pub mod error;
pub mod id;
pub mod page;
pub mod payload;

pub use error::{DomainError, DomainResult};
pub use id::{ClientId, LogId, UserId};
pub use page::{Page, PageRequest};
pub use payload::JsonMap;
