//! Clients domain module.
//!
//! This crate contains business rules for client records, implemented purely
//! as deterministic domain logic (no IO, no HTTP, no storage).

pub mod client;

pub use client::{Client, ClientPatch, NewClient, MAX_AMOUNT, MAX_NAME_LEN};
