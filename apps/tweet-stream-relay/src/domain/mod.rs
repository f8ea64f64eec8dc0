//! Domain Layer - Core relay types and business logic.
//!
//! This layer contains the core domain types for filter rules and streamed
//! records. Types here carry serialization support and nothing else.

/// Filter rules, desired rule lists and provider snapshots.
pub mod rules;

/// Stream records and relay connection state.
pub mod streaming;
