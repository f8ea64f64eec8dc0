//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (rule API, stream relay).
pub mod ports;

/// Application services for rule reconciliation and record fan-out.
pub mod services;
