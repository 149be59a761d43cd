//! Application Layer - Port definitions.
//!
//! The interfaces the feed session depends on, kept free of any concrete
//! network stack so sessions can be driven by in-memory fakes.

/// Port interfaces for external systems (realtime socket, polling endpoint).
pub mod ports;
