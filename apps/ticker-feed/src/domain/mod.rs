//! Domain Layer - Core ticker types and subscription bookkeeping.
//!
//! Pure Rust types with no I/O. Everything here is owned by a single feed
//! session and needs no locking.

/// Ticker records and batches.
pub mod ticker;

/// Ref-counted symbol subscriptions.
pub mod subscription;
