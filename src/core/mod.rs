//! Core business logic - framework-agnostic matching, cascade and rematch operations.
//!
//! `matcher`, `timing` and `clues` are pure. Everything else talks to the store
//! through `SeaORM` and can run inside a database transaction.

/// Host/guest assignments per course
pub mod assignment;
/// Cleanup after dropouts, host resignations and splits
pub mod cascade;
/// Per-course clue selection
pub mod clues;
/// Couple registration, roles, dropouts and blocked pairs
pub mod couple;
/// Envelope construction, reveal firing, delays and manual activation
pub mod envelope;
/// Event timeline
pub mod event;
/// Event-scoped advisory rematch lock
pub mod lock;
/// Pairing generator
pub mod matcher;
/// Versioned match plans
pub mod plan;
/// Rematch orchestration
pub mod rematch;
/// Reveal schedule computation
pub mod timing;
/// Travel duration lookup seam
pub mod travel;
