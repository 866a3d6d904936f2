//! Unit-of-work session management for DocModel Rust.
//!
//! `docmodel-session` is the **write coordination layer**: it queues
//! inserts, saves, updates, and removes, flushes them in FIFO order with
//! acknowledgement checking, keeps a per-identity cache of everything it
//! has queued, and hands out query builders bound to the session's
//! connection and timezone.
//!
//! # Role In The Architecture
//!
//! - [`Session`]: the unit of work; one per logical thread of control.
//! - [`SessionScope`]: scope guard; the outermost release flushes and
//!   ends the session.
//! - [`PendingQueue`]: FIFO queue with per-identity superseding.
//!
//! Queries built through `Session::query` execute via the `Connection`
//! trait from `docmodel-core` and the builders in `docmodel-query`.

pub mod pending;
pub mod session;

pub use pending::{PendingKind, PendingOp, PendingQueue};
pub use session::{Session, SessionScope};
