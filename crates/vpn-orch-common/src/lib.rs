//! Common orchestration primitives for BGP-VPN reconciliation.
//!
//! This crate provides the building blocks shared by every reconciler in
//! the VPN control plane:
//!
//! - [`ChangeEvent`]: `add`/`update`/`remove` notification for one object
//! - [`Listener`]: handler trait implemented by each reconciler
//! - [`EventWorker`]: single-threaded, channel-fed worker per object type
//! - [`NamedKeyLock`]: per-key mutual exclusion with bounded wait
//! - [`PendingAssociationStore`]: associations deferred until their VPN exists
//! - [`TaskError`] / [`TaskStatus`]: per-event outcome
//!
//! # Architecture
//!
//! ```text
//! change stream (per type) ──> EventWorker ──> Listener::dispatch
//!                                                  │
//!                                     NamedKeyLock (per VPN id)
//!                                                  │
//!                                     PendingAssociationStore / VPN model
//! ```
//!
//! Each object type is processed in arrival order by its own worker.
//! Different types run concurrently; the named lock is the only
//! serialization point between workers touching the same VPN.

mod event;
mod listener;
mod named_lock;
mod pending;
mod task;
mod worker;

pub use event::{ChangeEvent, Operation};
pub use listener::Listener;
pub use named_lock::{LockTimeout, NamedKeyLock, NamedLockGuard};
pub use pending::{DeferredSet, PendingAssociationStore, PendingAssociations};
pub use task::{TaskError, TaskResult, TaskResultExt, TaskStatus};
pub use worker::{EventSender, EventWorker, WorkerClosed, WorkerHandle, WorkerStats};
