//! Parallel byte counting over forked worker processes.
//!
//! The coordinator splits the buffer into one segment per worker, forks the
//! workers, and reads exactly one count from each worker's pipe.
//!
//! # Architecture
//!
//! ```text
//!                     ┌─────────────────┐
//!       SIGINT ──────▶│   Coordinator   │◀────── SIGCHLD
//!    (status line)    │ (owns receivers)│    (reap, count down)
//!                     └────────┬────────┘
//!                              │ fork
//!               ┌──────────────┼──────────────┐
//!               │              │              │
//!         ┌─────▼─────┐  ┌─────▼─────┐  ┌─────▼─────┐
//!         │ Worker 0  │  │ Worker 1  │  │ Worker N  │
//!         │ [0, a)    │  │ [a, b)    │  │ [y, z)    │
//!         └─────┬─────┘  └─────┬─────┘  └─────┬─────┘
//!               └── one u64 per pipe ─────────┘
//! ```
//!
//! # Guarantees
//!
//! - **Deterministic plan**: segment lengths differ by at most one byte
//! - **One-shot channels**: each worker sends once, each result is read once
//! - **Bounded collection**: every channel read has its own deadline
//! - **No orphans**: every spawned worker is reaped, even on failure

mod channel;
mod coordinator;
mod registry;
mod segment;
mod signals;
mod termination;
mod worker;

pub use coordinator::{
    Coordinator, CoordinatorConfig, DEFAULT_COLLECT_TIMEOUT, DEFAULT_WORKERS, Job,
    parse_worker_count,
};
