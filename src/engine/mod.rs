//! # Engine Module
//!
//! CPU-side task engine implementation.
//!
//! This module contains the core orchestration building blocks:
//! - Cooperative cancellation (sources, tokens, callbacks)
//! - Tasks and completion sources
//! - Structural combinators (join-all, race, parallel loops)
//! - The frame-driven delay scheduler
//! - The worker RPC bridge
//!
//! Public API exposure is controlled by `lib.rs`.

pub mod cancellation;
pub mod combinators;
pub mod error;
pub mod scheduler;
pub mod task;
pub mod worker;
