//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `engine` - Central loop owning all state, driven by the scheduler
//! - `debounce` - Consecutive-sample debounce filter
//! - `zone` - Zone hysteresis state machine (IDLE / IN_ZONE / CONFIRMED)
//! - `counter` - Persisted visitor count with rate-limited reset
//! - `clock` - Time manager (persisted seed, network correction, checkpoints)
//! - `reporter` - Report scheduler, at most one report in flight
//! - `scheduler` - One periodic timer per activity
//! - `persistence` - Typed fields over non-volatile storage

pub mod clock;
pub mod counter;
pub mod debounce;
pub mod engine;
pub mod persistence;
pub mod reporter;
pub mod scheduler;
pub mod zone;

// Re-export commonly used types
pub use counter::{CounterError, CountingEngine};
pub use engine::Engine;
pub use persistence::PersistentStore;
