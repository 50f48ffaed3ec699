//! Guarded allocation layer for tinyfixture.
//!
//! Every byte a test allocates through [`GuardedHeap`] is wrapped in hidden
//! bookkeeping so the fixture runner can tell, at teardown, whether the test
//! leaked, wrote past the end of a block, or released something twice.
//!
//! # Architecture
//!
//! - **Block layout** (`layout`): 16-byte header before the user pointer, `END\0` sentinel after it
//! - **Providers** (`provider`): process heap or fixed-capacity LIFO arena underneath
//! - **Block registry** (`registry`): O(1) doubly linked set of live blocks, indexed by address
//! - **Guarded heap** (`heap`): allocate / release / resize / zeroed plus the allocation epoch
//! - **Auditor** (`audit`): sentinel inspection and leak reports
//! - **Shared handle** (`shared`): cross-thread handle that detects foreign-thread traffic
//! - **Configuration** (`config`): leak diagnostic depth
//! - **Metrics** (`metrics`): relaxed atomic counters for observability

#![deny(unsafe_code)]

pub mod audit;
pub mod config;
pub mod error;
pub mod heap;
pub mod layout;
pub mod metrics;
pub mod provider;
pub mod registry;
pub mod shared;

pub use audit::{BlockIntegrity, LeakReport, LeakedBlock};
pub use config::TrackingLevel;
pub use error::{HeapError, ReleaseSite};
pub use heap::{AllocationEpoch, GuardedHeap};
pub use metrics::{HeapMetrics, HeapMetricsSnapshot};
pub use provider::{HeapProvider, StaticArena, SystemProvider};
pub use shared::SharedHeap;
