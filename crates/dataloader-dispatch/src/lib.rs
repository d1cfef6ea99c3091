//! Level-synchronized dispatch coordination for DataLoader-style batching.
//!
//! Batch loaders only pay off when a flush happens after a whole wave of
//! sibling fields has enqueued its keys: flush too early and batching is
//! defeated, flush too late and resolution deadlocks on loads nobody ever
//! dispatched. The field-resolution tree is discovered concurrently and out
//! of order, so knowing when a wave is complete is the whole problem.
//!
//! This crate tracks resolution progress per tree level and flushes exactly
//! when a full level of one or more executions is complete:
//!
//! 1. The engine reports lifecycle events (`begin_level`, `value_info_ready`,
//!    `begin_fetch`, `execution_finished`) into a [`DispatchCoordinator`].
//! 2. The coordinator forwards them to a [`TrackingApproach`] — query-scoped
//!    for one execution per registry, request-scoped for a pre-declared batch
//!    of executions sharing one.
//! 3. The approach mutates an [`ExecutionBarrier`] of per-level counters and
//!    triggers `dispatch_all` on the [`LoaderRegistry`] once every tracked
//!    execution has its deepest active level complete.
//!
//! The crate is side-effect free beyond the registry seam: it never performs
//! loads itself and never waits on a flush it initiated.

mod barrier;
mod coordinator;
mod error;
mod execution;
mod level;
mod registry;
mod tracking;

pub use self::{
    barrier::{ExecutionBarrier, LevelCounters},
    coordinator::DispatchCoordinator,
    error::{TrackingError, TrackingResult},
    execution::{ExecutionId, ExecutionStrategy, OperationType, ValueShape},
    level::Level,
    registry::{InMemoryRegistry, LoaderRegistry, LoaderStatistics, RegistryStatistics},
    tracking::{QueryScopedTracking, RequestScopedTracking, TrackingApproach},
};

#[cfg(test)]
use {insta as _, serde_json as _};
