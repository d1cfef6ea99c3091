use std::sync::{Arc, Mutex, MutexGuard};

use crate::{
    barrier::ExecutionBarrier,
    error::{TrackingError, TrackingResult},
    execution::ExecutionId,
    level::Level,
    registry::LoaderRegistry,
};

/// Translates engine lifecycle events into barrier mutations and performs the
/// registry flush whenever the whole scope becomes ready.
///
/// Events may arrive from any thread in any interleaving; each call is one
/// bounded critical section on the scope's barrier.
pub trait TrackingApproach: Send + Sync {
    /// One sibling field set starts resolving.
    fn begin_level(
        &self,
        execution_id: ExecutionId,
        level: Level,
        field_count: usize,
    ) -> TrackingResult<()>;

    /// One strategy call finished producing its values, which contain
    /// `child_object_count` objects for the level below.
    fn record_value_info(
        &self,
        execution_id: ExecutionId,
        level: Level,
        child_object_count: usize,
    ) -> TrackingResult<()>;

    /// A field's value provider is about to run.
    fn record_fetch(&self, execution_id: ExecutionId, level: Level) -> TrackingResult<()>;

    /// The execution fully completed, successfully or not. Idempotent.
    fn finish_execution(&self, execution_id: ExecutionId) -> TrackingResult<()>;

    /// Unconditional flush, regardless of barrier state.
    fn dispatch(&self);
}

/// State shared by both tracking approaches: the barrier behind the scope's
/// one mutex, and the registry it flushes into.
struct TrackingCore {
    barrier: Mutex<ExecutionBarrier>,
    registry: Arc<dyn LoaderRegistry>,
}

impl TrackingCore {
    fn new(registry: Arc<dyn LoaderRegistry>) -> Self {
        Self {
            barrier: Mutex::new(ExecutionBarrier::new()),
            registry,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ExecutionBarrier> {
        self.barrier.lock().expect("dispatch barrier lock poisoned")
    }

    /// Flushes while still holding the barrier lock so no other thread can
    /// observe the window between the flush and the counter reset. The
    /// registry only gets initiated here; its outcome never feeds back.
    fn flush(&self, barrier: &mut ExecutionBarrier) {
        tracing::debug!("all executions ready, dispatching pending batch loads");
        self.registry.dispatch_all();
        barrier.reset_all();
    }

    fn attempt_dispatch(
        &self,
        barrier: &mut ExecutionBarrier,
        execution_id: ExecutionId,
        level: Level,
    ) {
        if barrier.try_mark_dispatched(execution_id, level) && barrier.all_ready() {
            self.flush(barrier);
        }
    }

    fn record_value_info(
        &self,
        barrier: &mut ExecutionBarrier,
        execution_id: ExecutionId,
        level: Level,
        child_object_count: usize,
    ) {
        barrier.record_value_info(execution_id, level, child_object_count);
        self.attempt_dispatch(barrier, execution_id, level.child());
    }

    fn record_fetch(
        &self,
        barrier: &mut ExecutionBarrier,
        execution_id: ExecutionId,
        level: Level,
    ) {
        barrier.record_fetch(execution_id, level);
        self.attempt_dispatch(barrier, execution_id, level);
    }

    fn finish_execution(&self, barrier: &mut ExecutionBarrier, execution_id: ExecutionId) {
        if barrier.remove(execution_id) && barrier.all_ready() {
            self.flush(barrier);
        }
    }

    fn dispatch(&self) {
        let mut barrier = self.lock();
        self.flush(&mut barrier);
    }
}

/// Tracking for a single execution owning its registry. No cross-query
/// coordination exists, so the execution id registers lazily on first use;
/// events naming any other id afterwards are not ours and get ignored.
pub struct QueryScopedTracking {
    core: TrackingCore,
}

impl QueryScopedTracking {
    pub fn new(registry: Arc<dyn LoaderRegistry>) -> Self {
        Self {
            core: TrackingCore::new(registry),
        }
    }

    /// Latches the first execution id seen. Returns false for events naming
    /// a different execution, which must not be counted against this scope.
    fn accept(barrier: &mut ExecutionBarrier, execution_id: ExecutionId) -> bool {
        if barrier.contains(execution_id) {
            return true;
        }
        if barrier.tracked_executions() > 0 {
            tracing::warn!(
                "{execution_id}: ignoring event for a second execution in a query-scoped scope"
            );
            return false;
        }
        barrier.declare(execution_id);
        true
    }
}

impl TrackingApproach for QueryScopedTracking {
    fn begin_level(
        &self,
        execution_id: ExecutionId,
        level: Level,
        field_count: usize,
    ) -> TrackingResult<()> {
        let mut barrier = self.core.lock();
        if Self::accept(&mut barrier, execution_id) {
            barrier.begin_level(execution_id, level, field_count);
        }
        Ok(())
    }

    fn record_value_info(
        &self,
        execution_id: ExecutionId,
        level: Level,
        child_object_count: usize,
    ) -> TrackingResult<()> {
        let mut barrier = self.core.lock();
        if Self::accept(&mut barrier, execution_id) {
            self.core
                .record_value_info(&mut barrier, execution_id, level, child_object_count);
        }
        Ok(())
    }

    fn record_fetch(&self, execution_id: ExecutionId, level: Level) -> TrackingResult<()> {
        let mut barrier = self.core.lock();
        if Self::accept(&mut barrier, execution_id) {
            self.core.record_fetch(&mut barrier, execution_id, level);
        }
        Ok(())
    }

    fn finish_execution(&self, execution_id: ExecutionId) -> TrackingResult<()> {
        let mut barrier = self.core.lock();
        self.core.finish_execution(&mut barrier, execution_id);
        Ok(())
    }

    fn dispatch(&self) {
        self.core.dispatch();
    }
}

/// Tracking for a batch of sibling executions sharing one registry.
///
/// The complete execution set must be known up front: readiness of the group
/// is meaningless while an undeclared sibling could still bring work, so any
/// event referencing an unknown id fails fast instead.
pub struct RequestScopedTracking {
    core: TrackingCore,
}

impl RequestScopedTracking {
    pub fn new(
        registry: Arc<dyn LoaderRegistry>,
        execution_ids: impl IntoIterator<Item = ExecutionId>,
    ) -> Self {
        let core = TrackingCore::new(registry);
        {
            let mut barrier = core.lock();
            for execution_id in execution_ids {
                barrier.declare(execution_id);
            }
        }
        Self { core }
    }

    fn ensure_declared(
        barrier: &ExecutionBarrier,
        execution_id: ExecutionId,
    ) -> TrackingResult<()> {
        if barrier.contains(execution_id) {
            Ok(())
        } else {
            Err(TrackingError::UndeclaredExecution(execution_id))
        }
    }
}

impl TrackingApproach for RequestScopedTracking {
    fn begin_level(
        &self,
        execution_id: ExecutionId,
        level: Level,
        field_count: usize,
    ) -> TrackingResult<()> {
        let mut barrier = self.core.lock();
        Self::ensure_declared(&barrier, execution_id)?;
        barrier.begin_level(execution_id, level, field_count);
        Ok(())
    }

    fn record_value_info(
        &self,
        execution_id: ExecutionId,
        level: Level,
        child_object_count: usize,
    ) -> TrackingResult<()> {
        let mut barrier = self.core.lock();
        Self::ensure_declared(&barrier, execution_id)?;
        self.core
            .record_value_info(&mut barrier, execution_id, level, child_object_count);
        Ok(())
    }

    fn record_fetch(&self, execution_id: ExecutionId, level: Level) -> TrackingResult<()> {
        let mut barrier = self.core.lock();
        Self::ensure_declared(&barrier, execution_id)?;
        self.core.record_fetch(&mut barrier, execution_id, level);
        Ok(())
    }

    fn finish_execution(&self, execution_id: ExecutionId) -> TrackingResult<()> {
        // Removal stays permissive: cancellation may tear an execution down
        // more than once, and the other events for it may never arrive.
        let mut barrier = self.core.lock();
        self.core.finish_execution(&mut barrier, execution_id);
        Ok(())
    }

    fn dispatch(&self) {
        self.core.dispatch();
    }
}
