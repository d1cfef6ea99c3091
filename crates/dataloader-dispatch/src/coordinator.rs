use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use crate::{
    error::TrackingResult,
    execution::{ExecutionId, ExecutionStrategy, OperationType, ValueShape},
    level::Level,
    registry::LoaderRegistry,
    tracking::{QueryScopedTracking, RequestScopedTracking, TrackingApproach},
};

/// The facade the execution engine drives.
///
/// Decides per execution whether dispatch tracking applies at all and
/// forwards the engine's lifecycle events to the scope's tracking approach.
/// Executions that cannot benefit from batching get every fetch dispatched
/// immediately instead, so nothing ever waits on a load that tracking would
/// not have flushed.
pub struct DispatchCoordinator {
    tracking: Box<dyn TrackingApproach>,
    registry: Arc<dyn LoaderRegistry>,
    bypassed: Mutex<HashSet<ExecutionId>>,
}

impl DispatchCoordinator {
    /// Coordination for a single execution owning its registry.
    pub fn query_scoped(registry: Arc<dyn LoaderRegistry>) -> Self {
        Self {
            tracking: Box::new(QueryScopedTracking::new(registry.clone())),
            registry,
            bypassed: Mutex::new(HashSet::new()),
        }
    }

    /// Coordination for a pre-known batch of executions sharing one registry.
    pub fn request_scoped(
        registry: Arc<dyn LoaderRegistry>,
        execution_ids: impl IntoIterator<Item = ExecutionId>,
    ) -> Self {
        Self {
            tracking: Box::new(RequestScopedTracking::new(registry.clone(), execution_ids)),
            registry,
            bypassed: Mutex::new(HashSet::new()),
        }
    }

    /// Declares how an execution will run. Tracking only applies to queries
    /// resolved with the parallel strategy; anything else is excluded from
    /// level coordination for this execution's lifetime.
    pub fn execution_started(
        &self,
        execution_id: ExecutionId,
        operation: OperationType,
        strategy: ExecutionStrategy,
    ) -> TrackingResult<()> {
        let eligible =
            operation == OperationType::Query && strategy == ExecutionStrategy::Parallel;
        if eligible {
            return Ok(());
        }
        tracing::debug!(
            "{execution_id}: {operation:?}/{strategy:?} is not batchable, dispatching per fetch"
        );
        self.bypassed().insert(execution_id);
        // A pre-declared execution that turns out ineligible must not keep
        // blocking the rest of its group.
        self.tracking.finish_execution(execution_id)
    }

    pub fn begin_level(
        &self,
        execution_id: ExecutionId,
        level: Level,
        field_count: usize,
    ) -> TrackingResult<()> {
        if self.is_bypassed(execution_id) {
            return Ok(());
        }
        self.tracking.begin_level(execution_id, level, field_count)
    }

    /// Field values resolved for one strategy call; `shapes` describes each
    /// resolved value so the next level's strategy calls can be counted.
    pub fn value_info_ready(
        &self,
        execution_id: ExecutionId,
        level: Level,
        shapes: &[ValueShape],
    ) -> TrackingResult<()> {
        if self.is_bypassed(execution_id) {
            return Ok(());
        }
        let child_object_count = ValueShape::count_objects(shapes);
        self.tracking
            .record_value_info(execution_id, level, child_object_count)
    }

    /// A field's value provider is about to run. For bypassed executions the
    /// pending keys flush right away, there is no batch to wait for.
    pub fn begin_fetch(&self, execution_id: ExecutionId, level: Level) -> TrackingResult<()> {
        if self.is_bypassed(execution_id) {
            self.registry.dispatch_all();
            return Ok(());
        }
        self.tracking.record_fetch(execution_id, level)
    }

    pub fn execution_finished(&self, execution_id: ExecutionId) -> TrackingResult<()> {
        if self.bypassed().remove(&execution_id) {
            return Ok(());
        }
        self.tracking.finish_execution(execution_id)
    }

    /// Manual escape hatch for fully-eager resolvers that opted out of
    /// per-field dispatch: flush immediately regardless of barrier state.
    pub fn dispatch(&self) {
        self.tracking.dispatch();
    }

    fn is_bypassed(&self, execution_id: ExecutionId) -> bool {
        self.bypassed().contains(&execution_id)
    }

    fn bypassed(&self) -> std::sync::MutexGuard<'_, HashSet<ExecutionId>> {
        self.bypassed.lock().expect("bypass set lock poisoned")
    }
}
