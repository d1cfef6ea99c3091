use std::collections::BTreeMap;

use indexmap::IndexMap;

use crate::{execution::ExecutionId, level::Level};

/// Work accounting for one `(execution, level)` pair.
///
/// All counters increase monotonically within one coordination round and drop
/// back to zero when the round is reset after a flush.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct LevelCounters {
    /// Field fetches announced by `begin_level` calls at this level.
    pub expected_fetches: usize,
    /// Field fetches that actually started at this level.
    pub observed_fetches: usize,
    /// Strategy calls announced by the value infos of the level above.
    pub expected_strategy_calls: usize,
    /// Strategy calls that actually started at this level.
    pub observed_strategy_calls: usize,
    /// Strategy calls at this level that finished producing their values.
    pub observed_value_info_calls: usize,
    /// Whether this level already triggered a flush this round.
    pub dispatched: bool,
}

/// Per-execution tracking state within the barrier.
#[derive(Default, Debug)]
struct ExecutionTrack {
    levels: BTreeMap<Level, LevelCounters>,
    /// Deepest level dispatched in a previous round. Levels at or below it
    /// are complete by construction, so readiness recursion bottoms out here
    /// once the counters of earlier rounds are gone.
    ready_floor: u32,
}

impl ExecutionTrack {
    fn counters_mut(&mut self, level: Level) -> &mut LevelCounters {
        self.levels.entry(level).or_default()
    }

    fn counters(&self, level: Level) -> LevelCounters {
        self.levels.get(&level).copied().unwrap_or_default()
    }

    fn level_ready(&self, level: Level) -> bool {
        if level.depth() <= self.ready_floor {
            return true;
        }
        let counters = self.counters(level);
        match level.parent() {
            // The root level is ready once it has begun and every announced
            // fetch has started.
            None => {
                counters.observed_strategy_calls >= 1
                    && counters.observed_fetches == counters.expected_fetches
            }
            Some(parent) => {
                if !self.level_ready(parent) {
                    return false;
                }
                // Every strategy call one level up must have reported its
                // child expectations, otherwise this level's expected
                // strategy-call count is still growing.
                let parent_settled = parent.depth() <= self.ready_floor || {
                    let parent_counters = self.counters(parent);
                    parent_counters.observed_value_info_calls
                        == parent_counters.observed_strategy_calls
                };
                parent_settled
                    && counters.observed_strategy_calls == counters.expected_strategy_calls
                    && counters.observed_fetches == counters.expected_fetches
            }
        }
    }

    /// Whether this execution has no outstanding expectations: its deepest
    /// level holding counters this round is ready. An untouched execution
    /// defaults to the root level, which is not ready before it has begun,
    /// so a declared-but-silent sibling keeps blocking the group. Recomputed
    /// from the counters on every call; declaring deeper work un-readies the
    /// execution even after a shallower level was already dispatched.
    fn is_ready(&self) -> bool {
        let deepest = self
            .levels
            .keys()
            .next_back()
            .copied()
            .unwrap_or(Level::ROOT);
        self.level_ready(deepest)
    }

    fn reset(&mut self) {
        let deepest_dispatched = self
            .levels
            .iter()
            .filter(|(_, counters)| counters.dispatched)
            .map(|(level, _)| level.depth())
            .max();
        if let Some(depth) = deepest_dispatched {
            self.ready_floor = self.ready_floor.max(depth);
        }
        self.levels.clear();
    }
}

/// Shared counter state for one coordination scope: every execution that
/// feeds the same batch-loader registry.
///
/// The barrier itself is plain state; the owning tracking approach serializes
/// all access through one mutex per scope.
#[derive(Default, Debug)]
pub struct ExecutionBarrier {
    executions: IndexMap<ExecutionId, ExecutionTrack>,
}

impl ExecutionBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an execution. Idempotent; eager for request-scoped
    /// coordination, lazy on first event for query-scoped.
    pub fn declare(&mut self, execution_id: ExecutionId) {
        self.executions.entry(execution_id).or_default();
    }

    pub fn contains(&self, execution_id: ExecutionId) -> bool {
        self.executions.contains_key(&execution_id)
    }

    pub fn tracked_executions(&self) -> usize {
        self.executions.len()
    }

    /// One sibling field set starts resolving at `level` with `field_count`
    /// fields, each of which will fetch once.
    pub fn begin_level(&mut self, execution_id: ExecutionId, level: Level, field_count: usize) {
        let counters = self
            .executions
            .entry(execution_id)
            .or_default()
            .counters_mut(level);
        counters.expected_fetches += field_count;
        counters.observed_strategy_calls += 1;
        tracing::trace!("{execution_id}: strategy call at {level} expecting {field_count} fetches");
    }

    /// One strategy call at `level` finished producing values containing
    /// `child_object_count` objects, each of which will become a strategy
    /// call at `level + 1`.
    pub fn record_value_info(
        &mut self,
        execution_id: ExecutionId,
        level: Level,
        child_object_count: usize,
    ) {
        let track = self.executions.entry(execution_id).or_default();
        track.counters_mut(level).observed_value_info_calls += 1;
        if child_object_count > 0 {
            track.counters_mut(level.child()).expected_strategy_calls += child_object_count;
        }
        tracing::trace!(
            "{execution_id}: values ready at {level}, {child_object_count} child objects"
        );
    }

    /// A field's value provider is about to run at `level`.
    pub fn record_fetch(&mut self, execution_id: ExecutionId, level: Level) {
        self.executions
            .entry(execution_id)
            .or_default()
            .counters_mut(level)
            .observed_fetches += 1;
    }

    pub fn level_ready(&self, execution_id: ExecutionId, level: Level) -> bool {
        self.executions
            .get(&execution_id)
            .is_some_and(|track| track.level_ready(level))
    }

    /// If `level` is ready and was not yet dispatched this round, marks it
    /// dispatched and returns true: the caller is responsible for triggering
    /// the flush. Returns true at most once per `(execution, level)` per
    /// round.
    pub fn try_mark_dispatched(&mut self, execution_id: ExecutionId, level: Level) -> bool {
        let Some(track) = self.executions.get_mut(&execution_id) else {
            return false;
        };
        // A level nothing has touched this round has nothing to dispatch.
        let Some(counters) = track.levels.get(&level) else {
            return false;
        };
        if counters.dispatched || !track.level_ready(level) {
            return false;
        }
        track.counters_mut(level).dispatched = true;
        tracing::debug!("{execution_id}: {level} complete, flush due");
        true
    }

    /// Global flush gate: every tracked execution's deepest active level is
    /// ready. A shared registry must not be flushed while any tracked
    /// execution still has outstanding expectations, including expectations
    /// declared below a level that already dispatched. Vacuously true once
    /// no execution remains.
    pub fn all_ready(&self) -> bool {
        self.executions.values().all(ExecutionTrack::is_ready)
    }

    /// Drops all state for a finished execution, returning whether it was
    /// still tracked. Idempotent; safe even when some of its lifecycle
    /// events never arrived.
    pub fn remove(&mut self, execution_id: ExecutionId) -> bool {
        if self.executions.shift_remove(&execution_id).is_some() {
            tracing::trace!("{execution_id}: tracking removed");
            true
        } else {
            false
        }
    }

    /// Starts a fresh coordination round after a flush: every counter back to
    /// zero, no level marked dispatched.
    pub fn reset_all(&mut self) {
        for track in self.executions.values_mut() {
            track.reset();
        }
    }

    #[cfg(test)]
    pub(crate) fn counters(&self, execution_id: ExecutionId, level: Level) -> LevelCounters {
        self.executions
            .get(&execution_id)
            .map(|track| track.counters(level))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(depth: u32) -> Level {
        Level::new(depth).unwrap()
    }

    #[test]
    fn three_sibling_scalars_dispatch_once() {
        let mut barrier = ExecutionBarrier::new();
        let e = ExecutionId::new();

        barrier.begin_level(e, Level::ROOT, 3);
        barrier.record_fetch(e, Level::ROOT);
        barrier.record_fetch(e, Level::ROOT);
        assert!(!barrier.try_mark_dispatched(e, Level::ROOT));

        barrier.record_fetch(e, Level::ROOT);
        assert!(barrier.try_mark_dispatched(e, Level::ROOT));
        // Second attempt in the same round must not trigger another flush.
        assert!(!barrier.try_mark_dispatched(e, Level::ROOT));
        assert!(barrier.all_ready());
    }

    #[test]
    fn nested_object_holds_readiness_until_child_level_completes() {
        let mut barrier = ExecutionBarrier::new();
        let e = ExecutionId::new();

        barrier.begin_level(e, Level::ROOT, 2);
        barrier.record_fetch(e, Level::ROOT);
        barrier.record_fetch(e, Level::ROOT);
        barrier.record_value_info(e, Level::ROOT, 1);
        assert!(barrier.level_ready(e, Level::ROOT));
        assert!(!barrier.level_ready(e, level(2)));

        barrier.begin_level(e, level(2), 1);
        assert!(!barrier.level_ready(e, level(2)));

        barrier.record_fetch(e, level(2));
        assert!(barrier.level_ready(e, level(2)));
        assert!(barrier.try_mark_dispatched(e, level(2)));
    }

    #[test]
    fn child_level_waits_for_every_parent_value_info() {
        let mut barrier = ExecutionBarrier::new();
        let e = ExecutionId::new();

        // Two strategy calls at level 2, only one has reported its values.
        barrier.begin_level(e, Level::ROOT, 2);
        barrier.record_fetch(e, Level::ROOT);
        barrier.record_fetch(e, Level::ROOT);
        barrier.record_value_info(e, Level::ROOT, 2);

        barrier.begin_level(e, level(2), 1);
        barrier.begin_level(e, level(2), 1);
        barrier.record_fetch(e, level(2));
        barrier.record_fetch(e, level(2));
        barrier.record_value_info(e, level(2), 1);

        // Level 3 expects one strategy call which has begun and fetched, but
        // the second level-2 strategy call has not reported values yet.
        barrier.begin_level(e, level(3), 1);
        barrier.record_fetch(e, level(3));
        assert!(!barrier.level_ready(e, level(3)));

        barrier.record_value_info(e, level(2), 0);
        assert!(barrier.level_ready(e, level(3)));
    }

    #[test]
    fn readiness_is_monotonic_within_a_round() {
        let mut barrier = ExecutionBarrier::new();
        let e = ExecutionId::new();

        barrier.begin_level(e, Level::ROOT, 1);
        barrier.record_fetch(e, Level::ROOT);
        assert!(barrier.level_ready(e, Level::ROOT));

        // Value infos landing afterwards do not unsettle the root level.
        barrier.record_value_info(e, Level::ROOT, 0);
        assert!(barrier.level_ready(e, Level::ROOT));
    }

    #[test]
    fn declared_but_untouched_execution_blocks_the_group() {
        let mut barrier = ExecutionBarrier::new();
        let e1 = ExecutionId::new();
        let e2 = ExecutionId::new();
        barrier.declare(e1);
        barrier.declare(e2);

        barrier.begin_level(e1, Level::ROOT, 1);
        barrier.record_fetch(e1, Level::ROOT);
        assert!(barrier.try_mark_dispatched(e1, Level::ROOT));
        assert!(!barrier.all_ready());

        barrier.begin_level(e2, Level::ROOT, 1);
        barrier.record_fetch(e2, Level::ROOT);
        assert!(barrier.try_mark_dispatched(e2, Level::ROOT));
        assert!(barrier.all_ready());
    }

    #[test]
    fn reset_clears_counters_and_dispatched_flags() {
        let mut barrier = ExecutionBarrier::new();
        let e = ExecutionId::new();

        barrier.begin_level(e, Level::ROOT, 2);
        barrier.record_fetch(e, Level::ROOT);
        barrier.record_fetch(e, Level::ROOT);
        assert!(barrier.try_mark_dispatched(e, Level::ROOT));

        barrier.reset_all();
        assert_eq!(barrier.counters(e, Level::ROOT), LevelCounters::default());
        // Levels at or below the floor are settled, but carry nothing to
        // dispatch again.
        assert!(!barrier.try_mark_dispatched(e, Level::ROOT));
    }

    #[test]
    fn deeper_expectations_unready_a_dispatched_execution() {
        let mut barrier = ExecutionBarrier::new();
        let e = ExecutionId::new();

        barrier.begin_level(e, Level::ROOT, 2);
        barrier.record_fetch(e, Level::ROOT);
        barrier.record_fetch(e, Level::ROOT);
        assert!(barrier.try_mark_dispatched(e, Level::ROOT));
        assert!(barrier.all_ready());

        // The root values turn out to contain an object: the execution has
        // outstanding work again and must hold back any shared flush.
        barrier.record_value_info(e, Level::ROOT, 1);
        assert!(!barrier.all_ready());
        barrier.begin_level(e, level(2), 1);
        assert!(!barrier.all_ready());

        barrier.record_fetch(e, level(2));
        assert!(barrier.all_ready());
    }

    #[test]
    fn second_wave_after_a_flush_bottoms_out_at_the_dispatched_level() {
        let mut barrier = ExecutionBarrier::new();
        let e = ExecutionId::new();

        barrier.begin_level(e, Level::ROOT, 2);
        barrier.record_fetch(e, Level::ROOT);
        barrier.record_fetch(e, Level::ROOT);
        assert!(barrier.try_mark_dispatched(e, Level::ROOT));
        barrier.reset_all();

        // The level-1 value infos only land after the flush, followed by the
        // level-2 wave. Root counters are zero, yet level 2 must still be
        // reachable.
        barrier.record_value_info(e, Level::ROOT, 1);
        barrier.begin_level(e, level(2), 1);
        assert!(!barrier.level_ready(e, level(2)));
        barrier.record_fetch(e, level(2));
        assert!(barrier.level_ready(e, level(2)));
        assert!(barrier.try_mark_dispatched(e, level(2)));
    }

    #[test]
    fn remove_is_idempotent() {
        let mut barrier = ExecutionBarrier::new();
        let e = ExecutionId::new();
        barrier.begin_level(e, Level::ROOT, 1);
        assert!(barrier.remove(e));
        // Only the removal that drops state may justify a flush.
        assert!(!barrier.remove(e));
        assert!(!barrier.contains(e));
        assert!(barrier.all_ready());
    }

    #[test]
    fn value_info_with_no_objects_creates_no_child_level() {
        let mut barrier = ExecutionBarrier::new();
        let e = ExecutionId::new();
        barrier.begin_level(e, Level::ROOT, 1);
        barrier.record_fetch(e, Level::ROOT);
        barrier.record_value_info(e, Level::ROOT, 0);
        // Nothing was ever recorded at level 2, so there is no flush to own.
        assert!(!barrier.try_mark_dispatched(e, level(2)));
    }
}
