//! # Update Scheduler
//!
//! Collapses any number of recorded patches into a single deferred apply
//! task. The queue is drained by the engine at the next scheduling
//! opportunity ([`crate::Engine::run_pending_tasks`]), after the user
//! function that produced the patches has returned.

use crate::patch::{Patch, PatchTracker};
use std::collections::VecDeque;

/// Work deferred to the next scheduling opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledTask {
    /// Replay buffered patches and refresh dependents.
    ApplyVariableUpdates,
}

/// Task queue with a single-flight guard for the apply task.
#[derive(Debug, Default)]
pub struct UpdateScheduler {
    queue: VecDeque<ScheduledTask>,
    apply_pending: bool,
    scheduled: u64,
}

impl UpdateScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `patch` and, if it was accepted while var updates are
    /// enabled, make sure exactly one apply task is queued.
    pub fn add(&mut self, tracker: &mut PatchTracker, patch: Patch) -> bool {
        if !tracker.add(patch) {
            return false;
        }
        if tracker.var_updates_enabled() {
            self.schedule_apply();
        }
        true
    }

    /// Queue the apply task unless one is already pending.
    pub fn schedule_apply(&mut self) -> bool {
        if self.apply_pending {
            return false;
        }
        self.apply_pending = true;
        self.scheduled += 1;
        self.queue.push_back(ScheduledTask::ApplyVariableUpdates);
        tracing::debug!(scheduled = self.scheduled, "apply task queued");
        true
    }

    /// Pop the next task. Popping the apply task re-arms the guard.
    pub fn next_task(&mut self) -> Option<ScheduledTask> {
        let task = self.queue.pop_front()?;
        if task == ScheduledTask::ApplyVariableUpdates {
            self.apply_pending = false;
        }
        Some(task)
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Total apply tasks queued since creation or the last reset.
    #[must_use]
    pub fn scheduled_count(&self) -> u64 {
        self.scheduled
    }

    /// Drop queued tasks and counters.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.apply_pending = false;
        self.scheduled = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn set(path: &str) -> Patch {
        Patch::Set {
            path: crate::patch::PatchPath::new(path.split('.')),
            value: Value::from(1),
        }
    }

    #[test]
    fn many_patches_one_task() {
        let mut tracker = PatchTracker::new();
        tracker.enable_tracking();
        let mut scheduler = UpdateScheduler::new();
        for i in 0..5 {
            assert!(scheduler.add(&mut tracker, set(&format!("Obj1.v{}", i))));
        }
        assert_eq!(tracker.len(), 5);
        assert_eq!(scheduler.scheduled_count(), 1);
        assert_eq!(scheduler.next_task(), Some(ScheduledTask::ApplyVariableUpdates));
        assert_eq!(scheduler.next_task(), None);

        scheduler.add(&mut tracker, set("Obj1.v"));
        assert_eq!(scheduler.scheduled_count(), 2);
    }

    #[test]
    fn untracked_patches_schedule_nothing() {
        let mut tracker = PatchTracker::new();
        let mut scheduler = UpdateScheduler::new();
        assert!(!scheduler.add(&mut tracker, set("Obj1.v")));
        assert!(!scheduler.has_pending());
        assert!(tracker.is_empty());
    }

    #[test]
    fn disabled_var_update_records_without_scheduling() {
        let mut tracker = PatchTracker::new();
        tracker.enable_tracking();
        tracker.disable_var_update();
        let mut scheduler = UpdateScheduler::new();
        assert!(scheduler.add(&mut tracker, set("Obj1.v")));
        assert_eq!(tracker.len(), 1);
        assert!(!scheduler.has_pending());
    }

    #[test]
    fn reset_clears_guard() {
        let mut scheduler = UpdateScheduler::new();
        scheduler.schedule_apply();
        scheduler.reset();
        assert!(!scheduler.has_pending());
        assert!(scheduler.schedule_apply());
    }
}
