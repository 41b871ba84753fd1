//! Replay planning.
//!
//! Collapses a drained batch of tasks before it is applied.

use std::collections::HashSet;
use std::fmt;

use super::task::{FarmTask, TaskKind};

/// Tasks of one batch in application order, after deduplication.
#[derive(Debug, Default)]
pub struct ReplayPlan {
    pub tasks: Vec<FarmTask>,
    /// Dropped because their id, or their effect, was already in the batch.
    pub duplicates: usize,
    /// Dropped because a broader eviction in the batch covers them.
    pub subsumed: usize,
}

impl fmt::Display for ReplayPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ReplayPlan {{ tasks: {}, duplicates: {}, subsumed: {} }}",
            self.tasks.len(),
            self.duplicates,
            self.subsumed,
        )
    }
}

/// Evictions commute and are idempotent, so identical ones collapse.
fn is_eviction(kind: TaskKind) -> bool {
    matches!(
        kind,
        TaskKind::ClearHashtables
            | TaskKind::RemoveReadOnlyObject
            | TaskKind::ClearReadOnlyObjects
            | TaskKind::InvalidateTypeInfo
            | TaskKind::InvalidateObject
    )
}

impl ReplayPlan {
    /// - Deduplicates by task id
    /// - Collapses identical evictions
    /// - Drops per-object and per-type evictions covered by a clear of the
    ///   same scope in the batch
    ///
    /// Non-eviction tasks keep their relative order.
    pub fn from_tasks(tasks: Vec<FarmTask>) -> Self {
        let mut plan = Self::default();
        let mut seen_ids = HashSet::new();
        let mut seen_effects = HashSet::new();

        let mut clear_all_hashtables = false;
        let mut cleared_types = HashSet::new();
        let mut clear_all_read_only = false;
        for task in &tasks {
            match task.kind() {
                TaskKind::ClearHashtables if task.target().is_empty() => clear_all_hashtables = true,
                TaskKind::ClearHashtables => {
                    cleared_types.insert(task.target().to_lowercase());
                }
                TaskKind::ClearReadOnlyObjects => clear_all_read_only = true,
                _ => {}
            }
        }

        for task in tasks {
            if !seen_ids.insert(task.id()) {
                plan.duplicates += 1;
                continue;
            }

            let covered = match task.kind() {
                TaskKind::ClearHashtables => clear_all_hashtables && !task.target().is_empty(),
                TaskKind::InvalidateObject => {
                    clear_all_hashtables || cleared_types.contains(&task.target().to_lowercase())
                }
                TaskKind::RemoveReadOnlyObject => clear_all_read_only,
                _ => false,
            };
            if covered {
                plan.subsumed += 1;
                continue;
            }

            if is_eviction(task.kind()) {
                let (kind, target, data) = task.effect_key();
                if !seen_effects.insert((kind, target, data.to_vec())) {
                    plan.duplicates += 1;
                    continue;
                }
            }
            plan.tasks.push(task);
        }

        plan
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
