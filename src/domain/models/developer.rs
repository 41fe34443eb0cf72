//! Developer slot pool: bounded concurrency for wave execution.

use serde::{Deserialize, Serialize};

/// One of the sprint's fixed-size pool of concurrent developer workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeveloperSlot {
    pub index: u32,
    pub busy_with_task: Option<u64>,
    pub worktree_path: Option<String>,
    pub branch: Option<String>,
}

impl DeveloperSlot {
    pub fn idle(index: u32) -> Self {
        Self {
            index,
            busy_with_task: None,
            worktree_path: None,
            branch: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.busy_with_task.is_none()
    }

    pub fn assign(&mut self, task_id: u64, worktree_path: String, branch: String) {
        self.busy_with_task = Some(task_id);
        self.worktree_path = Some(worktree_path);
        self.branch = Some(branch);
    }

    pub fn release(&mut self) {
        self.busy_with_task = None;
        self.worktree_path = None;
        self.branch = None;
    }
}

/// Fixed-size pool of developer slots for a single sprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeveloperPool {
    pub slots: Vec<DeveloperSlot>,
}

impl DeveloperPool {
    pub fn new(size: u32) -> Self {
        Self {
            slots: (0..size).map(DeveloperSlot::idle).collect(),
        }
    }

    pub fn idle_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_idle()).count()
    }

    pub fn slot_count(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn next_idle(&mut self) -> Option<&mut DeveloperSlot> {
        self.slots.iter_mut().find(|s| s.is_idle())
    }

    pub fn slot_for_task(&mut self, task_id: u64) -> Option<&mut DeveloperSlot> {
        self.slots.iter_mut().find(|s| s.busy_with_task == Some(task_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_tracks_idle_slots() {
        let mut pool = DeveloperPool::new(3);
        assert_eq!(pool.idle_count(), 3);
        pool.next_idle().unwrap().assign(1, "/wt/1".into(), "sprint/1".into());
        assert_eq!(pool.idle_count(), 2);
        pool.slot_for_task(1).unwrap().release();
        assert_eq!(pool.idle_count(), 3);
    }

    #[test]
    fn at_most_one_task_per_slot() {
        let mut pool = DeveloperPool::new(1);
        pool.next_idle().unwrap().assign(1, "/wt/1".into(), "b".into());
        assert!(pool.next_idle().is_none());
    }
}
