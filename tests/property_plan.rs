//! Property-based coverage for the plan DAG and same-wave file-isolation
//! invariants (`SPEC_FULL.md` §8's "DAG-rejection" / "wave-gate" /
//! "same-wave file isolation" properties).
//!
//! Grounded on the teacher's `tests/property_dependency_resolver.rs`:
//! synthetic task graphs built by hand inside a `proptest!` block,
//! asserting structural invariants rather than round-tripping encodings.

use proptest::prelude::*;

use sprintforge::domain::errors::DomainError;
use sprintforge::domain::models::plan::Plan;
use sprintforge::domain::models::sprint::AutonomyMode;
use sprintforge::domain::models::task::Task;
use sprintforge::services::state_store::StateStore;

fn chain_task(id: u64, dep: Option<u64>) -> Task {
    let mut t = Task::new(id, format!("task-{id}"), "d");
    if let Some(dep) = dep {
        t.depends_on = vec![dep];
    }
    t
}

proptest! {
    /// Any acyclic chain of 1..=size tasks, each depending only on its
    /// immediate predecessor, must validate.
    #[test]
    fn acyclic_chains_of_any_length_are_accepted(size in 1usize..30) {
        let tasks: Vec<Task> = (1..=size as u64).map(|id| chain_task(id, if id == 1 { None } else { Some(id - 1) })).collect();
        let plan = Plan::new(tasks);
        prop_assert!(plan.validate().is_ok());
    }

    /// Closing a chain of length >= 2 back on itself (last task depends
    /// on the first) always introduces exactly one cycle and must be
    /// rejected, regardless of chain length.
    #[test]
    fn closing_a_chain_into_a_loop_is_always_rejected(size in 2usize..30) {
        let mut tasks: Vec<Task> = (1..=size as u64).map(|id| chain_task(id, if id == 1 { None } else { Some(id - 1) })).collect();
        tasks[0].depends_on = vec![size as u64];
        let plan = Plan::new(tasks);
        match plan.validate() {
            Err(DomainError::DependencyCycle(_)) => {}
            other => prop_assert!(false, "expected a DependencyCycle error, got {other:?}"),
        }
    }

    /// A task depending on an id outside the plan is always rejected as
    /// a corrupt plan, never silently accepted or treated as a cycle.
    #[test]
    fn dependency_on_an_absent_task_id_is_rejected(size in 1usize..20, missing_offset in 1u64..50) {
        let tasks: Vec<Task> = (1..=size as u64).map(|id| chain_task(id, None)).collect();
        let mut plan = Plan::new(tasks);
        let bogus = size as u64 + missing_offset;
        plan.tasks[0].depends_on = vec![bogus];
        match plan.validate() {
            Err(DomainError::CorruptPlan(_)) => {}
            other => prop_assert!(false, "expected a CorruptPlan error, got {other:?}"),
        }
    }

    /// Two tasks in the same wave on different developer slots that
    /// share at least one touched file must be rejected by
    /// `StateStore::set_sprint_plan`'s same-wave isolation check,
    /// regardless of how many other non-overlapping files surround it.
    #[test]
    fn same_wave_different_slot_file_overlap_is_always_rejected(
        shared_file in "[a-z]{3,8}\\.rs",
        extra_a in prop::collection::vec("[a-z]{3,8}\\.rs", 0..4),
        extra_b in prop::collection::vec("[a-z]{3,8}\\.rs", 0..4),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let store = StateStore::new(dir.path());
            store.init_sprint("s1", "spec.md", "# s", "/tmp/x", 2, AutonomyMode::Supervised).await.unwrap();

            let mut a = Task::new(1, "a", "d");
            a.wave = Some(1);
            a.developer_slot = Some(0);
            a.files_touched = extra_a.into_iter().chain(std::iter::once(shared_file.clone())).collect();

            let mut b = Task::new(2, "b", "d");
            b.wave = Some(1);
            b.developer_slot = Some(1);
            b.files_touched = extra_b.into_iter().chain(std::iter::once(shared_file.clone())).collect();

            let result = store.set_sprint_plan("s1", Plan::new(vec![a, b])).await;
            prop_assert!(matches!(result, Err(DomainError::OverlappingFilesTouched { .. })));
            Ok(())
        })?;
    }

    /// The same pair of tasks with disjoint file sets in the same wave
    /// must always be accepted — the isolation check is specifically
    /// about file overlap, not about sharing a wave per se.
    #[test]
    fn same_wave_disjoint_files_is_always_accepted(
        file_a in "[a-z]{3,8}-a\\.rs",
        file_b in "[a-z]{3,8}-b\\.rs",
    ) {
        prop_assume!(file_a != file_b);
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let store = StateStore::new(dir.path());
            store.init_sprint("s1", "spec.md", "# s", "/tmp/x", 2, AutonomyMode::Supervised).await.unwrap();

            let mut a = Task::new(1, "a", "d");
            a.wave = Some(1);
            a.developer_slot = Some(0);
            a.files_touched = vec![file_a];

            let mut b = Task::new(2, "b", "d");
            b.wave = Some(1);
            b.developer_slot = Some(1);
            b.files_touched = vec![file_b];

            let result = store.set_sprint_plan("s1", Plan::new(vec![a, b])).await;
            prop_assert!(result.is_ok());
            Ok(())
        })?;
    }
}
