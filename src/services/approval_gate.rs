//! Approval Gate (C5).
//!
//! Each pending approval is a one-shot rendezvous: the orchestrator
//! parks a sprint and awaits exactly one observer response keyed by
//! the approval's id (design note "approval gate = one-shot
//! rendezvous"). An unmatched `approval:response` (unknown or already
//! resolved id) is silently dropped, per spec §6.

use std::collections::HashMap;

use tokio::sync::{oneshot, Mutex};
use uuid::Uuid;

use crate::domain::models::approval::{ApprovalDecision, ApprovalKind};

struct Waiter {
    sprint_id: String,
    kind: ApprovalKind,
    sender: oneshot::Sender<(ApprovalDecision, Option<String>)>,
}

/// Registry of in-flight approval waiters, keyed by approval id.
#[derive(Default)]
pub struct ApprovalGate {
    waiters: Mutex<HashMap<Uuid, Waiter>>,
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending approval and return the receiver half the
    /// caller awaits on. Must be called before the matching
    /// `approval:required` event is published, so a fast client can't
    /// race ahead of registration.
    pub async fn register(&self, id: Uuid, sprint_id: &str, kind: ApprovalKind) -> oneshot::Receiver<(ApprovalDecision, Option<String>)> {
        let (sender, receiver) = oneshot::channel();
        self.waiters.lock().await.insert(id, Waiter { sprint_id: sprint_id.to_string(), kind, sender });
        receiver
    }

    /// Resolve a pending approval by id. A response for an unknown or
    /// already-resolved id is a no-op (§6: "unmatched responses are
    /// silently dropped").
    pub async fn resolve(&self, id: Uuid, decision: ApprovalDecision, feedback: Option<String>) {
        if let Some(waiter) = self.waiters.lock().await.remove(&id) {
            let _ = waiter.sender.send((decision, feedback));
        }
    }

    /// Resolve every pending approval belonging to `sprint_id` as
    /// rejected. Used by sprint cancellation (§5 "Cancellation").
    pub async fn cancel_sprint(&self, sprint_id: &str) {
        let mut waiters = self.waiters.lock().await;
        let ids: Vec<Uuid> = waiters.iter().filter(|(_, w)| w.sprint_id == sprint_id).map(|(id, _)| *id).collect();
        for id in ids {
            if let Some(waiter) = waiters.remove(&id) {
                let _ = waiter.sender.send((ApprovalDecision::Rejected, Some("sprint cancelled".to_string())));
            }
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.waiters.lock().await.len()
    }

    /// Resolve the pending approval for `sprint_id`, optionally restricted
    /// to a specific `kind` (the REST surface's `/approve` and
    /// `/merge-local` endpoints carry no approval id, since an observer
    /// never needs to disambiguate between two approvals open on the
    /// same sprint at once). Returns whether anything was resolved.
    pub async fn resolve_for_sprint(&self, sprint_id: &str, kind: Option<ApprovalKind>, decision: ApprovalDecision, feedback: Option<String>) -> bool {
        let mut waiters = self.waiters.lock().await;
        let found = waiters.iter().find(|(_, w)| w.sprint_id == sprint_id && kind.map(|k| k == w.kind).unwrap_or(true)).map(|(id, _)| *id);
        let Some(id) = found else { return false };
        if let Some(waiter) = waiters.remove(&id) {
            let _ = waiter.sender.send((decision, feedback));
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_delivers_decision_to_waiter() {
        let gate = ApprovalGate::new();
        let id = Uuid::new_v4();
        let receiver = gate.register(id, "s1", ApprovalKind::PlanApproval).await;

        gate.resolve(id, ApprovalDecision::Approved, None).await;

        let (decision, feedback) = receiver.await.unwrap();
        assert_eq!(decision, ApprovalDecision::Approved);
        assert!(feedback.is_none());
    }

    #[tokio::test]
    async fn resolve_for_unknown_id_is_a_silent_no_op() {
        let gate = ApprovalGate::new();
        gate.resolve(Uuid::new_v4(), ApprovalDecision::Approved, None).await;
        assert_eq!(gate.pending_count().await, 0);
    }

    #[tokio::test]
    async fn resolve_twice_only_delivers_once() {
        let gate = ApprovalGate::new();
        let id = Uuid::new_v4();
        let receiver = gate.register(id, "s1", ApprovalKind::PlanApproval).await;

        gate.resolve(id, ApprovalDecision::Approved, None).await;
        gate.resolve(id, ApprovalDecision::Rejected, None).await;

        let (decision, _) = receiver.await.unwrap();
        assert_eq!(decision, ApprovalDecision::Approved);
    }

    #[tokio::test]
    async fn cancel_sprint_rejects_only_that_sprints_waiters() {
        let gate = ApprovalGate::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let rx_a = gate.register(a, "s1", ApprovalKind::PlanApproval).await;
        let rx_b = gate.register(b, "s2", ApprovalKind::PlanApproval).await;

        gate.cancel_sprint("s1").await;

        let (decision_a, _) = rx_a.await.unwrap();
        assert_eq!(decision_a, ApprovalDecision::Rejected);
        assert_eq!(gate.pending_count().await, 1);
        drop(rx_b);
    }

    /// A registered waiter's receiver must not resolve on its own — it
    /// stays pending until a matching `resolve` call, which is the
    /// invariant the HTTP approve/reject endpoints rely on to park a
    /// request until an observer actually responds.
    #[test]
    fn registered_receiver_is_pending_until_resolved() {
        tokio_test::block_on(async {
            let gate = ApprovalGate::new();
            let id = Uuid::new_v4();
            let receiver = gate.register(id, "s1", ApprovalKind::PlanApproval).await;
            let mut task = tokio_test::task::spawn(receiver);

            tokio_test::assert_pending!(task.poll());

            gate.resolve(id, ApprovalDecision::Approved, None).await;

            match tokio_test::assert_ready!(task.poll()) {
                Ok((decision, _)) => assert_eq!(decision, ApprovalDecision::Approved),
                Err(_) => panic!("sender was dropped before resolving"),
            }
        });
    }

    #[tokio::test]
    async fn resolve_for_sprint_matches_by_kind() {
        let gate = ApprovalGate::new();
        let id = Uuid::new_v4();
        let receiver = gate.register(id, "s1", ApprovalKind::ReviewApproval).await;

        assert!(!gate.resolve_for_sprint("s1", Some(ApprovalKind::LocalMergeApproval), ApprovalDecision::Approved, None).await);
        assert!(gate.resolve_for_sprint("s1", Some(ApprovalKind::ReviewApproval), ApprovalDecision::Approved, None).await);

        let (decision, _) = receiver.await.unwrap();
        assert_eq!(decision, ApprovalDecision::Approved);
    }
}
