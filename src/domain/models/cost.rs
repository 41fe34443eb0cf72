//! Cost ledger domain model.
//!
//! The ledger is an append-only log of agent-invocation sessions; the
//! only persisted form is the session list (`cost.json`). Per-role and
//! per-task totals are always recomputed from it on load rather than
//! stored, so the two can never drift out of sync.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// One agent CLI invocation's token usage and derived cost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    /// The role queue this invocation served (research, planning, impl-0, ...).
    pub role: String,
    pub task_id: Option<u64>,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub cost_usd: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Derived roll-up over a set of sessions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostSummary {
    pub total_usd: f64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub session_count: u32,
}

impl CostSummary {
    fn add(&mut self, session: &Session) {
        self.total_usd += session.cost_usd;
        self.total_input_tokens += session.input_tokens;
        self.total_output_tokens += session.output_tokens;
        self.session_count += 1;
    }
}

/// Append-only cost ledger for a single sprint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostLedger {
    pub sessions: Vec<Session>,
}

impl CostLedger {
    pub fn record(&mut self, session: Session) {
        self.sessions.push(session);
    }

    pub fn total(&self) -> CostSummary {
        let mut summary = CostSummary::default();
        for s in &self.sessions {
            summary.add(s);
        }
        summary
    }

    pub fn by_role(&self) -> HashMap<String, CostSummary> {
        let mut out: HashMap<String, CostSummary> = HashMap::new();
        for s in &self.sessions {
            out.entry(s.role.clone()).or_default().add(s);
        }
        out
    }

    pub fn by_task(&self) -> HashMap<u64, CostSummary> {
        let mut out: HashMap<u64, CostSummary> = HashMap::new();
        for s in &self.sessions {
            if let Some(task_id) = s.task_id {
                out.entry(task_id).or_default().add(s);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(role: &str, task_id: Option<u64>, cost: f64) -> Session {
        Session {
            id: Uuid::new_v4(),
            role: role.to_string(),
            task_id,
            model: "sonnet".to_string(),
            input_tokens: 1000,
            output_tokens: 500,
            cache_read_tokens: 0,
            cache_write_tokens: 0,
            cost_usd: cost,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn rollups_match_sum_of_sessions() {
        let mut ledger = CostLedger::default();
        ledger.record(session("impl-0", Some(1), 0.10));
        ledger.record(session("impl-1", Some(2), 0.20));
        ledger.record(session("impl-0", Some(1), 0.05));

        let total = ledger.total();
        assert_eq!(total.session_count, 3);
        assert!((total.total_usd - 0.35).abs() < 1e-9);

        let by_role = ledger.by_role();
        assert!((by_role["impl-0"].total_usd - 0.15).abs() < 1e-9);
        assert_eq!(by_role["impl-1"].session_count, 1);

        let by_task = ledger.by_task();
        assert!((by_task[&1].total_usd - 0.15).abs() < 1e-9);
    }
}
