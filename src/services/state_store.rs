//! State Store (C3).
//!
//! Authoritative in-memory sprint state with write-through persistence to
//! a directory-per-sprint layout. Mutating operations are serialized per
//! sprint id by an internal per-sprint lock, so unrelated sprints never
//! contend on the same mutex.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::cost::CostLedger;
use crate::domain::models::developer::DeveloperPool;
use crate::domain::models::plan::Plan;
use crate::domain::models::sprint::{AutonomyMode, Sprint, SprintStatus};
use crate::domain::models::task::{Task, TaskKind, TaskState};

/// On-disk metadata written at sprint creation (`.meta.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SprintMetadata {
    pub target_dir: String,
    pub spec_path: String,
    pub developer_count: u32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub autonomy_mode: AutonomyMode,
}

struct SprintRecord {
    sprint: Sprint,
    lock: Arc<Mutex<()>>,
}

/// Root directory under which `sprints/<id>/` layouts live, plus the
/// in-memory map of hydrated sprints.
pub struct StateStore {
    sprints_root: PathBuf,
    records: RwLock<HashMap<String, SprintRecord>>,
}

impl StateStore {
    pub fn new(sprints_root: impl Into<PathBuf>) -> Self {
        Self { sprints_root: sprints_root.into(), records: RwLock::new(HashMap::new()) }
    }

    pub fn sprint_dir(&self, id: &str) -> PathBuf {
        self.sprints_root.join(id)
    }

    async fn per_sprint_lock(&self, id: &str) -> Arc<Mutex<()>> {
        if let Some(record) = self.records.read().await.get(id) {
            return record.lock.clone();
        }
        Arc::new(Mutex::new(()))
    }

    /// Allocate developer identities, create the sprint directory, seed
    /// the cost ledger, write metadata, status = `created`.
    #[instrument(skip(self, spec_contents))]
    pub async fn init_sprint(
        &self,
        id: &str,
        spec_path: &str,
        spec_contents: &str,
        target_dir: &str,
        developer_count: u32,
        autonomy: AutonomyMode,
    ) -> DomainResult<Sprint> {
        let dir = self.sprint_dir(id);
        tokio::fs::create_dir_all(dir.join("role-logs")).await?;
        tokio::fs::create_dir_all(dir.join("logs")).await?;

        tokio::fs::write(dir.join("spec.md"), spec_contents).await?;

        let metadata = SprintMetadata {
            target_dir: target_dir.to_string(),
            spec_path: spec_path.to_string(),
            developer_count,
            created_at: chrono::Utc::now(),
            approved_at: None,
            name: None,
            autonomy_mode: autonomy,
        };
        self.write_json(&dir.join(".meta.json"), &metadata).await?;

        let sprint = Sprint::new(id.to_string(), target_dir.to_string(), spec_path.to_string(), DeveloperPool::new(developer_count), autonomy);

        self.write_status(&dir, sprint.status).await?;
        self.write_json(&dir.join("cost.json"), &CostLedger::default()).await?;

        let lock = Arc::new(Mutex::new(()));
        self.records.write().await.insert(id.to_string(), SprintRecord { sprint: sprint.clone(), lock });

        Ok(sprint)
    }

    /// Return the hydrated sprint, reconstructing it from disk on a cache
    /// miss if the sprint directory and metadata are valid.
    pub async fn get_or_hydrate(&self, id: &str) -> DomainResult<Sprint> {
        if let Some(record) = self.records.read().await.get(id) {
            return Ok(record.sprint.clone());
        }

        let dir = self.sprint_dir(id);
        if !dir.exists() {
            return Err(DomainError::SprintNotFound(id.to_string()));
        }

        let metadata: SprintMetadata = self.read_json(&dir.join(".meta.json")).await?;
        let status = self.read_status(&dir).await?;

        let mut sprint = Sprint::new(
            id.to_string(),
            metadata.target_dir.clone(),
            metadata.spec_path.clone(),
            DeveloperPool::new(metadata.developer_count),
            metadata.autonomy_mode,
        );
        sprint.status = status;
        sprint.approved_at = metadata.approved_at;
        sprint.name = metadata.name.clone();

        if let Ok(mut plan) = self.read_json::<Plan>(&dir.join("plan.json")).await {
            let completed = self.read_completed_log(&dir).await?;
            for task in &mut plan.tasks {
                if completed.contains(&task.id) {
                    task.state = TaskState::Done;
                }
            }
            sprint.plan = Some(plan);
        }

        if let Ok(ledger) = self.read_json::<CostLedger>(&dir.join("cost.json")).await {
            sprint.cost_ledger = ledger;
        }

        info!(sprint_id = %id, status = ?sprint.status, "hydrated sprint from disk");

        let lock = Arc::new(Mutex::new(()));
        self.records.write().await.insert(id.to_string(), SprintRecord { sprint: sprint.clone(), lock });
        Ok(sprint)
    }

    /// Mutate the in-memory sprint under its per-sprint lock, persist the
    /// new status, and return the updated record.
    pub async fn with_sprint<F>(&self, id: &str, f: F) -> DomainResult<Sprint>
    where
        F: FnOnce(&mut Sprint) -> DomainResult<()>,
    {
        let lock = self.per_sprint_lock(id).await;
        let _guard = lock.lock().await;

        let mut records = self.records.write().await;
        let record = records.get_mut(id).ok_or_else(|| DomainError::SprintNotFound(id.to_string()))?;
        f(&mut record.sprint)?;
        let sprint = record.sprint.clone();
        drop(records);

        self.write_status(&self.sprint_dir(id), sprint.status).await?;
        Ok(sprint)
    }

    pub async fn set_sprint_status(&self, id: &str, status: SprintStatus) -> DomainResult<Sprint> {
        self.with_sprint(id, |s| s.transition_to(status)).await
    }

    /// Resume a paused sprint back to the status it was paused from.
    pub async fn resume_sprint(&self, id: &str) -> DomainResult<Sprint> {
        self.with_sprint(id, |s| s.resume()).await
    }

    pub async fn set_task_status(&self, id: &str, task_id: u64, next: TaskState) -> DomainResult<Sprint> {
        let sprint = self
            .with_sprint(id, |s| {
                let plan = s.plan.as_mut().ok_or_else(|| DomainError::CorruptPlan("no plan".to_string()))?;
                let task = plan.task_mut(task_id).ok_or(DomainError::TaskNotFound { sprint: s.id.clone(), task: task_id })?;
                task.transition_to(next).map_err(DomainError::ValidationFailed)
            })
            .await?;

        if next == TaskState::Done {
            self.append_completed(&self.sprint_dir(id), task_id).await?;
        }
        Ok(sprint)
    }

    pub async fn set_current_wave(&self, id: &str, wave: u32) -> DomainResult<Sprint> {
        self.with_sprint(id, |s| {
            s.current_wave = wave;
            Ok(())
        })
        .await
    }

    pub async fn set_review_cycle(&self, id: &str, cycle: u32) -> DomainResult<Sprint> {
        self.with_sprint(id, |s| {
            s.review_cycle = cycle;
            Ok(())
        })
        .await
    }

    pub async fn set_worktree_path(&self, id: &str, slot: u32, path: PathBuf) -> DomainResult<Sprint> {
        self.with_sprint(id, |s| {
            s.worktrees.insert(slot, path);
            Ok(())
        })
        .await
    }

    pub async fn set_sprint_approved_at(&self, id: &str) -> DomainResult<Sprint> {
        let sprint = self
            .with_sprint(id, |s| {
                s.approved_at = Some(chrono::Utc::now());
                Ok(())
            })
            .await?;
        self.persist_metadata(id, &sprint).await?;
        Ok(sprint)
    }

    /// Set a sprint's display name, persisting it to `.meta.json` since
    /// (unlike status/wave/cycle) it isn't reconstructible from any
    /// other on-disk artefact.
    pub async fn set_sprint_name(&self, id: &str, name: impl Into<String>) -> DomainResult<Sprint> {
        let name = name.into();
        let sprint = self
            .with_sprint(id, |s| {
                s.name = Some(name.clone());
                Ok(())
            })
            .await?;
        self.persist_metadata(id, &sprint).await?;
        Ok(sprint)
    }

    async fn persist_metadata(&self, id: &str, sprint: &Sprint) -> DomainResult<()> {
        let metadata = SprintMetadata {
            target_dir: sprint.target_dir.clone(),
            spec_path: sprint.spec_path.clone(),
            developer_count: sprint.developer_pool.slot_count(),
            created_at: sprint.created_at,
            approved_at: sprint.approved_at,
            name: sprint.name.clone(),
            autonomy_mode: sprint.autonomy,
        };
        self.write_json(&self.sprint_dir(id).join(".meta.json"), &metadata).await
    }

    pub async fn read_spec(&self, id: &str) -> DomainResult<String> {
        Ok(tokio::fs::read_to_string(self.sprint_dir(id).join("spec.md")).await?)
    }

    pub fn research_doc_exists(&self, id: &str) -> bool {
        self.sprint_dir(id).join("research.md").exists()
    }

    pub async fn read_research_doc(&self, id: &str) -> DomainResult<String> {
        Ok(tokio::fs::read_to_string(self.sprint_dir(id).join("research.md")).await?)
    }

    /// Write `research.md` only if the agent didn't already leave one
    /// behind in the sprint directory (spec §4.6: "writes research.md
    /// ... if the agent did not").
    pub async fn write_research_doc_if_missing(&self, id: &str, contents: &str) -> DomainResult<bool> {
        let path = self.sprint_dir(id).join("research.md");
        if path.exists() {
            return Ok(false);
        }
        tokio::fs::write(&path, contents).await?;
        Ok(true)
    }

    pub fn plan_doc_exists(&self, id: &str) -> bool {
        self.sprint_dir(id).join("plan.json").exists()
    }

    pub fn review_prose_path(&self, id: &str, cycle: u32) -> PathBuf {
        self.sprint_dir(id).join(format!("review-{cycle}.md"))
    }

    pub fn review_verdict_path(&self, id: &str, cycle: u32) -> PathBuf {
        self.sprint_dir(id).join(format!("review-{cycle}-verdict.json"))
    }

    pub fn review_prose_exists(&self, id: &str, cycle: u32) -> bool {
        self.review_prose_path(id, cycle).exists()
    }

    /// Highest review cycle number with a prose file on disk, or 0 if none.
    pub fn latest_review_cycle_on_disk(&self, id: &str) -> u32 {
        let dir = self.sprint_dir(id);
        let Ok(entries) = std::fs::read_dir(&dir) else { return 0 };
        entries
            .filter_map(Result::ok)
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .filter_map(|name| name.strip_prefix("review-").and_then(|n| n.strip_suffix(".md")).map(str::to_string))
            .filter_map(|n| n.parse::<u32>().ok())
            .max()
            .unwrap_or(0)
    }

    pub async fn write_review_artifacts(&self, id: &str, cycle: u32, prose: &str, verdict: Option<&serde_json::Value>) -> DomainResult<()> {
        let dir = self.sprint_dir(id);
        tokio::fs::write(dir.join(format!("review-{cycle}.md")), prose).await?;
        if let Some(v) = verdict {
            self.write_json(&dir.join(format!("review-{cycle}-verdict.json")), v).await?;
        }
        Ok(())
    }

    pub fn logs_dir(&self, id: &str) -> PathBuf {
        self.sprint_dir(id).join("logs")
    }

    /// Append an agent-invocation session to the cost ledger and persist
    /// it, under the same per-sprint lock as every other mutation.
    pub async fn record_cost_session(&self, id: &str, session: crate::domain::models::cost::Session) -> DomainResult<Sprint> {
        let lock = self.per_sprint_lock(id).await;
        let _guard = lock.lock().await;

        let mut records = self.records.write().await;
        let record = records.get_mut(id).ok_or_else(|| DomainError::SprintNotFound(id.to_string()))?;
        record.sprint.cost_ledger.record(session);
        let ledger = record.sprint.cost_ledger.clone();
        let sprint = record.sprint.clone();
        drop(records);

        self.write_json(&self.sprint_dir(id).join("cost.json"), &ledger).await?;
        Ok(sprint)
    }

    /// Validate and normalise an ingested plan: drop self/zero-valued
    /// dependencies, then check DAG acyclicity and the same-wave file
    /// isolation invariant, initialising every task as `Blocked`/`Ready`.
    pub async fn set_sprint_plan(&self, id: &str, mut plan: Plan) -> DomainResult<Sprint> {
        for task in &mut plan.tasks {
            task.depends_on.retain(|&d| d != 0 && d != task.id);
        }
        plan.validate()?;
        self.validate_same_wave_isolation(&plan)?;

        for task in &mut plan.tasks {
            task.state = if task.depends_on.is_empty() { TaskState::Ready } else { TaskState::Blocked };
        }

        let dir = self.sprint_dir(id);
        self.write_json(&dir.join("plan.json"), &plan).await?;

        self.with_sprint(id, |s| {
            s.plan = Some(plan.clone());
            Ok(())
        })
        .await
    }

    fn validate_same_wave_isolation(&self, plan: &Plan) -> DomainResult<()> {
        for (i, a) in plan.tasks.iter().enumerate() {
            for b in plan.tasks.iter().skip(i + 1) {
                if a.wave.is_some() && a.wave == b.wave && a.developer_slot != b.developer_slot {
                    let overlap: Vec<String> = a.files_touched.iter().filter(|f| b.files_touched.contains(f)).cloned().collect();
                    if !overlap.is_empty() {
                        return Err(DomainError::OverlappingFilesTouched { wave: a.wave.unwrap_or(0), a: a.id, b: b.id, files: overlap });
                    }
                }
            }
        }
        Ok(())
    }

    /// Reset every non-`Done` task to `Ready`/`Blocked`, clearing
    /// timestamps; returns the reset ids. Does not touch the completed log.
    pub async fn reset_sprint_for_restart(&self, id: &str) -> DomainResult<Vec<u64>> {
        let lock = self.per_sprint_lock(id).await;
        let _guard = lock.lock().await;

        let mut records = self.records.write().await;
        let record = records.get_mut(id).ok_or_else(|| DomainError::SprintNotFound(id.to_string()))?;
        let Some(plan) = record.sprint.plan.as_mut() else { return Ok(Vec::new()) };

        let mut reset_ids = Vec::new();
        for task in plan.tasks.iter_mut() {
            if task.state != TaskState::Done {
                task.state = if task.depends_on.is_empty() { TaskState::Ready } else { TaskState::Blocked };
                task.started_at = None;
                task.completed_at = None;
                reset_ids.push(task.id);
            }
        }
        let plan_clone = plan.clone();
        drop(records);

        self.write_json(&self.sprint_dir(id).join("plan.json"), &plan_clone).await?;
        Ok(reset_ids)
    }

    pub async fn reset_task_status(&self, id: &str, task_id: u64) -> DomainResult<Sprint> {
        self.with_sprint(id, |s| {
            let plan = s.plan.as_mut().ok_or_else(|| DomainError::CorruptPlan("no plan".to_string()))?;
            let task = plan.task_mut(task_id).ok_or(DomainError::TaskNotFound { sprint: s.id.clone(), task: task_id })?;
            task.state = TaskState::Ready;
            task.started_at = None;
            task.completed_at = None;
            Ok(())
        })
        .await
    }

    /// Add review-driven bug tasks, round-robin across developer slots,
    /// inheriting `current_wave + 1` and `type=bug` with the originating
    /// review cycle. Ids are monotonically assigned above the max
    /// existing id. Persists the augmented plan.
    pub async fn add_bug_tasks(&self, id: &str, titles_and_descriptions: Vec<(String, String)>) -> DomainResult<Vec<u64>> {
        let lock = self.per_sprint_lock(id).await;
        let _guard = lock.lock().await;

        let mut records = self.records.write().await;
        let record = records.get_mut(id).ok_or_else(|| DomainError::SprintNotFound(id.to_string()))?;
        let sprint = &mut record.sprint;

        let wave = sprint.current_wave + 1;
        let cycle = sprint.review_cycle;
        let slot_count = sprint.developer_pool.slot_count().max(1);

        let plan = sprint.plan.as_mut().ok_or_else(|| DomainError::CorruptPlan("no plan to add bug tasks to".to_string()))?;
        let mut next_id = plan.tasks.iter().map(|t| t.id).max().unwrap_or(0) + 1;

        let mut new_ids = Vec::new();
        for (i, (title, description)) in titles_and_descriptions.into_iter().enumerate() {
            let slot = (i as u32) % slot_count;
            let mut task = Task::new(next_id, title, description);
            task.kind = TaskKind::ReviewFix;
            task.wave = Some(wave);
            task.developer_slot = Some(slot);
            task.originating_review_cycle = Some(cycle);
            task.state = TaskState::Ready;
            new_ids.push(next_id);
            plan.tasks.push(task);
            next_id += 1;
        }

        let plan_clone = plan.clone();
        drop(records);

        self.write_json(&self.sprint_dir(id).join("plan.json"), &plan_clone).await?;
        Ok(new_ids)
    }

    /// Scan every sprint directory at boot and admit those whose
    /// persisted status is non-terminal and not `created`.
    pub async fn load_active_sprints_from_disk(&self) -> DomainResult<Vec<String>> {
        let mut admitted = Vec::new();
        if !self.sprints_root.exists() {
            return Ok(admitted);
        }

        let mut entries = tokio::fs::read_dir(&self.sprints_root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let id = entry.file_name().to_string_lossy().to_string();
            match self.get_or_hydrate(&id).await {
                Ok(sprint) if !sprint.status.is_terminal() && sprint.status != SprintStatus::Created => {
                    admitted.push(id);
                }
                Ok(_) => {}
                Err(e) => warn!(sprint_id = %id, error = %e, "skipping unreadable sprint directory at boot"),
            }
        }

        Ok(admitted)
    }

    /// All sprint ids with a directory on disk, regardless of status.
    /// Used by the listing endpoint; unlike `load_active_sprints_from_disk`
    /// this does not hydrate each one into memory.
    pub async fn list_sprint_ids(&self) -> DomainResult<Vec<String>> {
        let mut ids = Vec::new();
        if !self.sprints_root.exists() {
            return Ok(ids);
        }
        let mut entries = tokio::fs::read_dir(&self.sprints_root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                ids.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn write_status(&self, dir: &Path, status: SprintStatus) -> DomainResult<()> {
        tokio::fs::write(dir.join(".status"), status.as_str()).await?;
        Ok(())
    }

    async fn read_status(&self, dir: &Path) -> DomainResult<SprintStatus> {
        let raw = tokio::fs::read_to_string(dir.join(".status")).await?;
        raw.trim().parse().map_err(DomainError::CorruptPlan)
    }

    async fn append_completed(&self, dir: &Path, task_id: u64) -> DomainResult<()> {
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(dir.join(".completed")).await?;
        file.write_all(format!("{task_id}\n").as_bytes()).await?;
        Ok(())
    }

    async fn read_completed_log(&self, dir: &Path) -> DomainResult<std::collections::HashSet<u64>> {
        let path = dir.join(".completed");
        if !path.exists() {
            return Ok(Default::default());
        }
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(raw.lines().filter_map(|l| l.trim().parse().ok()).collect())
    }

    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> DomainResult<()> {
        let json = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(&self, path: &Path) -> DomainResult<T> {
        let raw = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&raw)?)
    }
}
