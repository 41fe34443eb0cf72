//! REST handlers (spec §6).

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::domain::models::sprint::{AutonomyMode, Sprint};
use crate::services::workers::WorkerContext;

use super::actions;
use super::error::{ApiError, ApiResult};

#[derive(Serialize)]
pub struct SprintSummary {
    pub id: String,
    pub name: Option<String>,
    pub status: String,
    pub autonomy_mode: String,
    pub current_wave: u32,
    pub review_cycle: u32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub total_cost_usd: f64,
}

impl From<Sprint> for SprintSummary {
    fn from(s: Sprint) -> Self {
        Self {
            id: s.id,
            name: s.name,
            status: s.status.as_str().to_string(),
            autonomy_mode: format!("{:?}", s.autonomy).to_lowercase(),
            current_wave: s.current_wave,
            review_cycle: s.review_cycle,
            created_at: s.created_at,
            updated_at: s.updated_at,
            total_cost_usd: s.cost_ledger.total().total_usd,
        }
    }
}

pub async fn list_sprints(State(ctx): State<Arc<WorkerContext>>) -> ApiResult<Json<Vec<SprintSummary>>> {
    let ids = ctx.state.list_sprint_ids().await?;
    let mut summaries = Vec::with_capacity(ids.len());
    for id in ids {
        if let Ok(sprint) = ctx.state.get_or_hydrate(&id).await {
            summaries.push(SprintSummary::from(sprint));
        }
    }
    summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(summaries))
}

pub async fn get_sprint(State(ctx): State<Arc<WorkerContext>>, Path(id): Path<String>) -> ApiResult<Json<Sprint>> {
    Ok(Json(ctx.state.get_or_hydrate(&id).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSprintRequest {
    pub spec_path: String,
    pub target_dir: String,
    pub developer_count: Option<u32>,
    pub autonomy_mode: Option<String>,
    pub sprint_id: Option<String>,
    pub name: Option<String>,
}

/// Date-prefixed slug, mirroring the persisted layout's own id
/// convention (`2026-07-28-add-health-route`) so ids read well as
/// directory names without the caller having to supply one.
fn generate_sprint_id(name: Option<&str>) -> String {
    let date = chrono::Utc::now().format("%Y-%m-%d");
    let slug = name
        .map(|n| {
            n.to_lowercase()
                .chars()
                .map(|c| if c.is_alphanumeric() { c } else { '-' })
                .collect::<String>()
                .split('-')
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("-")
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()[..8].to_string());
    format!("{date}-{slug}")
}

pub async fn create_sprint(State(ctx): State<Arc<WorkerContext>>, Json(req): Json<CreateSprintRequest>) -> ApiResult<(StatusCode, Json<Sprint>)> {
    let spec_contents = tokio::fs::read_to_string(&req.spec_path)
        .await
        .map_err(|e| ApiError(crate::domain::errors::DomainError::ValidationFailed(format!("could not read specPath {}: {e}", req.spec_path))))?;

    let autonomy = match req.autonomy_mode {
        Some(raw) => AutonomyMode::from_str(&raw).map_err(|e| ApiError(crate::domain::errors::DomainError::ValidationFailed(e)))?,
        None => AutonomyMode::from_str(&ctx.config.default_autonomy).unwrap_or_default(),
    };
    let developer_count = req.developer_count.unwrap_or(ctx.config.developer_pool.max_concurrent_slots);
    let id = req.sprint_id.unwrap_or_else(|| generate_sprint_id(req.name.as_deref()));

    let sprint = ctx.state.init_sprint(&id, &req.spec_path, &spec_contents, &req.target_dir, developer_count, autonomy).await?;
    let sprint = if let Some(name) = req.name { ctx.state.set_sprint_name(&id, name).await? } else { sprint };

    Ok((StatusCode::CREATED, Json(sprint)))
}

pub async fn start_sprint(State(ctx): State<Arc<WorkerContext>>, Path(id): Path<String>) -> ApiResult<Json<Sprint>> {
    Ok(Json(actions::start_sprint(&ctx, &id).await?))
}

pub async fn approve_sprint(State(ctx): State<Arc<WorkerContext>>, Path(id): Path<String>) -> ApiResult<Json<Sprint>> {
    Ok(Json(actions::approve_plan(&ctx, &id).await?))
}

pub async fn pause_sprint(State(ctx): State<Arc<WorkerContext>>, Path(id): Path<String>) -> ApiResult<Json<Sprint>> {
    Ok(Json(actions::pause_sprint(&ctx, &id).await?))
}

pub async fn resume_sprint(State(ctx): State<Arc<WorkerContext>>, Path(id): Path<String>) -> ApiResult<Json<Sprint>> {
    Ok(Json(actions::resume_sprint(&ctx, &id).await?))
}

pub async fn cancel_sprint(State(ctx): State<Arc<WorkerContext>>, Path(id): Path<String>) -> ApiResult<Json<Sprint>> {
    Ok(Json(actions::cancel_sprint(&ctx, &id).await?))
}

pub async fn restart_sprint(State(ctx): State<Arc<WorkerContext>>, Path(id): Path<String>) -> ApiResult<Json<Sprint>> {
    Ok(Json(actions::restart_sprint(&ctx, &id).await?))
}

pub async fn complete_sprint(State(ctx): State<Arc<WorkerContext>>, Path(id): Path<String>) -> ApiResult<Json<Sprint>> {
    Ok(Json(actions::complete_sprint(&ctx, &id).await?))
}

pub async fn merge_local_sprint(State(ctx): State<Arc<WorkerContext>>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    if actions::merge_local(&ctx, &id).await? {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(ApiError(crate::domain::errors::DomainError::ValidationFailed(format!("sprint {id} has no pending local-merge approval"))))
    }
}

pub async fn retry_task(State(ctx): State<Arc<WorkerContext>>, Path((sprint_id, task_id)): Path<(String, u64)>) -> ApiResult<StatusCode> {
    actions::retry_task(&ctx, &sprint_id, task_id).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn get_spec(State(ctx): State<Arc<WorkerContext>>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let spec = ctx.state.read_spec(&id).await?;
    Ok(([("content-type", "text/markdown; charset=utf-8")], spec))
}

#[derive(Serialize)]
pub struct RoleLog {
    pub role: String,
    pub content: String,
}

pub async fn get_logs(State(ctx): State<Arc<WorkerContext>>, Path(id): Path<String>) -> ApiResult<Json<Vec<RoleLog>>> {
    let dir = ctx.state.sprint_dir(&id).join("role-logs");
    let mut logs = Vec::new();

    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(_) => return Ok(Json(logs)),
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }
        let role = path.file_stem().and_then(|s| s.to_str()).unwrap_or("unknown").to_string();
        if let Ok(content) = tokio::fs::read_to_string(&path).await {
            logs.push(RoleLog { role, content });
        }
    }

    logs.sort_by(|a, b| a.role.cmp(&b.role));
    Ok(Json(logs))
}

#[derive(Deserialize)]
pub struct BrowseQuery {
    pub dir: Option<String>,
    pub filter: Option<String>,
}

#[derive(Serialize)]
pub struct BrowseEntry {
    pub name: String,
    pub is_dir: bool,
}

#[derive(Serialize)]
pub struct BrowseResponse {
    pub current: String,
    pub parent: Option<String>,
    pub entries: Vec<BrowseEntry>,
}

/// Filesystem listing for the create-sprint UI's directory/spec-file
/// pickers. `filter` is a case-insensitive substring match against
/// entry names (e.g. `.md` to narrow down to spec files).
pub async fn browse_filesystem(Query(params): Query<BrowseQuery>) -> ApiResult<Json<BrowseResponse>> {
    let dir = params.dir.map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    let canonical = tokio::fs::canonicalize(&dir).await.map_err(|e| ApiError(crate::domain::errors::DomainError::ValidationFailed(format!("cannot browse {}: {e}", dir.display()))))?;

    let mut entries = tokio::fs::read_dir(&canonical).await?;
    let mut listing = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(filter) = &params.filter {
            if !name.to_lowercase().contains(&filter.to_lowercase()) {
                continue;
            }
        }
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        listing.push(BrowseEntry { name, is_dir });
    }
    listing.sort_by(|a, b| (!a.is_dir, &a.name).cmp(&(!b.is_dir, &b.name)));

    let parent = canonical.parent().map(|p| p.display().to_string());
    Ok(Json(BrowseResponse { current: canonical.display().to_string(), parent, entries: listing }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_date_prefixed_slug_from_name() {
        let id = generate_sprint_id(Some("Add Health Route!"));
        assert!(id.ends_with("add-health-route"));
        assert!(id.len() > "2026-07-28-".len());
    }

    #[test]
    fn falls_back_to_a_short_id_without_a_name() {
        let id = generate_sprint_id(None);
        assert!(id.starts_with(&chrono::Utc::now().format("%Y-%m-%d").to_string()));
    }
}
