//! `sprintctl sprint ...`: a thin REST client over the daemon's own
//! HTTP surface (spec §6), for operators without the browser client.

use anyhow::{bail, Context, Result};
use comfy_table::{presets, Cell, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

use crate::cli::output::{output, CommandOutput};

struct SprintValue(Value);

impl Serialize for SprintValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl CommandOutput for SprintValue {
    fn to_human(&self) -> String {
        serde_json::to_string_pretty(&self.0).unwrap_or_default()
    }

    fn to_json(&self) -> Value {
        self.0.clone()
    }
}

async fn request(client: &reqwest::Client, method: reqwest::Method, url: String, body: Option<Value>) -> Result<Value> {
    let mut req = client.request(method, &url);
    if let Some(body) = body {
        req = req.json(&body);
    }
    let resp = req.send().await.with_context(|| format!("request to {url} failed"))?;
    let status = resp.status();
    let value: Value = resp.json().await.unwrap_or(Value::Null);
    if !status.is_success() {
        let message = value.get("error").and_then(Value::as_str).unwrap_or("request failed").to_string();
        bail!("{status}: {message}");
    }
    Ok(value)
}

pub async fn create(
    server: &str,
    spec_path: String,
    target_dir: String,
    developer_count: Option<u32>,
    autonomy_mode: Option<String>,
    sprint_id: Option<String>,
    name: Option<String>,
    json_mode: bool,
) -> Result<()> {
    let client = reqwest::Client::new();
    let body = serde_json::json!({
        "specPath": spec_path,
        "targetDir": target_dir,
        "developerCount": developer_count,
        "autonomyMode": autonomy_mode,
        "sprintId": sprint_id,
        "name": name,
    });
    let value = request(&client, reqwest::Method::POST, format!("{server}/api/sprints"), Some(body)).await?;
    output(&SprintValue(value), json_mode);
    Ok(())
}

pub async fn list(server: &str, json_mode: bool) -> Result<()> {
    let client = reqwest::Client::new();
    let value = request(&client, reqwest::Method::GET, format!("{server}/api/sprints"), None).await?;

    if json_mode {
        output(&SprintValue(value), true);
        return Ok(());
    }

    let Value::Array(sprints) = &value else {
        output(&SprintValue(value), false);
        return Ok(());
    };

    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(["ID", "NAME", "STATUS", "AUTONOMY", "WAVE", "CYCLE", "COST (USD)"].map(Cell::new));

    for sprint in sprints {
        table.add_row([
            sprint.get("id").and_then(Value::as_str).unwrap_or("-").to_string(),
            sprint.get("name").and_then(Value::as_str).unwrap_or("-").to_string(),
            sprint.get("status").and_then(Value::as_str).unwrap_or("-").to_string(),
            sprint.get("autonomy_mode").and_then(Value::as_str).unwrap_or("-").to_string(),
            sprint.get("current_wave").map(|v| v.to_string()).unwrap_or_default(),
            sprint.get("review_cycle").map(|v| v.to_string()).unwrap_or_default(),
            sprint.get("total_cost_usd").map(|v| format!("{:.2}", v.as_f64().unwrap_or_default())).unwrap_or_default(),
        ]);
    }

    if sprints.is_empty() {
        println!("No sprints found.");
    } else {
        println!("{} sprint(s):\n{table}", sprints.len());
    }
    Ok(())
}

pub async fn show(server: &str, sprint_id: &str, json_mode: bool) -> Result<()> {
    let client = reqwest::Client::new();
    let value = request(&client, reqwest::Method::GET, format!("{server}/api/sprints/{sprint_id}"), None).await?;
    output(&SprintValue(value), json_mode);
    Ok(())
}

async fn post_action(server: &str, sprint_id: &str, action: &str, json_mode: bool) -> Result<()> {
    let client = reqwest::Client::new();
    let value = request(&client, reqwest::Method::POST, format!("{server}/api/sprints/{sprint_id}/{action}"), None).await?;
    output(&SprintValue(value), json_mode);
    Ok(())
}

pub async fn start(server: &str, sprint_id: &str, json_mode: bool) -> Result<()> {
    post_action(server, sprint_id, "start", json_mode).await
}

pub async fn approve(server: &str, sprint_id: &str, json_mode: bool) -> Result<()> {
    post_action(server, sprint_id, "approve", json_mode).await
}

pub async fn pause(server: &str, sprint_id: &str, json_mode: bool) -> Result<()> {
    post_action(server, sprint_id, "pause", json_mode).await
}

pub async fn resume(server: &str, sprint_id: &str, json_mode: bool) -> Result<()> {
    post_action(server, sprint_id, "resume", json_mode).await
}

pub async fn cancel(server: &str, sprint_id: &str, json_mode: bool) -> Result<()> {
    post_action(server, sprint_id, "cancel", json_mode).await
}

pub async fn restart(server: &str, sprint_id: &str, json_mode: bool) -> Result<()> {
    post_action(server, sprint_id, "restart", json_mode).await
}

pub async fn complete(server: &str, sprint_id: &str, json_mode: bool) -> Result<()> {
    post_action(server, sprint_id, "complete", json_mode).await
}

pub async fn merge_local(server: &str, sprint_id: &str, json_mode: bool) -> Result<()> {
    let client = reqwest::Client::new();
    request(&client, reqwest::Method::POST, format!("{server}/api/sprints/{sprint_id}/merge-local"), None).await?;
    output(&SprintValue(serde_json::json!({"sprintId": sprint_id, "mergedLocal": true})), json_mode);
    Ok(())
}

pub async fn retry_task(server: &str, sprint_id: &str, task_id: u64, json_mode: bool) -> Result<()> {
    let client = reqwest::Client::new();
    request(&client, reqwest::Method::POST, format!("{server}/api/tasks/{sprint_id}/{task_id}/retry"), None).await?;
    output(&SprintValue(serde_json::json!({"sprintId": sprint_id, "taskId": task_id, "retried": true})), json_mode);
    Ok(())
}

pub async fn logs(server: &str, sprint_id: &str, json_mode: bool) -> Result<()> {
    let client = reqwest::Client::new();
    let value = request(&client, reqwest::Method::GET, format!("{server}/api/sprints/{sprint_id}/logs"), None).await?;

    if json_mode {
        output(&SprintValue(value), true);
        return Ok(());
    }

    let Value::Array(logs) = &value else {
        output(&SprintValue(value), false);
        return Ok(());
    };
    for entry in logs {
        let role = entry.get("role").and_then(Value::as_str).unwrap_or("unknown");
        let content = entry.get("content").and_then(Value::as_str).unwrap_or("");
        println!("=== {role} ===\n{content}");
    }
    Ok(())
}
