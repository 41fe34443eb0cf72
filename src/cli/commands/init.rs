//! Implementation of `sprintctl init`: scaffolds the `.sprint/` project
//! directory (config file, sprint root) a fresh target repository
//! needs before its first sprint (`SPEC_FULL.md` §1).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::fs;

use crate::cli::output::{output, CommandOutput};
use crate::infrastructure::config::Config;

#[derive(Debug, Serialize)]
pub struct InitOutput {
    pub success: bool,
    pub message: String,
    pub initialized_path: PathBuf,
    pub directories_created: Vec<String>,
}

impl CommandOutput for InitOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![self.message.clone()];
        if !self.directories_created.is_empty() {
            lines.push("\nCreated:".to_string());
            for dir in &self.directories_created {
                lines.push(format!("  - {dir}"));
            }
        }
        lines.join("\n")
    }
}

pub async fn execute(force: bool, path: PathBuf, json_mode: bool) -> Result<()> {
    let target_path = if path.is_absolute() { path.clone() } else { std::env::current_dir().context("failed to get current directory")?.join(&path) };

    let sprint_dir = target_path.join(".sprint");
    if sprint_dir.exists() && !force {
        output(
            &InitOutput {
                success: false,
                message: "project already initialized; use --force to reinitialize".to_string(),
                initialized_path: target_path,
                directories_created: vec![],
            },
            json_mode,
        );
        return Ok(());
    }

    if force && sprint_dir.exists() {
        fs::remove_dir_all(&sprint_dir).await.context("failed to remove existing .sprint directory")?;
    }

    let mut created = Vec::new();
    for dir in [sprint_dir.clone(), sprint_dir.join("sprints"), sprint_dir.join("role-logs")] {
        fs::create_dir_all(&dir).await.with_context(|| format!("failed to create {}", dir.display()))?;
        created.push(relative_label(&target_path, &dir));
    }

    let config_path = sprint_dir.join("config.yaml");
    let config_yaml = serde_yaml::to_string(&Config::default()).context("failed to render default config")?;
    fs::write(&config_path, config_yaml).await.with_context(|| format!("failed to write {}", config_path.display()))?;
    created.push(relative_label(&target_path, &config_path));

    let gitignore_path = sprint_dir.join(".gitignore");
    fs::write(&gitignore_path, "local.yaml\nqueue.db\nqueue.db-*\nsprints/\n").await.ok();

    output(
        &InitOutput {
            success: true,
            message: format!("initialized sprintforge project at {}", target_path.display()),
            initialized_path: target_path,
            directories_created: created,
        },
        json_mode,
    );
    Ok(())
}

fn relative_label(base: &Path, path: &Path) -> String {
    path.strip_prefix(base).unwrap_or(path).display().to_string()
}
