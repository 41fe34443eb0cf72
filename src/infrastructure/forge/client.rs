//! GitHub-compatible REST client for opening pull requests.

use reqwest::Client;
use serde::Deserialize;

use crate::domain::errors::{DomainError, DomainResult};

/// Minimal shape of a created pull request, enough for the worker to
/// report a URL back to observers.
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestRef {
    pub number: u64,
    pub html_url: String,
}

/// Thin wrapper over a forge's REST API (GitHub's `/repos/{owner}/{repo}`
/// shape; GitHub Enterprise and compatible forges share it).
#[derive(Debug, Clone)]
pub struct ForgeClient {
    http: Client,
    api_base: String,
    token: String,
}

impl ForgeClient {
    pub fn new(api_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self { http: Client::new(), api_base: api_base.into(), token: token.into() }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.api_base, path))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "sprintforge")
    }

    /// Open a pull request for `head` against `base` in `owner/repo`.
    pub async fn create_pull_request(&self, owner: &str, repo: &str, title: &str, body: &str, head: &str, base: &str) -> DomainResult<PullRequestRef> {
        let path = format!("/repos/{owner}/{repo}/pulls");
        let payload = serde_json::json!({"title": title, "body": body, "head": head, "base": base});

        let resp = self
            .request(reqwest::Method::POST, &path)
            .json(&payload)
            .send()
            .await
            .map_err(|e| DomainError::ForgeFailed(format!("create_pull_request request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body_text = resp.text().await.unwrap_or_default();
            return Err(DomainError::ForgeFailed(format!("create_pull_request returned {status}: {body_text}")));
        }

        resp.json::<PullRequestRef>().await.map_err(|e| DomainError::ForgeFailed(format!("create_pull_request parse failed: {e}")))
    }
}

/// Parse `owner/repo` out of a `git remote get-url origin` style URL,
/// covering both `git@host:owner/repo.git` and `https://host/owner/repo.git`.
pub fn parse_owner_repo(remote_url: &str) -> Option<(String, String)> {
    let trimmed = remote_url.trim().trim_end_matches(".git");
    let path = if let Some(rest) = trimmed.strip_prefix("git@") {
        rest.split_once(':').map(|(_, p)| p)?
    } else {
        let without_scheme = trimmed.split_once("://").map_or(trimmed, |(_, rest)| rest);
        let (_, rest) = without_scheme.split_once('/')?;
        rest
    };
    let (owner, repo) = path.split_once('/')?;
    Some((owner.to_string(), repo.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ssh_remote() {
        assert_eq!(parse_owner_repo("git@github.com:acme/widgets.git"), Some(("acme".to_string(), "widgets".to_string())));
    }

    #[test]
    fn parses_https_remote() {
        assert_eq!(parse_owner_repo("https://github.com/acme/widgets.git"), Some(("acme".to_string(), "widgets".to_string())));
    }

    #[test]
    fn rejects_malformed_remote() {
        assert_eq!(parse_owner_repo("not-a-url"), None);
    }
}
