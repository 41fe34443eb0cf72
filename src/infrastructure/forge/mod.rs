//! Forge adapter: a GitHub-compatible REST client used by the
//! PR-create stage's fallback path (`SPEC_FULL.md` §10.6).
//!
//! The PR-create agent is expected to push and open its own pull
//! request via whatever forge CLI it has on PATH; this client exists
//! for the corroborating case where the agent's own attempt didn't
//! report back a PR URL, so the worker can open one directly.

pub mod client;

pub use client::{parse_owner_repo, ForgeClient, PullRequestRef};
