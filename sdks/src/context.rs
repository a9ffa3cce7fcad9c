// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent identity detection
//!
//! Agent ids are stable for a given user, host and project so that every
//! hook invocation from the same checkout reports as the same agent:
//! `<user>-<short host>-<8 hex of sha256(host:user:project root)>`.

use sha2::{Digest, Sha256};
use std::env;
use std::path::{Path, PathBuf};

use afk_core::domain::events::EventData;

pub const SESSION_ID_ENV: &str = "AFK_SESSION_ID";
pub const COMPUTER_NAME_ENV: &str = "AFK_COMPUTER_NAME";

/// Facts about the machine and user running the hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    pub hostname: String,
    pub username: String,
    pub platform: String,
    pub computer_name: Option<String>,
}

impl HostIdentity {
    pub fn current() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        let username = env::var("USER")
            .or_else(|_| env::var("USERNAME"))
            .unwrap_or_else(|_| "user".to_string());
        Self {
            hostname,
            username,
            platform: env::consts::OS.to_string(),
            computer_name: env::var(COMPUTER_NAME_ENV).ok().filter(|v| !v.is_empty()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentContext {
    pub agent_id: String,
    pub agent_name: String,
    pub computer_id: String,
    pub computer_name: String,
    pub hostname: String,
    pub platform: String,
    pub working_directory: PathBuf,
}

impl AgentContext {
    /// Detect the context of the current process.
    pub fn detect() -> Self {
        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::detect_from(&HostIdentity::current(), &cwd)
    }

    pub fn detect_from(identity: &HostIdentity, cwd: &Path) -> Self {
        let project_root = find_git_root(cwd).unwrap_or_else(|| cwd.to_path_buf());
        let agent_hash = short_hash(&format!(
            "{}:{}:{}",
            identity.hostname,
            identity.username,
            project_root.display()
        ));
        let short_host = identity.hostname.split('.').next().unwrap_or_default();

        let agent_name = project_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| project_root.display().to_string());

        Self {
            agent_id: format!("{}-{}-{}", identity.username, short_host, agent_hash),
            agent_name,
            computer_id: format!(
                "computer-{}",
                short_hash(&format!("{}:{}", identity.hostname, identity.platform))
            ),
            computer_name: identity
                .computer_name
                .clone()
                .unwrap_or_else(|| format!("{}'s {}", identity.username, identity.hostname)),
            hostname: identity.hostname.clone(),
            platform: identity.platform.clone(),
            working_directory: cwd.to_path_buf(),
        }
    }

    /// Copy the machine and project fields into an event payload.
    pub fn apply_to(&self, data: &mut EventData) {
        data.computer_id = Some(self.computer_id.clone());
        data.computer_name = Some(self.computer_name.clone());
        data.hostname = Some(self.hostname.clone());
        data.platform = Some(self.platform.clone());
        data.agent_name = Some(self.agent_name.clone());
        data.working_directory = Some(self.working_directory.display().to_string());
    }
}

/// Walk up from `start` looking for a directory containing `.git`.
pub fn find_git_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
}

/// Session id precedence: explicit environment value, then the id reported
/// on stdin, then a freshly generated one.
pub fn resolve_session_id(env_value: Option<String>, stdin_session: Option<&str>) -> String {
    env_value
        .filter(|v| !v.is_empty())
        .or_else(|| stdin_session.filter(|v| !v.is_empty()).map(str::to_string))
        .unwrap_or_else(generate_session_id)
}

pub fn generate_session_id() -> String {
    format!(
        "session-{}-{:08x}",
        chrono::Utc::now().timestamp_millis(),
        rand::random::<u32>()
    )
}

fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..8].to_string()
}
