use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Desired state for one (user, container name) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecord {
    pub record_id: Uuid,
    pub user_id: String,
    pub container_name: String,
    /// Reference the container was created from, kept for provenance and recreation.
    pub image_ref: Option<String>,
    pub desired_running: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContainerRecord {
    pub fn new(
        user_id: impl Into<String>,
        container_name: impl Into<String>,
        image_ref: Option<String>,
        desired_running: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            record_id: Uuid::new_v4(),
            user_id: user_id.into(),
            container_name: container_name.into(),
            image_ref,
            desired_running,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransitionAction {
    Create,
    Start,
    Stop,
    Remove,
    Reconcile,
}

impl TransitionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionAction::Create => "create",
            TransitionAction::Start => "start",
            TransitionAction::Stop => "stop",
            TransitionAction::Remove => "remove",
            TransitionAction::Reconcile => "reconcile",
        }
    }
}

impl fmt::Display for TransitionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransitionAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(TransitionAction::Create),
            "start" => Ok(TransitionAction::Start),
            "stop" => Ok(TransitionAction::Stop),
            "remove" => Ok(TransitionAction::Remove),
            "reconcile" => Ok(TransitionAction::Reconcile),
            _ => Err(format!("Invalid transition action: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TransitionOutcome {
    Success,
    Failure { error: String },
}

impl TransitionOutcome {
    pub fn from_result<T, E: fmt::Display>(result: &Result<T, E>) -> Self {
        match result {
            Ok(_) => TransitionOutcome::Success,
            Err(e) => TransitionOutcome::Failure {
                error: e.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TransitionOutcome::Success)
    }
}

/// Append-only audit entry. Never consulted for control decisions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusTransition {
    /// Assigned by the store on insert.
    pub id: Option<i64>,
    pub user_id: String,
    pub container_name: String,
    pub action: TransitionAction,
    pub previous_desired: Option<bool>,
    pub next_desired: Option<bool>,
    pub outcome: TransitionOutcome,
    pub created_at: DateTime<Utc>,
}

impl StatusTransition {
    pub fn new(
        user_id: impl Into<String>,
        container_name: impl Into<String>,
        action: TransitionAction,
        previous_desired: Option<bool>,
        next_desired: Option<bool>,
        outcome: TransitionOutcome,
    ) -> Self {
        Self {
            id: None,
            user_id: user_id.into(),
            container_name: container_name.into(),
            action,
            previous_desired,
            next_desired,
            outcome,
            created_at: Utc::now(),
        }
    }
}

/// Live runtime state. Always fetched fresh, never cached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeContainerView {
    pub name: String,
    pub running: bool,
    pub status: String,
    pub image_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeContainerSummary {
    pub id: String,
    /// Names as reported by the daemon, without the leading `/`.
    pub names: Vec<String>,
    pub image: String,
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeImageSummary {
    pub id: String,
    pub repo_tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    /// Relative path inside the build context.
    pub path: String,
    pub contents: Vec<u8>,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
        }
    }
}

/// One image build. Lives only for the duration of the build call.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildRequest {
    pub service_name: String,
    pub files: Vec<SourceFile>,
    pub dockerfile: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateContainerRequest {
    pub image: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerNameRequest {
    #[serde(alias = "image")]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerResponse {
    pub name: String,
    pub image: Option<String>,
    pub running: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildImageResponse {
    pub image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListContainersResponse {
    pub containers: Vec<ContainerRecord>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryResponse {
    pub entries: Vec<StatusTransition>,
    pub count: usize,
}
