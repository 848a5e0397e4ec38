//! `EpisodicEvent` (§3): a high-level run/error/retry record with retention, named by the
//! spec's data model but not assigned an owner there — given a minimal shape here so the
//! repository in `msgforge-store` has something concrete to insert and prune.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodicKind {
    Run,
    Error,
    Retry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicEvent {
    pub id: Uuid,
    pub kind: EpisodicKind,
    pub component: String,
    pub tenant_id: Option<String>,
    pub summary: String,
    pub detail: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl EpisodicEvent {
    pub fn new(kind: EpisodicKind, component: impl Into<String>, summary: impl Into<String>, detail: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            component: component.into(),
            tenant_id: None,
            summary: summary.into(),
            detail,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }
}
