// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registered fleet instances.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

/// Instance health/availability status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Active,
    Idle,
    Busy,
    Offline,
}

impl InstanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InstanceStatus::Active => "ACTIVE",
            InstanceStatus::Idle => "IDLE",
            InstanceStatus::Busy => "BUSY",
            InstanceStatus::Offline => "OFFLINE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(InstanceStatus::Active),
            "IDLE" => Some(InstanceStatus::Idle),
            "BUSY" => Some(InstanceStatus::Busy),
            "OFFLINE" => Some(InstanceStatus::Offline),
            _ => None,
        }
    }

    /// Eligible to receive assignments.
    pub fn accepts_work(self) -> bool {
        matches!(self, InstanceStatus::Active | InstanceStatus::Idle)
    }
}

/// A worker/agent process registered in the fleet.
///
/// Instance ids are caller-supplied opaque strings (`worker-1`, `w1`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: String,
    /// Role tags used for assignment routing (sorted for stable serde)
    #[serde(default)]
    pub roles: BTreeSet<String>,
    pub status: InstanceStatus,
    pub last_seen: u64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Instance {
    pub fn new(id: impl Into<String>, roles: impl IntoIterator<Item = impl Into<String>>, now_ms: u64) -> Self {
        Self {
            id: id.into(),
            roles: roles.into_iter().map(Into::into).collect(),
            status: InstanceStatus::Active,
            last_seen: now_ms,
            metadata: HashMap::new(),
        }
    }

    /// Capability check: the instance's declared capabilities (metadata key
    /// `capabilities`, array of strings) must cover every requirement.
    pub fn has_capabilities(&self, required: &[String]) -> bool {
        if required.is_empty() {
            return true;
        }
        let Some(caps) = self.metadata.get("capabilities").and_then(|v| v.as_array()) else {
            return false;
        };
        required
            .iter()
            .all(|req| caps.iter().any(|c| c.as_str() == Some(req.as_str())))
    }
}

#[cfg(test)]
#[path = "instance_tests.rs"]
mod tests;
