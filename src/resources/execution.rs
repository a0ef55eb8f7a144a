use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::resources::generic_map::GenericMap;
use crate::utils::Condition;

#[derive(CustomResource, Debug, Serialize, Deserialize, Default, Clone, JsonSchema)]
#[kube(
    group = "terraformcontroller.cattle.io",
    version = "v1",
    kind = "Execution",
    namespaced,
    status = "ExecutionStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".spec.stateName"}"#,
    printcolumn = r#"{"name":"Action","type":"string","jsonPath":".spec.action"}"#,
    printcolumn = r#"{"name":"Applied","type":"string","jsonPath":".status.conditions[?(@.type==\"Applied\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSpec {
    pub state_name: String,

    /// The module content frozen at spawn time, so later Module edits don't retroactively
    /// change what an already-created Execution will apply.
    #[serde(default)]
    pub content: BTreeMap<String, String>,

    pub content_hash: String,
    pub run_hash: String,
    pub execution_version: i32,

    /// Name of the Secret holding the rendered var-file for this run.
    pub secret_name: String,

    pub auto_confirm: bool,

    pub action: Action,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    #[default]
    Create,
    Destroy,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Create => write!(f, "create"),
            Action::Destroy => write!(f, "destroy"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStatus {
    pub conditions: Vec<ExecutionCondition>,
    pub outputs: Option<GenericMap>,
    pub job_logs: Option<String>,
    pub denied: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    pub reason: Option<String>,
    pub message: Option<String>,
    #[serde(with = "crate::resources::custom_rfc3339")]
    #[schemars(with = "Option<String>")]
    pub last_transition_time: Option<chrono::DateTime<chrono::FixedOffset>>,
}

impl Condition for ExecutionCondition {
    fn type_(&self) -> &str {
        &self.type_
    }

    fn status(&self) -> &str {
        &self.status
    }

    fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

pub mod condition_types {
    pub const PLANNED: &str = "Planned";
    pub const APPLIED: &str = "Applied";
    pub const FAILED: &str = "Failed";
}

/// The three values the `approved` annotation may hold. Unset/empty is treated as `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approval {
    Pending,
    Yes,
    No,
}

impl Approval {
    pub fn from_annotation(value: Option<&str>) -> Self {
        match value {
            Some("yes") => Approval::Yes,
            Some("no") => Approval::No,
            _ => Approval::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approval_from_annotation() {
        // Given / When / Then
        assert_eq!(Approval::from_annotation(Some("yes")), Approval::Yes);
        assert_eq!(Approval::from_annotation(Some("no")), Approval::No);
        assert_eq!(Approval::from_annotation(Some("")), Approval::Pending);
        assert_eq!(Approval::from_annotation(None), Approval::Pending);
    }

    #[test]
    fn test_action_display_matches_executor_contract() {
        // Given / When / Then
        assert_eq!(Action::Create.to_string(), "create");
        assert_eq!(Action::Destroy.to_string(), "destroy");
    }
}
