use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::utils::Condition;

#[derive(CustomResource, Debug, Serialize, Deserialize, Default, Clone, JsonSchema)]
#[kube(
    group = "terraformcontroller.cattle.io",
    version = "v1",
    kind = "State",
    namespaced,
    status = "StateStatus",
    printcolumn = r#"{"name":"Module","type":"string","jsonPath":".spec.moduleName"}"#,
    printcolumn = r#"{"name":"Execution","type":"string","jsonPath":".status.currentExecution"}"#,
    printcolumn = r#"{"name":"Deployed","type":"string","jsonPath":".status.conditions[?(@.type==\"JobDeployed\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StateSpec {
    pub module_name: String,

    #[serde(default)]
    pub variables: Variables,

    /// Maps a local variable name to the name of a sibling State whose output should be
    /// substituted in. Resolved at gather time to that State's current execution.
    #[serde(default)]
    pub data: BTreeMap<String, String>,

    /// When true, the executor applies the plan without waiting for the `approved` annotation.
    #[serde(default)]
    pub auto_confirm: bool,

    /// When true, deleting this State first spawns a destroy run and waits for it to finish.
    #[serde(default)]
    pub destroy_on_delete: bool,

    /// Executor image; defaults to the built-in image when unset.
    pub image: Option<String>,

    /// Bump to force a new run without any variable change.
    #[serde(default = "default_version")]
    pub version: i32,
}

fn default_version() -> i32 {
    1
}

pub const DEFAULT_EXECUTOR_IMAGE: &str = "rancher/terraform-controller-executor:dev";

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Variables {
    #[serde(default)]
    pub config_names: Vec<String>,
    #[serde(default)]
    pub secret_names: Vec<String>,
    #[serde(default)]
    pub env_config_names: Vec<String>,
    #[serde(default)]
    pub env_secret_names: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StateStatus {
    pub current_execution: Option<String>,
    pub last_run_hash: Option<String>,
    pub conditions: Vec<StateCondition>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StateCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    pub reason: Option<String>,
    pub message: Option<String>,
    #[serde(with = "crate::resources::custom_rfc3339")]
    #[schemars(with = "Option<String>")]
    pub last_transition_time: Option<chrono::DateTime<chrono::FixedOffset>>,
}

impl Condition for StateCondition {
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
    pub const MISSING_INFO: &str = "MissingInfo";
    pub const JOB_DEPLOYED: &str = "JobDeployed";
    pub const DESTROYED: &str = "Destroyed";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_version_is_one() {
        // Given
        let yaml = r#"
apiVersion: terraformcontroller.cattle.io/v1
kind: State
metadata:
  name: example
spec:
  moduleName: mymodule
"#;

        // When
        let state = serde_yaml::from_str::<State>(yaml).unwrap();

        // Then
        assert_eq!(state.spec.version, 1);
        assert!(!state.spec.auto_confirm);
        assert!(!state.spec.destroy_on_delete);
    }
}
