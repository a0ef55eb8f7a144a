use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, PodSpec, PodTemplateSpec, Secret, ServiceAccount,
};
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::runtime::reflector::Lookup as _;

use crate::controllers::gather::Input;
use crate::error::ReconcileError;
use crate::labels;
use crate::resources::{Action, Execution, ExecutionSpec, State};

/// Everything spawned together for a single Execution: the Execution itself, the rendered
/// var-file Secret, a per-run ServiceAccount and ClusterRoleBinding, and the Job that runs the
/// executor. The Job owns the other three so that deleting it cascades cleanup.
pub struct ExecutionResources {
    pub execution: Execution,
    pub var_secret: Secret,
    pub service_account: ServiceAccount,
    pub role_binding: ClusterRoleBinding,
    pub job: Job,
}

pub fn build(
    state: &State,
    input: &Input,
    run_hash: &str,
    action: Action,
) -> Result<ExecutionResources, ReconcileError> {
    let namespace = state
        .namespace()
        .ok_or(ReconcileError::PreconditionFailed("State has no namespace"))?;
    let state_name = state
        .name()
        .ok_or(ReconcileError::PreconditionFailed("State has no name"))?;

    let run_name = labels::execution_name(&state_name, run_hash, &action.to_string());

    let var_file = render_var_file(input)?;

    let mut var_secret = Secret::default();
    var_secret.metadata.namespace = Some(namespace.to_string());
    var_secret.metadata.name = Some(run_name.clone());
    var_secret.string_data = Some(BTreeMap::from([("varFile".to_string(), var_file)]));

    let mut service_account = ServiceAccount::default();
    service_account.metadata.namespace = Some(namespace.to_string());
    service_account.metadata.name = Some(run_name.clone());

    let mut role_binding = ClusterRoleBinding::default();
    role_binding.metadata.name = Some(format!("{namespace}-{run_name}"));
    role_binding.role_ref = RoleRef {
        api_group: "rbac.authorization.k8s.io".to_string(),
        kind: "ClusterRole".to_string(),
        name: "cluster-admin".to_string(),
    };
    role_binding.subjects = Some(vec![Subject {
        kind: "ServiceAccount".to_string(),
        name: run_name.clone(),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }]);

    let mut execution = Execution::new(
        &run_name,
        ExecutionSpec {
            state_name: state_name.to_string(),
            content: module_content(input),
            content_hash: input.module.status.content_hash.clone(),
            run_hash: run_hash.to_string(),
            execution_version: state.spec.version.max(1),
            secret_name: run_name.clone(),
            auto_confirm: state.spec.auto_confirm,
            action: action.clone(),
        },
    );
    execution.metadata.labels = Some(BTreeMap::from([
        (labels::STATE_NAME.to_string(), state_name.to_string()),
        (labels::RUN_HASH.to_string(), run_hash.to_string()),
    ]));

    let mut env_vars: Vec<EnvVar> = input
        .env_vars
        .iter()
        .map(|(k, v)| EnvVar {
            name: k.clone(),
            value: Some(v.clone()),
            ..Default::default()
        })
        .collect();

    env_vars.push(EnvVar {
        name: "TF_IN_AUTOMATION".to_string(),
        value: Some("true".to_string()),
        ..Default::default()
    });
    env_vars.push(EnvVar {
        name: "EXECUTOR_ACTION".to_string(),
        value: Some(action.to_string()),
        ..Default::default()
    });
    env_vars.push(EnvVar {
        name: "EXECUTOR_RUN_NAME".to_string(),
        value: Some(run_name.clone()),
        ..Default::default()
    });
    env_vars.push(EnvVar {
        name: "EXECUTOR_NAMESPACE".to_string(),
        value: Some(namespace.to_string()),
        ..Default::default()
    });

    let mut job = Job::default();
    job.metadata.namespace = Some(namespace.to_string());
    job.metadata.name = Some(format!("job-{run_name}"));
    job.metadata.labels = Some(BTreeMap::from([
        (labels::STATE_NAME.to_string(), state_name.to_string()),
        (labels::RUN_HASH.to_string(), run_hash.to_string()),
    ]));

    job.spec = Some(JobSpec {
        backoff_limit: Some(3),
        template: PodTemplateSpec {
            metadata: None,
            spec: Some(PodSpec {
                restart_policy: Some("OnFailure".to_string()),
                service_account_name: Some(run_name.clone()),
                containers: vec![Container {
                    name: "executor".to_string(),
                    image: Some(input.image.clone()),
                    env: Some(env_vars),
                    ..Default::default()
                }],
                ..Default::default()
            }),
        },
        ..Default::default()
    });

    Ok(ExecutionResources {
        execution,
        var_secret,
        service_account,
        role_binding,
        job,
    })
}

/// Returns the given child's owner-reference to `job`, for retrofitting after creation.
pub fn owner_reference_to(job: &Job) -> Result<OwnerReference, ReconcileError> {
    Ok(OwnerReference {
        api_version: "batch/v1".to_string(),
        kind: "Job".to_string(),
        name: job
            .name()
            .ok_or(ReconcileError::PreconditionFailed("Job has no name"))?
            .to_string(),
        uid: job
            .uid()
            .ok_or(ReconcileError::PreconditionFailed("Job has no uid"))?,
        ..Default::default()
    })
}

fn module_content(input: &Input) -> BTreeMap<String, String> {
    match &input.module.spec.source {
        crate::resources::ModuleSource::Inline { inline } => inline.clone(),
        crate::resources::ModuleSource::Git { git } => {
            let mut content = BTreeMap::new();
            content.insert("url".to_string(), git.url.clone());
            let commit = git.commit.clone().or_else(|| input.module.status.resolved_commit.clone());
            if let Some(commit) = commit {
                content.insert("commit".to_string(), commit);
            }
            content
        }
    }
}

fn render_var_file(input: &Input) -> Result<String, ReconcileError> {
    let mut vars = serde_json::Map::new();

    for config in &input.configs {
        if let Some(data) = &config.data {
            for (key, value) in data {
                vars.insert(key.clone(), serde_json::Value::String(value.clone()));
            }
        }
    }

    for secret in &input.secrets {
        if let Some(data) = &secret.data {
            for (key, value) in data {
                vars.insert(
                    key.clone(),
                    serde_json::Value::String(String::from_utf8_lossy(&value.0).into_owned()),
                );
            }
        }
    }

    Ok(serde_json::to_string(&serde_json::Value::Object(vars))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{Module, ModuleSpec, ModuleSource, StateSpec};

    fn test_state() -> State {
        State::new(
            "demo",
            StateSpec {
                module_name: "demo-module".to_string(),
                ..Default::default()
            },
        )
    }

    fn test_input() -> Input {
        Input {
            module: Module::new(
                "demo-module",
                ModuleSpec {
                    source: ModuleSource::Inline {
                        inline: BTreeMap::from([("main.tf".to_string(), "".to_string())]),
                    },
                },
            ),
            configs: Vec::new(),
            secrets: Vec::new(),
            env_vars: Vec::new(),
            executions: BTreeMap::new(),
            image: "rancher/terraform-controller-executor:dev".to_string(),
        }
    }

    #[test]
    fn test_build_names_job_and_execution_consistently() {
        // Given
        let mut state = test_state();
        state.metadata.namespace = Some("ns".to_string());
        let input = test_input();

        // When
        let resources = build(&state, &input, "abc1234567", Action::Create).unwrap();

        // Then
        assert_eq!(resources.execution.metadata.name.as_deref(), Some("demo-abc1234567"));
        assert_eq!(resources.job.metadata.name.as_deref(), Some("job-demo-abc1234567"));
        assert_eq!(resources.var_secret.metadata.name.as_deref(), Some("demo-abc1234567"));
    }

    #[test]
    fn test_build_destroy_suffixes_name() {
        // Given
        let mut state = test_state();
        state.metadata.namespace = Some("ns".to_string());
        let input = test_input();

        // When
        let resources = build(&state, &input, "abc1234567", Action::Destroy).unwrap();

        // Then
        assert_eq!(
            resources.execution.metadata.name.as_deref(),
            Some("demo-abc1234567-destroy")
        );
    }
}
