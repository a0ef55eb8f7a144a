//! The protocol that runs inside the executor job pod: clone the module, write variables, run
//! the IaC tool through its plan/approve/apply lifecycle, persist outputs and logs, then delete
//! its own Job so owner-reference cascade cleans up the rest.

use std::path::PathBuf;
use std::time::Duration;

use futures_util::StreamExt as _;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Secret;
use kube::Api;
use kube::api::{DeleteParams, PostParams, PropagationPolicy};
use kube::runtime::{WatchStreamExt as _, watcher};
use tracing::warn;

use crate::error::ExecutorError;
use crate::executor::terraform::Runner;
use crate::gz;
use crate::resources::execution::condition_types;
use crate::resources::{Action, Approval, Execution, ExecutionCondition, GenericMap};

pub struct ExecutorConfig {
    pub run_name: String,
    pub action: Action,
    pub namespace: String,
    pub debug: bool,
}

impl ExecutorConfig {
    pub fn from_env() -> Result<Self, ExecutorError> {
        let run_name = require_env("EXECUTOR_RUN_NAME")?;
        let action_str = require_env("EXECUTOR_ACTION")?;
        let namespace = require_env("EXECUTOR_NAMESPACE")?;
        let debug = std::env::var("EXECUTOR_DEBUG").as_deref() == Ok("true");

        let action = match action_str.as_str() {
            "destroy" => Action::Destroy,
            _ => Action::Create,
        };

        Ok(Self {
            run_name,
            action,
            namespace,
            debug,
        })
    }
}

fn require_env(name: &'static str) -> Result<String, ExecutorError> {
    std::env::var(name).map_err(|_| ExecutorError::MissingEnv(name))
}

pub async fn run(client: kube::Client, config: ExecutorConfig) -> Result<(), ExecutorError> {
    let executions_api = Api::<Execution>::namespaced(client.clone(), &config.namespace);
    let secrets_api = Api::<Secret>::namespaced(client.clone(), &config.namespace);
    let jobs_api = Api::<Job>::namespaced(client.clone(), &config.namespace);

    let execution = executions_api.get(&config.run_name).await?;

    let workspace = std::env::temp_dir().join(&config.run_name);
    tokio::fs::create_dir_all(&workspace).await?;

    materialise_module(&execution, &workspace).await?;
    write_var_file(&secrets_api, &execution, &workspace).await?;
    write_backend_config(&execution, &config.namespace, &workspace).await?;

    let mut runner = Runner::new(&workspace);

    runner.init().await?;
    runner.plan(execution.spec.action == Action::Destroy).await?;

    set_condition(&executions_api, &config.run_name, condition_types::PLANNED, true, "PlanComplete").await?;

    if !should_proceed(&executions_api, &config, &execution).await? {
        warn!("{}", ExecutorError::Denied(config.run_name.clone()));
        set_denied(&executions_api, &config.run_name).await?;
        persist_logs(&executions_api, &config.run_name, &runner).await?;
        return Ok(());
    }

    match execution.spec.action {
        Action::Create => {
            runner.apply().await?;
        }
        Action::Destroy => {
            runner.destroy().await?;
        }
    }

    let outputs = runner.output().await.ok();

    set_applied(&executions_api, &config.run_name, outputs).await?;
    persist_logs(&executions_api, &config.run_name, &runner).await?;

    delete_self_job(&jobs_api, &config.run_name).await?;

    Ok(())
}

async fn materialise_module(execution: &Execution, workspace: &PathBuf) -> Result<(), ExecutorError> {
    if let (Some(url), Some(commit)) = (
        execution.spec.content.get("url"),
        execution.spec.content.get("commit"),
    ) {
        crate::git::clone_at_commit(url, commit, workspace).await?;
        return Ok(());
    }

    for (file_name, contents) in &execution.spec.content {
        let path = workspace.join(file_name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, contents).await?;
    }

    Ok(())
}

async fn write_var_file(
    secrets_api: &Api<Secret>,
    execution: &Execution,
    workspace: &PathBuf,
) -> Result<(), ExecutorError> {
    let secret = secrets_api.get(&execution.spec.secret_name).await?;
    let var_file = secret
        .string_data
        .as_ref()
        .and_then(|d| d.get("varFile"))
        .cloned()
        .or_else(|| {
            secret
                .data
                .as_ref()
                .and_then(|d| d.get("varFile"))
                .map(|v| String::from_utf8_lossy(&v.0).into_owned())
        })
        .ok_or_else(|| ExecutorError::MissingSecretName(execution.spec.secret_name.clone()))?;

    tokio::fs::write(workspace.join("terraform.tfvars.json"), var_file).await?;

    Ok(())
}

async fn write_backend_config(
    execution: &Execution,
    namespace: &str,
    workspace: &PathBuf,
) -> Result<(), ExecutorError> {
    let hostname = std::env::var("BACKEND_HOSTNAME").unwrap_or_else(|_| "tf-controller-backend".to_string());

    let config = format!(
        r#"terraform {{
  backend "remote" {{
    hostname = "{hostname}"
    organization = "{namespace}"
    workspaces {{
      name = "{state}"
    }}
  }}
}}
"#,
        state = execution.spec.state_name,
    );

    tokio::fs::write(workspace.join("backend.tf"), config).await?;
    Ok(())
}

/// Waits on the `approved` annotation unless the run is already auto-confirmed or was already
/// approved at spawn time. The watch restarts automatically if the stream ends (e.g. on a
/// connection drop) and gives up after an hour of inactivity.
async fn should_proceed(
    api: &Api<Execution>,
    config: &ExecutorConfig,
    execution: &Execution,
) -> Result<bool, ExecutorError> {
    if execution.spec.auto_confirm {
        return Ok(true);
    }

    let initial = approval_of(execution);
    match initial {
        Approval::Yes => return Ok(true),
        Approval::No => return Ok(false),
        Approval::Pending => {}
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3600);

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(ExecutorError::ApprovalTimeout);
        }

        let stream = watcher(api.clone(), watcher::Config::default().fields(&format!("metadata.name={}", config.run_name)))
            .touched_objects();
        tokio::pin!(stream);

        let wait = tokio::time::timeout(remaining, async {
            while let Some(next) = stream.next().await {
                let Ok(object) = next else { continue };
                match approval_of(&object) {
                    Approval::Yes => return Some(true),
                    Approval::No => return Some(false),
                    Approval::Pending => continue,
                }
            }
            None
        })
        .await;

        match wait {
            Ok(Some(decision)) => return Ok(decision),
            Ok(None) => continue, // stream ended; restart the watch
            Err(_) => return Err(ExecutorError::ApprovalTimeout),
        }
    }
}

fn approval_of(execution: &Execution) -> Approval {
    let value = execution
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(crate::labels::ANNOTATION_APPROVED))
        .map(String::as_str);
    Approval::from_annotation(value)
}

async fn set_condition(
    api: &Api<Execution>,
    name: &str,
    type_: &str,
    on: bool,
    reason: &str,
) -> Result<(), ExecutorError> {
    let mut execution = api.get(name).await?;
    let condition = ExecutionCondition {
        type_: type_.to_string(),
        status: if on { "True".into() } else { "False".into() },
        reason: Some(reason.to_string()),
        message: None,
        last_transition_time: Some(chrono::Utc::now().fixed_offset()),
    };
    crate::utils::upsert_condition(&mut execution.status.conditions, condition);

    let data = serde_json::to_vec(&execution)?;
    api.replace_status(name, &PostParams::default(), data).await?;
    Ok(())
}

async fn set_applied(
    api: &Api<Execution>,
    name: &str,
    outputs: Option<serde_json::Value>,
) -> Result<(), ExecutorError> {
    let mut execution = api.get(name).await?;
    let condition = ExecutionCondition {
        type_: condition_types::APPLIED.to_string(),
        status: "True".into(),
        reason: Some("ApplyComplete".to_string()),
        message: None,
        last_transition_time: Some(chrono::Utc::now().fixed_offset()),
    };
    crate::utils::upsert_condition(&mut execution.status.conditions, condition);
    execution.status.outputs = outputs.map(GenericMap);

    let data = serde_json::to_vec(&execution)?;
    api.replace_status(name, &PostParams::default(), data).await?;
    Ok(())
}

async fn set_denied(api: &Api<Execution>, name: &str) -> Result<(), ExecutorError> {
    let mut execution = api.get(name).await?;
    execution.status.denied = true;

    let data = serde_json::to_vec(&execution)?;
    api.replace_status(name, &PostParams::default(), data).await?;
    Ok(())
}

async fn persist_logs(api: &Api<Execution>, name: &str, runner: &Runner) -> Result<(), ExecutorError> {
    let compressed = gz::compress(&runner.log.as_bytes())?;
    let encoded = {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD.encode(compressed)
    };

    let mut execution = api.get(name).await?;
    execution.status.job_logs = Some(encoded);

    let data = serde_json::to_vec(&execution)?;
    api.replace_status(name, &PostParams::default(), data).await?;
    Ok(())
}

async fn delete_self_job(jobs_api: &Api<Job>, run_name: &str) -> Result<(), ExecutorError> {
    let job_name = format!("job-{run_name}");

    let _ = jobs_api
        .delete(
            &job_name,
            &DeleteParams {
                propagation_policy: Some(PropagationPolicy::Background),
                ..Default::default()
            },
        )
        .await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env_requires_run_name() {
        // Given
        unsafe {
            std::env::remove_var("EXECUTOR_RUN_NAME");
        }

        // When
        let result = ExecutorConfig::from_env();

        // Then
        assert!(result.is_err());
    }
}
