//! Collects everything a State reconcile needs to compute a run hash and build a job: the
//! resolved Module, referenced Secrets/ConfigMaps, flattened env vars, and sibling-State output
//! references.

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::Api;

use crate::error::ReconcileError;
use crate::resources::{Module, State, DEFAULT_EXECUTOR_IMAGE};

pub struct Input {
    pub module: Module,
    pub configs: Vec<ConfigMap>,
    pub secrets: Vec<Secret>,
    pub env_vars: Vec<(String, String)>,
    pub executions: std::collections::BTreeMap<String, String>,
    pub image: String,
}

/// Distinguishes "everything resolved" from "something is missing, park the State" from "a real
/// error occurred and the reconcile should be retried". Mirrors the tri-state `(result, ok,
/// error)` return convention in the source this is based on, but as an enum instead of two
/// separate booleans that callers could get out of sync.
pub enum GatherOutcome<T> {
    Ready(T),
    MissingInfo(&'static str),
}

pub async fn gather(
    client: &kube::Client,
    namespace: &str,
    state: &State,
) -> Result<GatherOutcome<Input>, ReconcileError> {
    let modules_api = Api::<Module>::namespaced(client.clone(), namespace);
    let secrets_api = Api::<Secret>::namespaced(client.clone(), namespace);
    let configs_api = Api::<ConfigMap>::namespaced(client.clone(), namespace);
    let states_api = Api::<State>::namespaced(client.clone(), namespace);

    let Some(module) = modules_api.get_opt(&state.spec.module_name).await? else {
        return Ok(GatherOutcome::MissingInfo("referenced module not found"));
    };

    if module.status.content_hash.is_empty() {
        return Ok(GatherOutcome::MissingInfo("module content hash not resolved yet"));
    }

    let Some(secrets) = fetch_all(&secrets_api, &state.spec.variables.secret_names).await? else {
        return Ok(GatherOutcome::MissingInfo("referenced secret not found"));
    };

    let Some(configs) = fetch_all(&configs_api, &state.spec.variables.config_names).await? else {
        return Ok(GatherOutcome::MissingInfo("referenced config map not found"));
    };

    let Some(env_secrets) = fetch_all(&secrets_api, &state.spec.variables.env_secret_names).await?
    else {
        return Ok(GatherOutcome::MissingInfo("referenced env secret not found"));
    };

    let Some(env_configs) = fetch_all(&configs_api, &state.spec.variables.env_config_names).await?
    else {
        return Ok(GatherOutcome::MissingInfo("referenced env config map not found"));
    };

    let mut env_vars = Vec::new();
    for secret in &env_secrets {
        push_sorted_string_data(&mut env_vars, &secret.data);
    }
    for config in &env_configs {
        push_sorted_data(&mut env_vars, &config.data);
    }

    let mut executions = std::collections::BTreeMap::new();
    for (local_name, sibling_state_name) in &state.spec.data {
        let Some(sibling) = states_api.get_opt(sibling_state_name).await? else {
            return Ok(GatherOutcome::MissingInfo("referenced sibling state not found"));
        };

        let Some(run_name) = sibling.status.and_then(|s| s.current_execution) else {
            return Ok(GatherOutcome::MissingInfo("sibling state has no completed execution yet"));
        };

        executions.insert(local_name.clone(), run_name);
    }

    let image = state
        .spec
        .image
        .clone()
        .unwrap_or_else(|| DEFAULT_EXECUTOR_IMAGE.to_string());

    Ok(GatherOutcome::Ready(Input {
        module,
        configs,
        secrets,
        env_vars,
        executions,
        image,
    }))
}

/// Fetches each named object in order; returns `None` (meaning "missing info") at the first
/// miss, matching the source's `getConfigs`/`getSecrets` early-return behaviour.
async fn fetch_all<K>(api: &Api<K>, names: &[String]) -> Result<Option<Vec<K>>, ReconcileError>
where
    K: serde::de::DeserializeOwned + Clone + std::fmt::Debug,
{
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let Some(obj) = api.get_opt(name).await? else {
            return Ok(None);
        };
        out.push(obj);
    }
    Ok(Some(out))
}

fn push_sorted_string_data(
    target: &mut Vec<(String, String)>,
    data: &Option<std::collections::BTreeMap<String, k8s_openapi::ByteString>>,
) {
    let Some(data) = data else { return };
    for (key, value) in data {
        target.push((key.clone(), String::from_utf8_lossy(&value.0).into_owned()));
    }
}

fn push_sorted_data(
    target: &mut Vec<(String, String)>,
    data: &Option<std::collections::BTreeMap<String, String>>,
) {
    let Some(data) = data else { return };
    for (key, value) in data {
        target.push((key.clone(), value.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_sorted_string_data_is_key_ordered() {
        // Given
        let mut data = std::collections::BTreeMap::new();
        data.insert("z".to_string(), k8s_openapi::ByteString(b"1".to_vec()));
        data.insert("a".to_string(), k8s_openapi::ByteString(b"2".to_vec()));

        // When
        let mut out = Vec::new();
        push_sorted_string_data(&mut out, &Some(data));

        // Then
        assert_eq!(out, vec![("a".to_string(), "2".to_string()), ("z".to_string(), "1".to_string())]);
    }
}
