//! Glues the Input Gatherer's output to the Content Hasher to produce a State's run hash.

use std::collections::BTreeMap;

use crate::controllers::gather::Input;
use crate::hash::run_hash;
use crate::resources::{Action, State};

/// Builds the combined variable map that the run hash is computed over: every config's data,
/// every secret's data, and the fixed `key -> state name` pair the backend uses to scope the
/// tfstate blob. Order of insertion doesn't matter since the hash is computed over sorted keys.
pub fn combined_vars(input: &Input, state_name: &str) -> BTreeMap<String, String> {
    let mut combined = BTreeMap::new();

    for config in &input.configs {
        if let Some(data) = &config.data {
            for (key, value) in data {
                combined.insert(key.clone(), value.clone());
            }
        }
    }

    for secret in &input.secrets {
        if let Some(data) = &secret.data {
            for (key, value) in data {
                combined.insert(key.clone(), String::from_utf8_lossy(&value.0).into_owned());
            }
        }
    }

    combined.insert("key".to_string(), state_name.to_string());

    combined
}

pub fn compute(state: &State, input: &Input, action: Action) -> String {
    let vars = combined_vars(input, &state.metadata.name.clone().unwrap_or_default());
    let version = state.spec.version.max(1);
    run_hash(&vars, &input.module.status.content_hash, version, &action.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{Module, ModuleSpec};
    use k8s_openapi::api::core::v1::{ConfigMap, Secret};

    fn blank_input() -> Input {
        Input {
            module: Module::new(
                "m",
                ModuleSpec {
                    source: crate::resources::ModuleSource::Inline {
                        inline: BTreeMap::new(),
                    },
                },
            ),
            configs: Vec::new(),
            secrets: Vec::new(),
            env_vars: Vec::new(),
            executions: BTreeMap::new(),
            image: "img".to_string(),
        }
    }

    #[test]
    fn test_combined_vars_includes_state_key() {
        // Given
        let input = blank_input();

        // When
        let vars = combined_vars(&input, "my-state");

        // Then
        assert_eq!(vars.get("key"), Some(&"my-state".to_string()));
    }

    #[test]
    fn test_combined_vars_merges_configs_and_secrets() {
        // Given
        let mut input = blank_input();
        let mut config = ConfigMap::default();
        config.data = Some(BTreeMap::from([("a".to_string(), "1".to_string())]));
        input.configs.push(config);

        let mut secret = Secret::default();
        secret.data = Some(BTreeMap::from([(
            "b".to_string(),
            k8s_openapi::ByteString(b"2".to_vec()),
        )]));
        input.secrets.push(secret);

        // When
        let vars = combined_vars(&input, "s");

        // Then
        assert_eq!(vars.get("a"), Some(&"1".to_string()));
        assert_eq!(vars.get("b"), Some(&"2".to_string()));
    }
}
