use std::sync::Arc;

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::runtime::reflector::ObjectRef;
use tracing::debug;

use crate::resources::Module;
use crate::resources::State;

/// Enqueues every State that references the given Module by name.
pub fn module_to_states(
    states_reflector: Arc<kube::runtime::reflector::Store<State>>,
) -> impl Fn(Module) -> Vec<ObjectRef<State>> {
    move |module| {
        let module_name = module.metadata.name.clone().unwrap_or_default();

        states_reflector
            .state()
            .iter()
            .filter(|state| {
                state.metadata.namespace == module.metadata.namespace
                    && state.spec.module_name == module_name
            })
            .map(|state| ObjectRef::from(&**state))
            .inspect(|object_ref| debug!("Reconcile of {object_ref} triggered by module {module_name}"))
            .collect::<Vec<_>>()
    }
}

/// Enqueues every State whose variable lists reference the given Secret by name.
pub fn secret_to_states(
    states_reflector: Arc<kube::runtime::reflector::Store<State>>,
) -> impl Fn(Secret) -> Vec<ObjectRef<State>> {
    move |secret| {
        let secret_name = secret.metadata.name.clone().unwrap_or_default();

        states_reflector
            .state()
            .iter()
            .filter(|state| {
                state.metadata.namespace == secret.metadata.namespace
                    && (state.spec.variables.secret_names.contains(&secret_name)
                        || state.spec.variables.env_secret_names.contains(&secret_name))
            })
            .map(|state| ObjectRef::from(&**state))
            .inspect(|object_ref| debug!("Reconcile of {object_ref} triggered by secret {secret_name}"))
            .collect::<Vec<_>>()
    }
}

/// Enqueues every State whose variable lists reference the given ConfigMap by name.
pub fn config_map_to_states(
    states_reflector: Arc<kube::runtime::reflector::Store<State>>,
) -> impl Fn(ConfigMap) -> Vec<ObjectRef<State>> {
    move |config_map| {
        let config_name = config_map.metadata.name.clone().unwrap_or_default();

        states_reflector
            .state()
            .iter()
            .filter(|state| {
                state.metadata.namespace == config_map.metadata.namespace
                    && (state.spec.variables.config_names.contains(&config_name)
                        || state.spec.variables.env_config_names.contains(&config_name))
            })
            .map(|state| ObjectRef::from(&**state))
            .inspect(|object_ref| debug!("Reconcile of {object_ref} triggered by config map {config_name}"))
            .collect::<Vec<_>>()
    }
}
