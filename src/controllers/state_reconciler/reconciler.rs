use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt as _};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{
    Api,
    api::PostParams,
    runtime::{
        Controller,
        controller::Action,
        reflector::{ObjectRef, store::Writer},
        watcher,
    },
};
use tracing::{debug, info, warn};

use crate::controllers::gather::{GatherOutcome, gather};
use crate::controllers::run_hash;
use crate::controllers::state_reconciler::{job_builder, mappers, status};
use crate::error::ReconcileError;
use crate::labels;
use crate::resources::{Action as RunAction, Execution, Module, State, StateStatus};
use crate::utils::{create_or_update, retry_on_conflict};

const FINALIZER: &str = "terraformcontroller.cattle.io/destroy";

struct ReconciliationContext {
    client: kube::Client,
}

pub fn new(
    client: kube::Client,
) -> impl Stream<
    Item = Result<
        (ObjectRef<State>, Action),
        kube::runtime::controller::Error<ReconcileError, kube::runtime::watcher::Error>,
    >,
> {
    let context = Arc::new(ReconciliationContext {
        client: client.clone(),
    });

    let states_api: Api<State> = Api::all(client.clone());
    let modules_api: Api<Module> = Api::all(client.clone());
    let secrets_api: Api<Secret> = Api::all(client.clone());
    let config_maps_api: Api<ConfigMap> = Api::all(client.clone());
    let jobs_api: Api<Job> = Api::all(client);

    let state_reflector_reader = {
        let writer = Writer::<State>::default();
        let reader = Arc::new(writer.as_reader());

        let reflector = kube::runtime::reflector(
            writer,
            watcher(states_api.clone(), watcher::Config::default()),
        );

        tokio::spawn(async move {
            reflector
                .for_each(|event| async {
                    if let Err(e) = event {
                        eprintln!("State reflector error: {e:?}");
                    }
                })
                .await;
        });

        reader
    };

    Controller::new(states_api, watcher::Config::default())
        .owns(jobs_api, watcher::Config::default())
        .watches(
            modules_api,
            watcher::Config::default(),
            mappers::module_to_states(Arc::clone(&state_reflector_reader)),
        )
        .watches(
            secrets_api,
            watcher::Config::default(),
            mappers::secret_to_states(Arc::clone(&state_reflector_reader)),
        )
        .watches(
            config_maps_api,
            watcher::Config::default(),
            mappers::config_map_to_states(Arc::clone(&state_reflector_reader)),
        )
        .run(
            reconcile,
            |_, _, _| Action::requeue(Duration::from_secs(15)),
            context,
        )
}

async fn reconcile(
    object: Arc<State>,
    context: Arc<ReconciliationContext>,
) -> Result<Action, ReconcileError> {
    use kube::runtime::reflector::Lookup as _;

    let namespace = object
        .namespace()
        .ok_or(ReconcileError::PreconditionFailed("namespace not set"))?;
    let name = object
        .name()
        .ok_or(ReconcileError::PreconditionFailed("name not set"))?
        .to_string();

    let states_api = Api::<State>::namespaced(context.client.clone(), &namespace);

    if object.metadata.deletion_timestamp.is_some() {
        return reconcile_remove(&object, &context, &namespace, &name, &states_api).await;
    }

    ensure_finalizer(&states_api, &object, &name).await?;
    reconcile_apply(&object, &context, &namespace, &name, &states_api).await
}

async fn reconcile_apply(
    object: &State,
    context: &ReconciliationContext,
    namespace: &str,
    name: &str,
    states_api: &Api<State>,
) -> Result<Action, ReconcileError> {
    let jobs_api = Api::<Job>::namespaced(context.client.clone(), namespace);
    let mut resource_status = object.status.clone().unwrap_or_default();

    // If a run is already deployed, see whether it has finished before deciding anything else.
    if status::is_job_deployed(&resource_status) {
        if let Some(execution_name) = &resource_status.current_execution {
            let executions_api = Api::<Execution>::namespaced(context.client.clone(), namespace);
            if let Some(execution) = executions_api.get_opt(execution_name).await? {
                if is_applied(&execution) {
                    status::clear_job_deployed(&mut resource_status);
                    resource_status.current_execution = None;
                    persist_status(states_api, object, resource_status).await?;
                    return Ok(Action::requeue(Duration::from_secs(5)));
                }
            }
        }

        // Run still in flight; nothing new to do until it completes or its job changes.
        persist_status(states_api, object, resource_status).await?;
        return Ok(Action::requeue(Duration::from_secs(15)));
    }

    let input = match gather(&context.client, namespace, object).await? {
        GatherOutcome::Ready(input) => input,
        GatherOutcome::MissingInfo(reason) => {
            status::set_missing_info(&mut resource_status, reason);
            persist_status(states_api, object, resource_status).await?;
            return Ok(Action::requeue(Duration::from_secs(30)));
        }
    };

    status::clear_missing_info(&mut resource_status);

    let new_run_hash = run_hash::compute(object, &input, RunAction::Create);

    if resource_status.last_run_hash.as_deref() == Some(new_run_hash.as_str()) {
        persist_status(states_api, object, resource_status).await?;
        return Ok(Action::requeue(Duration::from_secs(3600)));
    }

    info!("Spawning run {new_run_hash} for state {namespace}/{name}");

    let resources = job_builder::build(object, &input, &new_run_hash, RunAction::Create)?;
    create_all(context, namespace, &jobs_api, resources).await?;

    let run_name = labels::execution_name(name, &new_run_hash, &RunAction::Create.to_string());
    resource_status.current_execution = Some(run_name.clone());
    resource_status.last_run_hash = Some(new_run_hash);
    status::set_job_deployed(&mut resource_status, &run_name);

    persist_status(states_api, object, resource_status).await?;

    Ok(Action::requeue(Duration::from_secs(10)))
}

async fn reconcile_remove(
    object: &State,
    context: &ReconciliationContext,
    namespace: &str,
    name: &str,
    states_api: &Api<State>,
) -> Result<Action, ReconcileError> {
    let mut resource_status = object.status.clone().unwrap_or_default();

    if !object.spec.destroy_on_delete || status::is_destroyed(&resource_status) {
        remove_finalizer(states_api, object, name).await?;
        return Ok(Action::await_change());
    }

    if status::is_job_deployed(&resource_status) {
        if let Some(execution_name) = &resource_status.current_execution {
            let executions_api = Api::<Execution>::namespaced(context.client.clone(), namespace);
            if let Some(execution) = executions_api.get_opt(execution_name).await?
                && execution.spec.action == RunAction::Destroy
                && is_applied(&execution)
            {
                status::set_destroyed(&mut resource_status);
                status::clear_job_deployed(&mut resource_status);
                persist_status(states_api, object, resource_status).await?;
                remove_finalizer(states_api, object, name).await?;
                return Ok(Action::await_change());
            }
        }

        debug!("Destroy run for {namespace}/{name} still in flight");
        return Err(ReconcileError::DestroyInFlight);
    }

    let input = match gather(&context.client, namespace, object).await? {
        GatherOutcome::Ready(input) => input,
        GatherOutcome::MissingInfo(reason) => {
            warn!("Cannot gather input to destroy {namespace}/{name}: {reason}");
            return Err(ReconcileError::MissingInfo(reason));
        }
    };

    let destroy_run_hash = run_hash::compute(object, &input, RunAction::Destroy);
    let jobs_api = Api::<Job>::namespaced(context.client.clone(), namespace);

    let resources = job_builder::build(object, &input, &destroy_run_hash, RunAction::Destroy)?;
    create_all(context, namespace, &jobs_api, resources).await?;

    let run_name = labels::execution_name(name, &destroy_run_hash, &RunAction::Destroy.to_string());
    resource_status.current_execution = Some(run_name.clone());
    resource_status.last_run_hash = Some(destroy_run_hash);
    status::set_job_deployed(&mut resource_status, &run_name);
    persist_status(states_api, object, resource_status).await?;

    Err(ReconcileError::DestroyInFlight)
}

fn is_applied(execution: &Execution) -> bool {
    execution
        .status
        .conditions
        .iter()
        .any(|c| c.type_ == crate::resources::execution::condition_types::APPLIED && c.status == "True")
}

async fn create_all(
    context: &ReconciliationContext,
    namespace: &str,
    jobs_api: &Api<Job>,
    resources: job_builder::ExecutionResources,
) -> Result<(), ReconcileError> {
    let executions_api = Api::<Execution>::namespaced(context.client.clone(), namespace);
    let secrets_api = Api::<Secret>::namespaced(context.client.clone(), namespace);
    let service_accounts_api =
        Api::<k8s_openapi::api::core::v1::ServiceAccount>::namespaced(context.client.clone(), namespace);
    let role_bindings_api =
        Api::<k8s_openapi::api::rbac::v1::ClusterRoleBinding>::all(context.client.clone());

    if executions_api
        .get_opt(resources.execution.metadata.name.as_deref().unwrap_or_default())
        .await?
        .is_none()
    {
        executions_api
            .create(&PostParams::default(), &resources.execution)
            .await?;
    }

    create_or_update(
        &secrets_api,
        "tf-controller",
        resources.var_secret.metadata.name.as_deref().unwrap_or_default(),
        resources.var_secret.clone(),
        |_, _| {},
    )
    .await?;

    create_or_update(
        &service_accounts_api,
        "tf-controller",
        resources.service_account.metadata.name.as_deref().unwrap_or_default(),
        resources.service_account.clone(),
        |_, _| {},
    )
    .await?;

    create_or_update(
        &role_bindings_api,
        "tf-controller",
        resources.role_binding.metadata.name.as_deref().unwrap_or_default(),
        resources.role_binding.clone(),
        |_, _| {},
    )
    .await?;

    let job_name = resources.job.metadata.name.clone().unwrap_or_default();
    let jobs_api_ref = jobs_api;
    if jobs_api_ref.get_opt(&job_name).await?.is_none() {
        jobs_api_ref.create(&PostParams::default(), &resources.job).await?;
    }

    // Best-effort owner-reference retrofit: the job exists now and has a uid we can reference.
    if let Some(created_job) = jobs_api_ref.get_opt(&job_name).await?
        && let Ok(owner) = job_builder::owner_reference_to(&created_job)
    {
        let owner_patch = serde_json::json!({
            "metadata": { "ownerReferences": [owner] }
        });

        let execution_name = resources.execution.metadata.name.clone().unwrap_or_default();
        let secret_name = resources.var_secret.metadata.name.clone().unwrap_or_default();
        let sa_name = resources.service_account.metadata.name.clone().unwrap_or_default();

        let _ = retry_on_conflict(4, Duration::from_millis(100), || {
            let patch = kube::api::Patch::Merge(&owner_patch);
            executions_api.patch(&execution_name, &kube::api::PatchParams::default(), &patch)
        })
        .await;

        let _ = retry_on_conflict(4, Duration::from_millis(100), || {
            let patch = kube::api::Patch::Merge(&owner_patch);
            secrets_api.patch(&secret_name, &kube::api::PatchParams::default(), &patch)
        })
        .await;

        let _ = retry_on_conflict(4, Duration::from_millis(100), || {
            let patch = kube::api::Patch::Merge(&owner_patch);
            service_accounts_api.patch(&sa_name, &kube::api::PatchParams::default(), &patch)
        })
        .await;
    }

    Ok(())
}

async fn ensure_finalizer(
    api: &Api<State>,
    object: &State,
    name: &str,
) -> Result<(), ReconcileError> {
    if !object.spec.destroy_on_delete {
        return Ok(());
    }

    let finalizers = object.metadata.finalizers.clone().unwrap_or_default();
    if finalizers.iter().any(|f| f == FINALIZER) {
        return Ok(());
    }

    let mut patch_object = object.clone();
    let mut finalizers = finalizers;
    finalizers.push(FINALIZER.to_string());
    patch_object.metadata.finalizers = Some(finalizers);

    api.replace(name, &PostParams::default(), &patch_object).await?;

    Ok(())
}

async fn remove_finalizer(api: &Api<State>, object: &State, name: &str) -> Result<(), ReconcileError> {
    let Some(mut finalizers) = object.metadata.finalizers.clone() else {
        return Ok(());
    };

    finalizers.retain(|f| f != FINALIZER);

    let mut patch_object = object.clone();
    patch_object.metadata.finalizers = Some(finalizers);

    api.replace(name, &PostParams::default(), &patch_object).await?;

    Ok(())
}

async fn persist_status(
    api: &Api<State>,
    object: &State,
    status: StateStatus,
) -> Result<(), ReconcileError> {
    use kube::runtime::reflector::Lookup as _;

    let mut patch_object = object.clone();
    patch_object.status = Some(status);

    let name = object
        .name()
        .ok_or(ReconcileError::PreconditionFailed("expected a name"))?;

    let data = serde_json::to_vec(&patch_object)?;

    api.replace_status(&name, &PostParams::default(), data).await?;

    Ok(())
}
