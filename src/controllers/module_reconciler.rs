use std::sync::Arc;

use chrono::Utc;
use futures_util::{Stream, StreamExt as _};
use kube::{
    Api,
    api::PostParams,
    runtime::{Controller, controller::Action, reflector::ObjectRef, watcher},
};
use tracing::{debug, info, warn};

use crate::error::ReconcileError;
use crate::git::{self, Credentials};
use crate::hash::sha256_map;
use crate::resources::{Module, ModuleSource};

struct ReconciliationContext {
    client: kube::Client,
    http: reqwest::Client,
}

pub fn new(
    client: kube::Client,
) -> impl Stream<
    Item = Result<
        (ObjectRef<Module>, Action),
        kube::runtime::controller::Error<ReconcileError, kube::runtime::watcher::Error>,
    >,
> {
    let context = Arc::new(ReconciliationContext {
        client: client.clone(),
        http: reqwest::Client::new(),
    });

    let modules_api: Api<Module> = Api::all(client);

    Controller::new(modules_api, watcher::Config::default()).run(
        reconcile,
        |_, _, _| Action::requeue(std::time::Duration::from_secs(30)),
        context,
    )
}

async fn reconcile(
    object: Arc<Module>,
    context: Arc<ReconciliationContext>,
) -> Result<Action, ReconcileError> {
    use kube::runtime::reflector::Lookup as _;

    if object.metadata.deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }

    let namespace = object
        .namespace()
        .ok_or(ReconcileError::PreconditionFailed("namespace not set"))?;
    let name = object
        .name()
        .ok_or(ReconcileError::PreconditionFailed("name not set"))?;

    let modules_api = Api::<Module>::namespaced(context.client.clone(), &namespace);
    let mut status = object.status.clone().unwrap_or_default();
    let mut requeue_after = std::time::Duration::from_secs(3600);

    match &object.spec.source {
        ModuleSource::Inline { inline } => {
            status.content_hash = sha256_map(inline);
        }
        ModuleSource::Git { git: source } => {
            if let Some(commit) = &source.commit {
                status.content_hash =
                    sha256_map(&commit_hash_map(&source.url, commit));
                status.resolved_commit = Some(commit.clone());
            } else if let Some(tag) = &source.tag {
                status.content_hash = sha256_map(&tag_hash_map(&source.url, tag));
            } else if let Some(branch) = &source.branch {
                let wanted_ref = git::ref_name(Some(branch), None).unwrap();
                let current_ref = format!("{}@{wanted_ref}", source.url);

                let interval = chrono::Duration::seconds(source.interval_seconds as i64);
                let interval_elapsed = status
                    .last_check
                    .map(|last| Utc::now().signed_duration_since(last) >= interval)
                    .unwrap_or(true);
                let ref_changed = status.last_seen_ref.as_deref() != Some(current_ref.as_str());
                let due = interval_elapsed || ref_changed;

                if due {
                    debug!("Polling {} for branch {branch}", source.url);

                    let credentials = if let Some(secret_name) = &source.credentials_secret_name {
                        load_credentials(&context.client, &namespace, secret_name).await?
                    } else {
                        None
                    };

                    match git::resolve_ref(&context.http, &source.url, &wanted_ref, credentials.as_ref()).await {
                        Ok(commit) => {
                            status.resolved_commit = Some(commit.clone());
                            status.content_hash = sha256_map(&commit_hash_map(&source.url, &commit));
                            status.last_check = Some(Utc::now().fixed_offset());
                            status.last_seen_ref = Some(current_ref);
                        }
                        Err(e) => {
                            warn!("Failed to resolve branch {branch} for {}: {e}", source.url);
                            // Leave previously resolved hash/commit in place; retry sooner than usual.
                            requeue_after = std::time::Duration::from_secs(30);
                        }
                    }
                }

                requeue_after = requeue_after.min(std::time::Duration::from_secs(
                    source.interval_seconds as u64,
                ));
            }
        }
    }

    persist_status(&modules_api, &object, status).await?;

    info!("Reconciled module {namespace}/{name}");

    Ok(Action::requeue(requeue_after))
}

fn commit_hash_map(url: &str, commit: &str) -> std::collections::BTreeMap<String, String> {
    std::collections::BTreeMap::from([
        ("url".to_string(), url.to_string()),
        ("commit".to_string(), commit.to_string()),
    ])
}

fn tag_hash_map(url: &str, tag: &str) -> std::collections::BTreeMap<String, String> {
    std::collections::BTreeMap::from([
        ("url".to_string(), url.to_string()),
        ("tag".to_string(), tag.to_string()),
    ])
}

async fn load_credentials(
    client: &kube::Client,
    namespace: &str,
    secret_name: &str,
) -> Result<Option<Credentials>, ReconcileError> {
    let secrets_api = Api::<k8s_openapi::api::core::v1::Secret>::namespaced(client.clone(), namespace);

    let Some(secret) = secrets_api.get_opt(secret_name).await? else {
        return Ok(None);
    };

    let Some(data) = secret.data else {
        return Ok(None);
    };

    let username = data
        .get("username")
        .map(|v| String::from_utf8_lossy(&v.0).into_owned())
        .unwrap_or_default();
    let password = data
        .get("password")
        .map(|v| String::from_utf8_lossy(&v.0).into_owned())
        .unwrap_or_default();

    Ok(Some(Credentials { username, password }))
}

async fn persist_status(
    api: &Api<Module>,
    object: &Module,
    status: crate::resources::ModuleStatus,
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
