//! Persists backend state blobs as gzipped secrets, one per State, keyed by name.

use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::Api;
use kube::api::PostParams;

use crate::error::BackendError;
use crate::gz;
use crate::labels;

pub async fn get_state(
    client: &kube::Client,
    namespace: &str,
    state_name: &str,
) -> Result<Option<Vec<u8>>, BackendError> {
    let secrets_api = Api::<Secret>::namespaced(client.clone(), namespace);
    let secret_name = labels::backend_secret_name(namespace, state_name);

    let Some(secret) = secrets_api.get_opt(&secret_name).await? else {
        return Ok(None);
    };

    let Some(compressed) = secret.data.as_ref().and_then(|d| d.get("tfstate")) else {
        return Ok(None);
    };

    Ok(Some(gz::uncompress(&compressed.0)?))
}

pub async fn put_state(
    client: &kube::Client,
    namespace: &str,
    state_name: &str,
    raw_state: &[u8],
) -> Result<(), BackendError> {
    let secrets_api = Api::<Secret>::namespaced(client.clone(), namespace);
    let secret_name = labels::backend_secret_name(namespace, state_name);

    let compressed = gz::compress(raw_state)?;

    let mut secret = Secret::default();
    secret.metadata.namespace = Some(namespace.to_string());
    secret.metadata.name = Some(secret_name.clone());
    secret.metadata.labels = Some(BTreeMap::from([
        (labels::TFSTATE.to_string(), "true".to_string()),
        (labels::TFSTATE_SECRET_SUFFIX.to_string(), state_name.to_string()),
    ]));
    secret.data = Some(BTreeMap::from([("tfstate".to_string(), ByteString(compressed))]));

    if secrets_api.get_opt(&secret_name).await?.is_some() {
        secrets_api.replace(&secret_name, &PostParams::default(), &secret).await?;
    } else {
        secrets_api.create(&PostParams::default(), &secret).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_name_is_namespace_and_state_scoped() {
        // Given / When
        let name = labels::backend_secret_name("prod", "network");

        // Then
        assert_eq!(name, "tfstate-prod-network");
    }
}
