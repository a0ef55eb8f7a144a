//! Lease-based locking for backend state, one Lease per State acting as a simple mutex.

use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use kube::Api;
use kube::api::PostParams;

use crate::error::BackendError;
use crate::labels;

pub async fn lock(client: &kube::Client, namespace: &str, state_name: &str, holder: &str) -> Result<bool, BackendError> {
    let leases_api = Api::<Lease>::namespaced(client.clone(), namespace);
    let lease_name = labels::lock_name(namespace, state_name);

    if let Some(existing) = leases_api.get_opt(&lease_name).await? {
        let current_holder = existing.spec.as_ref().and_then(|s| s.holder_identity.clone());
        if let Some(current_holder) = current_holder {
            if !current_holder.is_empty() && current_holder != holder {
                return Ok(false);
            }
        }

        let mut updated = existing;
        updated.spec.get_or_insert_with(Default::default).holder_identity = Some(holder.to_string());
        leases_api.replace(&lease_name, &PostParams::default(), &updated).await?;
        return Ok(true);
    }

    let mut lease = Lease::default();
    lease.metadata.namespace = Some(namespace.to_string());
    lease.metadata.name = Some(lease_name.clone());
    lease.spec = Some(LeaseSpec {
        holder_identity: Some(holder.to_string()),
        ..Default::default()
    });

    leases_api.create(&PostParams::default(), &lease).await?;
    Ok(true)
}

pub async fn unlock(client: &kube::Client, namespace: &str, state_name: &str) -> Result<(), BackendError> {
    let leases_api = Api::<Lease>::namespaced(client.clone(), namespace);
    let lease_name = labels::lock_name(namespace, state_name);

    let Some(mut lease) = leases_api.get_opt(&lease_name).await? else {
        return Ok(());
    };

    lease.spec.get_or_insert_with(Default::default).holder_identity = None;
    leases_api.replace(&lease_name, &PostParams::default(), &lease).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_name_is_namespace_and_state_scoped() {
        // Given / When
        let name = labels::lock_name("prod", "network");

        // Then
        assert_eq!(name, "lock-tfstate-prod-network");
    }
}
