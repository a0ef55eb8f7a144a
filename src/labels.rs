//! Label, annotation and naming constants shared across reconcilers and the executor.

pub const STATE_NAME: &str = "state";
pub const RUN_HASH: &str = "runHash";

pub const ANNOTATION_APPROVED: &str = "approved";

pub const TFSTATE: &str = "tfstate";
pub const TFSTATE_SECRET_SUFFIX: &str = "tfstateSecretSuffix";

pub fn backend_secret_name(namespace: &str, state_name: &str) -> String {
    format!("tfstate-{namespace}-{state_name}")
}

pub fn lock_name(namespace: &str, state_name: &str) -> String {
    format!("lock-tfstate-{namespace}-{state_name}")
}

pub fn execution_name(state_name: &str, run_hash: &str, action: &str) -> String {
    if action == "destroy" {
        format!("{state_name}-{run_hash}-destroy")
    } else {
        format!("{state_name}-{run_hash}")
    }
}
