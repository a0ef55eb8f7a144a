use crate::resources::state::condition_types;
use crate::resources::{StateCondition, StateStatus};
use crate::utils::upsert_condition;

fn condition(type_: &str, true_: bool, reason: &str, message: impl Into<String>) -> StateCondition {
    StateCondition {
        type_: type_.to_string(),
        status: if true_ { "True".into() } else { "False".into() },
        reason: Some(reason.to_string()),
        message: Some(message.into()),
        last_transition_time: Some(chrono::Utc::now().fixed_offset()),
    }
}

pub fn set_missing_info(status: &mut StateStatus, reason: &'static str) {
    upsert_condition(
        &mut status.conditions,
        condition(condition_types::MISSING_INFO, true, "Waiting", reason),
    );
}

pub fn clear_missing_info(status: &mut StateStatus) {
    upsert_condition(
        &mut status.conditions,
        condition(condition_types::MISSING_INFO, false, "Resolved", "all inputs resolved"),
    );
}

pub fn set_job_deployed(status: &mut StateStatus, execution_name: &str) {
    upsert_condition(
        &mut status.conditions,
        condition(
            condition_types::JOB_DEPLOYED,
            true,
            "ExecutionSpawned",
            format!("execution {execution_name} is running"),
        ),
    );
}

pub fn clear_job_deployed(status: &mut StateStatus) {
    upsert_condition(
        &mut status.conditions,
        condition(condition_types::JOB_DEPLOYED, false, "ExecutionApplied", "no run in flight"),
    );
}

pub fn set_destroyed(status: &mut StateStatus) {
    upsert_condition(
        &mut status.conditions,
        condition(condition_types::DESTROYED, true, "DestroyApplied", "destroy run completed"),
    );
}

pub fn is_job_deployed(status: &StateStatus) -> bool {
    status
        .conditions
        .iter()
        .any(|c| c.type_ == condition_types::JOB_DEPLOYED && c.status == "True")
}

pub fn is_destroyed(status: &StateStatus) -> bool {
    status
        .conditions
        .iter()
        .any(|c| c.type_ == condition_types::DESTROYED && c.status == "True")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_job_deployed_then_clear() {
        // Given
        let mut status = StateStatus::default();

        // When
        set_job_deployed(&mut status, "demo-abc1234567");

        // Then
        assert!(is_job_deployed(&status));

        // When
        clear_job_deployed(&mut status);

        // Then
        assert!(!is_job_deployed(&status));
    }
}
