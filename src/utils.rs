use std::fmt::Debug;
use std::time::Duration;

use kube::api::{Patch, PatchParams, PostParams};
use rand::Rng as _;
use serde::{Serialize, de::DeserializeOwned};

pub async fn create_or_update<K>(
    api: &kube::Api<K>,
    field_manager: &str,
    resource_name: &str,
    resource: K,
    mutate_fn: impl FnOnce(K, &mut K),
) -> Result<(), kube::Error>
where
    K: DeserializeOwned + Serialize + Clone + Debug,
{
    if let Some(existing_resource) = api.get_opt(resource_name).await? {
        let mut updated_resource = resource.clone();
        mutate_fn(existing_resource, &mut updated_resource);

        api.patch(
            resource_name,
            &PatchParams::apply(field_manager),
            &Patch::Apply(serde_yaml::to_value(&updated_resource).unwrap()),
        )
        .await?;
    } else {
        api.create(
            &PostParams {
                field_manager: Some(field_manager.into()),
                ..Default::default()
            },
            &resource,
        )
        .await?;
    }

    Ok(())
}

pub trait Condition {
    fn type_(&self) -> &str;
    fn status(&self) -> &str;
    fn reason(&self) -> Option<&str>;
}

pub fn upsert_condition<T: Condition>(conditions: &mut Vec<T>, new_condition: T) {
    if let Some(existing_condition) = conditions
        .iter_mut()
        .find(|c| c.type_() == new_condition.type_())
    {
        // Skip change if we can't see a difference in the new value
        if existing_condition.status() == new_condition.status()
            && existing_condition.reason() == new_condition.reason()
        {
            return;
        }

        *existing_condition = new_condition;
    } else {
        conditions.push(new_condition);
    }
}

/// Retries `op` while it fails with a conflict (HTTP 409), using exponential backoff starting
/// at `initial` and doubling on every attempt, up to `attempts` tries in total.
///
/// Unlike a bare retry loop that falls through silently, this distinguishes "succeeded on some
/// attempt" from "exhausted all attempts": the last error is always returned to the caller
/// rather than swallowed, so a caller treating the retrofit as best-effort can still log it.
pub async fn retry_on_conflict<T, F, Fut>(attempts: u32, initial: Duration, mut op: F) -> Result<T, kube::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, kube::Error>>,
{
    let mut delay = initial;
    let mut last_err = None;

    for attempt in 0..attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(kube::Error::Api(ref e)) if e.code == 409 => {
                last_err = Some(kube::Error::Api(e.clone()));
                if attempt + 1 < attempts {
                    // A little jitter keeps several reconcilers retrying the same conflict from
                    // lockstepping back into each other on every doubled interval.
                    let jitter_ms = rand::thread_rng().gen_range(0..50);
                    tokio::time::sleep(delay + Duration::from_millis(jitter_ms)).await;
                    delay *= 2;
                }
            }
            Err(other) => return Err(other),
        }
    }

    Err(last_err.expect("loop runs at least once"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test]
    async fn test_retry_on_conflict_returns_ok_on_first_success() {
        // Given
        let calls = Cell::new(0);

        // When
        let result: Result<u8, kube::Error> =
            retry_on_conflict(4, Duration::from_millis(1), || {
                calls.set(calls.get() + 1);
                async { Ok(7u8) }
            })
            .await;

        // Then
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_retry_on_conflict_propagates_non_conflict_immediately() {
        // Given
        let calls = Cell::new(0);
        let not_found = kube::core::ErrorResponse {
            status: "Failure".into(),
            message: "not found".into(),
            reason: "NotFound".into(),
            code: 404,
        };

        // When
        let result: Result<u8, kube::Error> =
            retry_on_conflict(4, Duration::from_millis(1), || {
                calls.set(calls.get() + 1);
                async { Err(kube::Error::Api(not_found.clone())) }
            })
            .await;

        // Then
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
