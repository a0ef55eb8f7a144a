//! Shared state injected into every route handler via `axum::extract::State`, replacing what the
//! upstream implementation reaches for as a package-level `*ControllerSet` global.

#[derive(Clone)]
pub struct BackendContext {
    pub client: kube::Client,
    pub namespace: String,
}

impl BackendContext {
    pub fn new(client: kube::Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }
}
