pub mod kube_api;

use std::fmt;

use async_trait::async_trait;
use kube::ResourceExt;
use kube::core::DynamicObject;

pub use kube_api::KubeCluster;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    /// The API server could not be reached; worth retrying later.
    #[error("kubernetes api unreachable: {0}")]
    Unreachable(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Discovery does not know the kind yet, e.g. a CRD applied moments
    /// ago that the API server is still establishing.
    #[error("kind not served: {0}")]
    KindNotServed(String),

    #[error("api error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("invalid object: {0}")]
    Invalid(String),

    #[error("client error: {0}")]
    Client(String),
}

impl ClusterError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClusterError::Unreachable(_) | ClusterError::KindNotServed(_)
        )
    }

    /// The object, or its whole kind, does not exist on the server.
    pub fn is_absent(&self) -> bool {
        matches!(
            self,
            ClusterError::NotFound(_) | ClusterError::KindNotServed(_)
        )
    }
}

/// apiVersion + kind of a resource type.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KindRef {
    pub api_version: String,
    pub kind: String,
}

impl KindRef {
    pub fn of(obj: &DynamicObject) -> Result<Self, ClusterError> {
        let types = obj.types.as_ref().ok_or_else(|| {
            ClusterError::Invalid(format!("{} has no apiVersion/kind", obj.name_any()))
        })?;
        Ok(Self {
            api_version: types.api_version.clone(),
            kind: types.kind.clone(),
        })
    }

    /// Split `group/version`; the core group has no slash.
    pub fn group_version(&self) -> (&str, &str) {
        match self.api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", self.api_version.as_str()),
        }
    }
}

/// Identity of a single object.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey {
    pub kind: KindRef,
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceKey {
    pub fn of(obj: &DynamicObject) -> Result<Self, ClusterError> {
        let name = obj.metadata.name.clone().ok_or_else(|| {
            ClusterError::Invalid("object without metadata.name".into())
        })?;
        Ok(Self {
            kind: KindRef::of(obj)?,
            namespace: obj.metadata.namespace.clone(),
            name,
        })
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind.kind, self.name),
        }
    }
}

/// Human readable identity used in statuses and action output.
pub fn identity(obj: &DynamicObject) -> String {
    match ResourceKey::of(obj) {
        Ok(key) => key.to_string(),
        Err(_) => obj.name_any(),
    }
}

/// The subset of the Kubernetes API the charm needs.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Create or update `obj` (server-side apply).
    async fn apply(&self, obj: &DynamicObject) -> Result<(), ClusterError>;

    /// Delete `obj`. Missing objects are not an error; authorization
    /// failures are swallowed when `ignore_unauthorized` is set.
    async fn delete(
        &self,
        obj: &DynamicObject,
        ignore_unauthorized: bool,
    ) -> Result<(), ClusterError>;

    async fn get(
        &self,
        key: &ResourceKey,
    ) -> Result<Option<DynamicObject>, ClusterError>;

    /// List objects of `kind` across namespaces matching `selector`.
    async fn list(
        &self,
        kind: &KindRef,
        selector: &str,
    ) -> Result<Vec<DynamicObject>, ClusterError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: serde_json::Value) -> DynamicObject {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn identity_includes_namespace_when_present() {
        let o = obj(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "virt-operator", "namespace": "kubevirt"}
        }));
        assert_eq!(identity(&o), "Deployment/kubevirt/virt-operator");

        let o = obj(json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {"name": "kubevirt"}
        }));
        assert_eq!(identity(&o), "Namespace/kubevirt");
    }

    #[test]
    fn group_version_handles_core_group() {
        let core = KindRef {
            api_version: "v1".into(),
            kind: "Namespace".into(),
        };
        assert_eq!(core.group_version(), ("", "v1"));
        let kv = KindRef {
            api_version: "kubevirt.io/v1".into(),
            kind: "KubeVirt".into(),
        };
        assert_eq!(kv.group_version(), ("kubevirt.io", "v1"));
    }

    #[test]
    fn outages_and_unserved_kinds_are_transient() {
        assert!(ClusterError::Unreachable("x".into()).is_transient());
        assert!(ClusterError::KindNotServed("KubeVirt".into()).is_transient());
        assert!(!ClusterError::NotFound("x".into()).is_transient());
        assert!(!ClusterError::Unauthorized("x".into()).is_transient());
        assert!(
            !ClusterError::Api {
                code: 422,
                message: "bad".into()
            }
            .is_transient()
        );
    }
}
