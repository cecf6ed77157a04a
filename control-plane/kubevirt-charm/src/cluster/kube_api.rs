use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::{DynamicObject, GroupVersionKind};
use kube::discovery::{ApiCapabilities, ApiResource, Scope};
use kube::{Client, Config};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use super::{ClusterApi, ClusterError, KindRef, ResourceKey, identity};

const DEFAULT_NAMESPACE: &str = "default";

/// `ClusterApi` backed by kube-rs. The client is created from the
/// kubeconfig on first use, after the credential gate has written it.
pub struct KubeCluster {
    kubeconfig: PathBuf,
    field_manager: String,
    client: OnceCell<Client>,
    discovered: Mutex<HashMap<KindRef, (ApiResource, ApiCapabilities)>>,
}

impl KubeCluster {
    pub fn new(kubeconfig: PathBuf, field_manager: impl Into<String>) -> Self {
        Self {
            kubeconfig,
            field_manager: field_manager.into(),
            client: OnceCell::new(),
            discovered: Mutex::new(HashMap::new()),
        }
    }

    async fn client(&self) -> Result<&Client, ClusterError> {
        self.client
            .get_or_try_init(|| async {
                let kubeconfig = Kubeconfig::read_from(&self.kubeconfig)
                    .map_err(|e| {
                        ClusterError::Client(format!(
                            "failed to read kubeconfig {}: {e}",
                            self.kubeconfig.display()
                        ))
                    })?;
                let config = Config::from_custom_kubeconfig(
                    kubeconfig,
                    &KubeConfigOptions::default(),
                )
                .await
                .map_err(|e| {
                    ClusterError::Client(format!("failed to load kubeconfig: {e}"))
                })?;
                info!(cluster_url = %config.cluster_url, "kube client initialised");
                Client::try_from(config).map_err(classify)
            })
            .await
    }

    async fn resolve(
        &self,
        kind: &KindRef,
    ) -> Result<(ApiResource, ApiCapabilities), ClusterError> {
        if let Some(hit) = self.cached(kind) {
            return Ok(hit);
        }
        let client = self.client().await?;
        let (group, version) = kind.group_version();
        let gvk = GroupVersionKind::gvk(group, version, &kind.kind);
        let resolved = kube::discovery::pinned_kind(client, &gvk)
            .await
            .map_err(classify)?;
        debug!(kind = %kind.kind, plural = %resolved.0.plural, "discovered kind");
        if let Ok(mut cache) = self.discovered.lock() {
            cache.insert(kind.clone(), resolved.clone());
        }
        Ok(resolved)
    }

    fn cached(&self, kind: &KindRef) -> Option<(ApiResource, ApiCapabilities)> {
        self.discovered
            .lock()
            .ok()
            .and_then(|cache| cache.get(kind).cloned())
    }

    async fn api_for(
        &self,
        kind: &KindRef,
        namespace: Option<&str>,
    ) -> Result<Api<DynamicObject>, ClusterError> {
        let (ar, caps) = self.resolve(kind).await?;
        let client = self.client().await?.clone();
        Ok(match caps.scope {
            Scope::Cluster => Api::all_with(client, &ar),
            Scope::Namespaced => Api::namespaced_with(
                client,
                namespace.unwrap_or(DEFAULT_NAMESPACE),
                &ar,
            ),
        })
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    #[instrument(level = "debug", skip_all, fields(obj = %identity(obj)))]
    async fn apply(&self, obj: &DynamicObject) -> Result<(), ClusterError> {
        let key = ResourceKey::of(obj)?;
        let api = self.api_for(&key.kind, key.namespace.as_deref()).await?;
        let pp = PatchParams::apply(&self.field_manager).force();
        api.patch(&key.name, &pp, &Patch::Apply(obj))
            .await
            .map_err(classify)?;
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(obj = %identity(obj)))]
    async fn delete(
        &self,
        obj: &DynamicObject,
        ignore_unauthorized: bool,
    ) -> Result<(), ClusterError> {
        let key = ResourceKey::of(obj)?;
        let api = match self.api_for(&key.kind, key.namespace.as_deref()).await
        {
            Ok(api) => api,
            // The CRD may already be gone together with its objects.
            Err(e) if e.is_absent() => return Ok(()),
            Err(e) => return Err(e),
        };
        match api.delete(&key.name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) => match classify(e) {
                ClusterError::NotFound(_) => Ok(()),
                ClusterError::Unauthorized(msg) if ignore_unauthorized => {
                    warn!(obj = %key, %msg, "ignoring unauthorized delete");
                    Ok(())
                }
                other => Err(other),
            },
        }
    }

    async fn get(
        &self,
        key: &ResourceKey,
    ) -> Result<Option<DynamicObject>, ClusterError> {
        let api = match self.api_for(&key.kind, key.namespace.as_deref()).await
        {
            Ok(api) => api,
            Err(e) if e.is_absent() => return Ok(None),
            Err(e) => return Err(e),
        };
        api.get_opt(&key.name).await.map_err(classify)
    }

    async fn list(
        &self,
        kind: &KindRef,
        selector: &str,
    ) -> Result<Vec<DynamicObject>, ClusterError> {
        let (ar, _) = match self.resolve(kind).await {
            Ok(found) => found,
            Err(e) if e.is_absent() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let client = self.client().await?.clone();
        let api: Api<DynamicObject> = Api::all_with(client, &ar);
        let list = api
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(classify)?;
        Ok(list
            .items
            .into_iter()
            .map(|mut o| {
                // List items come back without apiVersion/kind.
                if o.types.is_none() {
                    o.types = Some(kube::core::TypeMeta {
                        api_version: kind.api_version.clone(),
                        kind: kind.kind.clone(),
                    });
                }
                o
            })
            .collect())
    }
}

/// Map kube errors onto the transient/fatal split the engine works with.
pub fn classify(e: kube::Error) -> ClusterError {
    match e {
        kube::Error::Api(ae) => match ae.code {
            401 | 403 => ClusterError::Unauthorized(ae.message),
            404 => ClusterError::NotFound(ae.message),
            503 | 504 => ClusterError::Unreachable(ae.message),
            code => ClusterError::Api {
                code,
                message: ae.message,
            },
        },
        // Kind not served (yet), e.g. a CRD that is not established.
        kube::Error::Discovery(e) => ClusterError::KindNotServed(e.to_string()),
        kube::Error::HyperError(e) => ClusterError::Unreachable(e.to_string()),
        kube::Error::Service(e) => ClusterError::Unreachable(e.to_string()),
        other => ClusterError::Client(other.to_string()),
    }
}
