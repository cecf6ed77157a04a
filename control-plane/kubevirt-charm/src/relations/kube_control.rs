use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::json;
use tokio::fs;
use tracing::{debug, info, warn};

use super::relation_readiness;
use crate::model::{Databag, Model, ModelError, Relation};
use crate::status::ReadinessResult;

pub const KUBE_CONTROL_ENDPOINT: &str = "kube-control";
const NODE_GROUP: &str = "system:nodes";

/// Per-user credentials handed out by the control plane.
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct Creds {
    pub client_token: String,
    pub kubelet_token: String,
    pub proxy_token: String,
    pub scope: String,
}

impl std::fmt::Debug for Creds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Creds")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Validated kube-control payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KubeControlData {
    pub api_endpoints: Vec<String>,
    pub creds: BTreeMap<String, Creds>,
    pub registry_location: String,
    pub cluster_tag: String,
}

#[derive(Deserialize)]
struct RawData {
    #[serde(rename = "api-endpoints")]
    api_endpoints: String,
    creds: String,
    #[serde(rename = "registry-location")]
    registry_location: String,
    #[serde(rename = "cluster-tag")]
    cluster_tag: String,
}

impl KubeControlData {
    fn parse(bag: &Databag) -> Result<Self, String> {
        let value = serde_json::to_value(bag).map_err(|e| e.to_string())?;
        let raw: RawData =
            serde_json::from_value(value).map_err(|e| e.to_string())?;
        let api_endpoints: Vec<String> = serde_json::from_str(&raw.api_endpoints)
            .map_err(|e| format!("api-endpoints: {e}"))?;
        if api_endpoints.is_empty() {
            return Err("api-endpoints: empty".into());
        }
        let creds: BTreeMap<String, Creds> = serde_json::from_str(&raw.creds)
            .map_err(|e| format!("creds: {e}"))?;
        Ok(Self {
            api_endpoints,
            creds,
            registry_location: raw.registry_location,
            cluster_tag: raw.cluster_tag,
        })
    }
}

/// Requirer side of the kube-control relation.
#[derive(Clone, Debug)]
pub struct KubeControl {
    endpoint: String,
}

impl Default for KubeControl {
    fn default() -> Self {
        Self {
            endpoint: KUBE_CONTROL_ENDPOINT.to_string(),
        }
    }
}

impl KubeControl {
    /// Ask the control plane for node credentials for `user`.
    pub async fn set_auth_request(
        &self,
        model: &dyn Model,
        user: &str,
    ) -> Result<(), ModelError> {
        let Some(relation) = model.relation(&self.endpoint).await? else {
            return Ok(());
        };
        let mut bag = Databag::new();
        bag.insert("kubelet_user".into(), user.to_string());
        bag.insert("auth_group".into(), NODE_GROUP.to_string());
        model.set_relation_data(&relation, &bag).await?;
        debug!(%user, "requested kube-control credentials");
        Ok(())
    }

    pub async fn view(
        &self,
        model: &dyn Model,
    ) -> Result<KubeControlView, ModelError> {
        let relation = model.relation(&self.endpoint).await?;
        Ok(KubeControlView::new(&self.endpoint, relation))
    }
}

#[derive(Clone, Debug)]
pub struct KubeControlView {
    endpoint: String,
    relation: Option<Relation>,
    data: Result<KubeControlData, String>,
}

impl KubeControlView {
    pub fn new(endpoint: &str, relation: Option<Relation>) -> Self {
        let data = match relation.as_ref() {
            Some(rel) => first_valid(rel),
            None => Err("no relation".into()),
        };
        Self {
            endpoint: endpoint.to_string(),
            relation,
            data,
        }
    }

    pub fn is_ready(&self) -> bool {
        match &self.data {
            Ok(_) => true,
            Err(e) => {
                warn!(endpoint = %self.endpoint, %e, "relation data not yet valid");
                false
            }
        }
    }

    pub fn evaluate(&self, broken_relation: Option<&str>) -> ReadinessResult {
        relation_readiness(
            &self.endpoint,
            self.relation.as_ref(),
            broken_relation,
            self.is_ready(),
        )
    }

    pub fn data(&self) -> Option<&KubeControlData> {
        self.data.as_ref().ok()
    }

    pub fn registry_location(&self) -> Option<&str> {
        self.data().map(|d| d.registry_location.as_str())
    }

    pub fn cluster_tag(&self) -> Option<&str> {
        self.data().map(|d| d.cluster_tag.as_str())
    }

    pub fn get_auth_credentials(&self, user: &str) -> Option<&Creds> {
        self.data().and_then(|d| d.creds.get(user))
    }

    /// Write a kubeconfig for `user` to `path`. Returns `false` when the
    /// relation has no credentials for that user yet.
    pub async fn create_kubeconfig(
        &self,
        path: &Path,
        user: &str,
        ca: Option<&Path>,
    ) -> std::io::Result<bool> {
        let (Some(data), Some(creds)) =
            (self.data(), self.get_auth_credentials(user))
        else {
            return Ok(false);
        };
        let content = render_kubeconfig(&data.api_endpoints[0], creds, ca)
            .map_err(std::io::Error::other)?;
        if fs::read_to_string(path).await.ok().as_deref() == Some(&content) {
            return Ok(true);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &content).await?;
        fs::rename(&tmp, path).await?;
        info!(path = %path.display(), "kubeconfig written");
        Ok(true)
    }
}

fn first_valid(relation: &Relation) -> Result<KubeControlData, String> {
    let mut last = String::from("relation data not yet available");
    for unit in &relation.units {
        match relation.unit_data(unit).map(KubeControlData::parse) {
            Some(Ok(data)) => return Ok(data),
            Some(Err(e)) => last = format!("{unit}: {e}"),
            None => {}
        }
    }
    Err(last)
}

fn render_kubeconfig(
    server: &str,
    creds: &Creds,
    ca: Option<&Path>,
) -> Result<String, serde_yaml::Error> {
    let mut cluster = json!({ "server": server });
    if let Some(ca) = ca {
        cluster["certificate-authority"] = json!(ca.display().to_string());
    }
    let doc = json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{ "name": "juju-cluster", "cluster": cluster }],
        "users": [{
            "name": "kubevirt",
            "user": { "token": creds.client_token },
        }],
        "contexts": [{
            "name": "juju-context",
            "context": { "cluster": "juju-cluster", "user": "kubevirt" },
        }],
        "current-context": "juju-context",
        "preferences": {},
    });
    serde_yaml::to_string(&doc)
}
