use std::path::PathBuf;

use tracing::{debug, error};

use super::relation_readiness;
use crate::host::probe_kvm;
use crate::model::{Databag, Model, ModelError, Relation};
use crate::status::ReadinessResult;

pub const PEER_ENDPOINT: &str = "kubevirts";
const SUPPORTS_KVM: &str = "supports-kvm";

/// Peer relation through which units agree on hardware virtualisation.
#[derive(Clone, Debug)]
pub struct KubeVirtPeer {
    endpoint: String,
    kvm_device: PathBuf,
}

impl KubeVirtPeer {
    pub fn new(kvm_device: impl Into<PathBuf>) -> Self {
        Self {
            endpoint: PEER_ENDPOINT.to_string(),
            kvm_device: kvm_device.into(),
        }
    }

    /// Publish this unit's KVM capability to its peers and return it.
    pub async fn discover(&self, model: &dyn Model) -> Result<bool, ModelError> {
        let has_kvm = probe_kvm(&self.kvm_device);
        if let Some(relation) = model.relation(&self.endpoint).await? {
            let mut bag = Databag::new();
            bag.insert(SUPPORTS_KVM.into(), has_kvm.to_string());
            model.set_relation_data(&relation, &bag).await?;
        }
        debug!(has_kvm, device = %self.kvm_device.display(), "kvm discovery");
        Ok(has_kvm)
    }

    /// Snapshot of the current relation state.
    pub async fn view(&self, model: &dyn Model) -> Result<PeerView, ModelError> {
        let relation = model.relation(&self.endpoint).await?;
        Ok(PeerView::new(&self.endpoint, relation))
    }
}

#[derive(Clone, Debug)]
pub struct PeerView {
    endpoint: String,
    relation: Option<Relation>,
    reported: Result<Vec<bool>, String>,
}

impl PeerView {
    pub fn new(endpoint: &str, relation: Option<Relation>) -> Self {
        let reported = match relation.as_ref() {
            Some(rel) => parse_reports(rel),
            None => Ok(Vec::new()),
        };
        Self {
            endpoint: endpoint.to_string(),
            relation,
            reported,
        }
    }

    pub fn is_ready(&self) -> bool {
        match &self.reported {
            Ok(values) if !values.is_empty() => true,
            Ok(_) => {
                error!(endpoint = %self.endpoint, "relation data not yet available");
                false
            }
            Err(e) => {
                error!(endpoint = %self.endpoint, %e, "relation data not yet valid");
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

    /// True when any unit, this one included, reported KVM support.
    /// `None` until the relation is ready.
    pub fn supports_kvm(&self) -> Option<bool> {
        match &self.reported {
            Ok(values) if !values.is_empty() => Some(values.iter().any(|v| *v)),
            _ => None,
        }
    }
}

fn parse_reports(relation: &Relation) -> Result<Vec<bool>, String> {
    relation
        .data
        .iter()
        .map(|(unit, bag)| {
            let raw = bag
                .get(SUPPORTS_KVM)
                .ok_or_else(|| format!("{unit}: missing {SUPPORTS_KVM}"))?;
            serde_json::from_str::<bool>(raw)
                .map_err(|e| format!("{unit}: {SUPPORTS_KVM}: {e}"))
        })
        .collect()
}
