//! In-memory stand-ins for the Juju model, the cluster, bundles on disk
//! and host setup.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use kube::core::DynamicObject;
use serde_json::{Value, json};

use crate::cluster::{ClusterApi, ClusterError, KindRef, ResourceKey, identity};
use crate::host::{HostSetup, InstallError};
use crate::manifests::{ManifestError, ManifestSource};
use crate::model::{Databag, Model, ModelError, Relation};
use crate::status::UnitStatus;

pub struct MemoryModel {
    unit: String,
    pub leader: Mutex<bool>,
    pub config: Mutex<BTreeMap<String, Value>>,
    pub relations: Mutex<BTreeMap<String, Relation>>,
    pub statuses: Mutex<Vec<UnitStatus>>,
    pub app_statuses: Mutex<Vec<UnitStatus>>,
    pub versions: Mutex<Vec<String>>,
    pub params: Mutex<BTreeMap<String, Value>>,
    pub results: Mutex<Option<Databag>>,
    pub failure: Mutex<Option<String>>,
}

impl MemoryModel {
    pub fn new(unit: &str) -> Self {
        Self {
            unit: unit.to_string(),
            leader: Mutex::new(true),
            config: Mutex::new(BTreeMap::new()),
            relations: Mutex::new(BTreeMap::new()),
            statuses: Mutex::new(Vec::new()),
            app_statuses: Mutex::new(Vec::new()),
            versions: Mutex::new(Vec::new()),
            params: Mutex::new(BTreeMap::new()),
            results: Mutex::new(None),
            failure: Mutex::new(None),
        }
    }

    pub fn set_leader(&self, leader: bool) {
        *self.leader.lock().unwrap() = leader;
    }

    pub fn set_config(&self, config: Value) {
        *self.config.lock().unwrap() = serde_json::from_value(config).unwrap();
    }

    pub fn set_params(&self, params: Value) {
        *self.params.lock().unwrap() = serde_json::from_value(params).unwrap();
    }

    /// Add or replace the relation on `endpoint` with remote unit bags.
    pub fn add_relation(&self, endpoint: &str, id: &str, remote: &[(&str, Databag)]) {
        let mut data = BTreeMap::new();
        data.insert(self.unit.clone(), Databag::new());
        for (unit, bag) in remote {
            data.insert(unit.to_string(), bag.clone());
        }
        let relation = Relation {
            id: id.to_string(),
            endpoint: endpoint.to_string(),
            units: remote.iter().map(|(u, _)| u.to_string()).collect(),
            data,
        };
        self.relations
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), relation);
    }

    pub fn remove_relation(&self, endpoint: &str) {
        self.relations.lock().unwrap().remove(endpoint);
    }

    pub fn own_data(&self, endpoint: &str) -> Databag {
        self.relations
            .lock()
            .unwrap()
            .get(endpoint)
            .and_then(|r| r.data.get(&self.unit).cloned())
            .unwrap_or_default()
    }

    pub fn status(&self) -> Option<UnitStatus> {
        self.statuses.lock().unwrap().last().cloned()
    }

    pub fn app_status(&self) -> Option<UnitStatus> {
        self.app_statuses.lock().unwrap().last().cloned()
    }

    pub fn workload_version(&self) -> Option<String> {
        self.versions.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Model for MemoryModel {
    fn unit_name(&self) -> &str {
        &self.unit
    }

    async fn is_leader(&self) -> Result<bool, ModelError> {
        Ok(*self.leader.lock().unwrap())
    }

    async fn config(&self) -> Result<BTreeMap<String, Value>, ModelError> {
        Ok(self.config.lock().unwrap().clone())
    }

    async fn relation(
        &self,
        endpoint: &str,
    ) -> Result<Option<Relation>, ModelError> {
        Ok(self.relations.lock().unwrap().get(endpoint).cloned())
    }

    async fn set_relation_data(
        &self,
        relation: &Relation,
        data: &Databag,
    ) -> Result<(), ModelError> {
        let mut relations = self.relations.lock().unwrap();
        if let Some(rel) = relations.get_mut(&relation.endpoint) {
            rel.data
                .entry(self.unit.clone())
                .or_default()
                .extend(data.clone());
        }
        Ok(())
    }

    async fn set_unit_status(
        &self,
        status: &UnitStatus,
    ) -> Result<(), ModelError> {
        self.statuses.lock().unwrap().push(status.clone());
        Ok(())
    }

    async fn set_app_status(
        &self,
        status: &UnitStatus,
    ) -> Result<(), ModelError> {
        self.app_statuses.lock().unwrap().push(status.clone());
        Ok(())
    }

    async fn set_workload_version(
        &self,
        version: &str,
    ) -> Result<(), ModelError> {
        self.versions.lock().unwrap().push(version.to_string());
        Ok(())
    }

    async fn action_params(
        &self,
    ) -> Result<BTreeMap<String, Value>, ModelError> {
        Ok(self.params.lock().unwrap().clone())
    }

    async fn action_set(&self, results: &Databag) -> Result<(), ModelError> {
        *self.results.lock().unwrap() = Some(results.clone());
        Ok(())
    }

    async fn action_fail(&self, message: &str) -> Result<(), ModelError> {
        *self.failure.lock().unwrap() = Some(message.to_string());
        Ok(())
    }
}

/// Cluster held in a map, with a log of mutations and injectable
/// failures.
#[derive(Default)]
pub struct MemoryCluster {
    objects: Mutex<BTreeMap<ResourceKey, DynamicObject>>,
    ops: Mutex<Vec<String>>,
    fail_apply: Mutex<BTreeMap<String, ClusterError>>,
    fail_delete: Mutex<Option<ClusterError>>,
    fail_reads: Mutex<Option<ClusterError>>,
}

impl MemoryCluster {
    /// `apply`/`delete` calls, e.g. `apply Namespace/kubevirt`.
    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    pub fn mutations(&self) -> usize {
        self.ops.lock().unwrap().len()
    }

    pub fn clear_ops(&self) {
        self.ops.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn contains(&self, ident: &str) -> bool {
        self.objects
            .lock()
            .unwrap()
            .values()
            .any(|o| identity(o) == ident)
    }

    /// Fail every apply of the object with identity `ident`.
    pub fn fail_apply_of(&self, ident: &str, err: ClusterError) {
        self.fail_apply.lock().unwrap().insert(ident.to_string(), err);
    }

    pub fn clear_failures(&self) {
        self.fail_apply.lock().unwrap().clear();
        *self.fail_delete.lock().unwrap() = None;
        *self.fail_reads.lock().unwrap() = None;
    }

    pub fn fail_deletes(&self, err: ClusterError) {
        *self.fail_delete.lock().unwrap() = Some(err);
    }

    pub fn fail_reads(&self, err: ClusterError) {
        *self.fail_reads.lock().unwrap() = Some(err);
    }

    /// Replace `.status` of the stored object with identity `ident`.
    pub fn set_status(&self, ident: &str, status: Value) {
        let mut objects = self.objects.lock().unwrap();
        let obj = objects
            .values_mut()
            .find(|o| identity(o) == ident)
            .unwrap_or_else(|| panic!("no object {ident}"));
        obj.data["status"] = status;
    }

    fn check_reads(&self) -> Result<(), ClusterError> {
        match self.fail_reads.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn labels_match(obj: &DynamicObject, selector: &str) -> bool {
    let labels = obj.metadata.labels.clone().unwrap_or_default();
    selector
        .split(',')
        .filter(|s| !s.is_empty())
        .all(|pair| match pair.split_once('=') {
            Some((k, v)) => labels.get(k).map(String::as_str) == Some(v),
            None => labels.contains_key(pair),
        })
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    async fn apply(&self, obj: &DynamicObject) -> Result<(), ClusterError> {
        let ident = identity(obj);
        if let Some(err) = self.fail_apply.lock().unwrap().get(&ident) {
            return Err(err.clone());
        }
        let key = ResourceKey::of(obj)?;
        self.ops.lock().unwrap().push(format!("apply {ident}"));
        let mut objects = self.objects.lock().unwrap();
        let mut stored = obj.clone();
        if let Some(status) = objects.get(&key).and_then(|o| o.data.get("status")) {
            stored.data["status"] = status.clone();
        }
        objects.insert(key, stored);
        Ok(())
    }

    async fn delete(
        &self,
        obj: &DynamicObject,
        ignore_unauthorized: bool,
    ) -> Result<(), ClusterError> {
        if let Some(err) = self.fail_delete.lock().unwrap().clone() {
            match err {
                ClusterError::Unauthorized(_) if ignore_unauthorized => {
                    return Ok(());
                }
                err => return Err(err),
            }
        }
        let key = ResourceKey::of(obj)?;
        self.ops.lock().unwrap().push(format!("delete {}", identity(obj)));
        self.objects.lock().unwrap().remove(&key);
        Ok(())
    }

    async fn get(
        &self,
        key: &ResourceKey,
    ) -> Result<Option<DynamicObject>, ClusterError> {
        self.check_reads()?;
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }

    async fn list(
        &self,
        kind: &KindRef,
        selector: &str,
    ) -> Result<Vec<DynamicObject>, ClusterError> {
        self.check_reads()?;
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, o)| k.kind == *kind && labels_match(o, selector))
            .map(|(_, o)| o.clone())
            .collect())
    }
}

/// Bundles held in memory: bundle -> release -> documents.
#[derive(Default)]
pub struct MemorySource {
    bundles: BTreeMap<String, BTreeMap<String, Vec<Value>>>,
}

impl MemorySource {
    pub fn with(mut self, bundle: &str, release: &str, docs: Vec<Value>) -> Self {
        self.bundles
            .entry(bundle.to_string())
            .or_default()
            .insert(release.to_string(), docs);
        self
    }

    /// A trimmed-down operator bundle in two releases and a single
    /// KubeVirt custom resource.
    pub fn fixture() -> Self {
        Self::default()
            .with("operator", "v1.0.0", operator_docs("v1.0.0"))
            .with("operator", "v1.1.0", operator_docs("v1.1.0"))
            .with(
                "custom_resource",
                "v1.1.0",
                vec![json!({
                    "apiVersion": "kubevirt.io/v1",
                    "kind": "KubeVirt",
                    "metadata": {"name": "kubevirt", "namespace": "kubevirt"},
                    "spec": {"workloadUpdateStrategy": {}},
                })],
            )
    }
}

pub fn operator_docs(release: &str) -> Vec<Value> {
    vec![
        json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {"name": "kubevirt"},
        }),
        json!({
            "apiVersion": "v1",
            "kind": "ServiceAccount",
            "metadata": {"name": "kubevirt-operator", "namespace": "kubevirt"},
        }),
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "virt-operator", "namespace": "kubevirt"},
            "spec": {"template": {"spec": {"containers": [{
                "name": "virt-operator",
                "image": format!("quay.io/kubevirt/virt-operator:{release}"),
            }]}}},
        }),
    ]
}

impl ManifestSource for MemorySource {
    fn releases(&self, bundle: &str) -> Result<Vec<String>, ManifestError> {
        let mut releases: Vec<String> = self
            .bundles
            .get(bundle)
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default();
        crate::manifests::source::sort_releases(&mut releases);
        Ok(releases)
    }

    fn load(
        &self,
        bundle: &str,
        release: &str,
    ) -> Result<Vec<Value>, ManifestError> {
        self.bundles
            .get(bundle)
            .and_then(|r| r.get(release))
            .cloned()
            .ok_or_else(|| ManifestError::UnknownRelease {
                bundle: bundle.to_string(),
                release: release.to_string(),
            })
    }
}

/// Host setup that succeeds unless told otherwise.
#[derive(Default)]
pub struct FakeHost {
    pub failure: Mutex<Option<InstallError>>,
    pub runs: AtomicUsize,
}

impl FakeHost {
    pub fn fail_with(&self, err: InstallError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    pub fn succeed(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HostSetup for FakeHost {
    async fn install(&self) -> Result<(), InstallError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        match self.failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// A complete kube-control payload granting credentials to `user`.
pub fn kube_control_payload(user: &str) -> Databag {
    let mut bag = Databag::new();
    bag.insert(
        "api-endpoints".into(),
        r#"["https://10.0.0.1:6443"]"#.into(),
    );
    bag.insert(
        "creds".into(),
        json!({
            user: {
                "client_token": "admin::token",
                "kubelet_token": "kubelet::token",
                "proxy_token": "proxy::token",
                "scope": user,
            }
        })
        .to_string(),
    );
    bag.insert("registry-location".into(), "rocks.canonical.com/cdk".into());
    bag.insert("cluster-tag".into(), "kubernetes-abc".into());
    bag
}
