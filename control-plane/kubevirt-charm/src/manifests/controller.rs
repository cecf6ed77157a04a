use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use kube::core::DynamicObject;
use serde_json::Value;
use tracing::{debug, info, instrument};

use super::patches::{Patch, PatchContext, selector};
use super::source::{ManifestError, ManifestSource};
use super::{ConfigHash, EffectiveConfig};
use crate::cluster::{ClusterApi, ClusterError, KindRef, ResourceKey, identity};
use crate::config::{CharmConfig, ConfigValue};
use crate::status::{ConditionStatus, ObjectCondition};

#[derive(thiserror::Error, Debug)]
pub enum ControllerError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

impl ControllerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ControllerError::Cluster(e) if e.is_transient())
    }
}

/// Values a controller may take from the relations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelationInput {
    /// `image-registry` from kube-control.
    ImageRegistry,
    /// `software-emulation`, the inverse of peer KVM support.
    SoftwareEmulation,
}

impl RelationInput {
    pub fn key(&self) -> &'static str {
        match self {
            RelationInput::ImageRegistry => "image-registry",
            RelationInput::SoftwareEmulation => "software-emulation",
        }
    }

    fn value(&self, inputs: &Inputs) -> Option<ConfigValue> {
        match self {
            RelationInput::ImageRegistry => {
                inputs.registry_location.clone().map(ConfigValue::Str)
            }
            RelationInput::SoftwareEmulation => {
                inputs.supports_kvm.map(|kvm| ConfigValue::Bool(!kvm))
            }
        }
    }
}

/// Precondition on the effective config before a bundle may be applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Requirement {
    /// Must be set to an explicit boolean.
    Bool(&'static str),
    /// Optional; when set must lie strictly between 0 and 100.
    Percentage(&'static str),
}

impl Requirement {
    fn check(&self, config: &EffectiveConfig) -> Option<String> {
        match self {
            Requirement::Bool(key) => match config.get(key) {
                Some(ConfigValue::Bool(_)) => None,
                _ => Some(format!(
                    "KubeVirt manifests waiting for definition of {key}"
                )),
            },
            Requirement::Percentage(key) => {
                let value = config.get(key)?;
                match value.as_i64() {
                    Some(pct) if pct > 0 && pct < 100 => None,
                    _ => Some(format!(
                        "{key} must be between 1 and 99 percent, got {value}"
                    )),
                }
            }
        }
    }
}

/// Static description of one bundle.
#[derive(Clone, Debug)]
pub struct ControllerSpec {
    pub name: &'static str,
    pub bundle: &'static str,
    pub patches: &'static [Patch],
    pub inputs: &'static [RelationInput],
    pub requirements: &'static [Requirement],
    pub rename: Option<(&'static str, &'static str)>,
    /// Kind whose `status.phase` is reported.
    pub phase_kind: Option<&'static str>,
}

/// Collaborator state a controller's config is derived from.
#[derive(Clone, Debug, Default)]
pub struct Inputs {
    pub registry_location: Option<String>,
    pub supports_kvm: Option<bool>,
    pub charm: CharmConfig,
}

#[derive(Clone, Copy, Debug)]
pub struct RenderContext<'a> {
    pub app: &'a str,
    pub inputs: &'a Inputs,
}

/// Owns one bundle: derives its config, renders it and keeps the
/// cluster in line with it.
#[derive(Clone)]
pub struct ManifestController {
    spec: ControllerSpec,
    source: Arc<dyn ManifestSource>,
}

impl std::fmt::Debug for ManifestController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestController")
            .field("name", &self.spec.name)
            .field("bundle", &self.spec.bundle)
            .finish()
    }
}

impl ManifestController {
    pub fn new(spec: ControllerSpec, source: Arc<dyn ManifestSource>) -> Self {
        Self { spec, source }
    }

    pub fn name(&self) -> &'static str {
        self.spec.name
    }

    pub fn config(&self, inputs: &Inputs) -> EffectiveConfig {
        let relation = self
            .spec
            .inputs
            .iter()
            .map(|i| (i.key().to_string(), i.value(inputs)));
        EffectiveConfig::layered(
            relation,
            inputs.charm.available_data(),
            self.spec.rename,
        )
    }

    /// First unmet requirement, if any.
    pub fn evaluate(&self, inputs: &Inputs) -> Option<String> {
        let config = self.config(inputs);
        self.spec
            .requirements
            .iter()
            .find_map(|r| r.check(&config))
    }

    pub fn hash(&self, inputs: &Inputs) -> Result<ConfigHash, serde_json::Error> {
        self.config(inputs).hash()
    }

    /// Available releases, oldest first.
    pub fn releases(&self) -> Result<Vec<String>, ManifestError> {
        let releases = self.source.releases(self.spec.bundle)?;
        if releases.is_empty() {
            return Err(ManifestError::NoReleases(self.spec.bundle.to_string()));
        }
        Ok(releases)
    }

    /// Pinned `release` when set, otherwise the newest one.
    pub fn current_release(
        &self,
        config: &EffectiveConfig,
    ) -> Result<String, ManifestError> {
        let releases = self.releases()?;
        match config.get("release").and_then(ConfigValue::as_str) {
            Some(pinned) if releases.iter().any(|r| r == pinned) => {
                Ok(pinned.to_string())
            }
            Some(pinned) => Err(ManifestError::UnknownRelease {
                bundle: self.spec.bundle.to_string(),
                release: pinned.to_string(),
            }),
            None => releases.last().cloned().ok_or_else(|| {
                ManifestError::NoReleases(self.spec.bundle.to_string())
            }),
        }
    }

    /// Patched objects of the current release.
    pub fn resources(
        &self,
        ctx: &RenderContext<'_>,
    ) -> Result<Vec<DynamicObject>, ManifestError> {
        let config = self.config(ctx.inputs);
        let release = self.current_release(&config)?;
        let patch_ctx = PatchContext {
            app: ctx.app,
            manifest: self.spec.name,
            release: &release,
            config: &config,
        };
        self.source
            .load(self.spec.bundle, &release)?
            .into_iter()
            .map(|mut doc| {
                for patch in self.spec.patches {
                    patch.apply(&mut doc, &patch_ctx);
                }
                serde_json::from_value::<DynamicObject>(doc).map_err(|e| {
                    ManifestError::Object {
                        bundle: self.spec.bundle.to_string(),
                        message: e.to_string(),
                    }
                })
            })
            .collect()
    }

    #[instrument(skip_all, fields(manifest = %self.spec.name))]
    pub async fn apply_manifests(
        &self,
        cluster: &dyn ClusterApi,
        ctx: &RenderContext<'_>,
    ) -> Result<(), ControllerError> {
        let objects = self.resources(ctx)?;
        for obj in &objects {
            cluster.apply(obj).await?;
        }
        info!(count = objects.len(), "applied manifests");
        Ok(())
    }

    #[instrument(skip_all, fields(manifest = %self.spec.name))]
    pub async fn delete_manifests(
        &self,
        cluster: &dyn ClusterApi,
        ctx: &RenderContext<'_>,
        ignore_unauthorized: bool,
    ) -> Result<(), ControllerError> {
        let objects = self.resources(ctx)?;
        // Reverse order so namespaces and CRDs go last.
        for obj in objects.iter().rev() {
            cluster.delete(obj, ignore_unauthorized).await?;
        }
        info!(count = objects.len(), "deleted manifests");
        Ok(())
    }

    /// Objects in the cluster carrying this manifest's labels, for every
    /// kind the current release renders.
    pub async fn installed(
        &self,
        cluster: &dyn ClusterApi,
        ctx: &RenderContext<'_>,
    ) -> Result<Vec<DynamicObject>, ControllerError> {
        let kinds: BTreeSet<KindRef> = self
            .resources(ctx)?
            .iter()
            .filter_map(|o| KindRef::of(o).ok())
            .collect();
        let selector = selector(ctx.app, self.spec.name);
        let mut found = Vec::new();
        for kind in &kinds {
            found.extend(cluster.list(kind, &selector).await?);
        }
        debug!(manifest = %self.spec.name, count = found.len(), "installed objects");
        Ok(found)
    }

    /// Conditions of every rendered object currently in the cluster.
    pub async fn conditions(
        &self,
        cluster: &dyn ClusterApi,
        ctx: &RenderContext<'_>,
    ) -> Result<Vec<ObjectCondition>, ControllerError> {
        let mut out = Vec::new();
        for obj in self.resources(ctx)? {
            let key = ResourceKey::of(&obj)?;
            let Some(live) = cluster.get(&key).await? else {
                continue;
            };
            out.extend(object_conditions(&live));
        }
        Ok(out)
    }

    /// `(identity, status.phase)` of installed objects of the phase kind,
    /// sorted.
    pub async fn phases(
        &self,
        cluster: &dyn ClusterApi,
        ctx: &RenderContext<'_>,
    ) -> Result<Vec<(String, String)>, ControllerError> {
        let Some(phase_kind) = self.spec.phase_kind else {
            return Ok(Vec::new());
        };
        let mut phases: Vec<(String, String)> = self
            .installed(cluster, ctx)
            .await?
            .iter()
            .filter(|o| {
                o.types.as_ref().is_some_and(|t| t.kind == phase_kind)
            })
            .map(|o| {
                let phase = o
                    .data
                    .pointer("/status/phase")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown");
                (identity(o), phase.to_string())
            })
            .collect();
        phases.sort();
        Ok(phases)
    }
}

fn object_conditions(obj: &DynamicObject) -> Vec<ObjectCondition> {
    let ident = identity(obj);
    let kind = obj
        .types
        .as_ref()
        .map(|t| t.kind.clone())
        .unwrap_or_default();
    obj.data
        .pointer("/status/conditions")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|c| {
            let fields: BTreeMap<&str, &str> = ["type", "status"]
                .into_iter()
                .filter_map(|k| c.get(k).and_then(Value::as_str).map(|v| (k, v)))
                .collect();
            Some(ObjectCondition {
                identity: ident.clone(),
                kind: kind.clone(),
                type_: fields.get("type")?.to_string(),
                status: ConditionStatus::parse(fields.get("status").copied()),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifests::builtin;
    use crate::testing::{MemoryCluster, MemorySource};
    use serde_json::json;

    fn inputs(config: Value) -> Inputs {
        Inputs {
            registry_location: Some("rocks.canonical.com/cdk".into()),
            supports_kvm: Some(false),
            charm: CharmConfig::new(serde_json::from_value(config).unwrap()),
        }
    }

    fn operator() -> ManifestController {
        ManifestController::new(builtin::operator(), Arc::new(MemorySource::fixture()))
    }

    fn custom_resource() -> ManifestController {
        ManifestController::new(
            builtin::custom_resource(),
            Arc::new(MemorySource::fixture()),
        )
    }

    #[test]
    fn operator_config_takes_registry_and_release() {
        let cfg = operator().config(&inputs(json!({
            "operator-release": "v1.0.0",
            "software-emulation": null,
        })));
        assert_eq!(
            cfg.get("image-registry"),
            Some(&ConfigValue::Str("rocks.canonical.com/cdk".into()))
        );
        assert_eq!(cfg.get("release"), Some(&ConfigValue::Str("v1.0.0".into())));
        assert!(!cfg.contains_key("operator-release"));
        assert!(!cfg.contains_key("software-emulation"));
    }

    #[test]
    fn emulation_follows_peer_kvm_unless_overridden() {
        let cr = custom_resource();
        let cfg = cr.config(&inputs(json!({})));
        assert_eq!(cfg.get("software-emulation"), Some(&ConfigValue::Bool(true)));

        let cfg = cr.config(&inputs(json!({"software-emulation": false})));
        assert_eq!(cfg.get("software-emulation"), Some(&ConfigValue::Bool(false)));
    }

    #[test]
    fn emulation_required_before_apply() {
        let cr = custom_resource();
        let mut i = inputs(json!({}));
        i.supports_kvm = None;
        assert_eq!(
            cr.evaluate(&i).as_deref(),
            Some("KubeVirt manifests waiting for definition of software-emulation")
        );
    }

    #[test]
    fn percentage_must_be_strictly_inside_bounds() {
        let cr = custom_resource();
        let pct = |v: i64| {
            cr.evaluate(&inputs(
                json!({"pvc-tolerate-less-space-up-to-percent": v}),
            ))
        };
        assert_eq!(pct(50), None);
        assert_eq!(pct(1), None);
        assert_eq!(pct(99), None);
        for bad in [0, 100, -5, 250] {
            let msg = pct(bad).unwrap();
            assert!(msg.contains(&format!("got {bad}")), "{msg}");
        }
    }

    #[test]
    fn pinned_release_must_exist() {
        let op = operator();
        let cfg = op.config(&inputs(json!({"operator-release": "v9.0.0"})));
        assert!(matches!(
            op.current_release(&cfg),
            Err(ManifestError::UnknownRelease { .. })
        ));
        let cfg = op.config(&inputs(json!({})));
        assert_eq!(op.current_release(&cfg).unwrap(), "v1.1.0");
    }

    #[test]
    fn rendered_objects_are_labelled_and_rehosted() {
        let i = inputs(json!({}));
        let ctx = RenderContext {
            app: "kubevirt",
            inputs: &i,
        };
        let objs = operator().resources(&ctx).unwrap();
        let deploy = objs
            .iter()
            .find(|o| o.types.as_ref().unwrap().kind == "Deployment")
            .unwrap();
        assert_eq!(
            deploy.metadata.labels.as_ref().unwrap()["juju.io/manifest-version"],
            "kubevirt-v1-1-0"
        );
        assert_eq!(
            deploy.data["spec"]["template"]["spec"]["containers"][0]["image"],
            "rocks.canonical.com/cdk/kubevirt/virt-operator:v1.1.0"
        );
    }

    #[tokio::test]
    async fn phases_default_to_unknown() {
        let i = inputs(json!({}));
        let ctx = RenderContext {
            app: "kubevirt",
            inputs: &i,
        };
        let cr = custom_resource();
        let cluster = MemoryCluster::default();
        cr.apply_manifests(&cluster, &ctx).await.unwrap();
        assert_eq!(
            cr.phases(&cluster, &ctx).await.unwrap(),
            vec![("KubeVirt/kubevirt/kubevirt".to_string(), "Unknown".to_string())]
        );

        cluster.set_status(
            "KubeVirt/kubevirt/kubevirt",
            json!({"phase": "Deployed", "conditions": [
                {"type": "Available", "status": "True"},
                {"type": "Progressing", "status": "False"},
            ]}),
        );
        assert_eq!(cr.phases(&cluster, &ctx).await.unwrap()[0].1, "Deployed");
        let conds = cr.conditions(&cluster, &ctx).await.unwrap();
        assert_eq!(conds.len(), 2);
        assert!(conds.iter().all(ObjectCondition::is_ready));
    }
}
