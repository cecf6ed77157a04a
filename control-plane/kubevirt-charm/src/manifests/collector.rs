use std::collections::BTreeMap;

use kube::core::DynamicObject;
use tracing::info;

use super::controller::{ControllerError, ManifestController, RenderContext};
use super::source::ManifestError;
use crate::cluster::{ClusterApi, ResourceKey, identity};
use crate::model::Databag;
use crate::status::unready_messages;

/// Narrows which manifests and objects an action touches.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceFilter {
    manifests: Vec<String>,
    resources: Vec<ResourceToken>,
}

/// `Kind`, `Kind/name` or `Kind/namespace/name`.
#[derive(Clone, Debug, PartialEq, Eq)]
struct ResourceToken {
    kind: String,
    namespace: Option<String>,
    name: Option<String>,
}

impl ResourceToken {
    fn parse(raw: &str) -> Option<Self> {
        let parts: Vec<&str> = raw.split('/').collect();
        let (kind, namespace, name) = match parts.as_slice() {
            [kind] => (kind, None, None),
            [kind, name] => (kind, None, Some(name.to_string())),
            [kind, ns, name] => (kind, Some(ns.to_string()), Some(name.to_string())),
            _ => return None,
        };
        Some(Self {
            kind: kind.to_string(),
            namespace,
            name,
        })
    }

    fn matches(&self, key: &ResourceKey) -> bool {
        key.kind.kind.eq_ignore_ascii_case(&self.kind)
            && self.name.as_ref().is_none_or(|n| *n == key.name)
            && self
                .namespace
                .as_ref()
                .is_none_or(|ns| Some(ns) == key.namespace.as_ref())
    }
}

impl ResourceFilter {
    /// `manifests` is space or comma separated, `resources` space
    /// separated. Empty strings select everything.
    pub fn parse(manifests: &str, resources: &str) -> Self {
        Self {
            manifests: manifests
                .split([' ', ','])
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            resources: resources
                .split_whitespace()
                .filter_map(ResourceToken::parse)
                .collect(),
        }
    }

    fn selects(&self, obj: &DynamicObject) -> bool {
        if self.resources.is_empty() {
            return true;
        }
        match ResourceKey::of(obj) {
            Ok(key) => self.resources.iter().any(|t| t.matches(&key)),
            Err(_) => false,
        }
    }
}

/// Rendered objects compared against labelled objects in the cluster.
#[derive(Clone, Debug, Default)]
pub struct ResourceReport {
    pub correct: Vec<DynamicObject>,
    pub extra: Vec<DynamicObject>,
    pub missing: Vec<DynamicObject>,
}

fn joined(objs: &[DynamicObject]) -> String {
    let mut ids: Vec<String> = objs.iter().map(identity).collect();
    ids.sort();
    ids.join("\n")
}

impl ResourceReport {
    pub fn results(&self) -> Databag {
        let mut out = Databag::new();
        out.insert("correct".into(), joined(&self.correct));
        out.insert("extra".into(), joined(&self.extra));
        out.insert("missing".into(), joined(&self.missing));
        out
    }

    pub fn extra_identities(&self) -> String {
        joined(&self.extra)
    }

    pub fn missing_identities(&self) -> String {
        joined(&self.missing)
    }
}

/// Rendered objects may omit the namespace of namespaced kinds.
fn same_object(rendered: &ResourceKey, live: &ResourceKey) -> bool {
    rendered.kind.kind == live.kind.kind
        && rendered.name == live.name
        && (rendered.namespace.is_none() || rendered.namespace == live.namespace)
}

/// All manifest controllers of the charm, in apply order.
#[derive(Clone, Debug)]
pub struct Collector {
    controllers: Vec<ManifestController>,
}

impl Collector {
    pub fn new(controllers: Vec<ManifestController>) -> Self {
        Self { controllers }
    }

    pub fn controllers(&self) -> &[ManifestController] {
        &self.controllers
    }

    fn select(
        &self,
        filter: &ResourceFilter,
    ) -> Result<Vec<&ManifestController>, ManifestError> {
        if filter.manifests.is_empty() {
            return Ok(self.controllers.iter().collect());
        }
        filter
            .manifests
            .iter()
            .map(|name| {
                self.controllers
                    .iter()
                    .find(|c| c.name() == name)
                    .ok_or_else(|| ManifestError::UnknownManifest(name.clone()))
            })
            .collect()
    }

    /// `<manifest>-versions` to newline separated releases.
    pub fn list_versions(&self) -> Result<Databag, ManifestError> {
        let mut out = Databag::new();
        for c in &self.controllers {
            out.insert(format!("{}-versions", c.name()), c.releases()?.join("\n"));
        }
        Ok(out)
    }

    fn current_releases(
        &self,
        ctx: &RenderContext<'_>,
    ) -> Result<Vec<(&'static str, String)>, ManifestError> {
        self.controllers
            .iter()
            .map(|c| Ok((c.name(), c.current_release(&c.config(ctx.inputs))?)))
            .collect()
    }

    /// Workload version: distinct releases, comma separated.
    pub fn short_version(
        &self,
        ctx: &RenderContext<'_>,
    ) -> Result<String, ManifestError> {
        let mut releases: Vec<String> = Vec::new();
        for (_, release) in self.current_releases(ctx)? {
            if !releases.contains(&release) {
                releases.push(release);
            }
        }
        Ok(releases.join(","))
    }

    /// Application status line naming every manifest's release.
    pub fn long_version(
        &self,
        ctx: &RenderContext<'_>,
    ) -> Result<String, ManifestError> {
        let parts: Vec<String> = self
            .current_releases(ctx)?
            .into_iter()
            .map(|(name, release)| format!("{name}={release}"))
            .collect();
        Ok(format!("Versions: {}", parts.join(", ")))
    }

    /// Every unready condition across all controllers.
    pub async fn unready(
        &self,
        cluster: &dyn ClusterApi,
        ctx: &RenderContext<'_>,
    ) -> Result<Vec<String>, ControllerError> {
        let mut conditions = Vec::new();
        for c in &self.controllers {
            conditions.extend(c.conditions(cluster, ctx).await?);
        }
        Ok(unready_messages(&conditions))
    }

    pub async fn phases(
        &self,
        cluster: &dyn ClusterApi,
        ctx: &RenderContext<'_>,
    ) -> Result<Vec<(String, String)>, ControllerError> {
        let mut phases = Vec::new();
        for c in &self.controllers {
            phases.extend(c.phases(cluster, ctx).await?);
        }
        phases.sort();
        Ok(phases)
    }

    pub async fn list_resources(
        &self,
        cluster: &dyn ClusterApi,
        ctx: &RenderContext<'_>,
        filter: &ResourceFilter,
    ) -> Result<ResourceReport, ControllerError> {
        let mut report = ResourceReport::default();
        for c in self.select(filter)? {
            let rendered: Vec<DynamicObject> = c
                .resources(ctx)?
                .into_iter()
                .filter(|o| filter.selects(o))
                .collect();
            let installed: Vec<DynamicObject> = c
                .installed(cluster, ctx)
                .await?
                .into_iter()
                .filter(|o| filter.selects(o))
                .collect();
            let rendered_keys: Vec<ResourceKey> = rendered
                .iter()
                .map(ResourceKey::of)
                .collect::<Result<_, _>>()?;
            let installed_keys: Vec<ResourceKey> = installed
                .iter()
                .map(ResourceKey::of)
                .collect::<Result<_, _>>()?;

            for (obj, key) in rendered.iter().zip(&rendered_keys) {
                if installed_keys.iter().any(|live| same_object(key, live)) {
                    report.correct.push(obj.clone());
                } else {
                    report.missing.push(obj.clone());
                }
            }
            for (obj, live) in installed.iter().zip(&installed_keys) {
                if !rendered_keys.iter().any(|key| same_object(key, live)) {
                    report.extra.push(obj.clone());
                }
            }
        }
        Ok(report)
    }

    /// Delete labelled objects the current release no longer renders.
    pub async fn scrub_resources(
        &self,
        cluster: &dyn ClusterApi,
        ctx: &RenderContext<'_>,
        filter: &ResourceFilter,
    ) -> Result<ResourceReport, ControllerError> {
        let report = self.list_resources(cluster, ctx, filter).await?;
        for obj in &report.extra {
            cluster.delete(obj, false).await?;
        }
        info!(deleted = report.extra.len(), "scrubbed resources");
        Ok(report)
    }

    /// Apply rendered objects that are missing from the cluster.
    pub async fn apply_missing_resources(
        &self,
        cluster: &dyn ClusterApi,
        ctx: &RenderContext<'_>,
        filter: &ResourceFilter,
    ) -> Result<ResourceReport, ControllerError> {
        let report = self.list_resources(cluster, ctx, filter).await?;
        for obj in &report.missing {
            cluster.apply(obj).await?;
        }
        info!(synced = report.missing.len(), "synced resources");
        Ok(report)
    }

    /// Controller names mapped to their releases, for offline listing.
    pub fn releases(&self) -> Result<BTreeMap<&'static str, Vec<String>>, ManifestError> {
        self.controllers
            .iter()
            .map(|c| Ok((c.name(), c.releases()?)))
            .collect()
    }
}
