use serde_json::{Map, Value, json};
use tracing::warn;

use super::EffectiveConfig;

pub const LABEL_APPLICATION: &str = "juju.io/application";
pub const LABEL_MANIFEST: &str = "juju.io/manifest";
pub const LABEL_MANIFEST_VERSION: &str = "juju.io/manifest-version";

const KUBEVIRT_KIND: &str = "kubevirt";
const KUBEVIRT_NAME: &str = "kubevirt";

/// Workloads whose pod spec lives under `spec.template.spec`.
const TEMPLATED: &[&str] = &[
    "Deployment",
    "DaemonSet",
    "StatefulSet",
    "ReplicaSet",
    "Job",
];

/// What a patch may look at while mutating an object.
#[derive(Clone, Copy, Debug)]
pub struct PatchContext<'a> {
    pub app: &'a str,
    pub manifest: &'a str,
    pub release: &'a str,
    pub config: &'a EffectiveConfig,
}

/// Mutation applied to every rendered object of a bundle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Patch {
    /// Ownership labels used to find installed objects again.
    ManifestLabel,
    /// Point container images at `image-registry`.
    ConfigRegistry,
    /// Emulation and PVC settings on the `KubeVirt` resource.
    UpdateKubeVirt,
}

impl Patch {
    pub fn apply(&self, obj: &mut Value, ctx: &PatchContext<'_>) {
        match self {
            Patch::ManifestLabel => label(obj, ctx),
            Patch::ConfigRegistry => registry(obj, ctx),
            Patch::UpdateKubeVirt => update_kubevirt(obj, ctx),
        }
    }
}

pub fn manifest_version(manifest: &str, release: &str) -> String {
    format!("{manifest}-{}", release.replace('.', "-"))
}

/// `key=value` selector matching every object of `manifest`.
pub fn selector(app: &str, manifest: &str) -> String {
    format!("{LABEL_APPLICATION}={app},{LABEL_MANIFEST}={manifest}")
}

/// Object at `path`, creating intermediate objects. `None` when a
/// non-object value is in the way.
fn object_at<'v>(
    obj: &'v mut Value,
    path: &[&str],
) -> Option<&'v mut Map<String, Value>> {
    let mut cur = obj;
    for key in path {
        let map = cur.as_object_mut()?;
        cur = map.entry(key.to_string()).or_insert_with(|| json!({}));
    }
    cur.as_object_mut()
}

fn label(obj: &mut Value, ctx: &PatchContext<'_>) {
    let Some(labels) = object_at(obj, &["metadata", "labels"]) else {
        return;
    };
    labels.insert(LABEL_APPLICATION.into(), json!(ctx.app));
    labels.insert(LABEL_MANIFEST.into(), json!(ctx.manifest));
    labels.insert(
        LABEL_MANIFEST_VERSION.into(),
        json!(manifest_version(ctx.manifest, ctx.release)),
    );
}

fn kind(obj: &Value) -> &str {
    obj.get("kind").and_then(Value::as_str).unwrap_or_default()
}

fn pod_spec(obj: &mut Value) -> Option<&mut Value> {
    let k = kind(obj).to_string();
    if k == "Pod" {
        obj.pointer_mut("/spec")
    } else if k == "CronJob" {
        obj.pointer_mut("/spec/jobTemplate/spec/template/spec")
    } else if TEMPLATED.contains(&k.as_str()) {
        obj.pointer_mut("/spec/template/spec")
    } else {
        None
    }
}

fn rehost(image: &str, registry: &str) -> String {
    let path = image.split_once('/').map(|(_, rest)| rest).unwrap_or(image);
    format!("{}/{path}", registry.trim_end_matches('/'))
}

fn registry(obj: &mut Value, ctx: &PatchContext<'_>) {
    let Some(registry) = ctx.config.get("image-registry").and_then(|v| v.as_str())
    else {
        return;
    };
    let Some(spec) = pod_spec(obj) else {
        return;
    };
    for field in ["containers", "initContainers"] {
        let Some(containers) = spec.get_mut(field).and_then(Value::as_array_mut)
        else {
            continue;
        };
        for container in containers {
            if let Some(image) = container.get("image").and_then(Value::as_str) {
                let image = rehost(image, registry);
                container["image"] = json!(image);
            }
        }
    }
}

fn update_kubevirt(obj: &mut Value, ctx: &PatchContext<'_>) {
    let name = obj.pointer("/metadata/name").and_then(Value::as_str);
    if !kind(obj).eq_ignore_ascii_case(KUBEVIRT_KIND) || name != Some(KUBEVIRT_NAME)
    {
        return;
    }
    let emulation = ctx.config.get("software-emulation").and_then(|v| v.as_bool());
    let tolerate = ctx
        .config
        .get("pvc-tolerate-less-space-up-to-percent")
        .and_then(|v| v.as_i64());
    let Some(dev) = object_at(
        obj,
        &["spec", "configuration", "developerConfiguration"],
    ) else {
        warn!("kubevirt resource has an unexpected shape; not patched");
        return;
    };
    match emulation {
        Some(on) => {
            dev.insert("useEmulation".into(), json!(on));
        }
        None => warn!("software-emulation is not a boolean; not patched"),
    }
    if let Some(pct) = tolerate {
        dev.insert("pvcTolerateLessSpaceUpToPercent".into(), json!(pct));
    }
}
