use std::sync::Arc;

use super::controller::{
    ControllerSpec, ManifestController, RelationInput, Requirement,
};
use super::patches::Patch;
use super::source::ManifestSource;

static OPERATOR_PATCHES: &[Patch] = &[Patch::ManifestLabel, Patch::ConfigRegistry];
static OPERATOR_INPUTS: &[RelationInput] = &[RelationInput::ImageRegistry];

static CR_PATCHES: &[Patch] = &[Patch::ManifestLabel, Patch::UpdateKubeVirt];
static CR_INPUTS: &[RelationInput] = &[RelationInput::SoftwareEmulation];
static CR_REQUIREMENTS: &[Requirement] = &[
    Requirement::Bool("software-emulation"),
    Requirement::Percentage("pvc-tolerate-less-space-up-to-percent"),
];

/// The virt-operator and its CRDs.
pub fn operator() -> ControllerSpec {
    ControllerSpec {
        name: "kubevirt",
        bundle: "operator",
        patches: OPERATOR_PATCHES,
        inputs: OPERATOR_INPUTS,
        requirements: &[],
        rename: Some(("operator-release", "release")),
        phase_kind: None,
    }
}

/// The `KubeVirt` custom resource the operator acts on.
pub fn custom_resource() -> ControllerSpec {
    ControllerSpec {
        name: "kubevirt-custom-resource",
        bundle: "custom_resource",
        patches: CR_PATCHES,
        inputs: CR_INPUTS,
        requirements: CR_REQUIREMENTS,
        rename: None,
        phase_kind: Some("KubeVirt"),
    }
}

/// Controllers in apply order; the CR needs the operator's CRDs first.
pub fn controllers(source: Arc<dyn ManifestSource>) -> Vec<ManifestController> {
    vec![
        ManifestController::new(operator(), source.clone()),
        ManifestController::new(custom_resource(), source),
    ]
}
