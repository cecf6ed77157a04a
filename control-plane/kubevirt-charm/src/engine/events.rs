use serde::{Deserialize, Serialize};

use crate::relations::kube_control::KUBE_CONTROL_ENDPOINT;
use crate::relations::peer::PEER_ENDPOINT;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationPhase {
    Created,
    Joined,
    Changed,
    Departed,
    Broken,
}

impl RelationPhase {
    fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "created" => RelationPhase::Created,
            "joined" => RelationPhase::Joined,
            "changed" => RelationPhase::Changed,
            "departed" => RelationPhase::Departed,
            "broken" => RelationPhase::Broken,
            _ => return None,
        })
    }
}

/// A hook the charm reacts to. Serialised into the deferred queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum Event {
    Install,
    UpgradeCharm,
    ConfigChanged,
    UpdateStatus,
    Stop,
    Relation {
        endpoint: String,
        phase: RelationPhase,
        relation_id: Option<String>,
    },
}

/// What the engine does for an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handler {
    InstallOrUpgrade,
    KubeControl,
    KubeVirt,
    MergeConfig,
    UpdateStatus,
    Cleanup,
}

/// Relation hooks by endpoint and phase. Departed hooks are not observed.
const RELATION_HANDLERS: &[(&str, RelationPhase, Handler)] = &[
    (KUBE_CONTROL_ENDPOINT, RelationPhase::Broken, Handler::MergeConfig),
    (KUBE_CONTROL_ENDPOINT, RelationPhase::Created, Handler::KubeControl),
    (KUBE_CONTROL_ENDPOINT, RelationPhase::Joined, Handler::KubeControl),
    (KUBE_CONTROL_ENDPOINT, RelationPhase::Changed, Handler::KubeControl),
    (PEER_ENDPOINT, RelationPhase::Created, Handler::KubeVirt),
    (PEER_ENDPOINT, RelationPhase::Joined, Handler::KubeVirt),
    (PEER_ENDPOINT, RelationPhase::Changed, Handler::KubeVirt),
    (PEER_ENDPOINT, RelationPhase::Broken, Handler::KubeVirt),
];

impl Event {
    /// Parse a hook name such as `kube-control-relation-changed`.
    pub fn from_hook(name: &str, relation_id: Option<&str>) -> Option<Self> {
        let event = match name {
            "install" => Event::Install,
            "upgrade-charm" => Event::UpgradeCharm,
            "config-changed" => Event::ConfigChanged,
            "update-status" => Event::UpdateStatus,
            "stop" => Event::Stop,
            other => {
                let (endpoint, phase) = other.rsplit_once("-relation-")?;
                Event::Relation {
                    endpoint: endpoint.to_string(),
                    phase: RelationPhase::parse(phase)?,
                    relation_id: relation_id.map(str::to_string),
                }
            }
        };
        Some(event)
    }

    pub fn handler(&self) -> Option<Handler> {
        match self {
            Event::Install | Event::UpgradeCharm => Some(Handler::InstallOrUpgrade),
            Event::ConfigChanged => Some(Handler::MergeConfig),
            Event::UpdateStatus => Some(Handler::UpdateStatus),
            Event::Stop => Some(Handler::Cleanup),
            Event::Relation {
                endpoint, phase, ..
            } => RELATION_HANDLERS
                .iter()
                .find(|(ep, ph, _)| *ep == endpoint.as_str() && ph == phase)
                .map(|(_, _, handler)| *handler),
        }
    }

    /// Id of the relation this hook tears down, if it does.
    pub fn broken_relation(&self) -> Option<&str> {
        match self {
            Event::Relation {
                phase: RelationPhase::Broken,
                relation_id,
                ..
            } => relation_id.as_deref(),
            _ => None,
        }
    }
}

/// Operator-invoked actions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    ListVersions,
    ListResources,
    ScrubResources,
    SyncResources,
    SyncInstall,
}

impl Action {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "list-versions" => Action::ListVersions,
            "list-resources" => Action::ListResources,
            "scrub-resources" => Action::ScrubResources,
            "sync-resources" => Action::SyncResources,
            "sync-install" => Action::SyncInstall,
            _ => return None,
        })
    }
}

/// Parsed `JUJU_DISPATCH_PATH`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    Hook(Event),
    Action(Action),
    Unhandled(String),
}

impl Dispatch {
    pub fn parse(path: &str, relation_id: Option<&str>) -> Self {
        let parsed = match path.split_once('/') {
            Some(("hooks", name)) => Event::from_hook(name, relation_id).map(Dispatch::Hook),
            Some(("actions", name)) => Action::from_name(name).map(Dispatch::Action),
            _ => None,
        };
        parsed.unwrap_or_else(|| Dispatch::Unhandled(path.to_string()))
    }
}
