use std::fmt;

use serde::{Deserialize, Serialize};

/// Marker a KubeVirt phase string carries once the operator finished
/// rolling out its components.
pub const DEPLOYED_MARKER: &str = "Deployed";

/// Kind whose Degraded/Progressing=False conditions are expected while the
/// operator converges and therefore not reported.
const TOLERANT_KIND: &str = "KubeVirt";

/// Outcome of a single gate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadinessResult {
    Ready,
    Waiting(String),
    Blocked(String),
}

impl ReadinessResult {
    /// Status to surface when the gate did not pass.
    pub fn as_status(&self) -> Option<UnitStatus> {
        match self {
            ReadinessResult::Ready => None,
            ReadinessResult::Waiting(m) => Some(UnitStatus::Waiting(m.clone())),
            ReadinessResult::Blocked(m) => Some(UnitStatus::Blocked(m.clone())),
        }
    }
}

/// Workload status as Juju understands it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "lowercase")]
pub enum UnitStatus {
    Active(String),
    Waiting(String),
    Blocked(String),
    Maintenance(String),
}

impl UnitStatus {
    pub fn name(&self) -> &'static str {
        match self {
            UnitStatus::Active(_) => "active",
            UnitStatus::Waiting(_) => "waiting",
            UnitStatus::Blocked(_) => "blocked",
            UnitStatus::Maintenance(_) => "maintenance",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            UnitStatus::Active(m)
            | UnitStatus::Waiting(m)
            | UnitStatus::Blocked(m)
            | UnitStatus::Maintenance(m) => m,
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name(), self.message())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("True") => ConditionStatus::True,
            Some("False") => ConditionStatus::False,
            _ => ConditionStatus::Unknown,
        }
    }
}

/// One condition read back from a live object.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObjectCondition {
    /// `Kind/namespace/name` or `Kind/name`.
    pub identity: String,
    pub kind: String,
    pub type_: String,
    pub status: ConditionStatus,
}

impl ObjectCondition {
    pub fn is_ready(&self) -> bool {
        match self.status {
            ConditionStatus::True => true,
            ConditionStatus::False => {
                self.kind == TOLERANT_KIND
                    && matches!(self.type_.as_str(), "Degraded" | "Progressing")
            }
            ConditionStatus::Unknown => false,
        }
    }
}

/// Messages for every condition that is not ready, sorted.
pub fn unready_messages(conditions: &[ObjectCondition]) -> Vec<String> {
    let mut out: Vec<String> = conditions
        .iter()
        .filter(|c| !c.is_ready())
        .map(|c| format!("{} is not {}", c.identity, c.type_))
        .collect();
    out.sort();
    out.dedup();
    out
}

/// Reduce per-object phases to a unit status.
pub fn phase_summary(phases: &[(String, String)]) -> UnitStatus {
    let pending: Vec<String> = phases
        .iter()
        .filter(|(_, phase)| !phase.contains(DEPLOYED_MARKER))
        .map(|(identity, phase)| format!("{identity} is {phase}"))
        .collect();
    if pending.is_empty() {
        UnitStatus::Active("Ready".into())
    } else {
        UnitStatus::Waiting(pending.join(", "))
    }
}
