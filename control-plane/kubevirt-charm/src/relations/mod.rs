pub mod kube_control;
pub mod peer;

use crate::model::Relation;
use crate::status::ReadinessResult;

pub use kube_control::{Creds, KubeControl, KubeControlView};
pub use peer::{KubeVirtPeer, PeerView};

/// Shared readiness rule for required relations: no relation (or the
/// relation being torn down by this very hook) blocks, otherwise missing
/// or invalid data waits.
pub(crate) fn relation_readiness(
    endpoint: &str,
    relation: Option<&Relation>,
    broken_relation: Option<&str>,
    data_ready: bool,
) -> ReadinessResult {
    let removed = match relation {
        None => true,
        Some(rel) => broken_relation == Some(rel.id.as_str()),
    };
    if removed {
        ReadinessResult::Blocked(format!("Missing required {endpoint} relation"))
    } else if data_ready {
        ReadinessResult::Ready
    } else {
        ReadinessResult::Waiting(format!("Waiting for {endpoint} relation"))
    }
}
