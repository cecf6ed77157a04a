//! Access to the Juju model from inside a hook.
//!
//! The engine only talks to [`Model`]; [`HookTools`] is the production
//! implementation that shells out to the hook tools the agent puts on
//! `PATH`.

pub mod hook_tools;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::status::UnitStatus;

pub use hook_tools::HookTools;

pub type Databag = BTreeMap<String, String>;

#[derive(thiserror::Error, Debug)]
pub enum ModelError {
    #[error("hook tool {tool} failed: {message}")]
    Tool { tool: String, message: String },

    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected output from {tool}: {source}")]
    Parse {
        tool: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A relation as seen from this unit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Relation {
    /// e.g. `kubevirts:3`
    pub id: String,
    pub endpoint: String,
    /// Remote units, in the order the agent reported them.
    pub units: Vec<String>,
    /// Unit databags, keyed by unit name; includes this unit's own bag.
    pub data: BTreeMap<String, Databag>,
}

impl Relation {
    pub fn unit_data(&self, unit: &str) -> Option<&Databag> {
        self.data.get(unit)
    }
}

#[async_trait]
pub trait Model: Send + Sync {
    fn unit_name(&self) -> &str;

    fn app_name(&self) -> &str {
        let unit = self.unit_name();
        unit.split_once('/').map(|(app, _)| app).unwrap_or(unit)
    }

    async fn is_leader(&self) -> Result<bool, ModelError>;

    async fn config(&self) -> Result<BTreeMap<String, Value>, ModelError>;

    /// The single relation on `endpoint`, if one exists.
    async fn relation(
        &self,
        endpoint: &str,
    ) -> Result<Option<Relation>, ModelError>;

    /// Merge `data` into this unit's databag on `relation`.
    async fn set_relation_data(
        &self,
        relation: &Relation,
        data: &Databag,
    ) -> Result<(), ModelError>;

    async fn set_unit_status(
        &self,
        status: &UnitStatus,
    ) -> Result<(), ModelError>;

    /// Only the leader may call this.
    async fn set_app_status(
        &self,
        status: &UnitStatus,
    ) -> Result<(), ModelError>;

    async fn set_workload_version(
        &self,
        version: &str,
    ) -> Result<(), ModelError>;

    async fn action_params(
        &self,
    ) -> Result<BTreeMap<String, Value>, ModelError>;

    async fn action_set(&self, results: &Databag) -> Result<(), ModelError>;

    async fn action_fail(&self, message: &str) -> Result<(), ModelError>;
}
