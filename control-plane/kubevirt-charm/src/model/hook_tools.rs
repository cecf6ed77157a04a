use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, trace};

use super::{Databag, Model, ModelError, Relation};
use crate::status::UnitStatus;

/// [`Model`] implemented on top of the Juju hook tools.
#[derive(Clone, Debug)]
pub struct HookTools {
    unit: String,
}

impl HookTools {
    pub fn new(unit: impl Into<String>) -> Self {
        Self { unit: unit.into() }
    }

    async fn run(&self, tool: &str, args: &[String]) -> Result<String, ModelError> {
        trace!(%tool, ?args, "hook tool");
        let output = Command::new(tool)
            .args(args)
            .output()
            .await
            .map_err(|source| ModelError::Spawn {
                tool: tool.to_string(),
                source,
            })?;
        if !output.status.success() {
            return Err(ModelError::Tool {
                tool: tool.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn json<T: DeserializeOwned>(
        &self,
        tool: &str,
        args: &[String],
    ) -> Result<T, ModelError> {
        let mut args = args.to_vec();
        args.push("--format=json".into());
        let out = self.run(tool, &args).await?;
        // Tools print nothing at all for empty results.
        let body = if out.trim().is_empty() { "null" } else { out.trim() };
        serde_json::from_str(body).map_err(|source| ModelError::Parse {
            tool: tool.to_string(),
            source,
        })
    }

    async fn unit_databag(
        &self,
        relation_id: &str,
        unit: &str,
    ) -> Result<Databag, ModelError> {
        let bag: Option<BTreeMap<String, String>> = self
            .json(
                "relation-get",
                &["-r".into(), relation_id.into(), "-".into(), unit.into()],
            )
            .await?;
        Ok(bag.unwrap_or_default())
    }

    async fn status_set(
        &self,
        application: bool,
        status: &UnitStatus,
    ) -> Result<(), ModelError> {
        let mut args = Vec::new();
        if application {
            args.push("--application".to_string());
        }
        args.push(status.name().to_string());
        args.push(status.message().to_string());
        self.run("status-set", &args).await.map(|_| ())
    }
}

fn kv_args(data: &Databag) -> Vec<String> {
    data.iter().map(|(k, v)| format!("{k}={v}")).collect()
}

#[async_trait]
impl Model for HookTools {
    fn unit_name(&self) -> &str {
        &self.unit
    }

    async fn is_leader(&self) -> Result<bool, ModelError> {
        let leader: Option<bool> = self.json("is-leader", &[]).await?;
        Ok(leader.unwrap_or(false))
    }

    async fn config(&self) -> Result<BTreeMap<String, Value>, ModelError> {
        let cfg: Option<BTreeMap<String, Value>> =
            self.json("config-get", &[]).await?;
        Ok(cfg.unwrap_or_default())
    }

    async fn relation(
        &self,
        endpoint: &str,
    ) -> Result<Option<Relation>, ModelError> {
        let ids: Option<Vec<String>> =
            self.json("relation-ids", &[endpoint.to_string()]).await?;
        let Some(id) = ids.and_then(|ids| ids.into_iter().next()) else {
            return Ok(None);
        };
        let units: Option<Vec<String>> = self
            .json("relation-list", &["-r".into(), id.clone()])
            .await?;
        let units = units.unwrap_or_default();

        let mut data = BTreeMap::new();
        data.insert(self.unit.clone(), self.unit_databag(&id, &self.unit).await?);
        for unit in &units {
            data.insert(unit.clone(), self.unit_databag(&id, unit).await?);
        }
        debug!(%endpoint, relation = %id, units = units.len(), "read relation");
        Ok(Some(Relation {
            id,
            endpoint: endpoint.to_string(),
            units,
            data,
        }))
    }

    async fn set_relation_data(
        &self,
        relation: &Relation,
        data: &Databag,
    ) -> Result<(), ModelError> {
        if data.is_empty() {
            return Ok(());
        }
        let mut args = vec!["-r".to_string(), relation.id.clone()];
        args.extend(kv_args(data));
        self.run("relation-set", &args).await.map(|_| ())
    }

    async fn set_unit_status(
        &self,
        status: &UnitStatus,
    ) -> Result<(), ModelError> {
        self.status_set(false, status).await
    }

    async fn set_app_status(
        &self,
        status: &UnitStatus,
    ) -> Result<(), ModelError> {
        self.status_set(true, status).await
    }

    async fn set_workload_version(
        &self,
        version: &str,
    ) -> Result<(), ModelError> {
        self.run("application-version-set", &[version.to_string()])
            .await
            .map(|_| ())
    }

    async fn action_params(
        &self,
    ) -> Result<BTreeMap<String, Value>, ModelError> {
        let params: Option<BTreeMap<String, Value>> =
            self.json("action-get", &[]).await?;
        Ok(params.unwrap_or_default())
    }

    async fn action_set(&self, results: &Databag) -> Result<(), ModelError> {
        if results.is_empty() {
            return Ok(());
        }
        self.run("action-set", &kv_args(results)).await.map(|_| ())
    }

    async fn action_fail(&self, message: &str) -> Result<(), ModelError> {
        self.run("action-fail", &[message.to_string()]).await.map(|_| ())
    }
}
