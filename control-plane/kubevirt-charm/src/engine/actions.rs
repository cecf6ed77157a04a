use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{info, warn};

use super::{Action, ConvergenceEngine, EngineError, Event, Outcome};
use crate::manifests::{ControllerError, RenderContext, ResourceFilter};
use crate::model::Databag;

fn param(params: &BTreeMap<String, Value>, key: &str) -> String {
    params
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

impl ConvergenceEngine {
    /// Run an operator action, reporting through `action-set` or
    /// `action-fail`.
    pub async fn run_action(&self, action: Action) -> Result<(), EngineError> {
        info!(?action, "running action");
        let result = match action {
            Action::ListVersions => self
                .collector
                .list_versions()
                .map_err(|e| e.to_string()),
            Action::ListResources
            | Action::ScrubResources
            | Action::SyncResources => self.resource_action(action).await?,
            Action::SyncInstall => self.sync_install().await?,
        };
        match result {
            Ok(results) => self.model.action_set(&results).await?,
            Err(message) => {
                warn!(?action, %message, "action failed");
                self.model.action_fail(&message).await?
            }
        }
        Ok(())
    }

    async fn resource_action(
        &self,
        action: Action,
    ) -> Result<Result<Databag, String>, EngineError> {
        let params = self.model.action_params().await?;
        let filter =
            ResourceFilter::parse(&param(&params, "manifest"), &param(&params, "resources"));
        let inputs = self.current_inputs().await?;
        let ctx = RenderContext {
            app: self.model.app_name(),
            inputs: &inputs,
        };
        let cluster = self.cluster.as_ref();

        let report: Result<Databag, ControllerError> = match action {
            Action::ScrubResources => self
                .collector
                .scrub_resources(cluster, &ctx, &filter)
                .await
                .map(|r| {
                    let mut out = r.results();
                    out.insert("deleted".into(), r.extra_identities());
                    out
                }),
            Action::SyncResources => self
                .collector
                .apply_missing_resources(cluster, &ctx, &filter)
                .await
                .map(|r| {
                    let mut out = r.results();
                    out.insert("synced".into(), r.missing_identities());
                    out
                }),
            _ => self
                .collector
                .list_resources(cluster, &ctx, &filter)
                .await
                .map(|r| r.results()),
        };
        Ok(report.map_err(|e| e.to_string()))
    }

    /// Rerun host setup; on success carry on converging. A deferred
    /// deploy is queued as a config change for the next hook.
    async fn sync_install(&self) -> Result<Result<Databag, String>, EngineError> {
        let mut state = self.store.load()?;
        let result = if !self.run_host_setup(&mut state).await? {
            Err(state
                .install_failure
                .clone()
                .unwrap_or_else(|| "Host setup failed".into()))
        } else {
            match self.converge(&mut state, None, false).await? {
                Outcome::Completed => {
                    let mut out = Databag::new();
                    out.insert("result".into(), "Host setup completed".into());
                    Ok(out)
                }
                Outcome::Deferred(reason) => {
                    let mut queued: Vec<Event> = self.store.load_deferred()?;
                    if !queued.contains(&Event::ConfigChanged) {
                        queued.push(Event::ConfigChanged);
                        self.store.save_deferred(&queued)?;
                    }
                    Err(format!("Host setup completed, deployment deferred: {reason}"))
                }
            }
        };
        self.store.save(&state)?;
        Ok(result)
    }
}
