//! Gate chain, redeploy decision and status reporting for one event.

pub mod actions;
pub mod events;


use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::cluster::ClusterApi;
use crate::config::CharmConfig;
use crate::host::HostSetup;
use crate::manifests::{
    Collector, ConfigHash, ControllerError, Inputs, RenderContext,
};
use crate::model::{Model, ModelError};
use crate::relations::{KubeControl, KubeVirtPeer};
use crate::state::{PersistentState, StateError, StateStore};
use crate::status::{ReadinessResult, UnitStatus, phase_summary};

pub use events::{Action, Dispatch, Event, Handler, RelationPhase};

const WAITING_FOR_API: &str = "Waiting for Kubernetes API";

/// Failures that abort the hook so the agent retries it as a whole.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Result of handling one event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// Redeliver the event later.
    Deferred(String),
}

/// Where the engine puts and finds things on the machine.
#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub kvm_device: PathBuf,
    pub kubeconfig: PathBuf,
    pub ca_path: Option<PathBuf>,
}

pub struct ConvergenceEngine {
    model: Arc<dyn Model>,
    cluster: Arc<dyn ClusterApi>,
    host: Arc<dyn HostSetup>,
    collector: Collector,
    store: StateStore,
    peer: KubeVirtPeer,
    kube_control: KubeControl,
    kubeconfig: PathBuf,
    ca_path: Option<PathBuf>,
}

impl ConvergenceEngine {
    pub fn new(
        model: Arc<dyn Model>,
        cluster: Arc<dyn ClusterApi>,
        host: Arc<dyn HostSetup>,
        collector: Collector,
        store: StateStore,
        settings: EngineSettings,
    ) -> Self {
        Self {
            model,
            cluster,
            host,
            collector,
            store,
            peer: KubeVirtPeer::new(settings.kvm_device),
            kube_control: KubeControl::default(),
            kubeconfig: settings.kubeconfig,
            ca_path: settings.ca_path,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Run the handler for `event`. State is persisted before returning.
    #[instrument(skip_all, fields(unit = %self.model.unit_name(), ?event))]
    pub async fn handle(&self, event: &Event) -> Result<Outcome, EngineError> {
        let Some(handler) = event.handler() else {
            debug!("no handler");
            return Ok(Outcome::Completed);
        };
        let mut state = self.store.load()?;
        let broken = event.broken_relation();
        let outcome = match handler {
            Handler::InstallOrUpgrade => self.install_or_upgrade(&mut state).await?,
            Handler::KubeControl => {
                self.kube_control
                    .set_auth_request(self.model.as_ref(), self.model.unit_name())
                    .await?;
                self.converge(&mut state, broken, false).await?
            }
            Handler::KubeVirt => {
                self.discover(&mut state).await?;
                self.converge(&mut state, broken, false).await?
            }
            Handler::MergeConfig => self.converge(&mut state, broken, false).await?,
            Handler::UpdateStatus => self.update_status(&state).await?,
            Handler::Cleanup => self.cleanup(&mut state).await?,
        };
        self.store.save(&state)?;
        if let Outcome::Deferred(reason) = &outcome {
            info!(%reason, "event deferred");
        }
        Ok(outcome)
    }

    async fn set_status(&self, status: UnitStatus) -> Result<(), ModelError> {
        debug!(%status, "unit status");
        self.model.set_unit_status(&status).await
    }

    async fn discover(&self, state: &mut PersistentState) -> Result<(), ModelError> {
        state.has_kvm = self.peer.discover(self.model.as_ref()).await?;
        Ok(())
    }

    async fn install_or_upgrade(
        &self,
        state: &mut PersistentState,
    ) -> Result<Outcome, EngineError> {
        self.set_status(UnitStatus::Maintenance("Preparing host".into()))
            .await?;
        self.run_host_setup(state).await?;
        self.discover(state).await?;
        self.converge(state, None, true).await
    }

    /// Run host setup and record the outcome in `state`.
    pub(crate) async fn run_host_setup(
        &self,
        state: &mut PersistentState,
    ) -> Result<bool, ModelError> {
        match self.host.install().await {
            Ok(()) => {
                state.install_failure = None;
                Ok(true)
            }
            Err(e) => {
                warn!(error = %e, "host setup failed");
                let message = format!("Host setup failed: {e}");
                self.set_status(UnitStatus::Blocked(message.clone())).await?;
                state.install_failure = Some(message);
                Ok(false)
            }
        }
    }

    /// Collaborator values for rendering, without gating on them.
    pub(crate) async fn current_inputs(&self) -> Result<Inputs, ModelError> {
        let kube_control = self.kube_control.view(self.model.as_ref()).await?;
        let peer = self.peer.view(self.model.as_ref()).await?;
        Ok(Inputs {
            registry_location: kube_control.registry_location().map(str::to_string),
            supports_kvm: peer.supports_kvm(),
            charm: CharmConfig::new(self.model.config().await?),
        })
    }

    /// Status for a failed gate; `None` when the chain may continue.
    async fn gate(
        &self,
        result: ReadinessResult,
    ) -> Result<Option<Outcome>, ModelError> {
        match result.as_status() {
            None => Ok(None),
            Some(status) => {
                info!(%status, "gate not passed");
                self.set_status(status).await?;
                Ok(Some(Outcome::Completed))
            }
        }
    }

    /// Walk the gates and redeploy when the combined config hash moved,
    /// or unconditionally when `force` is set.
    #[instrument(skip_all, fields(force = force))]
    pub async fn converge(
        &self,
        state: &mut PersistentState,
        broken: Option<&str>,
        force: bool,
    ) -> Result<Outcome, EngineError> {
        if let Some(failure) = &state.install_failure {
            self.set_status(UnitStatus::Blocked(failure.clone())).await?;
            return Ok(Outcome::Completed);
        }

        let model = self.model.as_ref();
        let unit = model.unit_name();

        let kube_control = self.kube_control.view(model).await?;
        if let Some(done) = self.gate(kube_control.evaluate(broken)).await? {
            return Ok(done);
        }
        if let Some(tag) = kube_control.cluster_tag() {
            state.cluster_tag = Some(tag.to_string());
        }
        if kube_control.get_auth_credentials(unit).is_none() {
            let waiting = "Waiting for kube-control: unit credentials";
            self.set_status(UnitStatus::Waiting(waiting.into())).await?;
            return Ok(Outcome::Completed);
        }
        let written = match kube_control
            .create_kubeconfig(&self.kubeconfig, unit, self.ca_path.as_deref())
            .await
        {
            Ok(written) => written,
            Err(e) => {
                warn!(error = %e, "failed to write kubeconfig");
                self.set_status(UnitStatus::Blocked(format!(
                    "Failed to write kubeconfig: {e}"
                )))
                .await?;
                return Ok(Outcome::Completed);
            }
        };
        if !written || !self.kubeconfig.exists() {
            self.set_status(UnitStatus::Waiting("Waiting for kubeconfig".into()))
                .await?;
            return Ok(Outcome::Completed);
        }

        let peer = self.peer.view(model).await?;
        if let Some(done) = self.gate(peer.evaluate(broken)).await? {
            return Ok(done);
        }

        let charm = CharmConfig::new(model.config().await?);
        if let Some(reason) = charm.evaluate() {
            self.set_status(UnitStatus::Blocked(reason)).await?;
            return Ok(Outcome::Completed);
        }

        let inputs = Inputs {
            registry_location: kube_control.registry_location().map(str::to_string),
            supports_kvm: peer.supports_kvm(),
            charm,
        };
        let mut hash = ConfigHash::default();
        for controller in self.collector.controllers() {
            if let Some(reason) = controller.evaluate(&inputs) {
                info!(manifest = controller.name(), %reason, "manifest not ready");
                self.set_status(UnitStatus::Blocked(reason)).await?;
                return Ok(Outcome::Completed);
            }
            match controller.hash(&inputs) {
                Ok(h) => hash = hash + h,
                Err(e) => {
                    let reason =
                        format!("Unable to hash {} config: {e}", controller.name());
                    self.set_status(UnitStatus::Blocked(reason)).await?;
                    return Ok(Outcome::Completed);
                }
            }
        }

        if !force && state.config_hash == Some(hash) {
            debug!(%hash, "config unchanged");
            return self.update_status(state).await;
        }
        info!(%hash, previous = ?state.config_hash, "config changed");
        state.deployed = false;
        self.deploy(state, hash, &inputs).await
    }

    /// Apply every controller in order. Only the leader touches the
    /// cluster; the hash only advances once everything was applied.
    async fn deploy(
        &self,
        state: &mut PersistentState,
        hash: ConfigHash,
        inputs: &Inputs,
    ) -> Result<Outcome, EngineError> {
        let model = self.model.as_ref();
        if model.is_leader().await? {
            self.set_status(UnitStatus::Maintenance(
                "Deploying KubeVirt Operator".into(),
            ))
            .await?;
            model.set_workload_version("").await?;
            let ctx = RenderContext {
                app: model.app_name(),
                inputs,
            };
            for controller in self.collector.controllers() {
                if let Err(e) =
                    controller.apply_manifests(self.cluster.as_ref(), &ctx).await
                {
                    return self.cluster_failure(controller.name(), "apply", e).await;
                }
            }
        }
        state.config_hash = Some(hash);
        state.deployed = true;
        self.update_status(state).await
    }

    async fn cluster_failure(
        &self,
        manifest: &str,
        verb: &str,
        e: ControllerError,
    ) -> Result<Outcome, EngineError> {
        if e.is_transient() {
            warn!(%manifest, error = %e, "cluster unavailable");
            self.set_status(UnitStatus::Waiting(WAITING_FOR_API.into()))
                .await?;
            return Ok(Outcome::Deferred(format!("{verb} {manifest}: {e}")));
        }
        warn!(%manifest, error = %e, "{verb} failed");
        self.set_status(UnitStatus::Blocked(format!(
            "Failed to {verb} {manifest}: {e}"
        )))
        .await?;
        Ok(Outcome::Completed)
    }

    /// Report readiness from live object conditions and phases.
    #[instrument(skip_all)]
    pub async fn update_status(
        &self,
        state: &PersistentState,
    ) -> Result<Outcome, EngineError> {
        if let Some(failure) = &state.install_failure {
            self.set_status(UnitStatus::Blocked(failure.clone())).await?;
            return Ok(Outcome::Completed);
        }
        if !state.deployed {
            return Ok(Outcome::Completed);
        }
        let model = self.model.as_ref();
        let inputs = self.current_inputs().await?;
        let ctx = RenderContext {
            app: model.app_name(),
            inputs: &inputs,
        };
        let cluster = self.cluster.as_ref();

        let unready = match self.collector.unready(cluster, &ctx).await {
            Ok(unready) => unready,
            Err(e) => return self.status_failure(e).await,
        };
        if !unready.is_empty() {
            self.set_status(UnitStatus::Waiting(unready.join(", "))).await?;
            return Ok(Outcome::Completed);
        }
        let phases = match self.collector.phases(cluster, &ctx).await {
            Ok(phases) => phases,
            Err(e) => return self.status_failure(e).await,
        };
        self.set_status(phase_summary(&phases)).await?;

        if model.is_leader().await? {
            match (
                self.collector.short_version(&ctx),
                self.collector.long_version(&ctx),
            ) {
                (Ok(short), Ok(long)) => {
                    model.set_workload_version(&short).await?;
                    model.set_app_status(&UnitStatus::Active(long)).await?;
                }
                (Err(e), _) | (_, Err(e)) => {
                    warn!(error = %e, "unable to determine versions");
                }
            }
        }
        Ok(Outcome::Completed)
    }

    async fn status_failure(
        &self,
        e: ControllerError,
    ) -> Result<Outcome, EngineError> {
        warn!(error = %e, "unable to read cluster status");
        let status = if e.is_transient() {
            UnitStatus::Waiting(WAITING_FOR_API.into())
        } else {
            UnitStatus::Blocked(format!("Unable to read cluster status: {e}"))
        };
        self.set_status(status).await?;
        Ok(Outcome::Completed)
    }

    /// Remove everything the controllers own, in apply order, then forget
    /// the unit's state.
    #[instrument(skip_all)]
    async fn cleanup(
        &self,
        state: &mut PersistentState,
    ) -> Result<Outcome, EngineError> {
        let model = self.model.as_ref();
        if state.config_hash.is_some() && model.is_leader().await? {
            self.set_status(UnitStatus::Maintenance(
                "Cleaning up KubeVirt Operator".into(),
            ))
            .await?;
            let inputs = self.current_inputs().await?;
            let ctx = RenderContext {
                app: model.app_name(),
                inputs: &inputs,
            };
            for controller in self.collector.controllers() {
                if let Err(e) = controller
                    .delete_manifests(self.cluster.as_ref(), &ctx, true)
                    .await
                {
                    return self.cluster_failure(controller.name(), "delete", e).await;
                }
            }
        }
        self.set_status(UnitStatus::Maintenance("Shutting down".into()))
            .await?;
        *state = PersistentState::default();
        Ok(Outcome::Completed)
    }
}
