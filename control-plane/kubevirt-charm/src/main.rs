use std::path::PathBuf;
use std::sync::Arc;

use envconfig::Envconfig;
use kubevirt_charm::cluster::KubeCluster;
use kubevirt_charm::config::CharmEnv;
use kubevirt_charm::engine::{
    ConvergenceEngine, Dispatch, EngineSettings, Outcome,
};
use kubevirt_charm::host::CommandHostSetup;
use kubevirt_charm::manifests::{Collector, FileManifestSource, builtin};
use kubevirt_charm::model::HookTools;
use kubevirt_charm::state::StateStore;
use kubevirt_charm::{init_tracing, runtime};
use tracing::info;

#[derive(clap::Parser, Clone, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Subcommand, Clone, Debug)]
enum Command {
    /// Handle the hook or action named by JUJU_DISPATCH_PATH (default)
    Dispatch,
    /// Print the releases shipped in the charm's upstream bundles
    Versions {
        #[clap(long)]
        charm_dir: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");
    let cli = <Cli as clap::Parser>::parse();
    let env = CharmEnv::init_from_env()?;

    match cli.command.unwrap_or(Command::Dispatch) {
        Command::Dispatch => dispatch(env).await,
        Command::Versions { charm_dir } => {
            let root = charm_dir
                .map(|d| d.join("upstream"))
                .unwrap_or_else(|| env.upstream_dir());
            let source = Arc::new(FileManifestSource::new(root));
            let collector = Collector::new(builtin::controllers(source));
            for (name, releases) in collector.releases()? {
                println!("{name}: {}", releases.join(", "));
            }
            Ok(())
        }
    }
}

async fn dispatch(env: CharmEnv) -> anyhow::Result<()> {
    let Some(path) = env.dispatch_path.clone() else {
        anyhow::bail!("JUJU_DISPATCH_PATH is not set");
    };
    info!(unit = %env.unit_name, %path, "dispatching");

    let source = Arc::new(FileManifestSource::new(env.upstream_dir()));
    let engine = ConvergenceEngine::new(
        Arc::new(HookTools::new(env.unit_name.clone())),
        Arc::new(KubeCluster::new(
            env.kubeconfig.clone(),
            env.field_manager.clone(),
        )),
        Arc::new(CommandHostSetup::new(env.host_setup_commands())),
        Collector::new(builtin::controllers(source)),
        StateStore::new(env.state_dir()),
        EngineSettings {
            kvm_device: env.kvm_device.clone(),
            kubeconfig: env.kubeconfig.clone(),
            ca_path: env.ca_path.clone(),
        },
    );

    let dispatch = Dispatch::parse(&path, env.relation_id.as_deref());
    match runtime::run(&engine, dispatch).await? {
        Outcome::Completed => info!("done"),
        Outcome::Deferred(reason) => info!(%reason, "deferred"),
    }
    Ok(())
}
