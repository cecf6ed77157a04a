pub mod cluster;
pub mod config;
pub mod engine;
pub mod host;
pub mod manifests;
pub mod model;
pub mod relations;
pub mod runtime;
pub mod state;
pub mod status;

#[cfg(test)]
pub(crate) mod testing;

use tracing_subscriber::{
    EnvFilter, filter::LevelFilter, layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Install the global subscriber. Juju forwards stderr into `debug-log`,
/// so the fmt layer writes there without ANSI colours.
pub fn init_tracing(default_env: &str) {
    let filter = EnvFilter::builder()
        .with_env_var("RUST_LOG")
        .from_env_lossy()
        .add_directive(
            default_env
                .parse()
                .unwrap_or_else(|_| LevelFilter::INFO.into()),
        );

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .with(filter)
        .try_init();
}
