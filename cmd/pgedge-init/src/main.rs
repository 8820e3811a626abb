use pgedge_init::bootstrap::{BootstrapReport, Bootstrapper};
use pgedge_init::cluster::spec::read_spec;
use pgedge_init::cluster::topology::ClusterTopology;
use pgedge_init::error::BootstrapError;
use pgedge_init::meta::db::PgConnector;
use pgedge_init::meta::progress::FileProgressStore;
use pgedge_init::util::config::Config;
use pgedge_init::util::shutdown::shutdown_signal;
use pgedge_init::util::usage;
use tracing_subscriber::EnvFilter;

const APP_VERSION: &str = match option_env!("PGEDGE_INIT_VERSION") {
    Some(value) => value,
    None => env!("CARGO_PKG_VERSION"),
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if usage::handle_cli_flags(APP_VERSION) {
        return Ok(());
    }

    init_tracing();

    if let Err(err) = run().await {
        tracing::error!(error = %err, "node initialization failed");
        return Err(err.into());
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run() -> Result<(), BootstrapError> {
    let config = Config::load().map_err(BootstrapError::Config)?;
    let spec = read_spec(&config.spec_path).await?;
    let topology = ClusterTopology::resolve(&spec, &config)?;
    tracing::info!(
        version = APP_VERSION,
        node = %topology.primary.self_node.name,
        database = %topology.primary.database,
        databases = topology.additional.len(),
        "starting node initialization"
    );

    let store = FileProgressStore::new(config.status_path.clone(), config.force_init);
    let bootstrapper = Bootstrapper::new(
        PgConnector::new(config.timings.connect_timeout),
        store,
        config.timings.clone(),
    );

    let report = tokio::select! {
        result = bootstrapper.run(&topology) => result?,
        _ = shutdown_signal() => {
            tracing::info!("initialization interrupted, progress is kept for the next start");
            return Ok(());
        }
    };

    // An offline node stays up without touching the engine until stopped.
    if report == BootstrapReport::Offline {
        shutdown_signal().await;
    }
    Ok(())
}
