//! The binary culvert-backend.

use culvert_backend::*;
use std::sync::Arc;

#[derive(clap::Parser, Debug)]
#[command(version)]
pub struct Args {
    /// Path to the backend configuration file. The file carries api
    /// tokens and must have 0600 permissions.
    #[arg(long)]
    pub config: std::path::PathBuf,

    /// Output tracing in json format.
    #[arg(long)]
    pub json: bool,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let args = <Args as clap::Parser>::parse();

    let t = tracing_subscriber::fmt().with_env_filter(
        tracing_subscriber::EnvFilter::builder()
            .with_default_directive(tracing::Level::INFO.into())
            .from_env_lossy(),
    );

    if args.json {
        t.json().try_init()
    } else {
        t.try_init()
    }
    .expect("failed to init tracing");

    let config = match Config::load(&args.config) {
        Ok(config) => Arc::new(config),
        Err(err) => {
            tracing::error!(%err, "cannot load configuration");
            std::process::exit(1);
        }
    };

    let prometheus = match culvert_backend::metrics::init_metrics() {
        Ok(handle) => handle,
        Err(err) => {
            tracing::error!(%err, "cannot install metrics recorder");
            std::process::exit(1);
        }
    };

    let resources =
        Arc::new(culvert_core::BackendResources::new(config.build_collection()));
    store::load(&config, &resources);

    let test_func =
        probe::test_func(config.backend.prober_endpoint.clone());

    let (shutdown_send, shutdown_recv) = tokio::sync::watch::channel(false);

    let kraken_task = tokio::task::spawn(kraken::run(
        config.clone(),
        resources.clone(),
        test_func,
        shutdown_recv.clone(),
    ));

    let state = http::AppState::new(
        resources.clone(),
        &config,
        prometheus,
        shutdown_recv.clone(),
    );
    let api_task = tokio::task::spawn({
        let config = config.clone();
        let shutdown_recv = shutdown_recv.clone();
        async move {
            if let Err(err) =
                http::bind_and_serve(&config, state, shutdown_recv).await
            {
                tracing::error!(%err, "api server failed");
            }
        }
    });

    tokio::signal::ctrl_c().await.expect("listening for ctrl-c");
    tracing::info!("terminating");
    let _ = shutdown_send.send(true);

    let _ = kraken_task.await;
    let _ = api_task.await;

    store::save(&config, &resources);
    tracing::info!("exit process");
}
