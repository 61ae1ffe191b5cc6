#[macro_use]
extern crate tracing;

use std::path::PathBuf;

use structopt::StructOpt;
use tokio::runtime::Builder;
use tokio::signal;

use ambientled::{
    config_store::ConfigurationStore, pause::PauseFlag, supervisor::Supervisor,
    transport::DeviceConnector,
};

#[derive(Debug, StructOpt)]
struct Opts {
    #[structopt(short, long, parse(from_occurrences))]
    verbose: u32,
    /// Directory holding config.json
    #[structopt(short = "C", long)]
    directory: Option<PathBuf>,
}

#[cfg(unix)]
async fn wait_for_exit(pause: &PauseFlag) -> std::io::Result<()> {
    use signal::unix::SignalKind;

    let mut toggle = signal::unix::signal(SignalKind::user_defined1())?;

    loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                return result;
            }
            _ = toggle.recv() => {
                let paused = pause.toggle();
                info!(paused = %paused, "toggled pause");
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_exit(_pause: &PauseFlag) -> std::io::Result<()> {
    signal::ctrl_c().await
}

async fn run(opts: Opts) -> color_eyre::eyre::Result<()> {
    if let Some(directory) = opts.directory.as_deref() {
        std::env::set_current_dir(directory)?;
    }

    let pause = PauseFlag::global();
    let supervisor = Supervisor::new(DeviceConnector, pause.clone());

    // Every accepted configuration is applied to the running strips
    let mut store = ConfigurationStore::new({
        let supervisor = supervisor.clone();
        move |config| supervisor.apply(config)
    })
    .await?;

    if store.current().is_none() {
        warn!(path = %store.path().display(), "no configuration yet, waiting for changes");
    }

    wait_for_exit(&pause).await?;
    info!("shutting down");

    store.close();
    supervisor.shutdown().await;

    Ok(())
}

fn install_tracing(opts: &Opts) -> Result<(), tracing_subscriber::util::TryInitError> {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let fmt_layer = fmt::layer();

    let filter_layer = EnvFilter::try_from_env("AMBIENTLED_LOG").unwrap_or_else(|_| {
        EnvFilter::new(match opts.verbose {
            0 => "ambientled=warn",
            1 => "ambientled=info",
            2 => "ambientled=debug",
            _ => "ambientled=trace",
        })
    });

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .try_init()
}

#[paw::main]
fn main(opts: Opts) -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    install_tracing(&opts)?;

    // Keep strips and the config watcher from sharing a single worker
    let thd_count = match num_cpus::get() {
        1 => 2,
        other => other.min(4),
    };

    let rt = Builder::new_multi_thread()
        .worker_threads(thd_count)
        .enable_all()
        .build()?;
    rt.block_on(run(opts))
}
