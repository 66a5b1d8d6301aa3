use clap::Parser;
use overlaymon::{Config, ConfigStore, CounterSet, HeadlessWindow, Overlay, Sampler};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "overlaymon")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./overlaymon.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    /// Print every sample to stdout as a JSON line.
    #[arg(long)]
    print_samples: bool,
    #[arg(long, default_value_t = 300.0)]
    width: f32,
    #[arg(long, default_value_t = 40.0)]
    height: f32,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let store = match ConfigStore::open(&cli.config) {
        Ok(store) => store,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };
    let cfg = store.current();
    info!(
        config = %store.path().display(),
        interval_ms = cfg.interval_ms,
        refresh_ms = cfg.refresh_ms,
        "starting overlaymon"
    );

    let counters = match tokio::task::spawn_blocking(CounterSet::probe).await {
        Ok(counters) => counters,
        Err(err) => {
            error!(error = %err, "counter probing failed");
            std::process::exit(1);
        }
    };
    let sampler = Sampler::new(counters);
    let samples = sampler.subscribe_channel();
    if cli.print_samples {
        sampler.subscribe(|sample| match serde_json::to_string(&sample) {
            Ok(line) => println!("{line}"),
            Err(err) => error!(error = %err, "failed to encode sample"),
        });
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    sampler.start(store.subscribe());

    let overlay = Overlay::new(
        HeadlessWindow::new(cli.width, cli.height),
        store.subscribe(),
    );
    let overlay_task = tokio::spawn(overlay.run(samples, shutdown_rx));

    wait_for_shutdown(&store).await;
    info!("received Ctrl+C, shutting down");

    let _ = shutdown_tx.send(true);
    sampler.shutdown();
    sampler.join().await;
    match overlay_task.await {
        Ok(window) => info!(frames = window.frames_presented(), "overlay finished"),
        Err(err) => error!(error = %err, "overlay task failed"),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(unix)]
async fn wait_for_shutdown(store: &ConfigStore) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(err) => {
            error!(error = %err, "failed to install SIGHUP handler");
            wait_for_ctrl_c().await;
            return;
        }
    };

    loop {
        tokio::select! {
            _ = wait_for_ctrl_c() => return,
            received = hangup.recv() => {
                if received.is_none() {
                    wait_for_ctrl_c().await;
                    return;
                }
                match store.reload() {
                    Ok(()) => info!("configuration reloaded"),
                    Err(err) => error!(error = %err, "configuration reload failed"),
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_store: &ConfigStore) {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to wait for Ctrl+C");
    }
}
