use crate::cli::{DumpArgs, LoadArgs};
use modstash::config::Config;
use modstash::dumper::dump_modules;
use modstash::fetch::ProxyFetcher;
use modstash::loader::load_modules;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub async fn dump(args: DumpArgs, config: &Config) -> Result<(), AnyError> {
    let fetcher = ProxyFetcher::new(&config.fetch.proxy_url, config.http_config())?;
    info!(proxy = %fetcher.base_url(), "Using module proxy");

    let options = config.dump_options(args.manifest_dir, args.output);
    let cancel = cancel_on_signal();

    let report = dump_modules(&options, Arc::new(fetcher), &cancel).await?;
    for outcome in report.failures() {
        if let Some(err) = &outcome.last_error {
            error!(module = %outcome.path, version = %outcome.version, error = %err, "Missing from bundle");
        }
    }
    if report.failed() > 0 {
        warn!(
            failed = report.failed(),
            fetched = report.fetched(),
            "Some modules could not be fetched"
        );
    }
    println!("{}", report.archive.display());
    Ok(())
}

pub async fn load(args: LoadArgs, config: &Config) -> Result<(), AnyError> {
    let store = config.build_store()?;
    info!(storage = %store.label(), "Loading into storage");

    let options = config.load_options(args.archive_dir);
    let cancel = cancel_on_signal();

    let report = load_modules(&options, &store, &cancel).await?;
    info!(
        saved = report.saved,
        already_present = report.conflicts,
        "Load complete"
    );
    Ok(())
}

/// Token cancelled on Ctrl+C or SIGTERM
fn cancel_on_signal() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        token.cancel();
    });
    cancel
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received, cancelling");
}
