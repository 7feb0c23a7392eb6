use std::{process, sync::Arc};

use multicache::{
    cache::{CacheConfig, CacheManager},
    config,
    error::AppError,
    infra::{error::InfraError, http, telemetry},
};
use tokio::{sync::Notify, task::JoinHandle};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let cache_config = CacheConfig::from(&settings);
    info!(config = ?cache_config, "cache configuration resolved");
    let manager = Arc::new(CacheManager::in_memory(cache_config));

    if settings.api.enabled
        && settings.api.authorization == config::ApiAuthorizationSetting::Missing
    {
        warn!(
            prefix = %settings.api.prefix,
            "management API enabled without authorization; every request will be refused"
        );
    }

    let sweeper = spawn_sweeper(Arc::clone(&manager));
    let result = serve_http(&settings, manager).await;

    sweeper.abort();
    let _ = sweeper.await;

    result
}

/// Periodically apply tag invalidations whose delay has elapsed.
fn spawn_sweeper(manager: Arc<CacheManager>) -> JoinHandle<()> {
    let period = manager.config().sweep_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await; // Skip the first immediate tick
        loop {
            interval.tick().await;
            manager.sweep_due().await;
        }
    })
}

async fn serve_http(settings: &config::Settings, manager: Arc<CacheManager>) -> Result<(), AppError> {
    let router = http::build_router(manager, &settings.api);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.server.addr, api = settings.api.enabled, "listening");

    let shutdown = Arc::new(Notify::new());
    let signal = {
        let shutdown = Arc::clone(&shutdown);
        async move {
            wait_for_ctrl_c().await;
            info!("shutdown signal received");
            shutdown.notify_one();
        }
    };

    let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(signal);
    let grace = settings.server.graceful_shutdown;
    let deadline = async {
        shutdown.notified().await;
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        () = deadline => {
            warn!(grace_secs = grace.as_secs(), "graceful shutdown timed out; exiting");
        }
    }

    Ok(())
}

async fn wait_for_ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
