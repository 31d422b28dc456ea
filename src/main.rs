use std::{net::SocketAddr, process, sync::Arc};

use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;
use vercache::{
    application::{content::ArticleService, error::AppError},
    cache::{CacheStore, ContentVersion, DebugMode, MemoryStore, OutputCache, OutputCachePolicy},
    config,
    infra::{
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
};

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
    let store = Arc::new(MemoryStore::new(settings.cache.capacity_non_zero()));
    let shared: Arc<dyn CacheStore> = store.clone();
    let versions = Arc::new(ContentVersion::initialize(
        shared.clone(),
        settings.cache.version_key.clone(),
    )?);

    let sweeper = Arc::clone(&store).spawn_sweeper(settings.cache.sweep_interval());

    let policy = OutputCachePolicy::resolve(&settings.output_cache, &*versions);
    let output_cache = OutputCache::new(policy, shared, versions.clone())
        .with_config(&settings.cache)
        .with_environment(DebugMode(settings.server.debug));

    let state = HttpState {
        articles: ArticleService::new(versions),
        store,
    };
    let router = http::build_router(state, output_cache);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        addr = %settings.server.addr,
        debug = settings.server.debug,
        duration_seconds = settings.output_cache.duration_seconds,
        "vercache listening"
    );

    let result = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|err| AppError::from(InfraError::server(err.to_string())));

    sweeper.abort();
    let _ = sweeper.await;

    result
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
