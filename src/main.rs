use std::process;

use cachet::{
    application::{Services, error::AppError},
    cache::{CacheConfig, Facets, KeyParts, RequestCache, RequestInfo, ViewOptions, open_store},
    config::{self, RequestKeyArgs},
    infra::{error::InfraError, http, telemetry},
};
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
        config::Command::Key(args) => run_key(settings, args.request),
        config::Command::Clear(args) => run_clear(settings, args.request).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let store = open_store(&settings.store.url, settings.store.memory_capacity).await?;
    let services = Services::build(store, CacheConfig::from(&settings.cache));
    services.seed().await?;

    let router = http::build_router(services);
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;

    info!(
        target = "cachet::serve",
        addr = %settings.server.addr,
        store = %settings.store.url,
        "listening"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(InfraError::from)?;

    info!(target = "cachet::serve", "server stopped");
    Ok(())
}

fn run_key(settings: config::Settings, args: RequestKeyArgs) -> Result<(), AppError> {
    let (request, options) = view_request(&args);
    let key = CacheConfig::from(&settings.cache)
        .request_key_builder()
        .build(
            options.key.as_deref(),
            &request,
            options.namespace,
            options.facets,
        )?;
    println!("{key}");
    Ok(())
}

async fn run_clear(settings: config::Settings, args: RequestKeyArgs) -> Result<(), AppError> {
    let store = open_store(&settings.store.url, settings.store.memory_capacity).await?;
    let cache = RequestCache::new(store, CacheConfig::from(&settings.cache));

    let (request, options) = view_request(&args);
    let key = cache.clear_request_cache(&request, options).await?;

    info!(target = "cachet::clear", key = %key, "request cache entry cleared");
    println!("{key}");
    Ok(())
}

fn view_request(args: &RequestKeyArgs) -> (RequestInfo, ViewOptions) {
    let request = RequestInfo::new(
        args.endpoint.clone(),
        args.path.clone().unwrap_or_else(|| args.endpoint.clone()),
        args.method.to_ascii_uppercase(),
    );
    let options = ViewOptions {
        key: args.key.clone(),
        namespace: (!args.namespace.is_empty()).then(|| KeyParts::new(&args.namespace)),
        facets: (!args.facets.is_empty()).then(|| Facets::values(&args.facets)),
        ..ViewOptions::default()
    };
    (request, options)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(target = "cachet::serve", error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!(target = "cachet::serve", "shutdown signal received");
}
