use std::{process, sync::Arc};

use cantina::{
    application::{
        error::AppError,
        menu::{HttpMenuProvider, MenuProvider},
    },
    cache::{CacheState, CacheStore, CacheWarmer, MemoryStore, PolicyTable, RedisStore},
    config,
    infra::{
        error::InfraError,
        http::{self, AdminState, HttpState},
        telemetry,
    },
};
use tokio::try_join;
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
        .unwrap_or(config::Command::Serve(Box::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Warm(_) => run_warm(settings).await,
    }
}

struct ApplicationContext {
    http_state: HttpState,
    admin_state: AdminState,
    warmer: Arc<CacheWarmer>,
}

async fn build_application_context(
    settings: &config::Settings,
) -> Result<ApplicationContext, AppError> {
    let store = connect_store(&settings.redis).await?;
    let policies = Arc::new(PolicyTable::new(&settings.cache.ttls)?);
    let cache_state = CacheState::new(store, policies, settings.cache.enabled);

    let menu: Arc<dyn MenuProvider> = Arc::new(HttpMenuProvider::new(
        settings.upstream.menu_base_url.clone(),
        settings.upstream.request_timeout,
    )?);

    let warmer = Arc::new(CacheWarmer::new(menu.clone(), cache_state.clone()));

    Ok(ApplicationContext {
        http_state: HttpState {
            menu,
            cache: cache_state.clone(),
        },
        admin_state: AdminState {
            cache: cache_state,
            warmer: warmer.clone(),
        },
        warmer,
    })
}

async fn connect_store(redis: &config::RedisSettings) -> Result<Arc<dyn CacheStore>, AppError> {
    match redis.url.as_deref() {
        Some(url) => {
            let store = RedisStore::connect(url).await?;
            info!(target = "cantina::startup", "connected to redis cache store");
            Ok(Arc::new(store))
        }
        None => {
            warn!(
                target = "cantina::startup",
                "no redis url configured; using the in-process cache store"
            );
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let app = build_application_context(&settings).await?;

    // Startup warming is best-effort; the service comes up either way.
    if settings.cache.enabled && settings.cache.warm_on_startup {
        if let Err(err) = app.warmer.warm_menu().await {
            warn!(error = %err, "startup cache warm failed");
        }
    }

    let warm_handle = spawn_scheduled_warm(&settings, app.warmer.clone());

    let result = serve_http(&settings, app.http_state, app.admin_state).await;

    if let Some(handle) = warm_handle {
        handle.abort();
        let _ = handle.await;
    }

    result
}

async fn run_warm(settings: config::Settings) -> Result<(), AppError> {
    let app = build_application_context(&settings).await?;
    let summary = app.warmer.warm_menu().await?;

    info!(
        target = "cantina::warm",
        warmed = summary.warmed,
        failed = summary.failed,
        "warm run completed"
    );
    Ok(())
}

fn spawn_scheduled_warm(
    settings: &config::Settings,
    warmer: Arc<CacheWarmer>,
) -> Option<tokio::task::JoinHandle<()>> {
    if !settings.cache.enabled {
        return None;
    }
    let interval = settings.cache.warm_interval?;

    Some(tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.tick().await; // Skip the first immediate tick
        loop {
            timer.tick().await;
            if let Err(err) = warmer.warm_menu().await {
                warn!(error = %err, "scheduled cache warm failed");
            }
        }
    }))
}

async fn serve_http(
    settings: &config::Settings,
    http_state: HttpState,
    admin_state: AdminState,
) -> Result<(), AppError> {
    let public_router = http::build_router(http_state);
    let admin_router = http::build_admin_router(admin_state);

    let public_listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let admin_listener = tokio::net::TcpListener::bind(settings.server.admin_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "cantina::startup",
        public = %settings.server.public_addr,
        admin = %settings.server.admin_addr,
        "listening"
    );

    let public_server = axum::serve(public_listener, public_router.into_make_service())
        .with_graceful_shutdown(shutdown_signal());
    let admin_server = axum::serve(admin_listener, admin_router.into_make_service())
        .with_graceful_shutdown(shutdown_signal());

    let grace = settings.server.graceful_shutdown;
    tokio::select! {
        result = async { try_join!(public_server, admin_server) } => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        _ = async {
            shutdown_signal().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!("graceful shutdown window elapsed, forcing exit");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
    }
}
