//! `waypoint run`: start the proxy server.
//!
//! Loads and validates the route table once, binds the listener and
//! serves until Ctrl+C / SIGTERM. Any configuration or bind failure is
//! returned to `main`, which exits non-zero.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::cli::RunArgs;
use crate::config::{self, validation};
use crate::error::WaypointError;
use crate::logging;
use crate::server::{self, AppState};

pub async fn execute(args: RunArgs) -> Result<(), WaypointError> {
    logging::init(&args.log_level, logging::resolve_format(args.pretty, args.json));

    let source = config::resolve_file_source(args.config.as_deref()).await?;
    let (mut config, version) = source.load().await?;

    // CLI / env overrides; validated again below
    if let Some(timeout) = args.timeout {
        config.defaults.timeout = timeout;
    }
    if let Some(connect_timeout) = args.connect_timeout {
        config.defaults.connect_timeout = connect_timeout;
    }
    validation::validate(&config).map_err(|errors| WaypointError::ConfigValidation { errors })?;

    let state = Arc::new(AppState::from_config(&config, version, source.name())?);

    for route in state.router.table().iter() {
        tracing::info!(
            prefix = %route.prefix(),
            upstream = %route.upstream(),
            change_origin = route.change_origin(),
            "route registered"
        );
    }

    let router = server::build_router(Arc::clone(&state), args.max_body);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(
        addr = %addr,
        routes = state.router.table().route_count(),
        config = %source.path().display(),
        config_version = %state.config.version.short(),
        health = %state.config.health_path,
        "waypoint started"
    );

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(server::shutdown_signal())
    .await?;

    tracing::info!("waypoint stopped");
    Ok(())
}
