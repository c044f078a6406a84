use actix_cors::Cors;
use actix_web::{http::header, middleware::Logger, web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use sessionkeep_server::auth::handlers::configure_routes;
use sessionkeep_server::config::CorsConfig;
use sessionkeep_server::{health_check, AppState, Settings};
use std::net::TcpListener;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn build_cors(config: &CorsConfig) -> Cors {
    if !config.enabled {
        return Cors::default();
    }

    let cors = if config.allow_any_origin {
        Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
    } else {
        config
            .allowed_origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
            .allowed_methods(vec!["GET", "POST", "PUT"])
            .allowed_headers(vec![header::AUTHORIZATION, header::CONTENT_TYPE])
    };

    cors.supports_credentials().max_age(config.max_age as usize)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let config = Settings::new().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    info!("Configuration loaded successfully ({})", config.environment);

    let state = AppState::new(config.clone())
        .await
        .context("failed to initialize application state")?;
    let state = web::Data::new(state);

    // Expired refresh records are garbage; revoked ones are never reinstated.
    let maintenance_state = state.clone();
    let prune_every = Duration::from_secs(config.maintenance.prune_interval_secs);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(prune_every).await;
            match maintenance_state.auth_service.prune_expired_tokens().await {
                Ok(0) => {}
                Ok(pruned) => info!("Pruned {} expired refresh tokens", pruned),
                Err(e) => error!("Refresh token pruning failed: {}", e),
            }
        }
    });

    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&address).with_context(|| format!("failed to bind {}", address))?;
    info!("Starting server at {}", address);

    let server_state = state.clone();
    HttpServer::new(move || {
        let tokens = server_state.tokens();
        App::new()
            .wrap(build_cors(&server_state.config.cors))
            .wrap(Logger::new("%r %s %Dms"))
            .app_data(server_state.clone())
            .route("/health", web::get().to(health_check))
            .configure(|cfg| configure_routes(cfg, tokens))
    })
    .listen(listener)?
    .workers(config.server.workers as usize)
    .run()
    .await
    .context("server terminated with an error")?;

    state.shutdown().await?;
    info!("Server stopped");
    Ok(())
}
