use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keygate::config;
use keygate::keys::CreateKey;
use keygate::models::user::NewUser;
use keygate::store::{memory::MemoryStore, postgres::PgStore, Store};
use keygate::AppState;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // OpenTelemetry (OTLP) export is opt-in via OTEL_EXPORTER_OTLP_ENDPOINT.
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "keygate"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "keygate=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port, in_memory }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port, in_memory).await
        }
        Some(cli::Commands::Migrate) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            db.migrate().await?;
            println!("Migrations applied.");
            Ok(())
        }
        Some(cli::Commands::Key { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            let state = AppState::new(Arc::new(db), cfg)?;
            handle_key_command(command, &state).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port, false).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run_server(cfg: config::Config, port: u16, in_memory: bool) -> anyhow::Result<()> {
    let store: Arc<dyn Store> = if in_memory {
        tracing::warn!("Using in-memory store, keys are lost on restart");
        Arc::new(MemoryStore::new())
    } else {
        tracing::info!("Connecting to database...");
        let db = PgStore::connect(&cfg.database_url).await?;

        tracing::info!("Running migrations...");
        db.migrate().await?;
        Arc::new(db)
    };

    let dashboard_origin = cfg.dashboard_origin.clone();
    let state = Arc::new(AppState::new(store, cfg)?);

    let app = keygate::api::router(state)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        // Only the dashboard origin (and localhost during development) may call the API from a browser.
        .layer({
            use axum::http::{HeaderName, Method};
            use tower_http::cors::AllowOrigin;
            CorsLayer::new()
                .allow_origin(AllowOrigin::predicate(move |origin, _| {
                    let origin_str = origin.to_str().unwrap_or("");
                    origin_str == dashboard_origin
                        || origin_str.starts_with("http://localhost:")
                        || origin_str.starts_with("http://127.0.0.1:")
                }))
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
                .allow_headers([
                    HeaderName::from_static("content-type"),
                    HeaderName::from_static("authorization"),
                    HeaderName::from_static("x-api-key"),
                    HeaderName::from_static("x-request-id"),
                ])
                .allow_credentials(true)
        })
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn(security_headers_middleware));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("keygate listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Middleware: injects a unique X-Request-Id into every response.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: injects security headers into every response.
async fn security_headers_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    use axum::http::HeaderValue;

    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    // Responses can carry freshly issued secrets.
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.remove("Server");

    resp
}

async fn handle_key_command(cmd: cli::KeyCommands, state: &AppState) -> anyhow::Result<()> {
    match cmd {
        cli::KeyCommands::Create {
            email,
            name,
            key_type,
            description,
            expires_in,
        } => {
            let user = state
                .store
                .insert_user(&NewUser {
                    email: email.trim().to_lowercase(),
                    name: None,
                    avatar_url: None,
                    provider: "cli".into(),
                    provider_id: None,
                })
                .await?;

            let created = state
                .keys
                .create(
                    user.id,
                    CreateKey {
                        name: Some(name),
                        key_type: Some(key_type),
                        description,
                        ttl_secs: expires_in,
                    },
                )
                .await?;
            println!(
                "Key created:\n  ID:     {}\n  Type:   {}\n  Limit:  {}\n  Secret: {}\n  (the secret is not shown again)",
                created.key.id, created.key.key_type, created.key.rate_limit, created.secret
            );
        }
        cli::KeyCommands::List { email, key_type } => {
            let user = find_user(state, &email).await?;
            let (page, _) = state
                .keys
                .list(user.id, Some(1), Some(keygate::keys::MAX_PAGE_SIZE), key_type.as_deref())
                .await?;
            if page.keys.is_empty() {
                println!("No keys found.");
            } else {
                println!(
                    "{:<38} {:<20} {:<6} {:<14} EXPIRES",
                    "ID", "NAME", "TYPE", "USAGE"
                );
                for k in &page.keys {
                    println!(
                        "{:<38} {:<20} {:<6} {:<14} {}",
                        k.id,
                        k.name,
                        k.key_type,
                        format!("{}/{}", k.usage, k.rate_limit),
                        k.expires_at
                            .map(|e| e.format("%Y-%m-%d %H:%M").to_string())
                            .unwrap_or_else(|| "never".into())
                    );
                }
                if page.total > page.keys.len() as i64 {
                    println!("… {} more", page.total - page.keys.len() as i64);
                }
            }
        }
        cli::KeyCommands::Delete { email, id } => {
            let user = find_user(state, &email).await?;
            let key_id = uuid::Uuid::parse_str(&id).context("Invalid key ID")?;
            state.keys.delete(user.id, key_id).await?;
            println!("Key deleted.");
        }
        cli::KeyCommands::ResetUsage { id } => {
            let key_id = uuid::Uuid::parse_str(&id).context("Invalid key ID")?;
            state.keys.reset_usage(key_id).await?;
            println!("Usage reset to 0.");
        }
    }
    Ok(())
}

async fn find_user(state: &AppState, email: &str) -> anyhow::Result<keygate::models::user::User> {
    state
        .store
        .find_user_by_email(&email.trim().to_lowercase())
        .await?
        .ok_or_else(|| anyhow::anyhow!("user not found: {}", email))
}
