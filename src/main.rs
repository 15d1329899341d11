mod app;
mod auth;
mod config;
mod docs;
mod error;
mod state;
mod users;

const DEFAULT_LOG_FILTER: &str = "accountd=debug,axum=info,tower_http=info";

/// `RUST_LOG` picks the filter, `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => builder.with_target(false).json().init(),
        _ => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let app_state = state::AppState::init().await?;
    tracing::info!(
        backend = ?app_state.config.storage.backend,
        algorithm = ?app_state.config.password.algorithm,
        docs = app_state.docs.is_some(),
        "state initialised"
    );

    app::serve(app::build_app(app_state)).await
}
