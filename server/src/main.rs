use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use chirp_server::config::{generate_config_template, Config};
use chirp_server::db::{self, SqliteMessageStore};
use chirp_server::media::signing::UrlSigner;
use chirp_server::{auth, routes, state, ws};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("chirp_server=info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }

    tracing::info!("Chirp server v{} starting", env!("CARGO_PKG_VERSION"));

    let db = db::init_db(&config.data_dir)?;
    let jwt_secret = auth::jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    let media_signer = config
        .media
        .as_ref()
        .and_then(UrlSigner::from_config)
        .map(Arc::new);
    if media_signer.is_none() {
        tracing::info!("Media URL signing disabled, image keys are returned as stored");
    }

    let app_state = state::AppState {
        store: Arc::new(SqliteMessageStore::new(db)),
        connections: ws::new_connection_registry(),
        jwt_secret,
        require_token: config.require_token,
        heartbeat: config.heartbeat(),
        media_signer,
    };

    let app = routes::build_router(app_state);

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
