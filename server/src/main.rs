use std::env;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;

use matinee_server::state::ServerState;
use matinee_server::{router, run_sync_ticker, AppState};

const SYNC_TICK_PERIOD: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "matinee_server=debug,info".into()),
        )
        .init();

    let port = env::var("PORT")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(3005);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let open_controls = env::var("MATINEE_OPEN_CONTROLS").is_ok();
    let app_state = AppState::new(ServerState::new(open_controls));

    tokio::spawn(run_sync_ticker(app_state.clone(), SYNC_TICK_PERIOD));

    let app = router(app_state);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Matinee relay listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
