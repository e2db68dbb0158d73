use std::{net::SocketAddr, path::PathBuf, process::exit};

use axum_server::Handle;
use clap::Parser;
use rusqlite::Connection;

use budget_tracker::{
    cloud::server::{ServerConfig, ServerState, add_tracing_layer, build_router},
    config::{CLOUD_DB_PATH_ENV, CLOUD_PORT_ENV, DEFAULT_CLOUD_PORT},
    graceful_shutdown,
    logging::init_logging,
};

/// An HTTP emulator of the cloud platform for the budget tracker.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to the emulator's SQLite database.
    #[arg(long, env = CLOUD_DB_PATH_ENV, default_value = "cloud.db")]
    db_path: PathBuf,

    /// The port to serve the API from.
    #[arg(short, long, env = CLOUD_PORT_ENV, default_value_t = DEFAULT_CLOUD_PORT)]
    port: u16,

    /// How many seconds a listen request waits for a change.
    #[arg(long, default_value_t = 25)]
    listen_timeout_secs: u64,
}

#[tokio::main]
async fn main() {
    init_logging("CLOUD_LOG", "info,tower_http=debug");

    let args = Args::parse();

    let connection = match Connection::open(&args.db_path) {
        Ok(connection) => connection,
        Err(error) => {
            tracing::error!("Could not open the database at {:?}: {error}", args.db_path);
            exit(1);
        }
    };

    let config = ServerConfig {
        listen_timeout: std::time::Duration::from_secs(args.listen_timeout_secs),
        ..Default::default()
    };

    let state = match ServerState::new(connection, config) {
        Ok(state) => state,
        Err(error) => {
            tracing::error!("Could not initialize the database: {error}");
            exit(1);
        }
    };

    let handle = Handle::new();
    tokio::spawn(graceful_shutdown(handle.clone()));

    let router = add_tracing_layer(build_router(state));

    let addr = SocketAddr::from(([127, 0, 0, 1], args.port));
    tracing::info!("Cloud emulator listening on http://{addr}");

    if let Err(error) = axum_server::bind(addr)
        .handle(handle)
        .serve(router.into_make_service())
        .await
    {
        tracing::error!("The server stopped unexpectedly: {error}");
        exit(1);
    }
}
