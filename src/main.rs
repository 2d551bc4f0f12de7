use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod assets;
mod db;
mod db_models;
mod geo;
mod handlers;
mod models;
mod progress;
mod prometheus;
mod session;
mod state;
mod stream_counter;
mod utils;
mod version;

// The central, shared application state. An Arc lets the worker threads share
// it; every request takes the mutex and runs to completion under it.
pub use state::State;

pub type AppState = Arc<Mutex<State>>;

/// Command line configuration
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Config {
    /// IP address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    address: String,

    /// Port to bind the server to
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Path to the password file for reader authentication
    #[arg(long, default_value = "readtracker.passwd")]
    password_file: PathBuf,

    /// Path to the SQLite database file
    #[arg(long, default_value = "readtracker.db")]
    database_file: PathBuf,

    /// A finished session counts as moving when its path distance exceeds
    /// this many meters
    #[arg(long, default_value_t = 20.0)]
    move_threshold_meters: f64,

    /// A fix is recorded when it moved at least this far from the previous
    /// recorded one, in meters
    #[arg(long, default_value_t = 15.0)]
    min_record_meters: f64,

    /// A fix is recorded when at least this much time passed since the
    /// previous recorded one, in seconds
    #[arg(long, default_value_t = 30)]
    min_record_seconds: i64,

    /// Maximum number of fixes a session buffers in memory. Mostly for client
    /// performance purposes; walked distance is kept regardless.
    #[arg(long, default_value_t = 1000)]
    max_fixes: usize,

    /// Heartbeat interval; changes reach dashboards latest by this delay, and
    /// empty heartbeat messages are sent with this interval
    #[arg(long, default_value = "10s")]
    update_interval: humantime::Duration,

    /// How long a login token stays valid
    #[arg(long, default_value = "12h")]
    token_lifetime: humantime::Duration,
}

async fn real_main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_line_number(true)
        .with_target(true)
        .init();

    info!("Initializing");

    let config = Config::parse();

    info!("Configuration: {config:?}");

    let settings = state::Settings {
        sampling: geo::SamplingPolicy {
            min_meters: config.min_record_meters,
            min_seconds: config.min_record_seconds,
        },
        move_threshold_meters: config.move_threshold_meters,
        max_fixes: config.max_fixes,
        token_lifetime: chrono::TimeDelta::from_std(config.token_lifetime.into())?,
    };

    let updates = state::Updates::new(config.update_interval.into()).await;
    let app_state: AppState = Arc::new(Mutex::new(
        State::new(
            updates,
            &config.database_file,
            &config.password_file,
            settings,
        )
        .await?,
    ));

    let sse_counter = Arc::new(AtomicU64::new(0));
    let start_time = Instant::now();

    info!("Starting server on {}:{}", config.address, config.port);

    // Start the HTTP server.
    Ok(HttpServer::new(move || {
        // Configure CORS to allow cross-origin requests from any origin.
        let cors = Cors::permissive();

        App::new()
            .wrap(TracingLogger::default())
            .wrap(cors)
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::Data::new(sse_counter.clone()))
            .app_data(web::Data::new(start_time))
            .service(handlers::login)
            .service(handlers::start_session)
            .service(handlers::post_fix)
            .service(handlers::finish_session)
            .service(handlers::history)
            .service(handlers::progress)
            .service(handlers::stream)
            .service(handlers::metrics)
            .service(assets::assets("", "index.html"))
    })
    .bind((config.address.as_str(), config.port))?
    .run()
    .await?)
}

#[actix_web::main]
async fn main() -> std::process::ExitCode {
    match real_main().await {
        Ok(()) => std::process::ExitCode::from(0),
        Err(err) => {
            error!("{err}");
            std::process::ExitCode::from(10)
        }
    }
}
