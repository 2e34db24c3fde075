use clap::Parser;
use log::{error, info, warn};
use server::config::ServerConfig;
use server::geo::{CidrTableResolver, GeoResolver};
use server::network::{Server, ServerError};
use server::store::{JsonFileStore, MemoryStore, PersistenceGateway};
use shared::{
    BAN_DURATION_SECS, BROADCAST_INTERVAL_MS, DEFAULT_PORT, FLUSH_INTERVAL_MS,
    MAX_ALLOWED_SCORE_PER_TICK, SESSION_TIMEOUT_SECS,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Command line arguments, each with an environment fallback
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, env = "HOST", default_value = "0.0.0.0")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,
    /// JSON file holding the persisted scores; kept in memory when omitted
    #[clap(short, long, env = "SCOREBOARD_STORE")]
    store: Option<PathBuf>,
    /// `CIDR,COUNTRY` table used for geolocation
    #[clap(short, long, env = "SCOREBOARD_GEO_TABLE")]
    geo_table: Option<PathBuf>,
    /// Ban length in seconds
    #[clap(long, env = "SCOREBOARD_BAN_SECS", default_value_t = BAN_DURATION_SECS)]
    ban_secs: u64,
    /// Largest score a single update may carry
    #[clap(long, env = "SCOREBOARD_MAX_SCORE", default_value_t = MAX_ALLOWED_SCORE_PER_TICK,
           value_parser = clap::value_parser!(i64).range(1..))]
    max_score: i64,
    /// Scoreboard broadcast interval in milliseconds
    #[clap(long, env = "SCOREBOARD_BROADCAST_MS", default_value_t = BROADCAST_INTERVAL_MS,
           value_parser = clap::value_parser!(u64).range(1..))]
    broadcast_ms: u64,
    /// Store flush interval in milliseconds
    #[clap(long, env = "SCOREBOARD_FLUSH_MS", default_value_t = FLUSH_INTERVAL_MS,
           value_parser = clap::value_parser!(u64).range(1..))]
    flush_ms: u64,
    /// Seconds without packets before a session is dropped
    #[clap(long, env = "SCOREBOARD_SESSION_TIMEOUT_SECS", default_value_t = SESSION_TIMEOUT_SECS)]
    session_timeout_secs: u64,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: format!("{}:{}", self.host, self.port),
            ban_duration: Duration::from_secs(self.ban_secs),
            max_score_per_tick: self.max_score,
            broadcast_interval: Duration::from_millis(self.broadcast_ms),
            flush_interval: Duration::from_millis(self.flush_ms),
            session_timeout: Duration::from_secs(self.session_timeout_secs),
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let store: Arc<dyn PersistenceGateway> = match &args.store {
        Some(path) => {
            info!("Persisting scores to {}", path.display());
            Arc::new(JsonFileStore::new(path))
        }
        None => {
            warn!("No store configured, scores will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let geo: Arc<dyn GeoResolver> = match &args.geo_table {
        Some(path) => {
            let resolver = CidrTableResolver::from_file(path)?;
            info!(
                "Loaded {} networks from {}",
                resolver.len(),
                path.display()
            );
            Arc::new(resolver)
        }
        None => {
            warn!("No geo table configured, every client resolves to an unknown country");
            Arc::new(CidrTableResolver::new())
        }
    };

    let mut server = Server::new(args.server_config(), store, geo).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
