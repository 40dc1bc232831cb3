use clap::Parser;
use distributed_kv::config::DEFAULT_SERVER_BIN;
use distributed_kv::logging::{self, LogLevel};
use distributed_kv::metadata::CacheStrategy;
use distributed_kv::server::{NodeConfig, runtime};
use distributed_kv::storage::StorageConfig;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = DEFAULT_SERVER_BIN, about = "Storage node of the distributed key/value store")]
struct Args {
    /// Node name, also the key of its ring position.
    name: String,

    /// Host of the coordination service.
    coord_host: String,

    /// Port of the coordination service.
    coord_port: u16,

    /// Client port to listen on.
    port: u16,

    /// Read cache policy: None, FIFO, LRU or LFU.
    #[arg(value_parser = parse_strategy)]
    strategy: CacheStrategy,

    /// Read cache capacity in entries.
    size: usize,

    /// Parent directory of the node databases.
    #[arg(long, default_value = "KVDB")]
    db_root: PathBuf,

    /// Interface to bind the client port on.
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(long, default_value = "INFO")]
    log_level: String,
}

fn parse_strategy(s: &str) -> Result<CacheStrategy, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(args.log_level.parse::<LogLevel>()?)?;

    let config = NodeConfig {
        cache_strategy: args.strategy,
        cache_size: args.size,
        storage: StorageConfig::with_root(&args.db_root),
        ..NodeConfig::new(&args.name, &args.bind, args.port)
    };

    tracing::info!(
        "Starting {} on port {} (cache {} x {})",
        args.name,
        args.port,
        args.strategy,
        args.size
    );

    let coordinator = format!("{}:{}", args.coord_host, args.coord_port);
    if let Err(e) = runtime::run(config, &coordinator).await {
        tracing::error!("Node failed: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}
