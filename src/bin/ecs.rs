use clap::{Parser, ValueEnum};
use distributed_kv::config::{
    AWAIT_TIMEOUT, DEFAULT_COORDINATION_ADDR, DEFAULT_ECS_CONFIG, DEFAULT_SERVER_BIN,
};
use distributed_kv::coordination::{
    CoordinationAdapter, CoordinationServer, LocalSession, MemoryTree,
};
use distributed_kv::ecs::{self, Ecs, NodeLauncher, ProcessLauncher, SshLauncher};
use distributed_kv::logging::{self, LogLevel};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Launcher {
    Ssh,
    Process,
}

#[derive(Parser, Debug)]
#[command(name = "ecs", about = "External configuration service of the key/value store")]
struct Args {
    #[arg(long, default_value = DEFAULT_ECS_CONFIG)]
    config: PathBuf,

    /// Address the coordination service listens on.
    #[arg(long, default_value = DEFAULT_COORDINATION_ADDR)]
    listen: SocketAddr,

    #[arg(long, value_enum, default_value = "ssh")]
    launcher: Launcher,

    #[arg(long, default_value = DEFAULT_SERVER_BIN)]
    server_bin: String,

    #[arg(long, default_value = "INFO")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let code = match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("ecs: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(args: Args) -> anyhow::Result<i32> {
    let logs = logging::init(args.log_level.parse::<LogLevel>()?)?;
    let candidates = ecs::load_config(&args.config)?;

    // 1. Coordination service:
    let tree = Arc::new(MemoryTree::new());
    let server = CoordinationServer::bind(&args.listen.to_string(), tree.clone()).await?;
    tracing::info!("Coordination service on {}", server.local_addr()?);
    tokio::spawn(server.run());

    // 2. Launcher:
    let coord_host = args.listen.ip().to_string();
    let coord_port = args.listen.port();
    let launcher: Arc<dyn NodeLauncher> = match args.launcher {
        Launcher::Ssh => Arc::new(SshLauncher::new(&args.server_bin, coord_host, coord_port)),
        Launcher::Process => Arc::new(ProcessLauncher::new(&args.server_bin, coord_host, coord_port)),
    };

    // 3. Command loop:
    let coord = CoordinationAdapter::new(LocalSession::new(tree));
    let service = Ecs::new(coord, launcher, candidates, AWAIT_TIMEOUT).await?;
    let stdin = BufReader::new(tokio::io::stdin());
    let code = ecs::cli::run(&service, Some(&logs), stdin, tokio::io::stdout()).await?;
    Ok(code)
}
