//! Interactive shell of the `ecs` binary.

use super::service::Ecs;
use crate::logging::{LogHandle, LogLevel};
use crate::metadata::CacheStrategy;

use anyhow::{Result, anyhow, bail};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::error;

const PROMPT: &str = "ECS> ";

const HELP: &str = "\
Commands:
  addNodes <count> <strategy> <size>   launch and add nodes (strategy: None|FIFO|LRU|LFU)
  addNode <strategy> <size>            launch and add one node
  removeNode <name>...                 retire nodes, moving their data to the successors
  start                                start serving on every node
  stop                                 stop serving on every node
  shutdown                             remove every node and exit
  logLevel <level>                     ALL|TRACE|DEBUG|INFO|WARN|ERROR|OFF
  help                                 show this text
  quit                                 exit, leaving the nodes running
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    AddNodes {
        count: usize,
        strategy: CacheStrategy,
        size: usize,
    },
    RemoveNodes(Vec<String>),
    Start,
    Stop,
    Shutdown,
    LogLevel(LogLevel),
    Help,
    Quit,
}

impl Command {
    /// Parses one input line. `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((name, args)) = tokens.split_first() else {
            return Ok(None);
        };

        let command = match (*name, args) {
            ("addNodes", [count, strategy, size]) => Command::AddNodes {
                count: parse_number(count, "count")?,
                strategy: parse_strategy(strategy)?,
                size: parse_number(size, "size")?,
            },
            ("addNode", [strategy, size]) => Command::AddNodes {
                count: 1,
                strategy: parse_strategy(strategy)?,
                size: parse_number(size, "size")?,
            },
            ("removeNode" | "removeNodes", names) if !names.is_empty() => {
                Command::RemoveNodes(names.iter().map(|n| n.to_string()).collect())
            }
            ("start", []) => Command::Start,
            ("stop", []) => Command::Stop,
            ("shutdown", []) => Command::Shutdown,
            ("logLevel", [level]) => Command::LogLevel(level.parse()?),
            ("help", _) => Command::Help,
            ("quit", []) => Command::Quit,
            (other, _) => bail!("unknown command or wrong arguments: {} (try help)", other),
        };
        Ok(Some(command))
    }
}

fn parse_number(token: &str, what: &str) -> Result<usize> {
    token
        .parse()
        .map_err(|_| anyhow!("{} must be a non-negative number, got {}", what, token))
}

fn parse_strategy(token: &str) -> Result<CacheStrategy> {
    token.parse().map_err(|e: String| anyhow!(e))
}

/// Reads commands until `quit`, `shutdown` or end of input and returns the
/// process exit code.
pub async fn run<R, W>(ecs: &Ecs, logs: Option<&LogHandle>, input: R, mut output: W) -> Result<i32>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    loop {
        output.write_all(PROMPT.as_bytes()).await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            return Ok(0);
        };

        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                output.write_all(format!("Error: {}\n", e).as_bytes()).await?;
                continue;
            }
        };

        let reply = match execute(ecs, logs, &command).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("{} failed: {:#}", line.trim(), e);
                format!("Error: {:#}", e)
            }
        };
        if !reply.is_empty() {
            output.write_all(reply.as_bytes()).await?;
            output.write_all(b"\n").await?;
        }

        if matches!(command, Command::Quit | Command::Shutdown) {
            output.flush().await?;
            return Ok(0);
        }
    }
}

async fn execute(ecs: &Ecs, logs: Option<&LogHandle>, command: &Command) -> Result<String> {
    Ok(match command {
        Command::AddNodes {
            count,
            strategy,
            size,
        } => {
            let added = ecs.add_nodes(*count, *strategy, *size).await?;
            let names: Vec<String> = added
                .iter()
                .map(|n| format!("{} ({})", n.name, n.address()))
                .collect();
            format!("Added {}", names.join(", "))
        }
        Command::RemoveNodes(names) => {
            ecs.remove_nodes(names).await?;
            format!("Removed {}", names.join(", "))
        }
        Command::Start => {
            ecs.start().await?;
            "Started".to_string()
        }
        Command::Stop => {
            ecs.stop().await?;
            "Stopped".to_string()
        }
        Command::Shutdown => {
            ecs.shutdown().await?;
            "Shut down".to_string()
        }
        Command::LogLevel(level) => match logs {
            Some(logs) => {
                logs.set_level(*level)?;
                format!("Log level set to {:?}", level)
            }
            None => bail!("logging is not configurable in this process"),
        },
        Command::Help => HELP.to_string(),
        Command::Quit => String::new(),
    })
}
