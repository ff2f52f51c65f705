use clap::Parser;
use log::{info, warn};
use server::config::ServerConfig;
use server::network::{Server, ServerHandle};
use server::players::PlayerSummary;
use shared::Identity;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "6000")]
    port: u16,
    /// Tick rate (updates per second)
    #[clap(short, long, default_value = "30")]
    tick_rate: u32,
    /// Longest wait for socket readiness per tick, in milliseconds
    #[clap(long, default_value = "5")]
    poll_wait_ms: u64,
    /// Maximum concurrent players (at most 99)
    #[clap(short, long, default_value = "99")]
    max_players: usize,
}

/// Parses command-line arguments, then runs the server until `stop` or Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        tick_rate: args.tick_rate,
        poll_wait: Duration::from_millis(args.poll_wait_ms),
        max_players: args.max_players,
    };
    info!("Configuration: {}", serde_json::to_string(&config)?);

    let mut server = Server::new(config);
    let handle = server.handle();

    tokio::spawn(run_console(handle.clone()));

    {
        let handle = handle.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C, shutting down gracefully...");
                handle.stop();
            }
        });
    }

    server.run().await?;
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum ConsoleCommand {
    List,
    Kick(Identity),
    Stop,
}

fn parse_command(line: &str) -> Result<ConsoleCommand, String> {
    let mut words = line.split_whitespace();
    match (words.next(), words.next(), words.next()) {
        (Some("list"), None, None) => Ok(ConsoleCommand::List),
        (Some("stop"), None, None) => Ok(ConsoleCommand::Stop),
        (Some("kick"), Some(identity), None) => identity
            .parse()
            .map(ConsoleCommand::Kick)
            .map_err(|e| format!("bad identity {identity:?}: {e}")),
        _ => Err(format!("unknown command {line:?} (try list, kick NN, stop)")),
    }
}

fn format_summary(summary: &PlayerSummary) -> String {
    let name = summary.name.as_deref().unwrap_or("-");
    let colour = summary
        .colour
        .map(|(r, g, b)| format!("{r:03},{g:03},{b:03}"))
        .unwrap_or_else(|| "-".to_string());
    let health = summary
        .health
        .map(|health| health.to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{} {:<8} colour {} health {} kills {} {}",
        summary.identity,
        name,
        colour,
        health,
        summary.kills,
        if summary.status { "playing" } else { "joining" }
    )
}

/// Reads admin commands from stdin until `stop` or end of input.
async fn run_console(handle: ServerHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_command(line) {
            Ok(ConsoleCommand::List) => {
                let players = handle.list_players().await;
                println!("{} players online (server {})", players.len(), handle.state());
                for summary in &players {
                    println!("  {}", format_summary(summary));
                }
            }
            Ok(ConsoleCommand::Kick(identity)) => {
                if handle.kick(identity).await {
                    println!("Kicked player {identity}");
                } else {
                    println!("No player {identity}");
                }
            }
            Ok(ConsoleCommand::Stop) => {
                handle.stop();
                break;
            }
            Err(e) => warn!("{}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("list"), Ok(ConsoleCommand::List));
        assert_eq!(parse_command("  stop "), Ok(ConsoleCommand::Stop));
        assert_eq!(
            parse_command("kick 07"),
            Ok(ConsoleCommand::Kick(Identity::new(7).unwrap()))
        );
        assert!(parse_command("kick 7").is_err());
        assert!(parse_command("kick").is_err());
        assert!(parse_command("list now").is_err());
        assert!(parse_command("dance").is_err());
    }

    #[test]
    fn test_format_summary() {
        let summary = PlayerSummary {
            identity: Identity::new(3).unwrap(),
            name: Some("Ace".to_string()),
            colour: Some((255, 0, 9)),
            health: Some(80),
            kills: 2,
            status: true,
        };
        assert_eq!(
            format_summary(&summary),
            "03 Ace      colour 255,000,009 health 80 kills 2 playing"
        );
    }
}
