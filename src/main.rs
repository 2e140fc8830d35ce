//! Flera demo binary: a line-based chat over the reliable channel.
//!
//! `flera serve <addr>` relays every chat line to all clients;
//! `flera connect <addr>` sends stdin lines and prints what comes back.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use flera::{Client, Server};

/// Message type carrying one chat line.
const CHAT: u32 = 0;

#[derive(Parser, Debug)]
#[command(name = "flera", version, about = "Two-transport messaging demo")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a chat relay server
    Serve {
        /// Address to bind both transports to (host:port)
        addr: String,
    },
    /// Connect to a chat relay and send stdin lines
    Connect {
        /// Server address (host:port)
        addr: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    match Cli::parse().command {
        Command::Serve { addr } => serve(&addr).await,
        Command::Connect { addr } => connect(&addr).await,
    }
}

async fn serve(addr: &str) -> Result<()> {
    let mut server = Server::new();
    server.register(CHAT, |server, id, payload| {
        let line = String::from_utf8_lossy(payload);
        log::info!("{}: {}", id, line);
        server.broadcast_safe(CHAT, format!("{id}: {line}").as_bytes())?;
        Ok(())
    });
    server.on_connect(|_, id| log::info!("Player {} joined", id));
    server.on_disconnect(|_, id| log::info!("Player {} left", id));
    server.start(addr).await
}

async fn connect(addr: &str) -> Result<()> {
    let mut client = Client::new();
    client.register(CHAT, |_, payload| {
        println!("{}", String::from_utf8_lossy(payload));
        Ok(())
    });
    client.connect(addr).await?;
    let handle = client.handle();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.is_empty() {
            continue;
        }
        handle.send_safe(CHAT, line.as_bytes())?;
    }
    handle.close();
    Ok(())
}
