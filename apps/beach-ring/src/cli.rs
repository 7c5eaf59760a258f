use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{timeout, Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error};

use crate::config::ServeArgs;
use crate::signaling::{ClientMessage, ServerMessage};

#[derive(Parser, Debug)]
#[command(name = "beach-ring", version)]
#[command(about = "Beach Ring call signaling relay and watch client")]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Server flags used when no subcommand is given
    #[command(flatten)]
    pub serve: ServeArgs,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the relay (default)
    Serve(ServeArgs),
    /// Connect to a relay and print every event it sends
    Watch(WatchArgs),
}

#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    /// Relay WebSocket URL
    #[arg(short, long, default_value = "ws://localhost:3000/ws")]
    pub url: String,

    /// Register under this identity before watching
    #[arg(short, long)]
    pub identity: Option<String>,

    /// Stop after this many seconds (runs until the relay closes otherwise)
    #[arg(short, long)]
    pub duration: Option<u64>,
}

pub async fn run_watch_client(args: WatchArgs) -> Result<()> {
    debug!("Connecting to {}", args.url);

    let (ws_stream, _) = match timeout(Duration::from_secs(5), connect_async(args.url.as_str())).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            error!("Failed to connect to {}: {}", args.url, e);
            return Err(anyhow::anyhow!("Connection failed: {}", e));
        }
        Err(_) => {
            error!("Connection timeout after 5 seconds");
            return Err(anyhow::anyhow!(
                "Connection timeout - is the relay running?"
            ));
        }
    };
    let (mut write, mut read) = ws_stream.split();

    if let Some(identity) = &args.identity {
        let register = serde_json::to_string(&ClientMessage::Register(identity.clone()))?;
        write.send(Message::Text(register.into())).await?;
    }

    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    loop {
        let next = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, read.next()).await {
                Ok(next) => next,
                Err(_) => break,
            },
            None => read.next().await,
        };
        let Some(frame) = next else {
            break;
        };

        match frame.context("relay connection failed")? {
            Message::Text(text) => {
                let server_msg: ServerMessage = serde_json::from_str(text.as_str())
                    .with_context(|| format!("unexpected frame from relay: {}", text.as_str()))?;
                println!("{}", serde_json::to_string(&server_msg)?);
                if let ServerMessage::UsernameError(reason) = server_msg {
                    return Err(anyhow::anyhow!("Registration failed: {}", reason));
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    let _ = write.send(Message::Close(None)).await;
    Ok(())
}
