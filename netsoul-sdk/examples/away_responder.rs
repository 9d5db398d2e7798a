//! Away responder example: watches a few buddies, logs their presence and
//! answers every message with a fixed reply.
//!
//! Usage:
//!   NETSOUL_PASSWORD=... cargo run --example away_responder -- \
//!     --login me_x --watch amy --watch bob --reply "back in 10 minutes"

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use netsoul_sdk::client::{self, ConnectConfig};
use netsoul_sdk::event::Event;
use netsoul_sdk::message::PresenceState;

#[derive(Parser)]
#[command(name = "away-responder", about = "netsoul away responder example")]
struct Args {
    #[arg(long, default_value = client::DEFAULT_SERVER)]
    server: String,
    #[arg(long)]
    login: String,
    #[arg(long, env = "NETSOUL_PASSWORD", hide_env_values = true)]
    password: String,
    #[arg(long)]
    watch: Vec<String>,
    #[arg(long, default_value = "away")]
    reply: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let config = ConnectConfig {
        server_addr: args.server,
        login: args.login,
        password: args.password,
        location: "away-responder".into(),
        comment: args.reply.clone(),
    };
    let (handle, mut events) = client::connect(config, Arc::new(args.watch), None).await?;

    while let Some(event) = events.recv().await {
        match event {
            Event::StateChanged { phase } => {
                tracing::info!(?phase, "Session");
                if phase == netsoul_sdk::Phase::Online {
                    handle.set_status(PresenceState::Away).await?;
                }
            }
            Event::PresenceChanged { buddy } => {
                tracing::info!(login = %buddy.login, state = %buddy.state, "Presence");
            }
            Event::Message { from, text, .. } => {
                tracing::info!(from = %from.login, %text, "Message");
                handle.send_message(&[from.login.as_str()], &args.reply).await?;
            }
            Event::AuthFailed { reason } => anyhow::bail!("authentication failed: {reason}"),
            Event::Disconnected { reason } => {
                tracing::info!(%reason, "Disconnected");
                break;
            }
            _ => {}
        }
    }
    Ok(())
}
