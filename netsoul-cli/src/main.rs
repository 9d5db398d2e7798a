//! netsoul-cli: line-oriented netsoul client.
//!
//! Reads slash commands from stdin and prints buddy events to stdout
//! (as text, or one JSON object per line with `--json`). Logs go to stderr.

mod app;
mod config;

use anyhow::Result;
use clap::Parser;
use netsoul_sdk::event::Event;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use app::{App, Input};

#[derive(Parser, Debug)]
#[command(name = "netsoul-cli", version, about = "Command-line netsoul presence client")]
pub struct Cli {
    /// Server address (host:port)
    #[arg(long)]
    server: Option<String>,

    /// Account login (defaults to the system user name)
    #[arg(long)]
    login: Option<String>,

    /// Account password
    #[arg(long, env = "NETSOUL_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Location shown to buddies; %L is replaced by the host name
    #[arg(long)]
    location: Option<String>,

    /// Comment shown to buddies
    #[arg(long)]
    comment: Option<String>,

    /// Logins to watch, comma separated (replaces the saved contacts)
    #[arg(long, value_delimiter = ',')]
    watch: Vec<String>,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,

    /// Start without connecting; use /connect
    #[arg(long)]
    no_connect: bool,
}

/// Next event from the current connection; pending while there is none.
async fn next_event(events: &mut Option<mpsc::Receiver<Event>>) -> Option<Event> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "netsoul=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let file_config = config::Config::load();
    let settings = config::Resolved::merge(&cli, &file_config);
    let mut app = App::new(settings, file_config, cli.json);

    let mut events: Option<mpsc::Receiver<Event>> = None;
    if !cli.no_connect {
        match app.connect().await {
            Ok(rx) => events = Some(rx),
            Err(e) => eprintln!("! {e:#}"),
        }
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = stdin.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let input = match app::parse_input(&line) {
                    Ok(Some(input)) => input,
                    Ok(None) => continue,
                    Err(usage) => {
                        eprintln!("! {usage}");
                        continue;
                    }
                };
                match input {
                    Input::Quit => break,
                    Input::Connect => match app.connect().await {
                        Ok(rx) => events = Some(rx),
                        Err(e) => eprintln!("! {e:#}"),
                    },
                    Input::Disconnect => {
                        app.disconnect().await?;
                        // Drain what the old connection said on its way out.
                        if let Some(mut rx) = events.take() {
                            while let Some(event) = rx.recv().await {
                                if let Some(out) = app.apply_event(&event) {
                                    println!("{out}");
                                }
                            }
                        }
                    }
                    other => match app.run(other).await {
                        Ok(Some(out)) => println!("{out}"),
                        Ok(None) => {}
                        Err(e) => eprintln!("! {e:#}"),
                    },
                }
            }
            event = next_event(&mut events) => match event {
                Some(event) => {
                    if let Some(out) = app.apply_event(&event) {
                        println!("{out}");
                    }
                    if let Err(e) = app.after_event(&event).await {
                        eprintln!("! {e:#}");
                    }
                }
                None => events = None,
            },
        }
    }

    app.disconnect().await?;
    Ok(())
}
