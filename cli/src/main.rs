use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use filebus::config::BUFFER_DIR_ENV;
use filebus::{BusConfig, EventBus, Sender, SignalPolicy};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "filebus")]
#[command(about = "Send and receive local events through a watched directory")]
#[command(version)]
struct Cli {
    /// Project root holding the buffer directory (discovered when omitted)
    #[arg(long, global = true)]
    project_root: Option<PathBuf>,

    /// Name of the buffer directory inside the project root
    #[arg(long, global = true, env = BUFFER_DIR_ENV)]
    buffer_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send an event to the listening process
    Send {
        /// Event name
        event: String,

        /// Arguments passed to every listener
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        messages: Vec<String>,
    },
    /// Print events as they arrive until interrupted
    Listen {
        /// Events to listen for
        #[arg(required = true)]
        events: Vec<String>,

        /// Print one JSON object per event
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    fn bus_config(&self) -> BusConfig {
        let mut config = BusConfig::new();
        if let Some(root) = &self.project_root {
            config = config.with_project_root(root);
        }
        if let Some(name) = &self.buffer_dir {
            config = config.with_buffer_dir_name(name);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.bus_config();

    match cli.command {
        Commands::Send { event, messages } => {
            let sender = Sender::new(&config).context("failed to locate the event buffer")?;
            sender
                .send(&event, &messages)
                .with_context(|| format!("failed to send event {event:?}"))?;
        }
        Commands::Listen { events, json } => {
            let bus = EventBus::new(config.with_signal_policy(SignalPolicy::Cleanup))
                .context("failed to create event bus")?;

            for event in &events {
                let name = event.clone();
                bus.on(event, move |args| {
                    println!("{}", format_event(&name, args, json, Local::now()));
                })
                .with_context(|| format!("failed to listen for {event:?}"))?;
            }

            info!("Listening on {} for {}", bus.root().display(), events.join(", "));
            bus.wait_for_shutdown().await;
        }
    }

    Ok(())
}

fn format_event(event: &str, args: &[String], json: bool, at: DateTime<Local>) -> String {
    if json {
        serde_json::json!({
            "event": event,
            "args": args,
            "received_at": at.to_rfc3339(),
        })
        .to_string()
    } else {
        format!("[{}] {event}: {}", at.format("%H:%M:%S"), args.join(" "))
    }
}
