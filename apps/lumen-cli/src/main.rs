//! # Lumen CLI
//!
//! Reference host for the Lumen SDK: authenticates with the configured
//! credentials, answers secondary-auth prompts from stdin and sends records.
//!
//! ```text
//!   lumen init                          write a default lumen.toml
//!   lumen auth                          authenticate and print the session
//!   lumen event <name> [json]           queue an event
//!   lumen telemetry <name> [json]       queue a telemetry sample
//!   lumen log <level> <message>         queue a log line
//!   lumen put <name> <json> [--scope]   queue a storage value
//!   lumen get <name> [--scope]          read storage values
//!   lumen delete <name> [--scope]       delete a storage value
//! ```
//!
//! Every command except `init` flushes its stream before exiting.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use lumen_client::{
    AuthCompletion, AuthHandoffReceiver, AuthPrompt, AuthPromptHandler, AuthState, ClientConfig,
    LumenClient, SessionEventEmitter, StreamKind,
};
use lumen_core::{KeepPolicy, Record, StorageScope, HANDOFF_KEY};

#[derive(Parser)]
#[command(name = "lumen", version, about = "Lumen SDK reference host")]
struct Args {
    /// Config file (defaults to the platform config dir).
    #[arg(short, long, env = "LUMEN_CONFIG")]
    config: Option<PathBuf>,

    /// URL the app was launched with; may carry a hand-off bundle.
    #[arg(long)]
    launch_url: Option<String>,

    /// Hand-off bundle passed by a launcher.
    #[arg(long = "auth_handoff", hide = true)]
    auth_handoff: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    Init,
    Auth,
    Event {
        name: String,
        #[arg(default_value = "{}")]
        payload: String,
    },
    Telemetry {
        name: String,
        #[arg(default_value = "{}")]
        payload: String,
    },
    Log {
        level: Level,
        message: String,
    },
    Put {
        name: String,
        payload: String,
        #[arg(long, value_enum, default_value_t = Scope::Device)]
        scope: Scope,
        /// Replace the previous value instead of appending.
        #[arg(long)]
        latest: bool,
    },
    Get {
        name: String,
        #[arg(long, value_enum, default_value_t = Scope::Device)]
        scope: Scope,
    },
    Delete {
        name: String,
        #[arg(long, value_enum, default_value_t = Scope::Device)]
        scope: Scope,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Scope {
    Device,
    User,
}

impl From<Scope> for StorageScope {
    fn from(scope: Scope) -> Self {
        match scope {
            Scope::Device => StorageScope::Device,
            Scope::User => StorageScope::User,
        }
    }
}

/// Prints prompts and outcomes for the terminal user.
struct TerminalHost;

impl AuthPromptHandler for TerminalHost {
    fn show_prompt(&self, prompt: &AuthPrompt) {
        eprint!("[{}] {}: ", prompt.mechanism_type, prompt.text);
    }
}

impl SessionEventEmitter for TerminalHost {
    fn emit_auth_complete(&self, completion: &AuthCompletion) {
        match (&completion.error, completion.handoff) {
            (Some(error), _) => eprintln!("authentication failed: {}", error),
            (None, true) => eprintln!("authenticated from hand-off"),
            (None, false) => eprintln!("authenticated"),
        }
    }

    fn emit_queue_evicted(&self, stream: StreamKind, count: usize) {
        eprintln!("{} queue full, dropped {} entries", stream, count);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Hand-off sources in priority order: the parsed flag, raw launch
/// arguments, then the launch URL.
fn handoff_receiver(args: &Args, raw_args: Vec<String>) -> AuthHandoffReceiver {
    let extras: HashMap<String, String> = args
        .auth_handoff
        .clone()
        .map(|bundle| (HANDOFF_KEY.to_string(), bundle))
        .into_iter()
        .collect();
    AuthHandoffReceiver::standard(extras, raw_args, args.launch_url.clone())
}

fn parse_record(raw: &str) -> Result<Record> {
    serde_json::from_str(raw).with_context(|| format!("payload is not JSON: {}", raw))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    if let Command::Init = args.command {
        ClientConfig::new().save(args.config)?;
        println!("config written");
        return Ok(());
    }

    let config = ClientConfig::load(args.config.clone())?;
    let host = Arc::new(TerminalHost);
    let handoff = handoff_receiver(&args, std::env::args().skip(1).collect());
    let client = LumenClient::builder(config)
        .with_handoff(handoff)
        .with_prompt_handler(host.clone())
        .with_emitter(host)
        .build()?;

    client.start()?;
    let outcome = run(&client, args.command).await;
    client.shutdown().await?;

    let status = client.status();
    for stream in &status.streams {
        if stream.pending > 0 {
            eprintln!("{}: {} entries not delivered", stream.stream, stream.pending);
        }
    }
    outcome
}

async fn run(client: &LumenClient, command: Command) -> Result<()> {
    authenticate(client).await?;

    match command {
        Command::Init => {}
        Command::Auth => {
            let status = client.status();
            println!("state:   {}", status.state);
            println!("handoff: {}", status.handoff);
            if let Some(expiry) = status.token_expiry {
                println!("expires: {}", expiry.to_rfc3339());
            }
            if let Some(user_id) = client.session().profile().user_id {
                println!("user:    {}", user_id);
            }
        }
        Command::Event { name, payload } => client.track_event(name, parse_record(&payload)?)?,
        Command::Telemetry { name, payload } => {
            client.record_telemetry(name, parse_record(&payload)?)?
        }
        Command::Log { level, message } => client.log(level, message)?,
        Command::Put {
            name,
            payload,
            scope,
            latest,
        } => {
            let keep = if latest {
                KeepPolicy::KeepLatest
            } else {
                KeepPolicy::AppendHistory
            };
            client
                .storage()
                .put(name, parse_record(&payload)?, scope.into(), keep);
        }
        Command::Get { name, scope } => {
            let entries = client.storage().get(&name, scope.into()).await?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        Command::Delete { name, scope } => {
            client.storage().delete(scope.into(), &name).await?;
            info!(name = %name, "deleted");
        }
    }
    Ok(())
}

/// Authenticates, reading secondary-auth answers from stdin.
async fn authenticate(client: &LumenClient) -> Result<()> {
    client.authenticate().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while client.session().state() == AuthState::SecondaryAuthPending {
        let Some(answer) = lines.next_line().await? else {
            bail!("stdin closed before secondary authentication completed");
        };
        client.submit_secondary_answer(answer.trim()).await?;
    }

    if !client.is_authenticated() {
        bail!("session is not authenticated");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUNDLE: &str = r#"{"Token":"a.b.c","Secret":"s3cret"}"#;

    #[test]
    fn test_auth_handoff_flag_feeds_receiver() {
        let args = Args::try_parse_from(["lumen", "--auth_handoff", BUNDLE, "auth"]).unwrap();
        let bundle = handoff_receiver(&args, Vec::new()).receive().unwrap();
        assert_eq!(bundle.token.as_deref(), Some("a.b.c"));
        assert_eq!(bundle.secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_no_handoff_without_flag() {
        let args = Args::try_parse_from(["lumen", "auth"]).unwrap();
        assert!(args.auth_handoff.is_none());
        assert!(handoff_receiver(&args, Vec::new()).receive().is_none());
    }
}
