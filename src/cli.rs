// Threatdesk — Command Line
//
//   threatdesk serve   [--config P] [--bind ADDR] [--port N] [--model M]
//   threatdesk analyze [--config P] [--model M] (--file P | TEXT)
//   threatdesk inspect [--encoded] TEXT

use crate::config::ServerConfig;
use crate::server::{run_server, AppState};
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use threatdesk_core::engine::intake::{decode_prompt, extract_analysis_id, fingerprint};
use threatdesk_core::engine::providers::GeminiBackend;
use threatdesk_core::{dispatch_webhook, DispatchOutcome, EngineError, EngineResult, SessionContext, WebhookPayload};

#[derive(Parser, Debug)]
#[command(name = "threatdesk", version, about = "Insider-threat log analysis chat with webhook intake")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat front-end and webhook endpoint
    Serve {
        /// Config TOML path (default: <config dir>/threatdesk/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Bind address, overrides the config file
        #[arg(long)]
        bind: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Analyze one log payload and print the stored record
    Analyze {
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(short, long)]
        model: Option<String>,
        /// Read the payload from a file instead of the argument
        #[arg(short, long, conflicts_with = "text")]
        file: Option<PathBuf>,
        #[arg(required_unless_present = "file")]
        text: Option<String>,
    },
    /// Show the analysis id and fingerprint a payload would get (offline)
    Inspect {
        /// Treat TEXT as a still percent-encoded `prompt` value
        #[arg(long)]
        encoded: bool,
        text: String,
    },
}

/// Process exit code for a finished command.
pub type ExitCode = i32;

pub async fn run(cli: Cli) -> EngineResult<ExitCode> {
    match cli.command {
        Command::Serve { config, bind, port, model } => {
            let mut config = load_config(config, model)?;
            if let Some(bind) = bind {
                config.bind_address = bind;
            }
            if let Some(port) = port {
                config.port = port;
            }
            serve(config).await?;
            Ok(0)
        }
        Command::Analyze { config, model, file, text } => {
            let config = load_config(config, model)?;
            let text = match (file, text) {
                (Some(path), _) => std::fs::read_to_string(&path)?,
                (None, Some(text)) => text,
                (None, None) => return Err(EngineError::Config("Nothing to analyze".into())),
            };
            analyze(&config, &text).await
        }
        Command::Inspect { encoded, text } => {
            let text = if encoded {
                match decode_prompt(&text) {
                    Ok(Some(decoded)) => decoded,
                    Ok(None) => return Err(EngineError::Other("Payload is blank".into())),
                    Err(e) => {
                        return Err(EngineError::Other(format!("Payload is not valid percent-encoded UTF-8: {}", e)))
                    }
                }
            } else {
                text
            };
            println!("{}", inspect(&text));
            Ok(0)
        }
    }
}

fn load_config(path: Option<PathBuf>, model: Option<String>) -> EngineResult<ServerConfig> {
    let mut config = ServerConfig::load(path.as_deref())?;
    config.apply_env();
    if let Some(model) = model {
        config.set_model(&model)?;
    }
    config.require_api_key()?;
    Ok(config)
}

async fn serve(config: ServerConfig) -> EngineResult<()> {
    let session = SessionContext::new(&config.provider.default_model)?;
    let backend = Arc::new(GeminiBackend::new(&config.provider));
    info!(
        "[cli] Serving \"{}\" with model {}",
        config.page_title, config.provider.default_model
    );
    run_server(Arc::new(AppState::new(config, session, backend))).await
}

async fn analyze(config: &ServerConfig, text: &str) -> EngineResult<ExitCode> {
    let mut session = SessionContext::new(&config.provider.default_model)?;
    let backend = GeminiBackend::new(&config.provider);
    let payload = WebhookPayload::new(text);

    let outcome = dispatch_webhook(&mut session, &backend, &payload).await;
    let record = session
        .ledger
        .get(outcome.analysis_id())
        .ok_or_else(|| EngineError::Other(format!("Analysis {} was not recorded", outcome.analysis_id())))?;

    match &outcome {
        DispatchOutcome::Completed { response, .. } => println!("{}\n", response),
        DispatchOutcome::Failed { message, .. } => eprintln!("{}\n", message),
        DispatchOutcome::AlreadyProcessed { .. } => {}
    }
    println!("{}", serde_json::to_string_pretty(&record.export())?);

    Ok(match outcome {
        DispatchOutcome::Failed { .. } => 1,
        _ => 0,
    })
}

/// Offline summary of how a payload would be keyed.
pub fn inspect(text: &str) -> String {
    let fp = fingerprint(text);
    match extract_analysis_id(text) {
        Some(id) => format!("analysis_id: {}\nfingerprint: {}", id, fp),
        None => format!("analysis_id: auto_{} (no identifier found)\nfingerprint: {}", fp, fp),
    }
}
