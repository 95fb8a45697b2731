//! Parley application binary - composition root.
//!
//! 1. Parse arguments and load configuration from TOML
//! 2. Install tracing (stderr, so stdout carries only chat output)
//! 3. Build the HTTP backend, telemetry sink and chat orchestrator
//! 4. Run the requested command: interactive chat, a one-shot question,
//!    document administration, an analytics report, or writing the config

mod cli;
mod echo;
mod repl;
mod report;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use parley_chat::router::image_mime_for;
use parley_chat::telemetry::sink_from_config;
use parley_chat::{ChatError, ChatEvent, ChatOrchestrator, DocumentStore, DocumentUpload, HttpBackend};
use parley_core::{ParleyConfig, ParleyError};
use parley_insight::{AnalyticsService, AnalyticsSource, JsonFileSource, RestAnalyticsSource};

use cli::{CliArgs, Command, DocumentsAction};
use echo::StreamEcho;
use repl::ReplCommand;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config is read before tracing exists; its outcome is logged after.
    let config_file = args.resolve_config_path();
    let (mut config, load_error) = match ParleyConfig::load(&config_file) {
        Ok(config) => (config, None),
        Err(e) => (ParleyConfig::default(), Some(e)),
    };
    args.apply_overrides(&mut config);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting Parley v{}", env!("CARGO_PKG_VERSION"));
    match load_error {
        None => tracing::info!(path = %config_file.display(), "Configuration loaded"),
        Some(ParleyError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %config_file.display(), "No configuration file, using defaults")
        }
        Some(e) => {
            tracing::warn!(path = %config_file.display(), error = %e, "Failed to load configuration, using defaults")
        }
    }
    if let Command::Init { force } = args.command() {
        cli::init_config(&config, &config_file, force)?;
        println!("Wrote {}", config_file.display());
        return Ok(());
    }
    config.validate()?;

    let backend = Arc::new(HttpBackend::new(config.backend.clone())?);

    match args.command() {
        Command::Chat => {
            let orchestrator = build_orchestrator(&config, &backend);
            run_chat(&orchestrator, &config).await?;
        }
        Command::Ask { message, image, html } => {
            let orchestrator = build_orchestrator(&config, &backend);
            if let Some(path) = image {
                attach_image(&orchestrator, &path).await?;
            }
            orchestrator.begin_session().await?;
            let answered = answer(&orchestrator, &message.join(" "), html).await;
            orchestrator.end_session().await?;
            answered?;
        }
        Command::Upload { path, department } => {
            let upload = DocumentUpload::from_path(&path).await?;
            let department = department.unwrap_or_else(|| config.general.department.clone());
            let document = backend.upload(&upload, &department).await?;
            println!("Uploaded {} as {}", document.name, document.document_id);
        }
        Command::Documents { action } => match action {
            DocumentsAction::List => {
                let documents = backend.list().await?;
                if documents.is_empty() {
                    println!("No documents.");
                }
                for doc in documents {
                    println!(
                        "{}  {}  {}  {}",
                        doc.document_id,
                        doc.file_name.as_deref().unwrap_or("-"),
                        doc.department.as_deref().unwrap_or("-"),
                        doc.status.as_deref().unwrap_or("-"),
                    );
                }
            }
            DocumentsAction::Delete { document_id } => {
                backend.delete(&document_id).await?;
                println!("Deleted {}", document_id);
            }
        },
        // Written before validation, above
        Command::Init { .. } => {}
        Command::Analytics {
            interactions,
            sessions,
            json,
        } => {
            let source: Arc<dyn AnalyticsSource> = match interactions {
                Some(path) => Arc::new(JsonFileSource::new(path, sessions)),
                None => Arc::new(RestAnalyticsSource::new(config.telemetry.clone())?),
            };
            let snapshot = AnalyticsService::new(source).snapshot().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print!("{}", report::format_snapshot(&snapshot));
            }
        }
    }

    Ok(())
}

fn build_orchestrator(config: &ParleyConfig, backend: &Arc<HttpBackend>) -> ChatOrchestrator {
    ChatOrchestrator::new(
        backend.clone(),
        sink_from_config(&config.telemetry),
        config.chat.clone(),
        config.general.user_id.clone(),
    )
    .with_documents(backend.clone())
}

async fn attach_image(orchestrator: &ChatOrchestrator, path: &Path) -> Result<(), ChatError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ChatError::MissingAttachment(format!("{} ({})", path.display(), e)))?;
    orchestrator.attach_image(&bytes, image_mime_for(path))
}

/// Interactive loop. Failures are printed and the loop continues.
async fn run_chat(orchestrator: &ChatOrchestrator, config: &ParleyConfig) -> Result<(), ChatError> {
    orchestrator.begin_session().await?;
    println!(
        "Parley {}. Type a message, or /help for commands.",
        env!("CARGO_PKG_VERSION")
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read input");
                break;
            }
        };
        if line.trim().is_empty() {
            // An attached image can be sent on its own
            if orchestrator.attachments()?.image.is_some() {
                report_failure(answer(orchestrator, "", false).await);
            }
            continue;
        }

        match ReplCommand::parse(&line) {
            ReplCommand::Message(text) => {
                report_failure(answer(orchestrator, &text, false).await)
            }
            ReplCommand::New => {
                orchestrator.start_new_chat().await?;
                println!("Started a new chat.");
            }
            ReplCommand::Image(path) => match attach_image(orchestrator, &path).await {
                Ok(()) => println!("Image attached to your next message."),
                Err(e) => println!("{}", e.user_message()),
            },
            ReplCommand::Upload(path) => {
                let result = match DocumentUpload::from_path(&path).await {
                    Ok(upload) => {
                        orchestrator
                            .upload_document(&upload, &config.general.department)
                            .await
                    }
                    Err(e) => Err(e),
                };
                match result {
                    Ok(document) => println!(
                        "Uploaded {}. Questions now use this document until /new.",
                        document.name
                    ),
                    Err(e) => println!("{}", e.user_message()),
                }
            }
            ReplCommand::History => {
                println!("{}", report::format_history(&orchestrator.exchanges()?))
            }
            ReplCommand::Usage => println!("{}", report::format_usage(&orchestrator.usage()?)),
            ReplCommand::Help => println!("{}", repl::HELP),
            ReplCommand::Quit => break,
            ReplCommand::Invalid(command) => {
                println!("Unknown command: {}. Type /help for commands.", command)
            }
        }
    }

    orchestrator.end_session().await
}

/// Submit one message, echoing streamed text as it arrives. Ctrl-C cancels
/// the submission.
///
/// Backend failures are printed as part of the answer. A message rejected
/// before submission is returned as `Err`.
async fn answer(orchestrator: &ChatOrchestrator, input: &str, html: bool) -> Result<(), ChatError> {
    let mut events = orchestrator.subscribe();
    let submit = orchestrator.submit(input);
    tokio::pin!(submit);

    let mut echo = StreamEcho::new();
    let result = loop {
        tokio::select! {
            result = &mut submit => break result,
            event = events.recv(), if !html && echo.is_live() => {
                if let Some(delta) = echo.observe(event) {
                    print!("{}", delta);
                    let _ = std::io::stdout().flush();
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if let Err(e) = orchestrator.cancel() {
                    tracing::warn!(error = %e, "Failed to cancel submission");
                }
            }
        }
    };

    match result {
        Ok(exchange) if html => println!("{}", exchange.response_html),
        // Whatever was not echoed: single-shot answers, error text, or the
        // tail of a stream the echo fell behind on
        Ok(exchange) => println!("{}", echo.remainder(&exchange.response_text)),
        Err(e) if e.is_validation() => return Err(e),
        Err(e) => println!("{}", e.user_message()),
    }
    Ok(())
}

fn report_failure(answered: Result<(), ChatError>) {
    if let Err(e) = answered {
        println!("{}", e.user_message());
    }
}
