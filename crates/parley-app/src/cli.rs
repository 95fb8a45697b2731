//! CLI argument definitions for the Parley client.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use parley_core::{ParleyConfig, ParleyError};

/// Parley: a terminal client for the conversational assistant backend.
#[derive(Parser, Debug)]
#[command(name = "parley", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Base URL of the query backend.
    #[arg(long = "api-url", global = true)]
    pub api_url: Option<String>,

    /// User identifier sent with queries and telemetry.
    #[arg(short = 'u', long = "user", global = true)]
    pub user_id: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Interactive chat (the default).
    Chat,
    /// Ask a single question and print the answer.
    Ask {
        /// The question.
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
        /// Attach an image to the question.
        #[arg(long)]
        image: Option<PathBuf>,
        /// Print the rendered HTML instead of plain text.
        #[arg(long)]
        html: bool,
    },
    /// Upload a document for later document queries.
    Upload {
        path: PathBuf,
        /// Department recorded with the upload.
        #[arg(short = 'd', long)]
        department: Option<String>,
    },
    /// Manage uploaded documents.
    Documents {
        #[command(subcommand)]
        action: DocumentsAction,
    },
    /// Write the effective configuration to the config file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Print a usage analytics report.
    Analytics {
        /// Read interactions from a JSON export instead of the telemetry tables.
        #[arg(long)]
        interactions: Option<PathBuf>,
        /// Sessions JSON export (used with --interactions).
        #[arg(long, requires = "interactions")]
        sessions: Option<PathBuf>,
        /// Emit the snapshot as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum DocumentsAction {
    /// List uploaded documents.
    List,
    /// Delete a document by id.
    Delete { document_id: String },
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > PARLEY_CONFIG env var > ~/.parley/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        self.resolve_config_path_with(env_var)
    }

    fn resolve_config_path_with(&self, env: impl Fn(&str) -> Option<String>) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Some(p) = env("PARLEY_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path(env)
    }

    /// Apply flag and environment overrides on top of a loaded config.
    pub fn apply_overrides(&self, config: &mut ParleyConfig) {
        self.apply_overrides_with(config, env_var)
    }

    fn apply_overrides_with(&self, config: &mut ParleyConfig, env: impl Fn(&str) -> Option<String>) {
        if let Some(url) = self.api_url.clone().or_else(|| env("PARLEY_API_URL")) {
            config.backend.base_url = url;
        }
        if let Some(user) = self.user_id.clone().or_else(|| env("PARLEY_USER_ID")) {
            config.general.user_id = user;
        }
        if let Some(ref level) = self.log_level {
            config.general.log_level = level.clone();
        }
    }

    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Chat)
    }
}

/// Save `config` to `path`, refusing to replace an existing file unless
/// `force` is set.
pub fn init_config(config: &ParleyConfig, path: &Path, force: bool) -> Result<(), ParleyError> {
    if path.exists() && !force {
        return Err(ParleyError::Config(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    config.save(path)
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn default_config_path(env: impl Fn(&str) -> Option<String>) -> PathBuf {
    #[cfg(target_os = "windows")]
    let home = env("USERPROFILE");
    #[cfg(not(target_os = "windows"))]
    let home = env("HOME");
    match home {
        Some(home) => PathBuf::from(home).join(".parley").join("config.toml"),
        None => PathBuf::from("config.toml"),
    }
}
