//! Command-line interface parsing and handling
//!
//! Each subcommand lives in its own module and receives the loaded
//! [`Config`] plus the global overrides.

pub mod branch;
pub mod list;
pub mod replay;
pub mod say;
pub mod settings;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::debug;

use crate::cli::branch::run_branch;
use crate::cli::list::run_list;
use crate::cli::replay::run_replay;
use crate::cli::say::run_say;
use crate::cli::settings::{run_set, run_unset};
use crate::core::config::data::path_display;
use crate::core::config::Config;
use crate::core::ids::ActorId;
use crate::core::session::{SessionContext, SessionOverrides};
use crate::core::store::FileStore;
use crate::utils::logging::init_tracing;

pub const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("VERGEN_GIT_DESCRIBE"),
    ", built ",
    env!("VERGEN_BUILD_DATE"),
    ")"
);

#[derive(Parser)]
#[command(name = "forkchat")]
#[command(version = VERSION)]
#[command(about = "Stream, continue and branch chat conversations from the terminal")]
#[command(
    long_about = "forkchat talks to a streaming chat endpoint, keeps conversations on disk \
and can branch a conversation from any of its messages.\n\n\
Environment Variables:\n\
  FORKCHAT_<PROVIDER>_API_KEY   Provider key sent with each request \
(e.g. FORKCHAT_OPENAI_API_KEY)\n\
  FORKCHAT_LOG                  Log filter (e.g. debug, forkchat=trace)"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Model to use instead of the configured default
    #[arg(short = 'm', long, global = true, value_name = "MODEL")]
    pub model: Option<String>,

    /// Chat endpoint (a server origin or the full /api/chat URL)
    #[arg(short = 'e', long, global = true, value_name = "URL")]
    pub endpoint: Option<String>,

    /// Directory holding stored conversations
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send a prompt and stream the reply to stdout
    Say {
        /// Continue this conversation instead of starting a new one
        #[arg(short = 'c', long, value_name = "ID")]
        conversation: Option<String>,
        /// Attach a local file (repeatable)
        #[arg(short = 'a', long = "attach", value_name = "FILE")]
        attachments: Vec<PathBuf>,
        /// Prompt text
        #[arg(trailing_var_arg = true, required = true)]
        prompt: Vec<String>,
    },
    /// Decode a captured data stream and print its text
    Replay {
        /// File containing the raw response body
        file: PathBuf,
        /// Feed the decoder in chunks of this many bytes
        #[arg(long, value_name = "BYTES")]
        chunk_size: Option<usize>,
    },
    /// Create a branch of a conversation ending at a message
    Branch {
        conversation: String,
        message: String,
    },
    /// List your conversations grouped by recency
    List {
        /// List public conversations of every owner instead
        #[arg(long)]
        public: bool,
    },
    /// Set a configuration value, or show all values when none is given
    Set {
        /// Configuration key (endpoint, default-model, sync-throttle-ms,
        /// channel-prefix, data-dir, actor-id)
        key: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        value: Vec<String>,
    },
    /// Remove a configuration value
    Unset {
        key: String,
    },
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let args = Args::parse();
    let mut config = Config::load()?;
    if args.data_dir.is_some() {
        config.data_dir = args.data_dir.clone();
    }
    let overrides = SessionOverrides {
        model: args.model.clone(),
        endpoint: args.endpoint.clone(),
    };

    match args.command {
        Commands::Say {
            conversation,
            attachments,
            prompt,
        } => {
            let session = build_session(&config, &overrides)?;
            run_say(session, conversation, attachments, prompt).await
        }
        Commands::Replay { file, chunk_size } => run_replay(&file, chunk_size).await,
        Commands::Branch {
            conversation,
            message,
        } => {
            let session = build_session(&config, &overrides)?;
            run_branch(session, &conversation, &message).await
        }
        Commands::List { public } => {
            let session = build_session(&config, &overrides)?;
            run_list(session, public).await
        }
        Commands::Set { key, value } => run_set(&key, value),
        Commands::Unset { key } => run_unset(&key),
    }
}

/// The CLI always acts as someone: the configured actor, else the login
/// name, else `local`.
fn local_actor() -> ActorId {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|name| !name.trim().is_empty())
        .map(ActorId::from)
        .unwrap_or_else(|| ActorId::from("local"))
}

fn build_session(
    config: &Config,
    overrides: &SessionOverrides,
) -> Result<Arc<SessionContext>, Box<dyn Error>> {
    let store = Arc::new(FileStore::open(config.data_dir())?);
    debug!(data_dir = %path_display(store.root()), "conversation store opened");
    let mut session = SessionContext::from_config(config, overrides, store)?;
    if session.actor.is_none() {
        session.actor = Some(local_actor());
    }
    Ok(Arc::new(session))
}
