//! One-shot "say" command

use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use crate::core::controller::{ConversationController, StreamUpdate};
use crate::core::ids::ConversationId;
use crate::core::session::SessionContext;
use crate::utils::attachments::load_attachment;

pub async fn run_say(
    session: Arc<SessionContext>,
    conversation: Option<String>,
    attachment_paths: Vec<PathBuf>,
    prompt: Vec<String>,
) -> Result<(), Box<dyn Error>> {
    let prompt = prompt.join(" ");
    if prompt.trim().is_empty() && attachment_paths.is_empty() {
        eprintln!("Usage: forkchat say <prompt>");
        std::process::exit(1);
    }

    if session.api_key.is_none() {
        eprintln!(
            "⚠️  {} is not set; sending without a provider key",
            session.model.api_key_env_var()
        );
    }

    let attachments = attachment_paths
        .iter()
        .map(|path| load_attachment(path))
        .collect::<Result<Vec<_>, _>>()?;

    let mut controller = match conversation {
        Some(id) => ConversationController::open(session, &ConversationId::from(id)).await?,
        None => ConversationController::start(session),
    };

    controller.send(&prompt, attachments).await?;

    let mut stdout = io::stdout();
    let outcome = controller
        .drive_stream(|delta| {
            let _ = write!(stdout, "{delta}");
            let _ = stdout.flush();
        })
        .await?;
    println!();

    match outcome {
        StreamUpdate::Failed { error, .. } => {
            eprintln!("❌ Error: {error}");
            std::process::exit(1);
        }
        _ => {
            if let Some(title) = controller.settle_title().await? {
                eprintln!("title: {title}");
            }
            eprintln!("conversation: {}", controller.conversation_id());
            Ok(())
        }
    }
}
