//! "list" command

use std::error::Error;
use std::sync::Arc;

use crate::core::conversation::{group_by_recency_now, Conversation};
use crate::core::session::SessionContext;

pub async fn run_list(session: Arc<SessionContext>, public: bool) -> Result<(), Box<dyn Error>> {
    let conversations = if public {
        session.store.list_public_conversations().await?
    } else {
        let Some(actor) = session.actor.as_ref() else {
            return Ok(());
        };
        session.store.list_conversations(actor).await?
    };
    if conversations.is_empty() {
        println!("No conversations yet.");
        return Ok(());
    }

    let groups = group_by_recency_now(conversations);
    let mut first = true;
    for (label, section) in groups.sections() {
        if section.is_empty() {
            continue;
        }
        if !first {
            println!();
        }
        first = false;
        println!("{label}");
        for conversation in section {
            println!("  {}", format_row(conversation));
        }
    }
    Ok(())
}

fn format_row(conversation: &Conversation) -> String {
    let pin = if conversation.pinned { "📌 " } else { "" };
    let mut row = format!("{pin}{}  {}", conversation.id, conversation.title);
    if conversation.branch_depth > 0 {
        row.push_str(&format!("  (branch depth {})", conversation.branch_depth));
    }
    row
}
