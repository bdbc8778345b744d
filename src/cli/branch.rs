//! "branch" command

use std::error::Error;
use std::sync::Arc;

use crate::core::branch::branch_info;
use crate::core::controller::ConversationController;
use crate::core::ids::{ConversationId, MessageId};
use crate::core::session::SessionContext;

pub async fn run_branch(
    session: Arc<SessionContext>,
    conversation: &str,
    message: &str,
) -> Result<(), Box<dyn Error>> {
    let store = Arc::clone(&session.store);
    let controller =
        ConversationController::open(session, &ConversationId::from(conversation)).await?;
    let branch = controller.branch_from(&MessageId::from(message)).await?;
    let info = branch_info(&*store, &branch.id).await?;

    println!("{}", info.conversation.id);
    eprintln!("title:  {}", info.conversation.title);
    if let Some(parent) = &info.parent {
        eprintln!("parent: {} ({})", parent.id, parent.title);
    }
    eprintln!("depth:  {}", info.depth());
    Ok(())
}
