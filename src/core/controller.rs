//! Orchestration of one open conversation.
//!
//! A [`ConversationController`] is one tab: it owns the transcript, a sync
//! channel for the conversation and the network task of the current reply.
//! Store writes happen only at checkpoints: user send accepted, assistant
//! reply finalized, edit or regenerate truncation, branch creation and
//! conversation metadata changes. A user message is broadcast only after
//! it is stored.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::ChatRequest;
use crate::core::branch::{derive_branch, BranchError};
use crate::core::chat_stream::{ChatStreamService, StreamMessage, StreamParams};
use crate::core::conversation::{fallback_title, Conversation, Visibility, DEFAULT_TITLE};
use crate::core::ids::{ActorId, ConversationId, MessageId};
use crate::core::message::{Attachment, Message};
use crate::core::session::SessionContext;
use crate::core::store::StoreError;
use crate::core::sync_bus::{SyncChannel, SyncEvent, SyncListener};
use crate::core::title::TitleRequest;
use crate::core::transcript::{RemoteOutcome, StreamHandle, Transcript, TranscriptError};
use crate::utils::time::now_millis;

#[derive(Debug)]
pub enum ControllerError {
    NotFound(ConversationId),
    /// The conversation is private to another actor.
    AccessDenied(ConversationId),
    /// The operation writes on behalf of an actor and none is signed in.
    NoIdentity,
    Transcript(TranscriptError),
    Store(StoreError),
    Branch(BranchError),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::NotFound(id) => write!(f, "Conversation not found: {id}"),
            ControllerError::AccessDenied(id) => {
                write!(f, "You do not have access to conversation {id}")
            }
            ControllerError::NoIdentity => write!(f, "No identity configured; set actor_id"),
            ControllerError::Transcript(e) => write!(f, "{e}"),
            ControllerError::Store(e) => write!(f, "{e}"),
            ControllerError::Branch(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ControllerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ControllerError::Transcript(e) => Some(e),
            ControllerError::Store(e) => Some(e),
            ControllerError::Branch(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TranscriptError> for ControllerError {
    fn from(value: TranscriptError) -> Self {
        ControllerError::Transcript(value)
    }
}

impl From<StoreError> for ControllerError {
    fn from(value: StoreError) -> Self {
        ControllerError::Store(value)
    }
}

impl From<BranchError> for ControllerError {
    fn from(value: BranchError) -> Self {
        ControllerError::Branch(value)
    }
}

/// Effect of one network message on the transcript.
#[derive(Debug, Clone)]
pub enum StreamUpdate {
    Delta(String),
    Completed(Arc<Message>),
    /// Transport failure; the partial reply is kept with error status.
    Failed {
        message: Option<Arc<Message>>,
        error: String,
    },
    /// The message belonged to a stream that is no longer current.
    Stale,
}

#[derive(Debug, Clone)]
pub enum ControllerEvent {
    Stream(StreamUpdate),
    Remote(RemoteOutcome),
    /// A model-generated title replaced the fallback title.
    TitleGenerated(String),
}

enum Incoming {
    Stream(Option<(StreamMessage, u64)>),
    Remote(Option<SyncEvent>),
    Title(Option<String>),
}

/// Title request in flight. The result is applied only while the
/// conversation still carries the title it was meant to replace.
struct PendingTitle {
    replaces: String,
    task: JoinHandle<Option<String>>,
}

async fn await_title(pending: &mut Option<PendingTitle>) -> Option<String> {
    match pending {
        Some(pending) => (&mut pending.task).await.ok().flatten(),
        None => std::future::pending().await,
    }
}

pub struct ConversationController {
    session: Arc<SessionContext>,
    conversation: Conversation,
    persisted: bool,
    transcript: Transcript,
    channel: SyncChannel,
    listener: SyncListener,
    stream_service: ChatStreamService,
    stream_rx: mpsc::UnboundedReceiver<(StreamMessage, u64)>,
    stream_task: Option<JoinHandle<()>>,
    title_task: Option<PendingTitle>,
}

impl ConversationController {
    /// Start a new conversation. Its id exists immediately; the record is
    /// written on the first send.
    pub fn start(session: Arc<SessionContext>) -> Self {
        let id = ConversationId::generate();
        let owner = session
            .actor
            .clone()
            .unwrap_or_else(|| ActorId::from("anonymous"));
        let conversation = Conversation::new(id, owner, now_millis());
        let transcript = Transcript::new(conversation.id.clone(), session.sync_throttle);
        Self::assemble(session, conversation, transcript, false)
    }

    /// Open a stored conversation the current actor may see.
    pub async fn open(
        session: Arc<SessionContext>,
        id: &ConversationId,
    ) -> Result<Self, ControllerError> {
        let conversation = session
            .store
            .get_conversation(id)
            .await?
            .ok_or_else(|| ControllerError::NotFound(id.clone()))?;
        if !conversation.is_visible_to(session.actor.as_ref()) {
            return Err(ControllerError::AccessDenied(id.clone()));
        }
        let messages = session.store.list_messages(id).await?;
        let transcript = Transcript::from_messages(
            id.clone(),
            conversation.title.clone(),
            messages,
            session.sync_throttle,
        );
        debug!(conversation = %id, messages = transcript.len(), "conversation opened");
        Ok(Self::assemble(session, conversation, transcript, true))
    }

    fn assemble(
        session: Arc<SessionContext>,
        conversation: Conversation,
        transcript: Transcript,
        persisted: bool,
    ) -> Self {
        let channel = session.bus.open(&conversation.id);
        let listener = channel.listen();
        let (stream_service, stream_rx) = ChatStreamService::new();
        Self {
            session,
            conversation,
            persisted,
            transcript,
            channel,
            listener,
            stream_service,
            stream_rx,
            stream_task: None,
            title_task: None,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation.id
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn is_streaming(&self) -> bool {
        self.transcript.is_streaming()
    }

    fn require_actor(&self) -> Result<ActorId, ControllerError> {
        self.session.actor.clone().ok_or(ControllerError::NoIdentity)
    }

    /// Create the stored record on first use. Creation is idempotent so a
    /// second tab racing the first send is harmless.
    async fn ensure_persisted(&mut self) -> Result<(), ControllerError> {
        if self.persisted {
            return Ok(());
        }
        self.conversation = self
            .session
            .store
            .create_conversation(self.conversation.clone())
            .await?;
        self.persisted = true;
        debug!(conversation = %self.conversation.id, "conversation created");
        Ok(())
    }

    async fn store_user_message(&mut self, message: &Message) -> Result<(), ControllerError> {
        self.ensure_persisted().await?;
        self.session.store.append_message(message.clone()).await?;
        debug!(message_id = %message.id, "user message stored");
        Ok(())
    }

    /// Append a user message and start streaming the reply.
    ///
    /// The message is stored before any other tab hears of it. When the
    /// store write fails the message is taken back out of the transcript
    /// and nothing is broadcast.
    pub async fn send(
        &mut self,
        content: &str,
        attachments: Vec<Attachment>,
    ) -> Result<StreamHandle, ControllerError> {
        let actor = self.require_actor()?;
        if self.conversation.owner_id != actor && !self.persisted {
            self.conversation.owner_id = actor;
        }
        let first_message = self.transcript.is_empty();
        let (message, event) = self.transcript.append_user(content, attachments)?;

        if let Err(e) = self.store_user_message(&message).await {
            self.transcript.retract_user(&message.id);
            warn!(message_id = %message.id, error = %e, "user message not stored; send rolled back");
            return Err(e);
        }
        self.channel.publish(event);

        if first_message && self.conversation.title == DEFAULT_TITLE {
            let fallback = fallback_title(content);
            self.set_title(&fallback).await?;
            self.spawn_title(content, fallback);
        }

        self.start_stream()
    }

    /// Ask the completion route for a title in the background. Without a
    /// provider key the fallback title stays.
    fn spawn_title(&mut self, first_message: &str, replaces: String) {
        let Some(request) = TitleRequest::new(&self.session, &self.conversation.id, first_message)
        else {
            debug!(conversation = %self.conversation.id, "no title request; keeping fallback title");
            return;
        };
        let conversation = self.conversation.id.clone();
        let task = tokio::spawn(async move {
            match request.send().await {
                Ok(title) => Some(title),
                Err(error) => {
                    warn!(%conversation, %error, "title generation failed; keeping fallback title");
                    None
                }
            }
        });
        if let Some(previous) = self.title_task.replace(PendingTitle { replaces, task }) {
            previous.task.abort();
        }
    }

    async fn apply_generated_title(
        &mut self,
        replaces: String,
        generated: Option<String>,
    ) -> Result<Option<String>, ControllerError> {
        let Some(title) = generated else {
            return Ok(None);
        };
        if self.conversation.title != replaces {
            debug!(current = %self.conversation.title, "title changed meanwhile; generated title dropped");
            return Ok(None);
        }
        self.set_title(&title).await?;
        info!(conversation = %self.conversation.id, %title, "generated title applied");
        Ok(Some(title))
    }

    /// Wait for the title request started by the first send, if any, and
    /// apply its result.
    pub async fn settle_title(&mut self) -> Result<Option<String>, ControllerError> {
        let Some(pending) = self.title_task.take() else {
            return Ok(None);
        };
        let generated = pending.task.await.ok().flatten();
        self.apply_generated_title(pending.replaces, generated).await
    }

    fn start_stream(&mut self) -> Result<StreamHandle, ControllerError> {
        let request = ChatRequest {
            messages: self.transcript.api_messages(),
            model: self.session.model.id.clone(),
        };
        let handle = self.transcript.begin_assistant()?;
        let task = self.stream_service.spawn_stream(StreamParams {
            client: self.session.client.clone(),
            endpoint: self.session.endpoint.clone(),
            api_key: self.session.api_key_header(),
            request,
            cancel_token: handle.cancel_token.clone(),
            stream_id: handle.stream_id,
        });
        self.stream_task = Some(task);
        debug!(stream_id = handle.stream_id, message_id = %handle.message_id, "stream started");
        Ok(handle)
    }

    /// Apply one message from the network task.
    pub async fn handle_stream_message(
        &mut self,
        message: StreamMessage,
        stream_id: u64,
    ) -> Result<StreamUpdate, ControllerError> {
        if !self.transcript.is_current_stream(stream_id) {
            debug!(stream_id, "ignoring message from stale stream");
            return Ok(StreamUpdate::Stale);
        }

        match message {
            StreamMessage::Chunk(text) => {
                if let Some(event) = self.transcript.apply_delta(stream_id, &text) {
                    self.channel.publish(event);
                }
                Ok(StreamUpdate::Delta(text))
            }
            StreamMessage::End => {
                let Some((finished, event)) = self.transcript.finalize(stream_id) else {
                    return Ok(StreamUpdate::Stale);
                };
                self.channel.publish(event);
                self.stream_task = None;
                self.session.store.append_message((*finished).clone()).await?;
                debug!(message_id = %finished.id, "assistant message stored");
                Ok(StreamUpdate::Completed(finished))
            }
            StreamMessage::Error(error) => {
                warn!(stream_id, %error, "stream failed");
                self.stream_task = None;
                let message = self.transcript.fail(stream_id);
                Ok(StreamUpdate::Failed { message, error })
            }
        }
    }

    /// Abort the reply in progress. The partial reply stays in the
    /// transcript with error status and is not stored or broadcast.
    pub fn stop(&mut self) -> Option<Arc<Message>> {
        let stopped = self.transcript.abort();
        if let Some(task) = self.stream_task.take() {
            task.abort();
        }
        if let Some(message) = &stopped {
            info!(message_id = %message.id, "stream stopped");
        }
        stopped
    }

    pub fn handle_remote_event(&mut self, event: &SyncEvent) -> RemoteOutcome {
        let outcome = self.transcript.apply_remote_event(event);
        if outcome == RemoteOutcome::TitleChanged {
            self.conversation.title = self.transcript.title().to_string();
        }
        debug!(?outcome, kind = ?event.kind, "remote event applied");
        outcome
    }

    /// Apply every remote event already queued, without waiting.
    pub fn drain_remote_events(&mut self) -> usize {
        let mut applied = 0;
        while let Some(event) = self.listener.try_recv() {
            self.handle_remote_event(&event);
            applied += 1;
        }
        applied
    }

    /// Wait for the next network message, remote event or generated
    /// title and apply it.
    pub async fn next_event(&mut self) -> Result<Option<ControllerEvent>, ControllerError> {
        loop {
            let incoming = tokio::select! {
                message = self.stream_rx.recv() => Incoming::Stream(message),
                event = self.listener.recv() => Incoming::Remote(event),
                title = await_title(&mut self.title_task) => Incoming::Title(title),
            };
            match incoming {
                Incoming::Stream(Some((message, stream_id))) => {
                    let update = self.handle_stream_message(message, stream_id).await?;
                    return Ok(Some(ControllerEvent::Stream(update)));
                }
                Incoming::Remote(Some(event)) => {
                    return Ok(Some(ControllerEvent::Remote(
                        self.handle_remote_event(&event),
                    )));
                }
                Incoming::Title(generated) => {
                    let Some(pending) = self.title_task.take() else {
                        continue;
                    };
                    if let Some(title) = self
                        .apply_generated_title(pending.replaces, generated)
                        .await?
                    {
                        return Ok(Some(ControllerEvent::TitleGenerated(title)));
                    }
                }
                Incoming::Stream(None) | Incoming::Remote(None) => return Ok(None),
            }
        }
    }

    /// Process events until the current reply completes or fails, passing
    /// each delta to `on_delta`. Returns [`StreamUpdate::Stale`] when no
    /// reply is in progress.
    pub async fn drive_stream(
        &mut self,
        mut on_delta: impl FnMut(&str),
    ) -> Result<StreamUpdate, ControllerError> {
        while self.transcript.is_streaming() {
            match self.next_event().await? {
                Some(ControllerEvent::Stream(StreamUpdate::Delta(text))) => on_delta(&text),
                Some(ControllerEvent::Stream(done @ StreamUpdate::Completed(_)))
                | Some(ControllerEvent::Stream(done @ StreamUpdate::Failed { .. })) => {
                    return Ok(done)
                }
                Some(_) => {}
                None => break,
            }
        }
        Ok(StreamUpdate::Stale)
    }

    /// Replace a user message, drop everything after it and generate a new
    /// reply.
    pub async fn edit(
        &mut self,
        id: &MessageId,
        new_content: &str,
    ) -> Result<StreamHandle, ControllerError> {
        self.require_actor()?;
        self.transcript.check_edit(id)?;
        self.stop();
        let truncation = self.transcript.edit_message(id, new_content)?;
        self.session
            .store
            .update_message_content(id, new_content)
            .await?;
        self.persist_truncation(&truncation.removed).await?;
        if let Some(edited) = &truncation.edited {
            self.channel
                .publish(SyncEvent::new_message(edited, now_millis()));
        }
        self.start_stream()
    }

    /// Drop the reply `id` belongs to (and everything after it) and
    /// generate a new one.
    pub async fn regenerate(&mut self, id: &MessageId) -> Result<StreamHandle, ControllerError> {
        self.require_actor()?;
        self.transcript.check_regenerate(id)?;
        self.stop();
        let truncation = self.transcript.regenerate(id)?;
        self.persist_truncation(&truncation.removed).await?;
        self.start_stream()
    }

    async fn persist_truncation(&self, removed: &[MessageId]) -> Result<(), ControllerError> {
        if removed.is_empty() {
            return Ok(());
        }
        self.session
            .store
            .remove_messages(&self.conversation.id, removed)
            .await?;
        debug!(removed = removed.len(), "truncated messages removed");
        Ok(())
    }

    /// Derive a branch ending at `cut` from the stored transcript. The
    /// branch belongs to the current actor, so an identity is required.
    pub async fn branch_from(&self, cut: &MessageId) -> Result<Conversation, ControllerError> {
        let actor = self.require_actor()?;
        let branch = derive_branch(
            &*self.session.store,
            &actor,
            &self.conversation.id,
            cut,
        )
        .await?;
        Ok(branch)
    }

    pub async fn set_title(&mut self, title: &str) -> Result<(), ControllerError> {
        if self.persisted {
            self.session
                .store
                .update_title(&self.conversation.id, title)
                .await?;
        }
        self.conversation.title = title.to_string();
        let event = self.transcript.set_title(title);
        self.channel.publish(event);
        Ok(())
    }

    pub async fn set_pinned(&mut self, pinned: bool) -> Result<(), ControllerError> {
        let actor = self.require_actor()?;
        self.session
            .store
            .set_pinned(&self.conversation.id, &actor, pinned)
            .await?;
        self.conversation.pinned = pinned;
        Ok(())
    }

    pub async fn set_visibility(&mut self, visibility: Visibility) -> Result<(), ControllerError> {
        let actor = self.require_actor()?;
        self.session
            .store
            .set_visibility(&self.conversation.id, &actor, visibility)
            .await?;
        self.conversation.visibility = visibility;
        Ok(())
    }

    /// Delete the conversation and its messages. Consumes the controller.
    pub async fn delete(mut self) -> Result<(), ControllerError> {
        let actor = self.require_actor()?;
        self.stop();
        if let Some(pending) = self.title_task.take() {
            pending.task.abort();
        }
        self.session
            .store
            .delete_conversation(&self.conversation.id, &actor)
            .await?;
        info!(conversation = %self.conversation.id, "conversation deleted");
        Ok(())
    }
}

impl Drop for ConversationController {
    fn drop(&mut self) {
        if let Some(task) = self.stream_task.take() {
            task.abort();
        }
        if let Some(pending) = self.title_task.take() {
            pending.task.abort();
        }
    }
}
