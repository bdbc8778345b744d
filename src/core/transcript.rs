//! Transcript reconciler for a single conversation.
//!
//! Owns the ordered message list and is the only place where local stream
//! deltas and remote sync events are merged. Messages are stored as
//! `Arc<Message>` and replaced, never mutated, so a changed message is
//! always a different allocation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::api::{build_api_messages, ApiMessage};
use crate::core::conversation::DEFAULT_TITLE;
use crate::core::ids::{ConversationId, MessageId};
use crate::core::message::{Attachment, Message, MessageStatus};
use crate::core::sync_bus::SyncEvent;
use crate::core::throttle::BroadcastThrottle;
use crate::utils::time::{monotonic_after, now_millis};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptError {
    /// An assistant reply is still streaming.
    StreamInProgress,
    UnknownMessage(MessageId),
    /// Only user messages can be edited.
    NotEditable(MessageId),
    /// No user message precedes the target.
    NothingToRegenerate(MessageId),
}

impl fmt::Display for TranscriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptError::StreamInProgress => write!(f, "A reply is still streaming"),
            TranscriptError::UnknownMessage(id) => write!(f, "Unknown message: {id}"),
            TranscriptError::NotEditable(id) => write!(f, "Message {id} is not a user message"),
            TranscriptError::NothingToRegenerate(id) => {
                write!(f, "No user message precedes {id}")
            }
        }
    }
}

impl std::error::Error for TranscriptError {}

/// Returned by [`Transcript::begin_assistant`]; identifies the stream that
/// may feed the new assistant message.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    pub stream_id: u64,
    pub message_id: MessageId,
    pub cancel_token: CancellationToken,
}

struct StreamSession {
    stream_id: u64,
    message_id: MessageId,
    accumulated: String,
    cancel_token: CancellationToken,
    announced: bool,
}

/// What a remote event did to the local transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOutcome {
    Appended,
    Replaced,
    /// The local copy was final and the incoming one was not.
    KeptLocal,
    TitleChanged,
    /// Wrong conversation, or the message is being streamed here.
    Ignored,
}

/// Result of truncating the transcript for an edit or regenerate.
#[derive(Debug, Clone)]
pub struct Truncation {
    /// The edited message, for edits.
    pub edited: Option<Arc<Message>>,
    pub removed: Vec<MessageId>,
}

pub struct Transcript {
    conversation_id: ConversationId,
    title: String,
    messages: Vec<Arc<Message>>,
    session: Option<StreamSession>,
    throttle: BroadcastThrottle,
    next_stream_id: u64,
}

impl Transcript {
    pub fn new(conversation_id: ConversationId, throttle_interval: Duration) -> Self {
        Self {
            conversation_id,
            title: DEFAULT_TITLE.to_string(),
            messages: Vec::new(),
            session: None,
            throttle: BroadcastThrottle::new(throttle_interval),
            next_stream_id: 0,
        }
    }

    /// Rebuild from stored messages, sorted by `created_at`.
    pub fn from_messages(
        conversation_id: ConversationId,
        title: impl Into<String>,
        messages: impl IntoIterator<Item = Message>,
        throttle_interval: Duration,
    ) -> Self {
        let mut transcript = Self::new(conversation_id, throttle_interval);
        transcript.title = title.into();
        transcript.messages = messages
            .into_iter()
            .filter(|m| m.conversation_id == transcript.conversation_id)
            .map(Arc::new)
            .collect();
        transcript.messages.sort_by_key(|m| m.created_at);
        transcript
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn messages(&self) -> &[Arc<Message>] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn message(&self, id: &MessageId) -> Option<&Arc<Message>> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub fn is_streaming(&self) -> bool {
        self.session.is_some()
    }

    pub fn active_stream_id(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.stream_id)
    }

    pub fn is_current_stream(&self, stream_id: u64) -> bool {
        self.active_stream_id() == Some(stream_id)
    }

    /// Request history for the upstream call. The open assistant message is
    /// left out.
    pub fn api_messages(&self) -> Vec<ApiMessage> {
        let streaming = self.session.as_ref().map(|s| &s.message_id);
        build_api_messages(
            self.messages
                .iter()
                .filter(|m| Some(&m.id) != streaming)
                .map(|m| &**m),
        )
    }

    fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.id == id)
    }

    fn next_created_at(&self) -> i64 {
        let last = self.messages.iter().map(|m| m.created_at).max();
        monotonic_after(last, now_millis())
    }

    fn replace_at(&mut self, index: usize, message: Message) -> Arc<Message> {
        let message = Arc::new(message);
        self.messages[index] = Arc::clone(&message);
        message
    }

    pub fn append_user(
        &mut self,
        content: impl Into<String>,
        attachments: Vec<Attachment>,
    ) -> Result<(Arc<Message>, SyncEvent), TranscriptError> {
        if self.session.is_some() {
            return Err(TranscriptError::StreamInProgress);
        }
        let message = Arc::new(Message::user(
            self.conversation_id.clone(),
            content,
            attachments,
            self.next_created_at(),
        ));
        self.messages.push(Arc::clone(&message));
        let event = SyncEvent::new_message(&message, now_millis());
        Ok((message, event))
    }

    /// Take back the user message `append_user` just added, when storing it
    /// failed. Only the last message can be retracted.
    pub fn retract_user(&mut self, id: &MessageId) -> Option<Arc<Message>> {
        if self.session.is_some() {
            return None;
        }
        match self.messages.last() {
            Some(last) if &last.id == id && last.is_user() => self.messages.pop(),
            _ => None,
        }
    }

    /// Open an empty assistant message and a stream session for it.
    pub fn begin_assistant(&mut self) -> Result<StreamHandle, TranscriptError> {
        if self.session.is_some() {
            return Err(TranscriptError::StreamInProgress);
        }
        let placeholder =
            Message::assistant_placeholder(self.conversation_id.clone(), self.next_created_at());
        self.next_stream_id += 1;
        let handle = StreamHandle {
            stream_id: self.next_stream_id,
            message_id: placeholder.id.clone(),
            cancel_token: CancellationToken::new(),
        };
        self.messages.push(Arc::new(placeholder));
        self.throttle.reset();
        self.session = Some(StreamSession {
            stream_id: handle.stream_id,
            message_id: handle.message_id.clone(),
            accumulated: String::new(),
            cancel_token: handle.cancel_token.clone(),
            announced: false,
        });
        Ok(handle)
    }

    /// Concatenate a delta onto the open assistant message.
    ///
    /// Returns the outbound event when one is due: the first delta always
    /// goes out, later ones at most once per throttle window. Deltas for a
    /// stale or cancelled stream are dropped.
    pub fn apply_delta(&mut self, stream_id: u64, delta: &str) -> Option<SyncEvent> {
        let session = match self.session.as_mut() {
            Some(session) if session.stream_id == stream_id => session,
            _ => {
                debug!(stream_id, "dropping delta for inactive stream");
                return None;
            }
        };
        if session.cancel_token.is_cancelled() {
            debug!(stream_id, "dropping delta after cancellation");
            return None;
        }

        session.accumulated.push_str(delta);
        let content = session.accumulated.clone();
        let message_id = session.message_id.clone();
        let first = !session.announced;
        session.announced = true;

        let index = self.position(&message_id)?;
        let updated = self.messages[index].with_content(content, MessageStatus::Streaming);
        let updated = self.replace_at(index, updated);

        let due = self.throttle.try_acquire(Instant::now());
        if first || due {
            Some(SyncEvent::message_delta(&updated, now_millis()))
        } else {
            trace!(stream_id, "delta broadcast throttled");
            None
        }
    }

    /// Mark the open assistant message complete. The returned event is
    /// final and never throttled.
    pub fn finalize(&mut self, stream_id: u64) -> Option<(Arc<Message>, SyncEvent)> {
        if !self.is_current_stream(stream_id) {
            debug!(stream_id, "ignoring finalize for inactive stream");
            return None;
        }
        let session = self.session.take()?;
        if session.cancel_token.is_cancelled() {
            return None;
        }
        self.throttle.reset();

        let index = self.position(&session.message_id)?;
        let finished = self.messages[index].with_content(session.accumulated, MessageStatus::Complete);
        let finished = self.replace_at(index, finished);
        let event = SyncEvent::message_delta(&finished, now_millis());
        Some((finished, event))
    }

    /// Transport failure: keep the partial content, mark it as an error and
    /// close the session. No event is produced.
    pub fn fail(&mut self, stream_id: u64) -> Option<Arc<Message>> {
        if !self.is_current_stream(stream_id) {
            return None;
        }
        let session = self.session.take()?;
        self.close_with_error(session)
    }

    /// Cancel the open stream. Same end state as [`fail`](Self::fail).
    pub fn abort(&mut self) -> Option<Arc<Message>> {
        let session = self.session.take()?;
        session.cancel_token.cancel();
        self.close_with_error(session)
    }

    fn close_with_error(&mut self, session: StreamSession) -> Option<Arc<Message>> {
        self.throttle.reset();
        let index = self.position(&session.message_id)?;
        let failed = self.messages[index].with_content(session.accumulated, MessageStatus::Error);
        Some(self.replace_at(index, failed))
    }

    /// Merge an event published by another tab.
    pub fn apply_remote_event(&mut self, event: &SyncEvent) -> RemoteOutcome {
        if event.conversation_id != self.conversation_id {
            return RemoteOutcome::Ignored;
        }
        if let Some(title) = event.title() {
            self.title = title.to_string();
            return RemoteOutcome::TitleChanged;
        }
        let Some(incoming) = event.message() else {
            return RemoteOutcome::Ignored;
        };
        if self
            .session
            .as_ref()
            .is_some_and(|s| s.message_id == incoming.id)
        {
            return RemoteOutcome::Ignored;
        }

        match self.position(&incoming.id) {
            None => {
                debug!(message_id = %incoming.id, "appending remote message");
                self.messages.push(Arc::new(incoming.clone()));
                RemoteOutcome::Appended
            }
            Some(index) => {
                if event.is_final || !self.messages[index].is_final() {
                    self.replace_at(index, incoming.clone());
                    RemoteOutcome::Replaced
                } else {
                    debug!(message_id = %incoming.id, "keeping final local copy");
                    RemoteOutcome::KeptLocal
                }
            }
        }
    }

    fn edit_target(&self, id: &MessageId) -> Result<usize, TranscriptError> {
        let index = self
            .position(id)
            .ok_or_else(|| TranscriptError::UnknownMessage(id.clone()))?;
        if !self.messages[index].is_user() {
            return Err(TranscriptError::NotEditable(id.clone()));
        }
        Ok(index)
    }

    fn regenerate_prompt(&self, id: &MessageId) -> Result<usize, TranscriptError> {
        let index = self
            .position(id)
            .ok_or_else(|| TranscriptError::UnknownMessage(id.clone()))?;
        self.messages[..=index]
            .iter()
            .rposition(|m| m.is_user())
            .ok_or_else(|| TranscriptError::NothingToRegenerate(id.clone()))
    }

    /// Check that `id` names an editable message without touching the
    /// stream in progress.
    pub fn check_edit(&self, id: &MessageId) -> Result<(), TranscriptError> {
        self.edit_target(id).map(|_| ())
    }

    /// Check that a reply can be regenerated from `id` without touching
    /// the stream in progress.
    pub fn check_regenerate(&self, id: &MessageId) -> Result<(), TranscriptError> {
        self.regenerate_prompt(id).map(|_| ())
    }

    /// Replace a user message's content (keeping its `created_at`) and drop
    /// everything after it.
    pub fn edit_message(
        &mut self,
        id: &MessageId,
        new_content: impl Into<String>,
    ) -> Result<Truncation, TranscriptError> {
        if self.session.is_some() {
            return Err(TranscriptError::StreamInProgress);
        }
        let index = self.edit_target(id)?;
        let edited = self.messages[index].with_content(new_content, MessageStatus::Complete);
        let edited = self.replace_at(index, edited);
        let removed = self.truncate_after(index);
        Ok(Truncation {
            edited: Some(edited),
            removed,
        })
    }

    /// Drop everything after the user message that prompted `id` (or after
    /// `id` itself when it is a user message).
    pub fn regenerate(&mut self, id: &MessageId) -> Result<Truncation, TranscriptError> {
        if self.session.is_some() {
            return Err(TranscriptError::StreamInProgress);
        }
        let prompt = self.regenerate_prompt(id)?;
        let removed = self.truncate_after(prompt);
        Ok(Truncation {
            edited: None,
            removed,
        })
    }

    fn truncate_after(&mut self, index: usize) -> Vec<MessageId> {
        self.messages
            .drain(index + 1..)
            .map(|m| m.id.clone())
            .collect()
    }

    pub fn set_title(&mut self, title: impl Into<String>) -> SyncEvent {
        self.title = title.into();
        SyncEvent::title_change(self.conversation_id.clone(), self.title.clone(), now_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::AuthorRole;
    use crate::core::sync_bus::SyncEventKind;
    use crate::utils::test_utils::{create_test_messages, test_message};

    const WINDOW: Duration = Duration::from_millis(200);

    fn transcript() -> Transcript {
        Transcript::new(ConversationId::from("c1"), WINDOW)
    }

    fn contents(t: &Transcript) -> Vec<&str> {
        t.messages().iter().map(|m| m.content.as_str()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn first_and_final_events_bypass_throttle() {
        let mut t = transcript();
        t.append_user("hi", Vec::new()).unwrap();
        let handle = t.begin_assistant().unwrap();

        let first = t.apply_delta(handle.stream_id, "Hel").expect("first delta goes out");
        assert_eq!(first.message().unwrap().content, "Hel");
        assert!(!first.is_final);

        assert!(t.apply_delta(handle.stream_id, "lo").is_none());
        tokio::time::advance(Duration::from_millis(250)).await;
        let later = t.apply_delta(handle.stream_id, ",").expect("window elapsed");
        assert_eq!(later.message().unwrap().content, "Hello,");
        assert!(t.apply_delta(handle.stream_id, " you").is_none());

        let (message, event) = t.finalize(handle.stream_id).expect("finalized");
        assert_eq!(message.content, "Hello, you");
        assert!(event.is_final);
        assert_eq!(event.kind, SyncEventKind::MessageDelta);
        assert!(!t.is_streaming());
    }

    #[test]
    fn frames_from_decoder_reconcile_into_one_message() {
        let mut t = transcript();
        let handle = t.begin_assistant().unwrap();
        for delta in ["Hel", "lo"] {
            t.apply_delta(handle.stream_id, delta);
        }
        t.finalize(handle.stream_id).unwrap();
        let message = t.message(&handle.message_id).unwrap();
        assert_eq!(message.content, "Hello");
        assert_eq!(message.status, MessageStatus::Complete);
    }

    #[test]
    fn each_delta_replaces_the_message_allocation() {
        let mut t = transcript();
        let handle = t.begin_assistant().unwrap();
        let before = Arc::clone(t.message(&handle.message_id).unwrap());
        t.apply_delta(handle.stream_id, "a");
        let after = Arc::clone(t.message(&handle.message_id).unwrap());
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(before.content, "");
        assert_eq!(after.content, "a");
    }

    #[test]
    fn abort_keeps_partial_content_and_publishes_nothing_final() {
        let mut t = transcript();
        let handle = t.begin_assistant().unwrap();
        let mut events = Vec::new();
        events.extend(t.apply_delta(handle.stream_id, "Hel"));
        events.extend(t.apply_delta(handle.stream_id, "lo"));

        let aborted = t.abort().expect("open stream");
        assert!(handle.cancel_token.is_cancelled());
        assert_eq!(aborted.content, "Hello");
        assert_eq!(aborted.status, MessageStatus::Error);

        // In-flight deltas and a late finalize are both discarded.
        events.extend(t.apply_delta(handle.stream_id, " world"));
        assert!(t.finalize(handle.stream_id).is_none());

        assert_eq!(t.message(&handle.message_id).unwrap().content, "Hello");
        assert!(events.iter().all(|e| !e.is_final));
    }

    #[test]
    fn cancelled_token_stops_deltas_before_abort_runs() {
        let mut t = transcript();
        let handle = t.begin_assistant().unwrap();
        t.apply_delta(handle.stream_id, "a");
        handle.cancel_token.cancel();
        assert!(t.apply_delta(handle.stream_id, "b").is_none());
        assert_eq!(t.message(&handle.message_id).unwrap().content, "a");
    }

    #[test]
    fn failure_marks_error_without_event() {
        let mut t = transcript();
        let handle = t.begin_assistant().unwrap();
        t.apply_delta(handle.stream_id, "partial");
        let failed = t.fail(handle.stream_id).unwrap();
        assert_eq!(failed.status, MessageStatus::Error);
        assert_eq!(failed.content, "partial");
        assert!(t.fail(handle.stream_id).is_none());
    }

    #[test]
    fn stale_stream_ids_are_ignored() {
        let mut t = transcript();
        let first = t.begin_assistant().unwrap();
        t.abort();
        let second = t.begin_assistant().unwrap();
        assert_ne!(first.stream_id, second.stream_id);
        assert!(t.apply_delta(first.stream_id, "old").is_none());
        t.apply_delta(second.stream_id, "new");
        assert_eq!(t.message(&second.message_id).unwrap().content, "new");
    }

    #[test]
    fn sends_are_refused_while_streaming() {
        let mut t = transcript();
        t.begin_assistant().unwrap();
        assert_eq!(
            t.append_user("again", Vec::new()).unwrap_err(),
            TranscriptError::StreamInProgress
        );
        assert!(t.begin_assistant().is_err());
    }

    #[test]
    fn retract_takes_back_only_the_last_user_message() {
        let mut t = transcript();
        let (first, _) = t.append_user("one", Vec::new()).unwrap();
        let (second, _) = t.append_user("two", Vec::new()).unwrap();

        assert!(t.retract_user(&first.id).is_none());
        assert_eq!(t.retract_user(&second.id).unwrap().id, second.id);
        assert_eq!(contents(&t), vec!["one"]);

        t.begin_assistant().unwrap();
        assert!(t.retract_user(&first.id).is_none());
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn created_at_is_strictly_increasing() {
        let mut t = transcript();
        for i in 0..5 {
            t.append_user(format!("m{i}"), Vec::new()).unwrap();
        }
        let stamps: Vec<i64> = t.messages().iter().map(|m| m.created_at).collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn remote_unknown_message_is_appended() {
        let mut t = transcript();
        let remote = test_message("c1", "r1", "user", "from B", 5);
        let outcome = t.apply_remote_event(&SyncEvent::new_message(&remote, 5));
        assert_eq!(outcome, RemoteOutcome::Appended);
        assert_eq!(contents(&t), vec!["from B"]);
    }

    #[test]
    fn remote_events_for_other_conversations_are_ignored() {
        let mut t = transcript();
        let remote = test_message("other", "r1", "user", "x", 5);
        assert_eq!(
            t.apply_remote_event(&SyncEvent::new_message(&remote, 5)),
            RemoteOutcome::Ignored
        );
        assert!(t.is_empty());
    }

    fn streamed(id: &str, content: &str, status: MessageStatus) -> SyncEvent {
        let mut message = test_message("c1", id, "assistant", content, 10);
        message.status = status;
        SyncEvent::message_delta(&message, 10)
    }

    #[test]
    fn final_wins_for_every_delivery_order() {
        let events = [
            streamed("m", "He", MessageStatus::Streaming),
            streamed("m", "Hello wor", MessageStatus::Streaming),
            streamed("m", "Hello world", MessageStatus::Complete),
        ];
        let orders = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for order in orders {
            let mut t = transcript();
            for i in order {
                t.apply_remote_event(&events[i]);
            }
            let message = t.message(&MessageId::from("m")).unwrap();
            assert_eq!(message.content, "Hello world", "order {order:?}");
            assert!(message.is_final());
            assert_eq!(t.len(), 1);
        }
    }

    #[test]
    fn stale_delta_after_local_finalize_is_kept_out() {
        // Tab A finalizes; a throttled-out delta from A's earlier window
        // reaches B after the final event.
        let mut a = transcript();
        let mut b = transcript();
        let handle = a.begin_assistant().unwrap();
        let early = a.apply_delta(handle.stream_id, "Hel").unwrap();
        a.apply_delta(handle.stream_id, "lo");
        let (_, final_event) = a.finalize(handle.stream_id).unwrap();

        assert_eq!(b.apply_remote_event(&final_event), RemoteOutcome::Appended);
        assert_eq!(b.apply_remote_event(&early), RemoteOutcome::KeptLocal);
        let merged = b.message(&handle.message_id).unwrap();
        assert_eq!(merged, a.message(&handle.message_id).unwrap());
    }

    #[test]
    fn remote_final_replaces_final_copy() {
        let mut t = Transcript::from_messages(
            ConversationId::from("c1"),
            "t",
            create_test_messages("c1"),
            WINDOW,
        );
        let mut edited = (*t.messages()[0]).clone();
        edited.content = "Hello again".into();
        assert_eq!(
            t.apply_remote_event(&SyncEvent::new_message(&edited, 9)),
            RemoteOutcome::Replaced
        );
        assert_eq!(t.messages()[0].content, "Hello again");
    }

    #[test]
    fn remote_copy_of_local_stream_is_ignored() {
        let mut t = transcript();
        let handle = t.begin_assistant().unwrap();
        t.apply_delta(handle.stream_id, "mine");
        let mut echo = (**t.message(&handle.message_id).unwrap()).clone();
        echo.content = "other".into();
        echo.status = MessageStatus::Complete;
        assert_eq!(
            t.apply_remote_event(&SyncEvent::message_delta(&echo, 1)),
            RemoteOutcome::Ignored
        );
        assert_eq!(t.message(&handle.message_id).unwrap().content, "mine");
    }

    #[test]
    fn remote_title_change_applies() {
        let mut t = transcript();
        let event = SyncEvent::title_change(ConversationId::from("c1"), "Trip plans", 3);
        assert_eq!(t.apply_remote_event(&event), RemoteOutcome::TitleChanged);
        assert_eq!(t.title(), "Trip plans");
    }

    #[test]
    fn edit_truncates_everything_after_the_message() {
        let mut t = Transcript::from_messages(
            ConversationId::from("c1"),
            "t",
            create_test_messages("c1"),
            WINDOW,
        );
        let target = t.messages()[2].clone();
        let truncation = t
            .edit_message(&target.id, "How are things?")
            .expect("editable");
        let edited = truncation.edited.unwrap();
        assert_eq!(edited.created_at, target.created_at);
        assert_eq!(truncation.removed, vec![MessageId::from("m4")]);
        assert_eq!(contents(&t), vec!["Hello", "Hi there!", "How are things?"]);

        let handle = t.begin_assistant().unwrap();
        assert_eq!(t.len(), 4);
        assert_eq!(t.messages()[3].id, handle.message_id);
        assert!(t.messages()[3].created_at > edited.created_at);
    }

    #[test]
    fn only_user_messages_are_editable() {
        let mut t = Transcript::from_messages(
            ConversationId::from("c1"),
            "t",
            create_test_messages("c1"),
            WINDOW,
        );
        assert_eq!(
            t.edit_message(&MessageId::from("m2"), "x").unwrap_err(),
            TranscriptError::NotEditable(MessageId::from("m2"))
        );
        assert!(matches!(
            t.edit_message(&MessageId::from("zz"), "x"),
            Err(TranscriptError::UnknownMessage(_))
        ));
    }

    #[test]
    fn checks_leave_the_open_stream_alone() {
        let mut t = Transcript::from_messages(
            ConversationId::from("c1"),
            "t",
            create_test_messages("c1"),
            WINDOW,
        );
        let handle = t.begin_assistant().unwrap();

        assert!(t.check_edit(&MessageId::from("m3")).is_ok());
        assert_eq!(
            t.check_edit(&handle.message_id).unwrap_err(),
            TranscriptError::NotEditable(handle.message_id.clone())
        );
        assert!(t.check_regenerate(&handle.message_id).is_ok());
        assert!(matches!(
            t.check_regenerate(&MessageId::from("zz")),
            Err(TranscriptError::UnknownMessage(_))
        ));
        assert!(t.is_streaming());
        assert!(!handle.cancel_token.is_cancelled());
    }

    #[test]
    fn regenerate_truncates_from_preceding_user_message() {
        let mut t = Transcript::from_messages(
            ConversationId::from("c1"),
            "t",
            create_test_messages("c1"),
            WINDOW,
        );
        let truncation = t.regenerate(&MessageId::from("m2")).unwrap();
        assert_eq!(
            truncation.removed,
            vec![
                MessageId::from("m2"),
                MessageId::from("m3"),
                MessageId::from("m4")
            ]
        );
        assert_eq!(t.messages().last().unwrap().role, AuthorRole::User);
        assert_eq!(t.api_messages().len(), 1);
    }

    #[test]
    fn regenerate_without_prompt_fails() {
        let mut t = Transcript::from_messages(
            ConversationId::from("c1"),
            "t",
            vec![test_message("c1", "s", "system", "be brief", 1)],
            WINDOW,
        );
        assert_eq!(
            t.regenerate(&MessageId::from("s")).unwrap_err(),
            TranscriptError::NothingToRegenerate(MessageId::from("s"))
        );
    }

    #[test]
    fn api_messages_exclude_open_stream() {
        let mut t = transcript();
        t.append_user("hi", Vec::new()).unwrap();
        let handle = t.begin_assistant().unwrap();
        t.apply_delta(handle.stream_id, "partial");
        assert_eq!(t.api_messages().len(), 1);
    }
}
