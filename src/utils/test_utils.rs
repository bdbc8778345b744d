use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::core::conversation::Conversation;
use crate::core::ids::{ActorId, ConversationId, MessageId};
use crate::core::message::{AuthorRole, Message, MessageStatus};
use crate::core::models::{find_model, DEFAULT_MODEL};
use crate::core::session::SessionContext;
use crate::core::store::{DocumentStore, MemoryStore};
use crate::core::sync_bus::SyncBus;
use crate::utils::url::{completion_endpoint, COMPLETION_ROUTE};

pub fn test_message(
    conversation: &str,
    id: &str,
    role: &str,
    content: &str,
    created_at: i64,
) -> Message {
    Message {
        id: MessageId::from(id),
        conversation_id: ConversationId::from(conversation),
        role: AuthorRole::try_from(role).expect("valid role"),
        content: content.to_string(),
        attachments: Vec::new(),
        created_at,
        status: MessageStatus::Complete,
    }
}

pub fn test_conversation(id: &str, owner: &str, created_at: i64) -> Conversation {
    Conversation::new(ConversationId::from(id), ActorId::from(owner), created_at)
}

/// A finished four-turn exchange in conversation `conversation`, ids `m1..m4`.
pub fn create_test_messages(conversation: &str) -> Vec<Message> {
    vec![
        test_message(conversation, "m1", "user", "Hello", 1),
        test_message(conversation, "m2", "assistant", "Hi there!", 2),
        test_message(conversation, "m3", "user", "How are you?", 3),
        test_message(
            conversation,
            "m4",
            "assistant",
            "I'm doing well, thank you for asking!",
            4,
        ),
    ]
}

/// Memory store pre-seeded with `create_test_messages` under conversation
/// `conversation` owned by `owner`.
pub async fn seeded_store(conversation: &str, owner: &str) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store
        .create_conversation(test_conversation(conversation, owner, 0))
        .await
        .expect("create conversation");
    for message in create_test_messages(conversation) {
        store.append_message(message).await.expect("append message");
    }
    store
}

/// Session wired to `endpoint`, sharing `store` and `bus` with other test
/// sessions so several controllers can act as tabs of one browser.
pub fn test_session(
    endpoint: &str,
    store: Arc<dyn DocumentStore>,
    bus: SyncBus,
    actor: Option<&str>,
) -> Arc<SessionContext> {
    Arc::new(SessionContext {
        client: reqwest::Client::new(),
        endpoint: endpoint.to_string(),
        completion_endpoint: completion_endpoint(endpoint),
        model: find_model(DEFAULT_MODEL).expect("default model"),
        api_key: Some("test-key".to_string()),
        actor: actor.map(ActorId::from),
        store,
        bus,
        sync_throttle: Duration::ZERO,
    })
}

/// Serve `body` as the response to every chat request. The completion
/// route answers 500. Returns the chat URL.
pub async fn spawn_stream_server(body: impl Into<String>) -> String {
    spawn_chat_server(body, None).await
}

/// Serve `chat_body` on the chat route and `completion` (JSON) on the
/// completion route, or a 500 there when `completion` is `None`.
pub async fn spawn_chat_server(chat_body: impl Into<String>, completion: Option<&str>) -> String {
    let chat_body: Arc<str> = Arc::from(chat_body.into());
    let completion: Option<Arc<str>> = completion.map(Arc::from);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let chat_body = Arc::clone(&chat_body);
            let completion = completion.clone();
            tokio::spawn(async move {
                let request = read_request(&mut socket).await;
                let wants_completion = request
                    .lines()
                    .next()
                    .is_some_and(|line| line.contains(COMPLETION_ROUTE));
                let (status, content_type, body) = match (wants_completion, completion) {
                    (false, _) => ("200 OK", "text/plain; charset=utf-8", chat_body),
                    (true, Some(json)) => ("200 OK", "application/json", json),
                    (true, None) => (
                        "500 Internal Server Error",
                        "application/json",
                        Arc::from(r#"{"error":"title model unavailable"}"#),
                    ),
                };
                let response = format!(
                    "HTTP/1.1 {status}\r\ncontent-type: {content_type}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{addr}/api/chat")
}

/// Accept requests and never answer them.
pub async fn spawn_silent_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((mut socket, _)) = listener.accept().await {
            read_request(&mut socket).await;
            held.push(socket);
        }
    });
    format!("http://{addr}/api/chat")
}

/// Read one request and return its head (request line and headers),
/// lowercased.
async fn read_request(socket: &mut TcpStream) -> String {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let read = match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return String::from_utf8_lossy(&buffer).to_ascii_lowercase(),
            Ok(read) => read,
        };
        buffer.extend_from_slice(&chunk[..read]);
        let Some(header_end) = buffer.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let headers = String::from_utf8_lossy(&buffer[..header_end]).to_ascii_lowercase();
        let content_length = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if buffer.len() >= header_end + 4 + content_length {
            return headers;
        }
    }
}
