use chrono::{DateTime, Duration, Local, TimeZone};
use serde::{Deserialize, Serialize};

use crate::core::ids::{ActorId, ConversationId, MessageId};

pub const DEFAULT_TITLE: &str = "New Chat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Public,
}

/// Where a branch was cut from. Both ids are present or neither is, so the
/// pair lives in one optional struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchOrigin {
    pub parent_conversation_id: ConversationId,
    pub branch_point_message_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub owner_id: ActorId,
    pub title: String,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub pinned: bool,
    #[serde(flatten)]
    pub branch: Option<BranchOrigin>,
    #[serde(default)]
    pub branch_depth: u32,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Conversation {
    /// A fresh root conversation owned by `owner_id`.
    pub fn new(id: ConversationId, owner_id: ActorId, now: i64) -> Self {
        Self {
            id,
            owner_id,
            title: DEFAULT_TITLE.to_string(),
            visibility: Visibility::Private,
            pinned: false,
            branch: None,
            branch_depth: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn parent_conversation_id(&self) -> Option<&ConversationId> {
        self.branch.as_ref().map(|b| &b.parent_conversation_id)
    }

    pub fn branch_point_message_id(&self) -> Option<&MessageId> {
        self.branch.as_ref().map(|b| &b.branch_point_message_id)
    }

    pub fn is_branch(&self) -> bool {
        self.branch.is_some()
    }

    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    /// Public conversations are readable by anyone; private ones only by
    /// their owner.
    pub fn is_visible_to(&self, actor: Option<&ActorId>) -> bool {
        self.is_public() || actor.is_some_and(|actor| actor == &self.owner_id)
    }

    pub fn is_owned_by(&self, actor: &ActorId) -> bool {
        &self.owner_id == actor
    }
}

/// Derive a short title (at most six words) from a user's first message.
pub fn fallback_title(first_message: &str) -> String {
    const MAX_WORDS: usize = 6;
    let words: Vec<&str> = first_message.split_whitespace().collect();
    if words.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    let mut title = words[..words.len().min(MAX_WORDS)].join(" ");
    if words.len() > MAX_WORDS {
        title.push_str("...");
    }
    title
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecencyGroups {
    pub today: Vec<Conversation>,
    pub yesterday: Vec<Conversation>,
    pub last_week: Vec<Conversation>,
    pub last_month: Vec<Conversation>,
    pub older: Vec<Conversation>,
}

impl RecencyGroups {
    pub fn sections(&self) -> [(&'static str, &[Conversation]); 5] {
        [
            ("Today", &self.today),
            ("Yesterday", &self.yesterday),
            ("Last 7 days", &self.last_week),
            ("Last 30 days", &self.last_month),
            ("Older", &self.older),
        ]
    }
}

/// Bucket conversations by creation time relative to the start of `now`'s
/// day. Input order is preserved inside each bucket.
pub fn group_by_recency<Tz: TimeZone>(
    conversations: impl IntoIterator<Item = Conversation>,
    now: &DateTime<Tz>,
) -> RecencyGroups {
    let start_of_today = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| midnight.and_local_timezone(now.timezone()).earliest())
        .map(|dt| dt.timestamp_millis())
        .unwrap_or_else(|| now.timestamp_millis());

    let day = Duration::days(1).num_milliseconds();
    let yesterday = start_of_today - day;
    let last_week = start_of_today - 7 * day;
    let last_month = start_of_today - 30 * day;

    let mut groups = RecencyGroups::default();
    for conversation in conversations {
        let created = conversation.created_at;
        let bucket = if created >= start_of_today {
            &mut groups.today
        } else if created >= yesterday {
            &mut groups.yesterday
        } else if created >= last_week {
            &mut groups.last_week
        } else if created >= last_month {
            &mut groups.last_month
        } else {
            &mut groups.older
        };
        bucket.push(conversation);
    }
    groups
}

/// Group using the local clock.
pub fn group_by_recency_now(conversations: impl IntoIterator<Item = Conversation>) -> RecencyGroups {
    group_by_recency(conversations, &Local::now())
}
