use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub type Id = i64;

/// A person observed anywhere the bot listens. Created on first observed
/// interaction; identity fields are immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct User {
    pub id: Id,
    /// Stable external (transport) identifier.
    pub tg_id: i64,
    /// Human-readable mention label, rendered verbatim in leaderboards.
    pub mention: String,
    pub created_at: DateTime<Utc>,
}

/// A group the bot is a member of. Created on first observed interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Chat {
    pub id: Id,
    /// Stable external (transport) identifier.
    pub chat_id: i64,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

/// One karma row per (user, chat) pair, created lazily at zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct UserKarma {
    pub id: Id,
    pub user_id: Id,
    pub chat_id: Id,
    pub karma: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum ReportStatus {
    Pending,
    Approved,
    Declined,
    Cancelled,
}

/// Verdicts a moderator may hand down. `Pending` and `Cancelled` are
/// deliberately unrepresentable here; cancellation goes through its own
/// operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Approved,
    Declined,
}

impl From<Resolution> for ReportStatus {
    fn from(r: Resolution) -> Self {
        match r {
            Resolution::Approved => ReportStatus::Approved,
            Resolution::Declined => ReportStatus::Declined,
        }
    }
}

/// A user-submitted report against a message. Reports sharing
/// (chat, reported_message_id) are "linked": they describe the same flagged
/// content and are resolved as one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Report {
    pub id: Id,
    pub reporter_id: Id,
    pub reported_user_id: Id,
    pub chat_id: Id,
    pub reported_message_id: i64,
    pub command_message_id: i64,
    /// Transport id of the bot's reply to this report, recorded for later
    /// dialog cleanup.
    pub bot_reply_message_id: Option<i64>,
    pub status: ReportStatus,
    pub resolved_by: Option<Id>,
    pub resolution_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewReport {
    pub reporter_id: Id,
    pub reported_user_id: Id,
    pub chat_id: Id,
    pub reported_message_id: i64,
    pub command_message_id: i64,
}

/// (tg_id, mention) pair carried by transport payloads; the referenced user
/// is upserted on first sight.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserRef {
    pub tg_id: i64,
    pub mention: String,
}

/// One ranked row of a chat's leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct KarmaEntry {
    pub user: User,
    pub karma: f64,
}

/// The rows immediately above, at, and below a user's rank.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbours {
    pub prev: Option<KarmaEntry>,
    pub me: KarmaEntry,
    pub next: Option<KarmaEntry>,
}

/// Outcome of the karma-mutation primitive.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ResultChangeKarma {
    /// Score after the operation.
    pub karma: f64,
    /// Delta actually applied (zero when throttled).
    pub delta: f64,
    /// True when the abuse restriction suppressed the change.
    pub throttled: bool,
}

/// Administrative import line: absolute karma for one user in one chat.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ImportEntry {
    /// tg_id of an already-known user.
    pub user: i64,
    pub karma: f64,
}

/// A user's standing in one chat.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ChatStanding {
    pub chat: Chat,
    pub karma: f64,
    /// 1-based position in the chat's descending ranking.
    pub position: i64,
}
