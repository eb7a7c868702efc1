//! Row types and small queries shared by the chat handlers.

use rusqlite::{Connection, OptionalExtension};

use crate::ws::protocol::{Partner, Sender};

/// Shown when a profile has no picture or no longer exists.
pub const FALLBACK_AVATAR: &str =
    "https://upload.wikimedia.org/wikipedia/commons/8/89/Portrait_Placeholder.png";

/// Public profile fields the chat surfaces need.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub avatar: String,
    pub status: String,
}

impl UserProfile {
    /// Placeholder for a participant whose profile could not be loaded.
    pub fn unknown(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: "Unknown".to_string(),
            avatar: FALLBACK_AVATAR.to_string(),
            status: "offline".to_string(),
        }
    }

    fn with_fallbacks(mut self) -> Self {
        if self.name.is_empty() {
            self.name = "Unknown".to_string();
        }
        if self.avatar.is_empty() {
            self.avatar = FALLBACK_AVATAR.to_string();
        }
        if self.status.is_empty() {
            self.status = "offline".to_string();
        }
        self
    }

    pub fn as_partner(&self) -> Partner {
        Partner {
            id: self.id.clone(),
            name: self.name.clone(),
            avatar: self.avatar.clone(),
            status: self.status.clone(),
        }
    }

    pub fn as_sender(&self) -> Sender {
        Sender {
            id: self.id.clone(),
            name: self.name.clone(),
            avatar: self.avatar.clone(),
        }
    }
}

/// Message row in the messages table
#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub content: String,
    pub kind: String,
    pub is_read: bool,
    pub created_at: i64,
}

/// Insert or refresh a profile. Profiles are owned by the account service;
/// this keeps the local copy the chat views join against.
pub fn upsert_user(
    conn: &Connection,
    id: &str,
    name: &str,
    avatar: &str,
    status: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO users (id, name, avatar, status, created_at)
         VALUES (?1, ?2, ?3, ?4, strftime('%s','now'))
         ON CONFLICT(id) DO UPDATE SET name = ?2, avatar = ?3, status = ?4",
        rusqlite::params![id, name, avatar, status],
    )?;
    Ok(())
}

/// Profile for `user_id`, with display fallbacks applied. Missing users get
/// the "Unknown" placeholder rather than an error.
pub fn load_profile(conn: &Connection, user_id: &str) -> rusqlite::Result<UserProfile> {
    let profile = conn
        .query_row(
            "SELECT id, name, avatar, status FROM users WHERE id = ?1",
            rusqlite::params![user_id],
            |row| {
                Ok(UserProfile {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    avatar: row.get(2)?,
                    status: row.get(3)?,
                })
            },
        )
        .optional()?;

    Ok(profile
        .map(UserProfile::with_fallbacks)
        .unwrap_or_else(|| UserProfile::unknown(user_id)))
}

/// Chat-membership check.
pub fn is_participant(conn: &Connection, chat_id: &str, user_id: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM chat_participants WHERE chat_id = ?1 AND user_id = ?2)",
        rusqlite::params![chat_id, user_id],
        |row| row.get(0),
    )
}

/// First participant of `chat_id` other than `user_id`.
pub fn partner_of(
    conn: &Connection,
    chat_id: &str,
    user_id: &str,
) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT user_id FROM chat_participants WHERE chat_id = ?1 AND user_id != ?2
         ORDER BY user_id LIMIT 1",
        rusqlite::params![chat_id, user_id],
        |row| row.get(0),
    )
    .optional()
}

pub fn load_message(conn: &Connection, message_id: &str) -> rusqlite::Result<Option<MessageRow>> {
    conn.query_row(
        "SELECT id, chat_id, sender_id, content, type, is_read, created_at
         FROM messages WHERE id = ?1",
        rusqlite::params![message_id],
        |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                chat_id: row.get(1)?,
                sender_id: row.get(2)?,
                content: row.get(3)?,
                kind: row.get(4)?,
                is_read: row.get(5)?,
                created_at: row.get(6)?,
            })
        },
    )
    .optional()
}
