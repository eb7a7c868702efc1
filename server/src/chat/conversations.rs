//! REST endpoints for chat management.
//!
//! A chat is identified by its participant set. Creating a chat whose set
//! already exists returns the existing one instead of a duplicate.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::db::models::{self, UserProfile};
use crate::state::AppState;
use crate::ws::protocol::{self, ChatCreated, Partner};

#[derive(Debug, Deserialize)]
pub struct CreateChatRequest {
    pub participants: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateChatResponse {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat: Option<ChatCreated>,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: String,
    pub last_message: Option<String>,
    pub last_message_at: i64,
    pub partner: Partner,
}

/// Partner shown for a chat: the first other participant, or the
/// "Unknown" placeholder when there is none.
fn partner_for(conn: &Connection, chat_id: &str, user_id: &str) -> rusqlite::Result<Partner> {
    let profile = match models::partner_of(conn, chat_id, user_id)? {
        Some(partner_id) => models::load_profile(conn, &partner_id)?,
        None => UserProfile::unknown(""),
    };
    Ok(profile.as_partner())
}

fn participants_of(conn: &Connection, chat_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM chat_participants WHERE chat_id = ?1 ORDER BY user_id",
    )?;
    let rows = stmt.query_map(rusqlite::params![chat_id], |row| row.get(0))?;
    rows.collect()
}

/// Chat whose participant set is exactly `participants` (sorted).
fn find_chat_with(conn: &Connection, participants: &[String]) -> rusqlite::Result<Option<String>> {
    let mut stmt = conn.prepare("SELECT chat_id FROM chat_participants WHERE user_id = ?1")?;
    let candidates: Vec<String> = stmt
        .query_map(rusqlite::params![participants[0]], |row| row.get(0))?
        .collect::<Result<_, _>>()?;

    for chat_id in candidates {
        if participants_of(conn, &chat_id)? == participants {
            return Ok(Some(chat_id));
        }
    }
    Ok(None)
}

/// POST /api/chats — Create or get a chat.
/// JWT auth required. Body: { "participants": ["<user id>", ...] }.
/// The caller is always a participant. An existing chat with the same
/// participants is returned with 200; a new one is returned with 201 and
/// announced to connected clients.
pub async fn create_chat(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<CreateChatRequest>,
) -> Result<(StatusCode, Json<CreateChatResponse>), StatusCode> {
    if body.participants.iter().any(|p| p.trim().is_empty()) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let mut participants: Vec<String> = body
        .participants
        .into_iter()
        .filter(|p| *p != claims.user_id)
        .collect();
    participants.push(claims.user_id.clone());
    participants.sort();
    participants.dedup();

    if participants.len() < 2 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let user_id = claims.user_id.clone();

    let created = tokio::task::spawn_blocking(move || {
        let mut conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        if let Some(id) =
            find_chat_with(&conn, &participants).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        {
            return Ok((id, None));
        }

        let chat_id = uuid::Uuid::now_v7().to_string();
        let now = protocol::unix_now();

        let tx = conn
            .transaction()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        tx.execute(
            "INSERT INTO chats (id, last_message, last_message_at, created_at) VALUES (?1, NULL, ?2, ?2)",
            rusqlite::params![chat_id, now],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        for participant in &participants {
            tx.execute(
                "INSERT INTO chat_participants (chat_id, user_id) VALUES (?1, ?2)",
                rusqlite::params![chat_id, participant],
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        }
        tx.commit().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let partner =
            partner_for(&conn, &chat_id, &user_id).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        Ok::<_, StatusCode>((
            chat_id.clone(),
            Some(ChatCreated {
                id: chat_id,
                last_message_at: now,
                partner,
            }),
        ))
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    match created {
        (id, None) => Ok((StatusCode::OK, Json(CreateChatResponse { id, chat: None }))),
        (id, Some(chat)) => {
            tracing::info!(chat_id = %id, user_id = %claims.user_id, "Chat created");
            state.gateway.chat_created(chat.clone());
            Ok((
                StatusCode::CREATED,
                Json(CreateChatResponse {
                    id,
                    chat: Some(chat),
                }),
            ))
        }
    }
}

/// GET /api/chats — Chats the caller participates in, most recent activity first.
pub async fn list_chats(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<ChatSummary>>, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.user_id;

    let chats = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let mut stmt = conn
            .prepare(
                "SELECT c.id, c.last_message, c.last_message_at
                 FROM chats c
                 JOIN chat_participants p ON p.chat_id = c.id
                 WHERE p.user_id = ?1
                 ORDER BY c.last_message_at DESC, c.id DESC",
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let rows: Vec<(String, Option<String>, i64)> = stmt
            .query_map(rusqlite::params![user_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .collect();

        rows.into_iter()
            .map(|(id, last_message, last_message_at)| {
                let partner = partner_for(&conn, &id, &user_id)
                    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
                Ok(ChatSummary {
                    id,
                    last_message,
                    last_message_at,
                    partner,
                })
            })
            .collect::<Result<Vec<_>, StatusCode>>()
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(chats))
}

/// GET /api/chats/{id} — One chat. 404 unless the caller participates.
pub async fn get_chat(
    State(state): State<AppState>,
    claims: Claims,
    Path(chat_id): Path<String>,
) -> Result<Json<ChatSummary>, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.user_id;

    let chat = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        if !models::is_participant(&conn, &chat_id, &user_id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        {
            return Err(StatusCode::NOT_FOUND);
        }

        let (last_message, last_message_at): (Option<String>, i64) = conn
            .query_row(
                "SELECT last_message, last_message_at FROM chats WHERE id = ?1",
                rusqlite::params![chat_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|_| StatusCode::NOT_FOUND)?;

        let partner = partner_for(&conn, &chat_id, &user_id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        Ok(ChatSummary {
            id: chat_id,
            last_message,
            last_message_at,
            partner,
        })
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(chat))
}
