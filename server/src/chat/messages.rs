//! Message endpoints. Every write commits before its event is handed to the
//! delivery gateway, so a client reacting to an event can always refetch it.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::db::models;
use crate::state::AppState;
use crate::ws::protocol::{self, MessageRead, NewMessage};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub chat_id: String,
    pub content: String,
    /// text, image or voice; defaults to text
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub message: &'static str,
    pub id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadResponse {
    pub message: &'static str,
    pub updated_count: usize,
}

/// POST /api/messages — Persist a message and announce it.
/// JWT auth required. 403 unless the caller participates in the chat.
pub async fn send_message(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<SendMessageResponse>), StatusCode> {
    if body.chat_id.is_empty() || body.content.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let kind = match body.kind.as_deref() {
        None | Some("") => "text".to_string(),
        Some(kind) => kind.to_string(),
    };

    let db = state.db.clone();
    let user_id = claims.user_id.clone();

    let event = tokio::task::spawn_blocking(move || {
        let mut conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        if !models::is_participant(&conn, &body.chat_id, &user_id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        {
            return Err(StatusCode::FORBIDDEN);
        }

        let msg_id = uuid::Uuid::now_v7().to_string();
        let created_at = protocol::unix_now();

        let tx = conn
            .transaction()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        tx.execute(
            "INSERT INTO messages (id, chat_id, sender_id, content, type, is_read, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            rusqlite::params![msg_id, body.chat_id, user_id, body.content, kind, created_at],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        // Update chat's last message
        tx.execute(
            "UPDATE chats SET last_message = ?1, last_message_at = ?2 WHERE id = ?3",
            rusqlite::params![body.content, created_at, body.chat_id],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        tx.commit().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let sender = models::load_profile(&conn, &user_id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .as_sender();

        Ok(NewMessage {
            id: msg_id,
            chat_id: body.chat_id,
            sender_id: user_id,
            sender,
            content: body.content,
            kind,
            is_read: false,
            created_at,
        })
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    tracing::debug!(
        message_id = %event.id,
        chat_id = %event.chat_id,
        "Message stored"
    );

    let id = event.id.clone();
    state.gateway.new_message(event);

    Ok((
        StatusCode::CREATED,
        Json(SendMessageResponse {
            message: "Message sent",
            id,
        }),
    ))
}

/// GET /api/chats/{id}/messages — Full history, oldest first.
/// JWT auth required. 403 unless the caller participates in the chat.
pub async fn get_messages(
    State(state): State<AppState>,
    claims: Claims,
    Path(chat_id): Path<String>,
) -> Result<Json<Vec<NewMessage>>, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.user_id;

    let messages = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        if !models::is_participant(&conn, &chat_id, &user_id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        {
            return Err(StatusCode::FORBIDDEN);
        }

        let mut stmt = conn
            .prepare(
                "SELECT id, chat_id, sender_id, content, type, is_read, created_at
                 FROM messages
                 WHERE chat_id = ?1
                 ORDER BY created_at ASC, id ASC",
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let rows: Vec<models::MessageRow> = stmt
            .query_map(rusqlite::params![chat_id], |row| {
                Ok(models::MessageRow {
                    id: row.get(0)?,
                    chat_id: row.get(1)?,
                    sender_id: row.get(2)?,
                    content: row.get(3)?,
                    kind: row.get(4)?,
                    is_read: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .collect();

        rows.into_iter()
            .map(|row| {
                let sender = models::load_profile(&conn, &row.sender_id)
                    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
                    .as_sender();
                Ok(NewMessage {
                    id: row.id,
                    chat_id: row.chat_id,
                    sender_id: row.sender_id,
                    sender,
                    content: row.content,
                    kind: row.kind,
                    is_read: row.is_read,
                    created_at: row.created_at,
                })
            })
            .collect::<Result<Vec<_>, StatusCode>>()
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(messages))
}

/// POST /api/messages/{id}/read — Mark every unread message the caller's
/// partner sent in the message's chat as read.
/// 404 for an unknown message, 403 unless the caller participates.
pub async fn mark_as_read(
    State(state): State<AppState>,
    claims: Claims,
    Path(message_id): Path<String>,
) -> Result<Json<MarkReadResponse>, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.user_id.clone();

    let (chat_id, message_ids) = tokio::task::spawn_blocking(move || {
        let mut conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let message = models::load_message(&conn, &message_id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::NOT_FOUND)?;

        if !models::is_participant(&conn, &message.chat_id, &user_id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        {
            return Err(StatusCode::FORBIDDEN);
        }

        let tx = conn
            .transaction()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let unread: Vec<String> = {
            let mut stmt = tx
                .prepare(
                    "SELECT id FROM messages
                     WHERE chat_id = ?1 AND sender_id != ?2 AND is_read = 0
                     ORDER BY created_at ASC, id ASC",
                )
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
            let ids = stmt
                .query_map(rusqlite::params![message.chat_id, user_id], |row| row.get(0))
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
                .collect::<Result<Vec<String>, _>>()
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
            ids
        };

        tx.execute(
            "UPDATE messages SET is_read = 1
             WHERE chat_id = ?1 AND sender_id != ?2 AND is_read = 0",
            rusqlite::params![message.chat_id, user_id],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        tx.commit().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        Ok((message.chat_id, unread))
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    let updated_count = message_ids.len();
    if updated_count > 0 {
        state.gateway.message_read(MessageRead {
            chat_id,
            user_id: claims.user_id,
            message_ids,
            timestamp: protocol::unix_now(),
        });
    }

    Ok(Json(MarkReadResponse {
        message: "Marked as read",
        updated_count,
    }))
}
