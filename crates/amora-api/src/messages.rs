use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;

use amora_types::api::{
    ChatListItem, ChatListResponse, ChatsQuery, HistoryItem, HistoryQuery, HistoryResponse,
};

use crate::ApiState;

/// Resolve the authenticated user id from an initData query parameter.
fn authenticate(state: &ApiState, init_data: &str) -> Result<i64, StatusCode> {
    if state.bot_token.is_empty() {
        error!("bot token not configured");
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    let verified =
        amora_auth::verify_init_data(init_data, &state.bot_token, state.auth_ttl_seconds)
            .map_err(|_| StatusCode::UNAUTHORIZED)?;
    verified
        .user
        .map(|u| u.id)
        .ok_or(StatusCode::UNAUTHORIZED)
}

/// Page number and row offset from an opaque cursor. An absurd cursor would
/// overflow the offset; treat it as a bad request rather than wrapping around.
fn page_offset(cursor: Option<&str>, limit: u32) -> Result<(u32, u32), StatusCode> {
    let page: u32 = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
    let offset = page.checked_mul(limit).ok_or(StatusCode::BAD_REQUEST)?;
    Ok((page, offset))
}

/// Paginated chat list for the authenticated user: peer header plus a short
/// last-message preview, most recently active first.
pub async fn list_chats(
    State(state): State<ApiState>,
    Query(query): Query<ChatsQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let user_id = authenticate(&state, &query.init_data)?;

    let limit = query.limit.clamp(1, 50);
    let (page, offset) = page_offset(query.cursor.as_deref(), limit)?;

    let db = state.db.clone();
    let (rows, total) = tokio::task::spawn_blocking(move || {
        let rows = db.chat_list(user_id, offset, limit)?;
        let total = db.chat_count(user_id)?;
        Ok::<_, anyhow::Error>((rows, total))
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|e| {
        error!("chat list query failed: {:#}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let items: Vec<ChatListItem> = rows
        .into_iter()
        .map(|r| ChatListItem {
            id: r.chat_id,
            title: r.title.unwrap_or_default(),
            avatar_url: r.avatar_url,
            last_message: r.last_message.map(|m| m.chars().take(30).collect()),
        })
        .collect();

    let next_cursor = if (page as u64 + 1) * (limit as u64) < total as u64 {
        Some((page + 1).to_string())
    } else {
        None
    };

    Ok(Json(ChatListResponse {
        ok: true,
        items,
        next_cursor,
    }))
}

/// Last N non-deleted messages of a chat in ascending order. Members only.
pub async fn chat_history(
    State(state): State<ApiState>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let user_id = authenticate(&state, &query.init_data)?;
    if query.chat_id.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let limit = query.limit.clamp(1, 50);

    let db = state.db.clone();
    let chat_id = query.chat_id.clone();
    let rows = tokio::task::spawn_blocking(move || {
        if !db.is_chat_member(&chat_id, user_id)? {
            return Ok(None);
        }
        let rows = db.recent_messages(&chat_id, limit)?;
        Ok::<_, anyhow::Error>(Some(rows))
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|e| {
        error!("history query failed: {:#}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let Some(rows) = rows else {
        return Err(StatusCode::FORBIDDEN);
    };

    // Fetched newest-first; display order is ascending.
    let items: Vec<HistoryItem> = rows
        .into_iter()
        .rev()
        .map(|r| HistoryItem {
            id: r.id,
            sender_id: r.sender_id.to_string(),
            text: r.text.unwrap_or_default(),
            photo_url: r.photo_url,
            created_at: r.created_at,
        })
        .collect();

    Ok(Json(HistoryResponse { ok: true, items }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_pages_multiply_into_offsets() {
        assert_eq!(page_offset(None, 20).unwrap(), (0, 0));
        assert_eq!(page_offset(Some("3"), 20).unwrap(), (3, 60));
        // Non-numeric cursors fall back to the first page.
        assert_eq!(page_offset(Some("junk"), 20).unwrap(), (0, 0));
    }

    #[test]
    fn overflowing_cursor_is_a_bad_request() {
        assert_eq!(
            page_offset(Some("4000000000"), 20),
            Err(StatusCode::BAD_REQUEST)
        );
    }
}
