use serde::{Deserialize, Serialize};

// -- Chat list --

#[derive(Debug, Deserialize)]
pub struct ChatsQuery {
    #[serde(rename = "initData")]
    pub init_data: String,
    pub cursor: Option<String>,
    #[serde(default = "default_chats_limit")]
    pub limit: u32,
}

fn default_chats_limit() -> u32 {
    20
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatListItem {
    pub id: String,
    pub title: String,
    pub avatar_url: Option<String>,
    pub last_message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatListResponse {
    pub ok: bool,
    pub items: Vec<ChatListItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

// -- Chat history --

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(rename = "initData")]
    pub init_data: String,
    #[serde(rename = "chatId")]
    pub chat_id: String,
    #[serde(default = "default_history_limit")]
    pub limit: u32,
}

fn default_history_limit() -> u32 {
    30
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub id: String,
    pub sender_id: String,
    pub text: String,
    pub photo_url: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub ok: bool,
    pub items: Vec<HistoryItem>,
}
