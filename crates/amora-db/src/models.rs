/// Database row types — these map directly to SQLite rows.
/// Distinct from amora-types wire models to keep the DB layer independent.

pub struct UserRow {
    pub telegram_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub photo_url: Option<String>,
}

pub struct CandidateRow {
    pub user_id: i64,
    pub display_name: Option<String>,
    pub birth_date: Option<String>,
    pub city: Option<String>,
    pub description: Option<String>,
}

pub struct LikeRow {
    pub user_id: i64,
    pub target_user_id: i64,
    pub is_like: bool,
    pub created_at: String,
    pub matched_at: Option<String>,
}

pub struct MessageRow {
    pub id: String,
    pub chat_id: String,
    pub sender_id: i64,
    pub text: Option<String>,
    pub photo_url: Option<String>,
    pub created_at: String,
}

pub struct ChatListRow {
    pub chat_id: String,
    pub title: Option<String>,
    pub avatar_url: Option<String>,
    pub last_message: Option<String>,
}
