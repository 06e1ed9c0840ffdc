pub mod messages;

use std::sync::Arc;

use amora_db::Database;

pub type ApiState = Arc<ApiStateInner>;

pub struct ApiStateInner {
    pub db: Arc<Database>,
    pub bot_token: String,
    pub auth_ttl_seconds: i64,
}
