use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            telegram_id  INTEGER PRIMARY KEY,
            username     TEXT,
            first_name   TEXT,
            photo_url    TEXT,
            created_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS profiles (
            user_id            INTEGER PRIMARY KEY REFERENCES users(telegram_id),
            display_name       TEXT,
            gender             TEXT,
            birth_date         TEXT,
            city               TEXT,
            description        TEXT,
            moderation_status  TEXT NOT NULL DEFAULT 'PENDING',
            created_at         TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS photos (
            id          TEXT PRIMARY KEY,
            user_id     INTEGER NOT NULL REFERENCES users(telegram_id),
            url         TEXT NOT NULL,
            position    INTEGER NOT NULL DEFAULT 0,
            status      TEXT NOT NULL DEFAULT 'PENDING'
        );

        CREATE INDEX IF NOT EXISTS idx_photos_user
            ON photos(user_id, position);

        CREATE TABLE IF NOT EXISTS gender_compatibility (
            from_gender  TEXT NOT NULL,
            to_gender    TEXT NOT NULL,
            PRIMARY KEY (from_gender, to_gender)
        );

        CREATE TABLE IF NOT EXISTS likes (
            user_id         INTEGER NOT NULL REFERENCES users(telegram_id),
            target_user_id  INTEGER NOT NULL REFERENCES users(telegram_id),
            is_like         INTEGER NOT NULL,
            created_at      TEXT NOT NULL,
            matched_at      TEXT,
            PRIMARY KEY (user_id, target_user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_likes_target
            ON likes(target_user_id);

        -- The member pair is stored ordered (user_lo < user_hi) so the UNIQUE
        -- constraint makes one chat per pair hold under concurrent creation.
        CREATE TABLE IF NOT EXISTS chats (
            id               TEXT PRIMARY KEY,
            user_lo          INTEGER NOT NULL REFERENCES users(telegram_id),
            user_hi          INTEGER NOT NULL REFERENCES users(telegram_id),
            created_at       TEXT NOT NULL DEFAULT (datetime('now')),
            last_message_at  TEXT,
            UNIQUE (user_lo, user_hi)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            chat_id     TEXT NOT NULL REFERENCES chats(id),
            sender_id   INTEGER NOT NULL REFERENCES users(telegram_id),
            text        TEXT,
            photo_url   TEXT,
            created_at  TEXT NOT NULL,
            deleted_at  TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_chat
            ON messages(chat_id, created_at);

        -- Seed the default orientation rows; further rows are admin-managed.
        INSERT OR IGNORE INTO gender_compatibility (from_gender, to_gender)
            VALUES ('MALE', 'FEMALE'), ('FEMALE', 'MALE');
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
