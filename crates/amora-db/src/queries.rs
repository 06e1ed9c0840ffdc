use crate::Database;
use crate::models::{CandidateRow, ChatListRow, LikeRow, MessageRow, UserRow};
use anyhow::Result;
use rusqlite::Connection;
use uuid::Uuid;

impl Database {
    // -- Users & profiles --

    pub fn upsert_user(
        &self,
        telegram_id: i64,
        username: Option<&str>,
        first_name: Option<&str>,
        photo_url: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (telegram_id, username, first_name, photo_url)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(telegram_id) DO UPDATE SET
                     username = excluded.username,
                     first_name = excluded.first_name,
                     photo_url = excluded.photo_url",
                rusqlite::params![telegram_id, username, first_name, photo_url],
            )?;
            Ok(())
        })
    }

    pub fn upsert_profile(
        &self,
        user_id: i64,
        display_name: Option<&str>,
        gender: Option<&str>,
        birth_date: Option<&str>,
        city: Option<&str>,
        description: Option<&str>,
        moderation_status: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO profiles
                     (user_id, display_name, gender, birth_date, city, description, moderation_status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(user_id) DO UPDATE SET
                     display_name = excluded.display_name,
                     gender = excluded.gender,
                     birth_date = excluded.birth_date,
                     city = excluded.city,
                     description = excluded.description,
                     moderation_status = excluded.moderation_status",
                rusqlite::params![
                    user_id,
                    display_name,
                    gender,
                    birth_date,
                    city,
                    description,
                    moderation_status
                ],
            )?;
            Ok(())
        })
    }

    pub fn add_photo(
        &self,
        user_id: i64,
        url: &str,
        position: u32,
        status: &str,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO photos (id, user_id, url, position, status) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, user_id, url, position, status],
            )?;
            Ok(())
        })?;
        Ok(id)
    }

    pub fn add_compatibility(&self, from_gender: &str, to_gender: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO gender_compatibility (from_gender, to_gender) VALUES (?1, ?2)",
                rusqlite::params![from_gender, to_gender],
            )?;
            Ok(())
        })
    }

    // -- Explore --

    /// Select the next candidate the viewer has not acted on: approved base
    /// profile, gender compatible with the viewer, newest account first.
    ///
    /// A viewer gender with no configured compatibility rows skips the gender
    /// filter entirely instead of yielding zero candidates. Deliberate policy:
    /// new orientation categories get broad exposure, not a dead end.
    pub fn next_candidate(&self, viewer: i64) -> Result<Option<CandidateRow>> {
        self.with_conn(|conn| {
            let viewer_gender: Option<String> = conn
                .query_row(
                    "SELECT gender FROM profiles WHERE user_id = ?1",
                    [viewer],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();

            let targets: Vec<String> = match &viewer_gender {
                Some(g) => {
                    let mut stmt = conn.prepare(
                        "SELECT to_gender FROM gender_compatibility WHERE from_gender = ?1",
                    )?;
                    stmt.query_map([g], |row| row.get(0))?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                }
                None => vec![],
            };

            let mut sql = String::from(
                "SELECT u.telegram_id, p.display_name, p.birth_date, p.city, p.description
                 FROM users u
                 JOIN profiles p ON p.user_id = u.telegram_id
                 WHERE u.telegram_id <> ?1
                   AND p.moderation_status = 'APPROVED'
                   AND NOT EXISTS (
                       SELECT 1 FROM likes l
                       WHERE l.user_id = ?1 AND l.target_user_id = u.telegram_id
                   )",
            );

            let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(viewer)];
            if !targets.is_empty() {
                let placeholders: Vec<String> = (0..targets.len())
                    .map(|i| format!("?{}", i + 2))
                    .collect();
                sql.push_str(&format!(
                    " AND p.gender IN ({})",
                    placeholders.join(", ")
                ));
                for t in targets {
                    params.push(Box::new(t));
                }
            }
            sql.push_str(" ORDER BY u.created_at DESC, u.telegram_id DESC LIMIT 1");

            let mut stmt = conn.prepare(&sql)?;
            let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();

            let row = stmt
                .query_row(param_refs.as_slice(), |row| {
                    Ok(CandidateRow {
                        user_id: row.get(0)?,
                        display_name: row.get(1)?,
                        birth_date: row.get(2)?,
                        city: row.get(3)?,
                        description: row.get(4)?,
                    })
                })
                .optional()?;

            Ok(row)
        })
    }

    pub fn approved_photos(&self, user_id: i64) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT url FROM photos
                 WHERE user_id = ?1 AND status = 'APPROVED'
                 ORDER BY position ASC
                 LIMIT 3",
            )?;
            let urls = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(urls)
        })
    }

    // -- Likes --

    /// Upsert the directed edge; acting twice on the same target keeps a
    /// single row per ordered pair.
    pub fn upsert_like(
        &self,
        user_id: i64,
        target_user_id: i64,
        is_like: bool,
        now: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO likes (user_id, target_user_id, is_like, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id, target_user_id) DO UPDATE SET
                     is_like = excluded.is_like,
                     created_at = excluded.created_at",
                rusqlite::params![user_id, target_user_id, is_like, now],
            )?;
            Ok(())
        })
    }

    pub fn get_like(&self, user_id: i64, target_user_id: i64) -> Result<Option<LikeRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT user_id, target_user_id, is_like, created_at, matched_at
                     FROM likes WHERE user_id = ?1 AND target_user_id = ?2",
                    [user_id, target_user_id],
                    |row| {
                        Ok(LikeRow {
                            user_id: row.get(0)?,
                            target_user_id: row.get(1)?,
                            is_like: row.get(2)?,
                            created_at: row.get(3)?,
                            matched_at: row.get(4)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Stamp matched_at on both directions of a mutual like.
    pub fn mark_matched(&self, a: i64, b: i64, now: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE likes SET matched_at = ?3
                 WHERE (user_id = ?1 AND target_user_id = ?2)
                    OR (user_id = ?2 AND target_user_id = ?1)",
                rusqlite::params![a, b, now],
            )?;
            Ok(())
        })
    }

    // -- Chats --

    /// Find the chat for an unordered member pair, creating it if absent.
    /// The UNIQUE(user_lo, user_hi) constraint makes this race-free: a losing
    /// concurrent insert is ignored and the re-select returns the winner's row.
    pub fn find_or_create_chat(&self, a: i64, b: i64) -> Result<String> {
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let id = Uuid::new_v4().to_string();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO chats (id, user_lo, user_hi) VALUES (?1, ?2, ?3)",
                rusqlite::params![id, lo, hi],
            )?;
            let chat_id: String = conn.query_row(
                "SELECT id FROM chats WHERE user_lo = ?1 AND user_hi = ?2",
                [lo, hi],
                |row| row.get(0),
            )?;
            Ok(chat_id)
        })
    }

    pub fn is_chat_member(&self, chat_id: &str, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM chats WHERE id = ?1 AND ?2 IN (user_lo, user_hi)",
                    rusqlite::params![chat_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// The two member identities of a chat.
    pub fn chat_members(&self, chat_id: &str) -> Result<Option<(i64, i64)>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT user_lo, user_hi FROM chats WHERE id = ?1",
                    [chat_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            Ok(row)
        })
    }

    /// The other member of a direct chat, if `me` is a member at all.
    pub fn chat_peer(&self, chat_id: &str, me: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let members: Option<(i64, i64)> = conn
                .query_row(
                    "SELECT user_lo, user_hi FROM chats WHERE id = ?1",
                    [chat_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let peer_id = match members {
                Some((lo, hi)) if lo == me => hi,
                Some((lo, hi)) if hi == me => lo,
                _ => return Ok(None),
            };

            query_user(conn, peer_id)
        })
    }

    pub fn chats_for_user(&self, user_id: i64) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id FROM chats WHERE ?1 IN (user_lo, user_hi)")?;
            let ids = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    /// Chat list page for a user: peer title/avatar plus last message preview,
    /// most recently active first.
    pub fn chat_list(&self, user_id: i64, offset: u32, limit: u32) -> Result<Vec<ChatListRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id,
                        COALESCE(u.username, u.first_name, 'ID ' || u.telegram_id),
                        u.photo_url,
                        (SELECT m.text FROM messages m
                         WHERE m.chat_id = c.id AND m.deleted_at IS NULL
                         ORDER BY m.created_at DESC LIMIT 1)
                 FROM chats c
                 JOIN users u ON u.telegram_id =
                     CASE WHEN c.user_lo = ?1 THEN c.user_hi ELSE c.user_lo END
                 WHERE ?1 IN (c.user_lo, c.user_hi)
                 ORDER BY c.last_message_at DESC, c.created_at DESC
                 LIMIT ?3 OFFSET ?2",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![user_id, offset, limit], |row| {
                    Ok(ChatListRow {
                        chat_id: row.get(0)?,
                        title: row.get(1)?,
                        avatar_url: row.get(2)?,
                        last_message: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn chat_count(&self, user_id: i64) -> Result<u32> {
        self.with_conn(|conn| {
            let count: u32 = conn.query_row(
                "SELECT COUNT(*) FROM chats WHERE ?1 IN (user_lo, user_hi)",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    // -- Messages --

    /// Insert a message and bump the chat's last-activity timestamp. Both
    /// statements run under the connection mutex, so no writer interleaves.
    pub fn insert_message(
        &self,
        id: &str,
        chat_id: &str,
        sender_id: i64,
        text: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, chat_id, sender_id, text, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, chat_id, sender_id, text, created_at],
            )?;
            conn.execute(
                "UPDATE chats SET last_message_at = ?2 WHERE id = ?1",
                rusqlite::params![chat_id, created_at],
            )?;
            Ok(())
        })
    }

    /// Last `limit` non-deleted messages of a chat, newest first. Callers that
    /// display ascending history reverse the page.
    pub fn recent_messages(&self, chat_id: &str, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, chat_id, sender_id, text, photo_url, created_at
                 FROM messages
                 WHERE chat_id = ?1 AND deleted_at IS NULL
                 ORDER BY created_at DESC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![chat_id, limit], |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        chat_id: row.get(1)?,
                        sender_id: row.get(2)?,
                        text: row.get(3)?,
                        photo_url: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Soft delete: the row stays, reads exclude it.
    pub fn soft_delete_message(&self, id: &str, now: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE messages SET deleted_at = ?2 WHERE id = ?1",
                rusqlite::params![id, now],
            )?;
            Ok(())
        })
    }
}

fn query_user(conn: &Connection, telegram_id: i64) -> Result<Option<UserRow>> {
    let row = conn
        .query_row(
            "SELECT telegram_id, username, first_name, photo_url FROM users WHERE telegram_id = ?1",
            [telegram_id],
            |row| {
                Ok(UserRow {
                    telegram_id: row.get(0)?,
                    username: row.get(1)?,
                    first_name: row.get(2)?,
                    photo_url: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::Database;

    fn seed_user(db: &Database, id: i64, username: Option<&str>, created_at: &str) {
        db.upsert_user(id, username, None, None).unwrap();
        // Deterministic creation order for candidate selection tests.
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET created_at = ?2 WHERE telegram_id = ?1",
                rusqlite::params![id, created_at],
            )?;
            Ok(())
        })
        .unwrap();
    }

    fn seed_approved(db: &Database, id: i64, gender: &str, created_at: &str) {
        seed_user(db, id, None, created_at);
        db.upsert_profile(id, Some("p"), Some(gender), None, None, None, "APPROVED")
            .unwrap();
    }

    #[test]
    fn like_upsert_keeps_single_edge() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, 1, None, "2024-01-01 00:00:00");
        seed_user(&db, 2, None, "2024-01-01 00:00:01");

        db.upsert_like(1, 2, true, "t1").unwrap();
        db.upsert_like(1, 2, true, "t2").unwrap();

        let count: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM likes", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(db.get_like(1, 2).unwrap().unwrap().created_at, "t2");
    }

    #[test]
    fn chat_is_unique_per_pair_regardless_of_order() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, 1, None, "2024-01-01 00:00:00");
        seed_user(&db, 2, None, "2024-01-01 00:00:01");

        let a = db.find_or_create_chat(1, 2).unwrap();
        let b = db.find_or_create_chat(2, 1).unwrap();
        assert_eq!(a, b);

        assert!(db.is_chat_member(&a, 1).unwrap());
        assert!(db.is_chat_member(&a, 2).unwrap());
        assert!(!db.is_chat_member(&a, 3).unwrap());
    }

    #[test]
    fn candidate_requires_approved_profile_and_skips_seen() {
        let db = Database::open_in_memory().unwrap();
        seed_approved(&db, 10, "FEMALE", "2024-01-01 00:00:00");
        seed_user(&db, 20, None, "2024-01-02 00:00:00");
        db.upsert_profile(20, None, Some("MALE"), None, None, None, "APPROVED")
            .unwrap();
        seed_user(&db, 30, None, "2024-01-03 00:00:00");
        db.upsert_profile(30, None, Some("MALE"), None, None, None, "PENDING")
            .unwrap();

        // Viewer is FEMALE; default seed maps FEMALE -> MALE. User 30 is not
        // approved, so the newest eligible candidate is 20.
        let c = db.next_candidate(10).unwrap().unwrap();
        assert_eq!(c.user_id, 20);

        db.upsert_like(10, 20, false, "t1").unwrap();
        assert!(db.next_candidate(10).unwrap().is_none());
    }

    #[test]
    fn unconfigured_gender_skips_compatibility_filter() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, 10, None, "2024-01-01 00:00:00");
        db.upsert_profile(10, None, Some("NONBINARY"), None, None, None, "APPROVED")
            .unwrap();
        seed_approved(&db, 20, "MALE", "2024-01-02 00:00:00");
        seed_approved(&db, 30, "FEMALE", "2024-01-03 00:00:00");

        // No compatibility rows for NONBINARY: the filter is skipped and the
        // newest approved profile wins.
        let c = db.next_candidate(10).unwrap().unwrap();
        assert_eq!(c.user_id, 30);

        // Once a row is configured the filter applies again.
        db.add_compatibility("NONBINARY", "MALE").unwrap();
        let c = db.next_candidate(10).unwrap().unwrap();
        assert_eq!(c.user_id, 20);
    }

    #[test]
    fn soft_deleted_messages_are_excluded_from_reads() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, 1, None, "2024-01-01 00:00:00");
        seed_user(&db, 2, None, "2024-01-01 00:00:01");
        let chat = db.find_or_create_chat(1, 2).unwrap();

        db.insert_message("m1", &chat, 1, "first", "2024-01-02T00:00:00Z")
            .unwrap();
        db.insert_message("m2", &chat, 2, "second", "2024-01-02T00:00:01Z")
            .unwrap();
        db.soft_delete_message("m1", "2024-01-02T00:01:00Z").unwrap();

        let rows = db.recent_messages(&chat, 50).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "m2");
    }

    #[test]
    fn message_insert_orders_by_created_at_and_bumps_activity() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, 1, None, "2024-01-01 00:00:00");
        seed_user(&db, 2, None, "2024-01-01 00:00:01");
        let chat = db.find_or_create_chat(1, 2).unwrap();

        db.insert_message("m1", &chat, 1, "a", "2024-01-02T00:00:00Z")
            .unwrap();
        db.insert_message("m2", &chat, 2, "b", "2024-01-02T00:00:01Z")
            .unwrap();

        let rows = db.recent_messages(&chat, 50).unwrap();
        assert_eq!(rows[0].id, "m2");
        assert_eq!(rows[1].id, "m1");

        let last: Option<String> = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT last_message_at FROM chats WHERE id = ?1",
                    [&chat],
                    |r| r.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(last.as_deref(), Some("2024-01-02T00:00:01Z"));
    }

    #[test]
    fn chat_list_title_falls_back_to_placeholder() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, 1, Some("me"), "2024-01-01 00:00:00");
        seed_user(&db, 2, None, "2024-01-01 00:00:01");
        let chat = db.find_or_create_chat(1, 2).unwrap();
        db.insert_message("m1", &chat, 2, "hello there", "2024-01-02T00:00:00Z")
            .unwrap();

        let rows = db.chat_list(1, 0, 20).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title.as_deref(), Some("ID 2"));
        assert_eq!(rows[0].last_message.as_deref(), Some("hello there"));
        assert_eq!(db.chat_count(1).unwrap(), 1);
    }

    #[test]
    fn chat_peer_resolves_the_other_member() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, 1, Some("ann"), "2024-01-01 00:00:00");
        seed_user(&db, 2, Some("bob"), "2024-01-01 00:00:01");
        let chat = db.find_or_create_chat(1, 2).unwrap();

        let peer = db.chat_peer(&chat, 1).unwrap().unwrap();
        assert_eq!(peer.telegram_id, 2);
        assert_eq!(peer.username.as_deref(), Some("bob"));
        assert!(db.chat_peer(&chat, 3).unwrap().is_none());
    }
}
