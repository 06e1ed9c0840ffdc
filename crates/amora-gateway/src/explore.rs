use std::sync::Arc;

use anyhow::Result;
use chrono::{Datelike, NaiveDate, Utc};

use amora_db::Database;
use amora_types::envelope::ProfilePayload;

use crate::registry::UserId;

/// Outcome of a like/dislike action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub matched: bool,
    pub chat_id: Option<String>,
}

/// Select one profile the viewer has not acted on yet, or None when the pool
/// is exhausted — not an error.
pub async fn next_candidate(db: &Arc<Database>, viewer: UserId) -> Result<Option<ProfilePayload>> {
    let db = db.clone();
    tokio::task::spawn_blocking(move || {
        let Some(candidate) = db.next_candidate(viewer)? else {
            return Ok(None);
        };
        let photos = db.approved_photos(candidate.user_id)?;

        let age = candidate
            .birth_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .and_then(|birth| calc_age(birth, Utc::now().date_naive()));

        Ok(Some(ProfilePayload {
            user_id: candidate.user_id.to_string(),
            display_name: candidate.display_name,
            age,
            city: candidate.city,
            photos,
            bio: candidate.description,
        }))
    })
    .await?
}

/// Record a like/dislike edge and detect a mutual like.
///
/// The edge is upserted, so repeating a decision never duplicates it. A
/// dislike short-circuits — the reverse edge is irrelevant. On mutual like,
/// both edges get matched_at stamped and the pair's chat is found or created.
pub async fn record_decision(
    db: &Arc<Database>,
    from: UserId,
    to: UserId,
    is_like: bool,
) -> Result<Decision> {
    let db = db.clone();
    tokio::task::spawn_blocking(move || {
        let now = Utc::now().to_rfc3339();
        db.upsert_like(from, to, is_like, &now)?;

        if !is_like {
            return Ok(Decision {
                matched: false,
                chat_id: None,
            });
        }

        // Order-independent: works whether the target acted first or second.
        let reciprocal = db.get_like(to, from)?;
        if !reciprocal.map(|edge| edge.is_like).unwrap_or(false) {
            return Ok(Decision {
                matched: false,
                chat_id: None,
            });
        }

        db.mark_matched(from, to, &now)?;
        let chat_id = db.find_or_create_chat(from, to)?;

        Ok(Decision {
            matched: true,
            chat_id: Some(chat_id),
        })
    })
    .await?
}

/// Calendar age: year difference, minus one if the birthday has not occurred
/// yet this year. None for a birth date in the future.
fn calc_age(birth: NaiveDate, today: NaiveDate) -> Option<u32> {
    if birth > today {
        return None;
    }
    let mut age = today.year() - birth.year();
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        age -= 1;
    }
    u32::try_from(age).ok()
}
