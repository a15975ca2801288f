//! Feed rendering (C7, §4.7).
//! One small pure function per event kind; each returns the exact
//! `(title, body)` pair the event taxonomy names, plus the payload to
//! attach to the persisted `FeedPost`.

use crate::db::DbPool;
use crate::error::AppResult;
use crate::models::FeedPostType;
use rusqlite::params;

pub struct RenderedPost {
    pub post_type: FeedPostType,
    pub title: String,
    pub body: String,
    pub payload: serde_json::Value,
    pub entity_type: &'static str,
    pub entity_id: i64,
}

pub fn render_bill_created(db: &DbPool, bill_id: i64) -> AppResult<RenderedPost> {
    let conn = db.get()?;
    let (external_id, title): (String, String) = conn.query_row(
        "SELECT external_id, title FROM bills WHERE id = ?1",
        params![bill_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;

    let mut stmt = conn.prepare(
        "SELECT l.first_name || ' ' || l.last_name FROM bill_authors ba
         JOIN legislators l ON l.id = ba.legislator_id
         WHERE ba.bill_id = ?1 AND ba.role = 'author'",
    )?;
    let authors: Vec<String> = stmt.query_map(params![bill_id], |r| r.get(0))?.collect::<Result<_, _>>()?;

    let body = if authors.is_empty() {
        format!("\"{title}\" was presented.")
    } else {
        format!("\"{title}\" was presented by {}.", authors.join(", "))
    };

    Ok(RenderedPost {
        post_type: FeedPostType::Created,
        title: external_id,
        body,
        payload: serde_json::json!({ "bill_id": bill_id }),
        entity_type: "bill",
        entity_id: bill_id,
    })
}

pub fn render_bill_movement(db: &DbPool, bill_id: i64, from: &str, to: &str) -> AppResult<RenderedPost> {
    let conn = db.get()?;
    let title: String = conn.query_row(
        "SELECT title FROM bills WHERE id = ?1",
        params![bill_id],
        |r| r.get(0),
    )?;
    let description: String = conn.query_row(
        "SELECT description FROM bill_movements WHERE bill_id = ?1 ORDER BY order_index DESC LIMIT 1",
        params![bill_id],
        |r| r.get(0),
    )?;

    Ok(RenderedPost {
        post_type: FeedPostType::Movement,
        title,
        body: format!("{description} — now {to}"),
        payload: serde_json::json!({ "bill_id": bill_id, "from_status": from, "to_status": to }),
        entity_type: "bill",
        entity_id: bill_id,
    })
}

pub fn render_vote_result(db: &DbPool, vote_event_id: i64) -> AppResult<RenderedPost> {
    let conn = db.get()?;
    let (title, aff, neg, abst, absent): (String, i64, i64, i64, i64) = conn.query_row(
        "SELECT title, affirmative, negative, abstention, absent FROM vote_events WHERE id = ?1",
        params![vote_event_id],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
    )?;

    Ok(RenderedPost {
        post_type: FeedPostType::VoteResult,
        title: title.clone(),
        body: format!("{aff}/{neg}/{abst}/{absent}"),
        payload: serde_json::json!({
            "vote_event_id": vote_event_id,
            "affirmative": aff, "negative": neg, "abstention": abst, "absent": absent,
        }),
        entity_type: "vote_event",
        entity_id: vote_event_id,
    })
}

pub fn render_attendance_record(db: &DbPool, legislator_id: i64, session: &str) -> AppResult<RenderedPost> {
    let conn = db.get()?;
    let (present, total): (i64, i64) = conn.query_row(
        "SELECT SUM(status = 'present'), COUNT(*) FROM attendances WHERE session = ?1",
        params![session],
        |r| Ok((r.get::<_, Option<i64>>(0)?.unwrap_or(0), r.get(1)?)),
    )?;
    let pct = if total == 0 { 0.0 } else { (present as f64 / total as f64) * 100.0 };
    let absent = total - present;

    Ok(RenderedPost {
        post_type: FeedPostType::Attendance,
        title: format!("Attendance: {session}"),
        body: format!("Present {present}/{total} ({pct:.0}%). Absent {absent}"),
        payload: serde_json::json!({ "session": session, "present": present, "total": total }),
        entity_type: "legislator",
        entity_id: legislator_id,
    })
}

pub fn render_analysis_ready(module: &str, top_insight: &str, analysis_id: i64) -> RenderedPost {
    RenderedPost {
        post_type: FeedPostType::AnalysisReady,
        title: module.to_string(),
        body: top_insight.to_string(),
        payload: serde_json::json!({ "module": module }),
        entity_type: "analysis",
        entity_id: analysis_id,
    }
}

pub fn persist(
    db: &DbPool,
    tenant_id: Option<&str>,
    rendered: &RenderedPost,
    source_ref_id: Option<i64>,
    tags: &[String],
) -> AppResult<i64> {
    let conn = db.get()?;
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO feed_posts (tenant_id, post_type, title, body, payload_json, entity_type, entity_id, tags, source_ref_id, auto_generated, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10)",
        params![
            tenant_id,
            rendered.post_type.as_str(),
            rendered.title,
            rendered.body,
            rendered.payload.to_string(),
            rendered.entity_type,
            rendered.entity_id,
            tags.join(","),
            source_ref_id,
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}
