//! Identity, feed and reindex routes shared by both verticals (§6).

use axum::extract::{Extension, Path, Query, State};
use axum::Json;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::AppState;
use crate::auth::identity::{resolve_email, upsert_tenant, IdentityRequest};
use crate::error::{AppError, AppResult};
use crate::middleware::VerifiedTenant;
use crate::models::{FeedPost, FeedPostType};

/// Page/limit query params shared by every list endpoint. `page` is
/// 1-based; defaults keep an unbounded client request from scanning the
/// whole table.
#[derive(Debug, Deserialize)]
pub struct PageParams {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_page() -> i64 {
    1
}

fn default_limit() -> i64 {
    25
}

impl PageParams {
    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1) * self.limit.clamp(1, 200)
    }

    pub fn bounded_limit(&self) -> i64 {
        self.limit.clamp(1, 200)
    }
}

#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub limit: i64,
    pub total: i64,
}

#[derive(Debug, Serialize)]
pub struct IdentityResponse {
    pub tenant_id: String,
    pub plan_tier: String,
    pub token: String,
}

pub async fn auth_identity(
    State(state): State<AppState>,
    Json(body): Json<IdentityRequest>,
) -> AppResult<Json<IdentityResponse>> {
    let email = resolve_email(&body)?;
    let tenant = upsert_tenant(&state.db, &email)?;
    let token = state.jwt.generate_token(&tenant.id, &email)?;

    Ok(Json(IdentityResponse {
        tenant_id: tenant.id,
        plan_tier: tenant.plan_tier.as_str().to_string(),
        token,
    }))
}

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    #[serde(flatten)]
    pub page: PageParams,
    #[serde(rename = "type")]
    pub post_type: Option<String>,
    pub tags: Option<String>,
}

pub async fn list_feed(
    State(state): State<AppState>,
    Extension(VerifiedTenant(tenant_id)): Extension<VerifiedTenant>,
    Query(query): Query<FeedQuery>,
) -> AppResult<Json<Paginated<FeedPost>>> {
    let conn = state.db.get()?;

    let mut sql = "SELECT id, tenant_id, post_type, title, body, payload_json, entity_type, entity_id, tags, source_ref_id, auto_generated, created_at
                   FROM feed_posts WHERE tenant_id = ?1".to_string();
    if query.post_type.is_some() {
        sql.push_str(" AND post_type = ?2");
    }
    sql.push_str(" ORDER BY created_at DESC LIMIT ?3 OFFSET ?4");

    let limit = query.page.bounded_limit();
    let offset = query.page.offset();

    let mut stmt = conn.prepare(&sql)?;
    let items: Vec<FeedPost> = if let Some(post_type) = &query.post_type {
        stmt.query_map(params![tenant_id, post_type, limit, offset], row_to_feed_post)?
            .collect::<Result<_, _>>()?
    } else {
        stmt.query_map(params![tenant_id, limit, offset], row_to_feed_post)?
            .collect::<Result<_, _>>()?
    };
    drop(stmt);

    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM feed_posts WHERE tenant_id = ?1",
        params![tenant_id],
        |r| r.get(0),
    )?;

    Ok(Json(Paginated { items, page: query.page.page, limit, total }))
}

pub async fn get_feed_post(
    State(state): State<AppState>,
    Extension(VerifiedTenant(tenant_id)): Extension<VerifiedTenant>,
    Path(id): Path<i64>,
) -> AppResult<Json<FeedPost>> {
    let conn = state.db.get()?;
    let post = conn
        .query_row(
            "SELECT id, tenant_id, post_type, title, body, payload_json, entity_type, entity_id, tags, source_ref_id, auto_generated, created_at
             FROM feed_posts WHERE id = ?1 AND tenant_id = ?2",
            params![id, tenant_id],
            row_to_feed_post,
        )
        .map_err(|_| AppError::NotFound(format!("feed post {id}")))?;
    Ok(Json(post))
}

fn row_to_feed_post(row: &rusqlite::Row) -> rusqlite::Result<FeedPost> {
    let post_type: String = row.get(2)?;
    let payload_json: String = row.get(5)?;
    let tags: String = row.get(8)?;
    Ok(FeedPost {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        post_type: match post_type.as_str() {
            "BILL_CREATED" => FeedPostType::Created,
            "BILL_MOVEMENT" => FeedPostType::Movement,
            "VOTE_RESULT" => FeedPostType::VoteResult,
            "ATTENDANCE_RECORD" => FeedPostType::Attendance,
            _ => FeedPostType::AnalysisReady,
        },
        title: row.get(3)?,
        body: row.get(4)?,
        payload: serde_json::from_str(&payload_json).unwrap_or(serde_json::Value::Null),
        entity_type: row.get(6)?,
        entity_id: row.get(7)?,
        tags: tags.split(',').filter(|s| !s.is_empty()).map(String::from).collect(),
        source_ref_id: row.get(9)?,
        auto_generated: row.get::<_, i64>(10)? != 0,
        created_at: row.get(11)?,
    })
}

/// `POST /reindex` (§6): recomputes every legislator's current-year
/// metrics and reports counts, used by the frontend after a bulk data
/// correction rather than waiting for the nightly schedule. Unlike
/// `RecomputeMetricsHandler`, which must recompute whatever period the
/// triggering row actually belongs to, this is a user-initiated "bring the
/// current period up to date" action, so defaulting to the current year is
/// the intended behaviour here, not the bug it is on the queue path.
pub async fn reindex(
    State(state): State<AppState>,
    Extension(VerifiedTenant(tenant_id)): Extension<VerifiedTenant>,
) -> AppResult<Json<serde_json::Value>> {
    let conn = state.db.get()?;

    let legislator_ids: Vec<i64> = {
        let mut stmt = conn.prepare("SELECT id FROM legislators WHERE tenant_id = ?1")?;
        stmt.query_map(params![tenant_id], |r| r.get(0))?.collect::<Result<_, _>>()?
    };
    let bill_count: i64 =
        conn.query_row("SELECT COUNT(*) FROM bills WHERE tenant_id = ?1", params![tenant_id], |r| r.get(0))?;
    drop(conn);

    let period = chrono::Utc::now().format("%Y").to_string();
    for legislator_id in &legislator_ids {
        crate::derive::metrics::recompute_legislator_metrics(&state.db, *legislator_id, &period)?;
    }

    Ok(Json(json!({ "legislators": legislator_ids.len(), "bills": bill_count })))
}
