//! Legislative vertical read routes (§6).

use axum::extract::{Extension, Path, Query, State};
use axum::Json;
use rusqlite::params;
use serde::Deserialize;

use crate::api::AppState;
use crate::api::routes_common::{PageParams, Paginated};
use crate::error::{AppError, AppResult};
use crate::middleware::VerifiedTenant;
use crate::models::{Bill, BillStatus, Legislator, LegislatorMetric};

#[derive(Debug, Deserialize)]
pub struct LegislatorQuery {
    #[serde(flatten)]
    pub page: PageParams,
    #[serde(rename = "blockId")]
    pub block_id: Option<String>,
    #[serde(rename = "provinceId")]
    pub province_id: Option<String>,
    pub search: Option<String>,
    #[serde(rename = "isActive")]
    pub is_active: Option<bool>,
}

pub async fn list_legislators(
    State(state): State<AppState>,
    Extension(VerifiedTenant(tenant_id)): Extension<VerifiedTenant>,
    Query(query): Query<LegislatorQuery>,
) -> AppResult<Json<Paginated<Legislator>>> {
    let conn = state.db.get()?;

    let mut sql = "SELECT id, tenant_id, external_id, first_name, last_name, block, province, active, chamber, term_start, term_end
                   FROM legislators WHERE tenant_id = ?1".to_string();
    let mut count_sql = "SELECT COUNT(*) FROM legislators WHERE tenant_id = ?1".to_string();

    if query.block_id.is_some() {
        sql.push_str(" AND block = ?"); // positional placeholders appended in order below
        count_sql.push_str(" AND block = ?");
    }
    if query.province_id.is_some() {
        sql.push_str(" AND province = ?");
        count_sql.push_str(" AND province = ?");
    }
    if query.search.is_some() {
        sql.push_str(" AND (first_name || ' ' || last_name) LIKE ?");
        count_sql.push_str(" AND (first_name || ' ' || last_name) LIKE ?");
    }
    if query.is_active.is_some() {
        sql.push_str(" AND active = ?");
        count_sql.push_str(" AND active = ?");
    }
    sql.push_str(" ORDER BY last_name, first_name LIMIT ? OFFSET ?");

    let mut bind: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(tenant_id.clone())];
    if let Some(v) = &query.block_id {
        bind.push(Box::new(v.clone()));
    }
    if let Some(v) = &query.province_id {
        bind.push(Box::new(v.clone()));
    }
    if let Some(v) = &query.search {
        bind.push(Box::new(format!("%{v}%")));
    }
    if let Some(v) = query.is_active {
        bind.push(Box::new(v as i64));
    }

    let count_params: Vec<&dyn rusqlite::ToSql> = bind.iter().map(|b| b.as_ref()).collect();
    let total: i64 = conn.query_row(&count_sql, count_params.as_slice(), |r| r.get(0))?;

    let limit = query.page.bounded_limit();
    let offset = query.page.offset();
    bind.push(Box::new(limit));
    bind.push(Box::new(offset));
    let list_params: Vec<&dyn rusqlite::ToSql> = bind.iter().map(|b| b.as_ref()).collect();

    let mut stmt = conn.prepare(&sql)?;
    let items: Vec<Legislator> =
        stmt.query_map(list_params.as_slice(), row_to_legislator)?.collect::<Result<_, _>>()?;

    Ok(Json(Paginated { items, page: query.page.page, limit, total }))
}

pub async fn get_legislator(
    State(state): State<AppState>,
    Extension(VerifiedTenant(tenant_id)): Extension<VerifiedTenant>,
    Path(id): Path<i64>,
) -> AppResult<Json<Legislator>> {
    let conn = state.db.get()?;
    let legislator = conn
        .query_row(
            "SELECT id, tenant_id, external_id, first_name, last_name, block, province, active, chamber, term_start, term_end
             FROM legislators WHERE id = ?1 AND tenant_id = ?2",
            params![id, tenant_id],
            row_to_legislator,
        )
        .map_err(|_| AppError::NotFound(format!("legislator {id}")))?;
    Ok(Json(legislator))
}

#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    pub period: Option<String>,
}

pub async fn get_legislator_metrics(
    State(state): State<AppState>,
    Extension(VerifiedTenant(tenant_id)): Extension<VerifiedTenant>,
    Path(id): Path<i64>,
    Query(query): Query<MetricsQuery>,
) -> AppResult<Json<LegislatorMetric>> {
    let period = query.period.unwrap_or_else(|| chrono::Utc::now().format("%Y").to_string());
    let conn = state.db.get()?;

    conn.query_row(
        "SELECT id FROM legislators WHERE id = ?1 AND tenant_id = ?2",
        params![id, tenant_id],
        |r| r.get::<_, i64>(0),
    )
    .map_err(|_| AppError::NotFound(format!("legislator {id}")))?;

    let metric = conn
        .query_row(
            "SELECT id, legislator_id, period, bills_authored, bills_cosigned, bills_with_advancement,
                    advancement_rate, attendance_rate, vote_participation_rate, commissions_count,
                    normalised_productivity, updated_at
             FROM legislator_metrics WHERE legislator_id = ?1 AND period = ?2",
            params![id, period],
            row_to_metric,
        )
        .map_err(|_| AppError::NotFound(format!("no metrics for legislator {id} in period {period}")))?;

    Ok(Json(metric))
}

#[derive(Debug, serde::Serialize)]
pub struct ActivityItem {
    pub kind: String,
    pub label: String,
    pub date: String,
}

pub async fn get_legislator_activity(
    State(state): State<AppState>,
    Extension(VerifiedTenant(tenant_id)): Extension<VerifiedTenant>,
    Path(id): Path<i64>,
    Query(page): Query<PageParams>,
) -> AppResult<Json<Paginated<ActivityItem>>> {
    let conn = state.db.get()?;

    conn.query_row(
        "SELECT id FROM legislators WHERE id = ?1 AND tenant_id = ?2",
        params![id, tenant_id],
        |r| r.get::<_, i64>(0),
    )
    .map_err(|_| AppError::NotFound(format!("legislator {id}")))?;

    let mut stmt = conn.prepare(
        "SELECT 'bill_authored' AS kind, b.title AS label, b.presented_date AS date
         FROM bill_authors ba JOIN bills b ON b.id = ba.bill_id WHERE ba.legislator_id = ?1
         UNION ALL
         SELECT 'attendance' AS kind, status AS label, session AS date FROM attendances WHERE legislator_id = ?1
         UNION ALL
         SELECT 'vote' AS kind, vote AS label, '' AS date FROM vote_results WHERE legislator_id = ?1
         ORDER BY date DESC LIMIT ?2 OFFSET ?3",
    )?;
    let limit = page.bounded_limit();
    let offset = page.offset();
    let items: Vec<ActivityItem> = stmt
        .query_map(params![id, limit, offset], |r| {
            Ok(ActivityItem { kind: r.get(0)?, label: r.get(1)?, date: r.get(2)? })
        })?
        .collect::<Result<_, _>>()?;
    drop(stmt);

    let total: i64 = conn.query_row(
        "SELECT (SELECT COUNT(*) FROM bill_authors WHERE legislator_id = ?1)
               + (SELECT COUNT(*) FROM attendances WHERE legislator_id = ?1)
               + (SELECT COUNT(*) FROM vote_results WHERE legislator_id = ?1)",
        params![id],
        |r| r.get(0),
    )?;

    Ok(Json(Paginated { items, page: page.page, limit, total }))
}

#[derive(Debug, Deserialize)]
pub struct BillQuery {
    #[serde(flatten)]
    pub page: PageParams,
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub bill_type: Option<String>,
    pub search: Option<String>,
    #[serde(rename = "authorId")]
    pub author_id: Option<i64>,
    pub period: Option<String>,
}

pub async fn list_bills(
    State(state): State<AppState>,
    Extension(VerifiedTenant(tenant_id)): Extension<VerifiedTenant>,
    Query(query): Query<BillQuery>,
) -> AppResult<Json<Paginated<Bill>>> {
    let conn = state.db.get()?;

    let joins = if query.author_id.is_some() { " JOIN bill_authors ba ON ba.bill_id = b.id" } else { "" };
    let mut sql = format!(
        "SELECT DISTINCT b.id, b.tenant_id, b.external_id, b.title, b.status, b.bill_type, b.presented_date, b.period
         FROM bills b{joins} WHERE b.tenant_id = ?1"
    );
    let mut count_sql = format!("SELECT COUNT(DISTINCT b.id) FROM bills b{joins} WHERE b.tenant_id = ?1");

    if query.status.is_some() {
        sql.push_str(" AND b.status = ?");
        count_sql.push_str(" AND b.status = ?");
    }
    if query.bill_type.is_some() {
        sql.push_str(" AND b.bill_type = ?");
        count_sql.push_str(" AND b.bill_type = ?");
    }
    if query.search.is_some() {
        sql.push_str(" AND b.title LIKE ?");
        count_sql.push_str(" AND b.title LIKE ?");
    }
    if query.author_id.is_some() {
        sql.push_str(" AND ba.legislator_id = ?");
        count_sql.push_str(" AND ba.legislator_id = ?");
    }
    if query.period.is_some() {
        sql.push_str(" AND b.period = ?");
        count_sql.push_str(" AND b.period = ?");
    }
    sql.push_str(" ORDER BY b.presented_date DESC LIMIT ? OFFSET ?");

    let mut bind: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(tenant_id.clone())];
    if let Some(v) = &query.status {
        bind.push(Box::new(v.clone()));
    }
    if let Some(v) = &query.bill_type {
        bind.push(Box::new(v.clone()));
    }
    if let Some(v) = &query.search {
        bind.push(Box::new(format!("%{v}%")));
    }
    if let Some(v) = query.author_id {
        bind.push(Box::new(v));
    }
    if let Some(v) = &query.period {
        bind.push(Box::new(v.clone()));
    }

    let count_params: Vec<&dyn rusqlite::ToSql> = bind.iter().map(|b| b.as_ref()).collect();
    let total: i64 = conn.query_row(&count_sql, count_params.as_slice(), |r| r.get(0))?;

    let limit = query.page.bounded_limit();
    let offset = query.page.offset();
    bind.push(Box::new(limit));
    bind.push(Box::new(offset));
    let list_params: Vec<&dyn rusqlite::ToSql> = bind.iter().map(|b| b.as_ref()).collect();

    let mut stmt = conn.prepare(&sql)?;
    let items: Vec<Bill> = stmt.query_map(list_params.as_slice(), row_to_bill)?.collect::<Result<_, _>>()?;

    Ok(Json(Paginated { items, page: query.page.page, limit, total }))
}

pub async fn get_bill(
    State(state): State<AppState>,
    Extension(VerifiedTenant(tenant_id)): Extension<VerifiedTenant>,
    Path(id): Path<i64>,
) -> AppResult<Json<Bill>> {
    let conn = state.db.get()?;
    let bill = conn
        .query_row(
            "SELECT id, tenant_id, external_id, title, status, bill_type, presented_date, period
             FROM bills WHERE id = ?1 AND tenant_id = ?2",
            params![id, tenant_id],
            row_to_bill,
        )
        .map_err(|_| AppError::NotFound(format!("bill {id}")))?;
    Ok(Json(bill))
}

fn row_to_legislator(row: &rusqlite::Row) -> rusqlite::Result<Legislator> {
    Ok(Legislator {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        external_id: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        block: row.get(5)?,
        province: row.get(6)?,
        active: row.get::<_, i64>(7)? != 0,
        chamber: row.get(8)?,
        term_start: row.get(9)?,
        term_end: row.get(10)?,
    })
}

fn row_to_bill(row: &rusqlite::Row) -> rusqlite::Result<Bill> {
    let status: String = row.get(4)?;
    Ok(Bill {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        external_id: row.get(2)?,
        title: row.get(3)?,
        status: BillStatus::from_str(&status).unwrap_or(BillStatus::Presented),
        bill_type: row.get(5)?,
        presented_date: row.get(6)?,
        period: row.get(7)?,
    })
}

fn row_to_metric(row: &rusqlite::Row) -> rusqlite::Result<LegislatorMetric> {
    Ok(LegislatorMetric {
        id: row.get(0)?,
        legislator_id: row.get(1)?,
        period: row.get(2)?,
        bills_authored: row.get(3)?,
        bills_cosigned: row.get(4)?,
        bills_with_advancement: row.get(5)?,
        advancement_rate: row.get(6)?,
        attendance_rate: row.get(7)?,
        vote_participation_rate: row.get(8)?,
        commissions_count: row.get(9)?,
        normalised_productivity: row.get(10)?,
        updated_at: row.get(11)?,
    })
}
