//! Schema as data, not an ORM mapping — matching the teacher's
//! `signals/db_storage.rs` style of a single embedded `SCHEMA_SQL` string.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS tenants (
    id TEXT PRIMARY KEY,
    plan_tier TEXT NOT NULL DEFAULT 'free',
    solve_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS connections (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    source_domain TEXT NOT NULL UNIQUE,
    token TEXT NOT NULL,
    scopes TEXT NOT NULL,
    last_sync TEXT,
    sync_status TEXT NOT NULL DEFAULT 'pending',
    strike_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_connections_tenant ON connections(tenant_id);

CREATE TABLE IF NOT EXISTS ingestion_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    source_name TEXT NOT NULL,
    data_type TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    status TEXT NOT NULL DEFAULT 'running',
    records_processed INTEGER NOT NULL DEFAULT 0,
    records_skipped INTEGER NOT NULL DEFAULT 0,
    records_errored INTEGER NOT NULL DEFAULT 0,
    error_detail TEXT
);
CREATE INDEX IF NOT EXISTS idx_ingestion_runs_tenant ON ingestion_runs(tenant_id);

CREATE TABLE IF NOT EXISTS source_refs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    source_key TEXT NOT NULL,
    data_type TEXT NOT NULL,
    checksum TEXT NOT NULL,
    blob_location TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    ingestion_run_id INTEGER NOT NULL REFERENCES ingestion_runs(id) ON DELETE CASCADE,
    status TEXT NOT NULL DEFAULT 'ok'
);
CREATE INDEX IF NOT EXISTS idx_source_refs_lookup ON source_refs(tenant_id, source_key, checksum);

CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    external_id TEXT NOT NULL,
    title TEXT NOT NULL,
    vendor TEXT,
    variants_json TEXT NOT NULL DEFAULT '[]',
    unit_cost REAL,
    price REAL,
    inventory_quantity INTEGER NOT NULL DEFAULT 0,
    tags TEXT NOT NULL DEFAULT '',
    source_ref_id INTEGER REFERENCES source_refs(id),
    UNIQUE(tenant_id, external_id)
);

CREATE TABLE IF NOT EXISTS orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    external_id TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    total REAL NOT NULL,
    status TEXT NOT NULL,
    line_items_json TEXT NOT NULL DEFAULT '[]',
    customer_email TEXT,
    order_date TEXT NOT NULL,
    source_ref_id INTEGER REFERENCES source_refs(id),
    UNIQUE(tenant_id, external_id)
);

CREATE TABLE IF NOT EXISTS inventory_levels (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    variant_id TEXT NOT NULL,
    location_id TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    source_ref_id INTEGER REFERENCES source_refs(id),
    UNIQUE(tenant_id, variant_id, location_id)
);

CREATE TABLE IF NOT EXISTS legislators (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    external_id TEXT NOT NULL,
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL,
    block TEXT,
    province TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    chamber TEXT NOT NULL,
    term_start TEXT NOT NULL,
    term_end TEXT,
    source_ref_id INTEGER REFERENCES source_refs(id),
    UNIQUE(tenant_id, external_id)
);
CREATE INDEX IF NOT EXISTS idx_legislators_tenant ON legislators(tenant_id);

CREATE TABLE IF NOT EXISTS bills (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    external_id TEXT NOT NULL,
    title TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'PRESENTED',
    bill_type TEXT NOT NULL,
    presented_date TEXT NOT NULL,
    period TEXT NOT NULL,
    source_ref_id INTEGER REFERENCES source_refs(id),
    UNIQUE(tenant_id, external_id)
);
CREATE INDEX IF NOT EXISTS idx_bills_tenant ON bills(tenant_id);

CREATE TABLE IF NOT EXISTS bill_movements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    bill_id INTEGER NOT NULL REFERENCES bills(id) ON DELETE CASCADE,
    order_index INTEGER NOT NULL,
    description TEXT NOT NULL,
    from_status TEXT NOT NULL,
    to_status TEXT NOT NULL,
    movement_date TEXT NOT NULL,
    UNIQUE(bill_id, order_index)
);

CREATE TABLE IF NOT EXISTS bill_authors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    bill_id INTEGER NOT NULL REFERENCES bills(id) ON DELETE CASCADE,
    legislator_id INTEGER NOT NULL REFERENCES legislators(id) ON DELETE CASCADE,
    role TEXT NOT NULL,
    UNIQUE(bill_id, legislator_id, role)
);
CREATE INDEX IF NOT EXISTS idx_bill_authors_legislator ON bill_authors(legislator_id);

CREATE TABLE IF NOT EXISTS vote_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    external_id TEXT NOT NULL,
    session TEXT NOT NULL,
    period TEXT NOT NULL,
    title TEXT NOT NULL,
    affirmative INTEGER NOT NULL DEFAULT 0,
    negative INTEGER NOT NULL DEFAULT 0,
    abstention INTEGER NOT NULL DEFAULT 0,
    absent INTEGER NOT NULL DEFAULT 0,
    result TEXT NOT NULL DEFAULT '',
    source_ref_id INTEGER REFERENCES source_refs(id),
    UNIQUE(tenant_id, external_id)
);

CREATE TABLE IF NOT EXISTS vote_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    vote_event_id INTEGER NOT NULL REFERENCES vote_events(id) ON DELETE CASCADE,
    legislator_id INTEGER NOT NULL REFERENCES legislators(id) ON DELETE CASCADE,
    vote TEXT NOT NULL,
    UNIQUE(vote_event_id, legislator_id)
);
CREATE INDEX IF NOT EXISTS idx_vote_results_legislator ON vote_results(legislator_id);

CREATE TABLE IF NOT EXISTS attendances (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    session TEXT NOT NULL,
    period TEXT NOT NULL,
    legislator_id INTEGER NOT NULL REFERENCES legislators(id) ON DELETE CASCADE,
    status TEXT NOT NULL,
    UNIQUE(tenant_id, session, legislator_id)
);
CREATE INDEX IF NOT EXISTS idx_attendances_legislator ON attendances(legislator_id);

CREATE TABLE IF NOT EXISTS commissions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    external_id TEXT NOT NULL,
    name TEXT NOT NULL,
    UNIQUE(tenant_id, external_id)
);

CREATE TABLE IF NOT EXISTS commission_members (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    commission_id INTEGER NOT NULL REFERENCES commissions(id) ON DELETE CASCADE,
    legislator_id INTEGER NOT NULL REFERENCES legislators(id) ON DELETE CASCADE,
    UNIQUE(commission_id, legislator_id)
);

CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    external_id TEXT NOT NULL,
    held_at TEXT NOT NULL,
    UNIQUE(tenant_id, external_id)
);

CREATE TABLE IF NOT EXISTS legislator_metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    legislator_id INTEGER NOT NULL REFERENCES legislators(id) ON DELETE CASCADE,
    period TEXT NOT NULL,
    bills_authored INTEGER NOT NULL DEFAULT 0,
    bills_cosigned INTEGER NOT NULL DEFAULT 0,
    bills_with_advancement INTEGER NOT NULL DEFAULT 0,
    advancement_rate REAL NOT NULL DEFAULT 0,
    attendance_rate REAL NOT NULL DEFAULT 0,
    vote_participation_rate REAL NOT NULL DEFAULT 0,
    commissions_count INTEGER NOT NULL DEFAULT 0,
    normalised_productivity REAL NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL,
    UNIQUE(legislator_id, period)
);

CREATE TABLE IF NOT EXISTS analyses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    module TEXT NOT NULL,
    input_snapshot TEXT NOT NULL,
    output_snapshot TEXT NOT NULL,
    insight_text TEXT NOT NULL,
    source_tag TEXT NOT NULL DEFAULT 'shopify_auto',
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_analyses_tenant ON analyses(tenant_id);

CREATE TABLE IF NOT EXISTS feed_posts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT REFERENCES tenants(id) ON DELETE CASCADE,
    post_type TEXT NOT NULL,
    title TEXT NOT NULL,
    body TEXT NOT NULL,
    payload_json TEXT NOT NULL DEFAULT '{}',
    entity_type TEXT,
    entity_id INTEGER,
    tags TEXT NOT NULL DEFAULT '',
    source_ref_id INTEGER REFERENCES source_refs(id),
    auto_generated INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_feed_posts_tenant ON feed_posts(tenant_id);
CREATE INDEX IF NOT EXISTS idx_feed_posts_type ON feed_posts(post_type);

CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    queue TEXT NOT NULL,
    job_name TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    dedup_key TEXT,
    tenant_id TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    attempts_remaining INTEGER NOT NULL DEFAULT 3,
    backoff_seed_ms INTEGER NOT NULL DEFAULT 30000,
    run_after TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(queue, dedup_key)
);
CREATE INDEX IF NOT EXISTS idx_jobs_poll ON jobs(queue, status, run_after);

CREATE TABLE IF NOT EXISTS schedule_state (
    schedule_name TEXT PRIMARY KEY,
    last_fired_at TEXT
);
"#;

pub fn apply(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}
