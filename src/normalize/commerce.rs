//! Commerce upsert rules (§4.5 "Specific rules").

use super::{NormalizeCtx, NormalizeOutcome, Normalizer, Transition};
use crate::adapters::RawPayload;
use crate::error::{AppError, AppResult};
use rusqlite::{params, OptionalExtension};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ShopifyVariant {
    id: serde_json::Value,
    title: String,
    price: Option<String>,
    #[serde(default)]
    inventory_quantity: i64,
}

#[derive(Debug, Deserialize)]
struct ShopifyProduct {
    id: serde_json::Value,
    title: String,
    vendor: Option<String>,
    #[serde(default)]
    variants: Vec<ShopifyVariant>,
    #[serde(default)]
    tags: String,
}

#[derive(Debug, Deserialize)]
struct ShopifyProductsPayload {
    products: Vec<ShopifyProduct>,
}

#[derive(Debug, Deserialize)]
struct ShopifyLineItem {
    product_id: Option<serde_json::Value>,
    variant_id: Option<serde_json::Value>,
    #[serde(default)]
    quantity: i64,
    price: String,
}

#[derive(Debug, Deserialize)]
struct ShopifyOrder {
    id: serde_json::Value,
    order_number: i64,
    total_price: String,
    financial_status: Option<String>,
    #[serde(default)]
    line_items: Vec<ShopifyLineItem>,
    email: Option<String>,
    created_at: String,
}

#[derive(Debug, Deserialize)]
struct ShopifyOrdersPayload {
    orders: Vec<ShopifyOrder>,
}

fn value_to_external_id(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub struct ProductNormalizer;

impl Normalizer for ProductNormalizer {
    fn normalize(&self, raw: RawPayload, ctx: &NormalizeCtx) -> AppResult<NormalizeOutcome> {
        let parsed: ShopifyProductsPayload = serde_json::from_value(raw.payload)
            .map_err(|e| AppError::SourceSchema(format!("product payload mismatch: {e}")))?;

        let mut outcome = NormalizeOutcome::default();
        let conn = ctx.db.get()?;

        for product in parsed.products {
            let external_id = value_to_external_id(&product.id);
            let inventory_quantity: i64 = product.variants.iter().map(|v| v.inventory_quantity).sum();
            let variants_json = serde_json::to_string(
                &product
                    .variants
                    .iter()
                    .map(|v| {
                        serde_json::json!({
                            "id": value_to_external_id(&v.id),
                            "title": v.title,
                            "price": v.price.as_ref().and_then(|p| p.parse::<f64>().ok()),
                            "quantity": v.inventory_quantity,
                        })
                    })
                    .collect::<Vec<_>>(),
            )?;
            let tags_csv = product.tags;

            conn.execute(
                "INSERT INTO products (tenant_id, external_id, title, vendor, variants_json, inventory_quantity, tags, source_ref_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(tenant_id, external_id) DO UPDATE SET
                   title = excluded.title,
                   vendor = excluded.vendor,
                   variants_json = excluded.variants_json,
                   inventory_quantity = excluded.inventory_quantity,
                   tags = excluded.tags,
                   source_ref_id = excluded.source_ref_id",
                params![
                    ctx.tenant_id,
                    external_id,
                    product.title,
                    product.vendor,
                    variants_json,
                    inventory_quantity,
                    tags_csv,
                    ctx.source_ref_id,
                ],
            )?;

            outcome.affected.insert(format!("product:{}:{external_id}", ctx.tenant_id));
        }

        Ok(outcome)
    }
}

pub struct OrderNormalizer;

impl Normalizer for OrderNormalizer {
    fn normalize(&self, raw: RawPayload, ctx: &NormalizeCtx) -> AppResult<NormalizeOutcome> {
        let parsed: ShopifyOrdersPayload = serde_json::from_value(raw.payload)
            .map_err(|e| AppError::SourceSchema(format!("order payload mismatch: {e}")))?;

        let mut outcome = NormalizeOutcome::default();
        let conn = ctx.db.get()?;

        for order in parsed.orders {
            let external_id = value_to_external_id(&order.id);

            let pre_existing: Option<i64> = conn
                .query_row(
                    "SELECT id FROM orders WHERE tenant_id = ?1 AND external_id = ?2",
                    params![ctx.tenant_id, external_id],
                    |row| row.get(0),
                )
                .optional()?;

            let total: f64 = order.total_price.parse().unwrap_or(0.0);
            let line_items_json = serde_json::to_string(
                &order
                    .line_items
                    .iter()
                    .map(|li| {
                        serde_json::json!({
                            "product_external_id": li.product_id.as_ref().map(value_to_external_id),
                            "variant_external_id": li.variant_id.as_ref().map(value_to_external_id),
                            "quantity": li.quantity,
                            "price": li.price.parse::<f64>().unwrap_or(0.0),
                        })
                    })
                    .collect::<Vec<_>>(),
            )?;

            conn.execute(
                "INSERT INTO orders (tenant_id, external_id, ordinal, total, status, line_items_json, customer_email, order_date, source_ref_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(tenant_id, external_id) DO UPDATE SET
                   ordinal = excluded.ordinal,
                   total = excluded.total,
                   status = excluded.status,
                   line_items_json = excluded.line_items_json,
                   customer_email = excluded.customer_email,
                   order_date = excluded.order_date,
                   source_ref_id = excluded.source_ref_id",
                params![
                    ctx.tenant_id,
                    external_id,
                    order.order_number,
                    total,
                    order.financial_status.unwrap_or_else(|| "pending".to_string()),
                    line_items_json,
                    order.email,
                    order.created_at,
                    ctx.source_ref_id,
                ],
            )?;

            let order_id: i64 = conn.query_row(
                "SELECT id FROM orders WHERE tenant_id = ?1 AND external_id = ?2",
                params![ctx.tenant_id, external_id],
                |row| row.get(0),
            )?;

            if pre_existing.is_none() {
                outcome.transitions.push(Transition::OrderCreated { order_id });
            }

            outcome.affected.insert(format!("analysis:{}", ctx.tenant_id));
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;

    fn seed_tenant(conn: &rusqlite::Connection) {
        conn.execute("INSERT INTO tenants (id, plan_tier, created_at) VALUES ('t1','free','2026-01-01')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO ingestion_runs (tenant_id, source_name, data_type, started_at, status) VALUES ('t1','shopify','products','2026-01-01','running')",
            [],
        )
        .unwrap();
    }

    #[test]
    fn product_upsert_is_idempotent_on_external_id() {
        let pool = connect_in_memory().unwrap();
        { let conn = pool.get().unwrap(); seed_tenant(&conn); }

        let payload = serde_json::json!({
            "products": [{"id": "P1", "title": "Mug", "vendor": "Acme", "variants": [{"id": "V1", "title": "Default", "price": "9.99", "inventory_quantity": 5}], "tags": "kitchen"}]
        });
        let ctx = NormalizeCtx { db: &pool, tenant_id: "t1", source_ref_id: 1 };

        ProductNormalizer.normalize(RawPayload { data_type: "products".into(), payload: payload.clone() }, &ctx).unwrap();
        ProductNormalizer.normalize(RawPayload { data_type: "products".into(), payload }, &ctx).unwrap();

        let conn = pool.get().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM products WHERE tenant_id = 't1'", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn order_transition_fires_only_on_first_sight() {
        let pool = connect_in_memory().unwrap();
        { let conn = pool.get().unwrap(); seed_tenant(&conn); }

        let payload = serde_json::json!({
            "orders": [{"id": "O1", "order_number": 1001, "total_price": "25.00", "financial_status": "paid", "line_items": [], "email": "a@b.com", "created_at": "2026-01-01T00:00:00Z"}]
        });
        let ctx = NormalizeCtx { db: &pool, tenant_id: "t1", source_ref_id: 1 };

        let first = OrderNormalizer.normalize(RawPayload { data_type: "orders".into(), payload: payload.clone() }, &ctx).unwrap();
        assert_eq!(first.transitions.len(), 1);

        let second = OrderNormalizer.normalize(RawPayload { data_type: "orders".into(), payload }, &ctx).unwrap();
        assert!(second.transitions.is_empty());
    }
}
