//! Commerce analysis engine (§4.6.2).
//!
//! Grounded on `vault/kelly.rs`'s confidence/priority scoring pattern
//! (a pure function over a small params struct producing a result struct
//! with a priority tier) generalised from one formula to the four-module
//! applicability table.

use crate::db::DbPool;
use crate::error::AppResult;
use crate::models::analysis::Priority;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantCostParams {
    pub ordering_cost: Option<f64>,
    pub holding_cost_pct: Option<f64>,
    pub fixed_costs: Option<f64>,
    pub opening_balance: Option<f64>,
    pub lead_time_days: Option<f64>,
}

struct ProductFigures {
    external_id: String,
    title: String,
    price: Option<f64>,
    unit_cost: Option<f64>,
    inventory_quantity: i64,
    units_sold: i64,
    revenue: f64,
}

#[derive(Debug, Serialize)]
pub struct ModuleResult {
    pub module: &'static str,
    pub applicable: bool,
    pub priority: Priority,
    pub confidence: f64,
    pub inputs: serde_json::Value,
    /// Cost-parameter names still needed before this module can compute at
    /// full confidence (§8 Scenario 4). Empty when nothing is missing.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<String>,
    pub insights: String,
}

#[derive(Debug, Serialize)]
pub struct AnalysisBundle {
    pub modules: Vec<ModuleResult>,
    pub general_insights: String,
    pub recommendations: Vec<String>,
    pub missing_data: Vec<serde_json::Value>,
}

/// Pure function of the tenant's current raw state plus cost overrides.
/// Does not persist anything — callers that need the §4.6.2 "Persistence"
/// behavior insert one `Analysis` row per module themselves.
pub fn run_analysis(db: &DbPool, tenant_id: &str, costs: &TenantCostParams) -> AppResult<AnalysisBundle> {
    let conn = db.get()?;

    let mut stmt = conn.prepare(
        "SELECT external_id, title, price, unit_cost, inventory_quantity, variants_json FROM products WHERE tenant_id = ?1",
    )?;
    let products: Vec<(String, String, Option<f64>, Option<f64>, i64)> = stmt
        .query_map(params![tenant_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<f64>>(2)?,
                r.get::<_, Option<f64>>(3)?,
                r.get::<_, i64>(4)?,
            ))
        })?
        .collect::<Result<_, _>>()?;

    let mut figures = Vec::with_capacity(products.len());
    for (external_id, title, price, unit_cost, inventory_quantity) in products {
        let (units_sold, revenue): (i64, f64) = conn.query_row(
            "SELECT COALESCE(SUM(json_extract(li.value, '$.quantity')), 0),
                    COALESCE(SUM(json_extract(li.value, '$.quantity') * json_extract(li.value, '$.price')), 0.0)
             FROM orders, json_each(orders.line_items_json) AS li
             WHERE orders.tenant_id = ?1 AND json_extract(li.value, '$.product_external_id') = ?2",
            params![tenant_id, external_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;

        figures.push(ProductFigures {
            external_id,
            title,
            price,
            unit_cost,
            inventory_quantity,
            units_sold,
            revenue,
        });
    }

    let months_of_orders: i64 = conn.query_row(
        "SELECT COUNT(DISTINCT substr(order_date, 1, 7)) FROM orders WHERE tenant_id = ?1",
        params![tenant_id],
        |r| r.get(0),
    )?;

    let mut missing_data = Vec::new();
    let mut modules = Vec::new();

    modules.push(margin_module(&figures, costs, &mut missing_data));
    modules.push(stock_module(&figures, costs, &mut missing_data));
    modules.push(forecast_module(months_of_orders, &mut missing_data));
    modules.push(cashflow_module(&figures, costs, &mut missing_data));

    let inventory_value: f64 = figures
        .iter()
        .map(|p| p.unit_cost.unwrap_or(0.0) * p.inventory_quantity as f64)
        .sum();
    let total_sold: i64 = figures.iter().map(|p| p.units_sold).sum();
    let general_insights = format!(
        "Catalog of {} products; inventory value ${:.2}; {} units sold to date.",
        figures.len(),
        inventory_value,
        total_sold
    );

    let out_of_stock: Vec<&str> = figures
        .iter()
        .filter(|p| p.inventory_quantity == 0)
        .map(|p| p.title.as_str())
        .collect();
    let mut recommendations = Vec::new();
    if !out_of_stock.is_empty() {
        recommendations.push(format!(
            "{} products out of stock: {}",
            out_of_stock.len(),
            out_of_stock.join(", ")
        ));
    }

    Ok(AnalysisBundle { modules, general_insights, recommendations, missing_data })
}

fn margin_module(
    figures: &[ProductFigures],
    _costs: &TenantCostParams,
    missing_data: &mut Vec<serde_json::Value>,
) -> ModuleResult {
    let priced: Vec<&ProductFigures> = figures.iter().filter(|p| p.price.is_some()).collect();
    let applicable = !priced.is_empty();
    let known_cost_count = priced.iter().filter(|p| p.unit_cost.is_some()).count();

    if applicable && known_cost_count == 0 {
        missing_data.push(json!({ "field": "cost_per_item", "blocks": ["MARGIN"] }));
    }

    let priority = if known_cost_count > 0 { Priority::High } else { Priority::Medium };
    let list: Vec<_> = priced
        .iter()
        .map(|p| json!({ "name": p.title, "price": p.price, "cost": p.unit_cost, "volume": p.units_sold }))
        .collect();

    ModuleResult {
        module: "MARGIN",
        applicable,
        priority,
        confidence: if known_cost_count > 0 { 0.8 } else { 0.3 },
        inputs: json!({ "products": list }),
        needs: if known_cost_count == 0 && applicable { vec!["cost_per_item".to_string()] } else { vec![] },
        insights: if applicable {
            format!("{known_cost_count} of {} priced products have a known cost basis.", priced.len())
        } else {
            "No priced products yet.".to_string()
        },
    }
}

fn stock_module(
    figures: &[ProductFigures],
    costs: &TenantCostParams,
    missing_data: &mut Vec<serde_json::Value>,
) -> ModuleResult {
    let applicable = !figures.is_empty();
    let has_cost_inputs = costs.ordering_cost.is_some() && costs.holding_cost_pct.is_some();

    let mut needs = Vec::new();
    if applicable {
        if costs.ordering_cost.is_none() {
            missing_data.push(json!({ "field": "ordering_cost", "blocks": ["STOCK"] }));
            needs.push("ordering_cost".to_string());
        }
        if costs.holding_cost_pct.is_none() {
            missing_data.push(json!({ "field": "holding_cost_pct", "blocks": ["STOCK"] }));
            needs.push("holding_cost_pct".to_string());
        }
    }

    let top = figures.iter().max_by_key(|p| p.inventory_quantity);

    // "prefer observed units_sold * 12 ... fall back to current_inventory * 4" (§4.6.2).
    let (demand, product_name) = match top {
        Some(p) if p.units_sold > 0 => (p.units_sold as f64 * 12.0, p.title.clone()),
        Some(p) => (p.inventory_quantity as f64 * 4.0, p.title.clone()),
        None => (0.0, String::new()),
    };

    ModuleResult {
        module: "STOCK",
        applicable,
        priority: if has_cost_inputs { Priority::High } else { Priority::Medium },
        confidence: if has_cost_inputs { 0.7 } else { 0.35 },
        inputs: if has_cost_inputs {
            json!({
                "d_annual_demand": demand,
                "k_ordering_cost": costs.ordering_cost,
                "h_holding_cost": costs.holding_cost_pct.zip(top.and_then(|p| p.unit_cost)).map(|(pct, cost)| pct * cost),
                "l_lead_time": costs.lead_time_days,
                "product_name": product_name,
            })
        } else {
            serde_json::Value::Null
        },
        needs,
        insights: "Reorder point estimated from observed and inferred demand.".to_string(),
    }
}

fn forecast_module(months_of_orders: i64, missing_data: &mut Vec<serde_json::Value>) -> ModuleResult {
    let applicable = months_of_orders >= 3;
    if !applicable {
        missing_data.push(json!({ "field": "order_history", "blocks": ["FORECAST"] }));
    }

    ModuleResult {
        module: "FORECAST",
        applicable,
        priority: if applicable { Priority::Medium } else { Priority::Low },
        confidence: if applicable { 0.6 } else { 0.2 },
        inputs: json!({ "months_observed": months_of_orders, "method": "auto" }),
        needs: if applicable { vec![] } else { vec!["order_history".to_string()] },
        insights: if applicable {
            "Sufficient order history for a monthly forecast.".to_string()
        } else {
            "Fewer than 3 months of order history; forecast is low confidence.".to_string()
        },
    }
}

fn cashflow_module(
    figures: &[ProductFigures],
    costs: &TenantCostParams,
    missing_data: &mut Vec<serde_json::Value>,
) -> ModuleResult {
    let applicable = !figures.is_empty();
    if costs.opening_balance.is_none() {
        missing_data.push(json!({ "field": "opening_balance", "blocks": ["CASHFLOW"] }));
    }

    let avg_inflow: f64 = if figures.is_empty() {
        0.0
    } else {
        figures.iter().map(|p| p.revenue).sum::<f64>() / figures.len() as f64
    };

    ModuleResult {
        module: "CASHFLOW",
        applicable,
        priority: Priority::Medium,
        confidence: 0.5,
        inputs: json!({
            "opening_balance": costs.opening_balance.unwrap_or(0.0),
            "periods": 6,
            "inflows": [avg_inflow],
            "outflows": [costs.fixed_costs.unwrap_or(0.0)],
        }),
        needs: if costs.opening_balance.is_none() { vec!["opening_balance".to_string()] } else { vec![] },
        insights: "Six-period projection from average per-product revenue and fixed costs.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;

    fn seed_products_without_cost(conn: &rusqlite::Connection) {
        conn.execute("INSERT INTO tenants (id, plan_tier, created_at) VALUES ('t1','free','2026-01-01')", []).unwrap();
        for (ext_id, title) in [("P1", "Mug"), ("P2", "Plate"), ("P3", "Bowl")] {
            conn.execute(
                "INSERT INTO products (tenant_id, external_id, title, price, inventory_quantity, variants_json, tags)
                 VALUES ('t1', ?1, ?2, 9.99, 10, '[]', '')",
                params![ext_id, title],
            )
            .unwrap();
        }
    }

    #[test]
    fn missing_cost_inputs_surface_as_medium_priority_with_named_fields() {
        let pool = connect_in_memory().unwrap();
        { let conn = pool.get().unwrap(); seed_products_without_cost(&conn); }

        let bundle = run_analysis(&pool, "t1", &TenantCostParams::default()).unwrap();

        let margin = bundle.modules.iter().find(|m| m.module == "MARGIN").unwrap();
        assert!(margin.applicable);
        assert!(matches!(margin.priority, Priority::Medium));

        let stock = bundle.modules.iter().find(|m| m.module == "STOCK").unwrap();
        assert!(stock.applicable);
        assert!(matches!(stock.priority, Priority::Medium));
        assert_eq!(stock.inputs, serde_json::Value::Null);
        assert!(stock.needs.contains(&"ordering_cost".to_string()));
        assert!(stock.needs.contains(&"holding_cost_pct".to_string()));

        let fields: Vec<String> = bundle
            .missing_data
            .iter()
            .filter_map(|m| m.get("field").and_then(|f| f.as_str()).map(String::from))
            .collect();
        assert!(fields.contains(&"cost_per_item".to_string()));
        assert!(fields.contains(&"ordering_cost".to_string()));
    }
}
