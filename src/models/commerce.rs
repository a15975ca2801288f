//! Commerce raw-domain entities (§3 "Commerce").

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub id: String,
    pub title: String,
    pub price: Option<f64>,
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub tenant_id: String,
    pub external_id: String,
    pub title: String,
    pub vendor: Option<String>,
    pub variants: Vec<Variant>,
    pub unit_cost: Option<f64>,
    pub price: Option<f64>,
    /// Sum of its variants' quantities at upsert time (§4.5).
    pub inventory_quantity: i64,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub product_external_id: Option<String>,
    pub variant_external_id: Option<String>,
    pub quantity: i64,
    pub price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub tenant_id: String,
    pub external_id: String,
    pub ordinal: i64,
    pub total: f64,
    pub status: String,
    pub line_items: Vec<LineItem>,
    pub customer_email: Option<String>,
    pub order_date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryLevel {
    pub id: i64,
    pub tenant_id: String,
    pub variant_id: String,
    pub location_id: String,
    pub quantity: i64,
}
