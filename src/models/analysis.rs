//! Analysis — derived commerce entity, §4.6.2.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisModule {
    Stock,
    Forecast,
    Margin,
    Cashflow,
}

impl AnalysisModule {
    pub fn as_str(&self) -> &str {
        match self {
            AnalysisModule::Stock => "STOCK",
            AnalysisModule::Forecast => "FORECAST",
            AnalysisModule::Margin => "MARGIN",
            AnalysisModule::Cashflow => "CASHFLOW",
        }
    }

    pub fn all() -> [AnalysisModule; 4] {
        [
            AnalysisModule::Margin,
            AnalysisModule::Stock,
            AnalysisModule::Forecast,
            AnalysisModule::Cashflow,
        ]
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub id: i64,
    pub tenant_id: String,
    pub module: AnalysisModule,
    pub input_snapshot: serde_json::Value,
    pub output_snapshot: serde_json::Value,
    pub insight_text: String,
    pub source_tag: String,
    pub created_at: String,
}
