use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 自然键：(well_code, field_code, production_period)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NaturalKey {
    pub well_code: i64,
    pub field_code: i64,
    pub production_period: String,
}

impl NaturalKey {
    pub fn new(well_code: i64, field_code: i64, production_period: impl Into<String>) -> Self {
        Self {
            well_code,
            field_code,
            production_period: production_period.into(),
        }
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "well={} field={} period={}",
            self.well_code, self.field_code, self.production_period
        )
    }
}

/// 单井单周期的产量记录
///
/// 字段顺序即 CSV 导出的列顺序。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionRecord {
    pub field_code: i64,
    pub field_name: String,
    pub well_code: i64,
    pub well_reference: String,
    pub well_name: String,
    pub production_period: String,
    pub days_on_production: i64,
    pub oil_kbd: f64,
    pub gas_mmcfd: f64,
    pub liquids_kbd: f64,
    pub water_kbd: f64,
    pub data_source: String,
    pub source_data: String,
    pub partition: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProductionRecord {
    pub fn key(&self) -> NaturalKey {
        NaturalKey::new(self.well_code, self.field_code, self.production_period.clone())
    }

    /// 液体总产量（油 + 凝析液 + 水），单位 kbd
    pub fn total_production(&self) -> f64 {
        self.oil_kbd + self.liquids_kbd + self.water_kbd
    }

    pub fn is_producing(&self) -> bool {
        self.days_on_production > 0
    }
}
