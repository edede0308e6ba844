use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 井产量表，复合主键 (well_code, field_code, production_period)
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "well_production")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub well_code: i64,
    #[sea_orm(primary_key, auto_increment = false)]
    pub field_code: i64,
    #[sea_orm(primary_key, auto_increment = false)]
    pub production_period: String,
    pub field_name: String,
    pub well_reference: String,
    pub well_name: String,
    pub days_on_production: i64,
    pub oil_production_kbd: f64,
    pub gas_production_mmcfd: f64,
    pub liquids_production_kbd: f64,
    pub water_production_kbd: f64,
    pub data_source: String,
    pub source_data: String,
    #[sea_orm(column_name = "partition_0")]
    pub partition: String,
    // unix 秒
    #[sea_orm(nullable)]
    pub created_at: Option<i64>,
    #[sea_orm(nullable)]
    pub updated_at: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
