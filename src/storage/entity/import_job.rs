use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 已结束的导入任务，进程重启后仍可按 job_id 查询
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "import_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub job_id: String,
    pub status: String, // completed / failed
    // unix 毫秒
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub total_records: i64,
    pub new_records: i64,
    pub duplicate_records: i64,
    pub failed_records: i64,
    pub pages_processed: i32,
    pub pages_failed: i32,
    pub expected_records: Option<i64>,
    pub max_pages: Option<i64>,
    pub data_status: Option<String>,
    pub error: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
