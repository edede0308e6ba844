use crate::model::{NaturalKey, ProductionRecord};
use crate::storage::entity::well_production::{
    ActiveModel as WellProductionActiveModel, Column as WellProductionColumn,
    Entity as WellProduction, Model as WellProductionModel,
};
use crate::storage::StorageError;
use chrono::{DateTime, Utc};
use log::{debug, info};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    FromQueryResult, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    TransactionTrait,
};
use serde::Serialize;
use std::collections::HashSet;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

// 每条 OR 子句 3 个绑定参数，250 个键 = 750 个参数
const KEY_LOOKUP_CHUNK: usize = 250;
// 每行 16 列
const UPSERT_CHUNK: usize = 200;

pub const CSV_HEADERS: [&str; 16] = [
    "field_code",
    "field_name",
    "well_code",
    "well_reference",
    "well_name",
    "production_period",
    "days_on_production",
    "oil_production_kbd",
    "gas_production_mmcfd",
    "liquids_production_kbd",
    "water_production_kbd",
    "data_source",
    "source_data",
    "partition_0",
    "created_at",
    "updated_at",
];

pub struct ProductionRepository;

#[derive(Debug, Clone, FromQueryResult)]
struct KeyRow {
    well_code: i64,
    field_code: i64,
    production_period: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, FromQueryResult)]
pub struct ProductionStats {
    pub total_records: i64,
    pub total_wells: i64,
    pub total_fields: i64,
    pub active_wells: i64,
    pub total_oil_kbd: f64,
    pub total_gas_mmcfd: f64,
    pub total_liquids_kbd: f64,
    pub total_water_kbd: f64,
    pub avg_oil_kbd: f64,
    pub avg_gas_mmcfd: f64,
    pub avg_liquids_kbd: f64,
    pub avg_water_kbd: f64,
    pub first_period: Option<String>,
    pub last_period: Option<String>,
}

/// 周期闭区间，两端都可省略；按存储的周期字符串比较（走 production_period 索引）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeriodRange {
    pub start: Option<String>,
    pub end: Option<String>,
}

impl PeriodRange {
    pub fn new(start: Option<String>, end: Option<String>) -> Self {
        Self { start, end }
    }

    fn condition(&self) -> Condition {
        let period = WellProductionColumn::ProductionPeriod;
        match (&self.start, &self.end) {
            (Some(start), Some(end)) => {
                Condition::all().add(period.between(start.clone(), end.clone()))
            }
            (Some(start), None) => Condition::all().add(period.gte(start.clone())),
            (None, Some(end)) => Condition::all().add(period.lte(end.clone())),
            (None, None) => Condition::all(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordPage {
    pub items: Vec<ProductionRecord>,
    pub total: u64,
    pub page: u64,
    pub size: u64,
    pub pages: u64,
}

impl From<WellProductionModel> for ProductionRecord {
    fn from(model: WellProductionModel) -> Self {
        Self {
            field_code: model.field_code,
            field_name: model.field_name,
            well_code: model.well_code,
            well_reference: model.well_reference,
            well_name: model.well_name,
            production_period: model.production_period,
            days_on_production: model.days_on_production,
            oil_kbd: model.oil_production_kbd,
            gas_mmcfd: model.gas_production_mmcfd,
            liquids_kbd: model.liquids_production_kbd,
            water_kbd: model.water_production_kbd,
            data_source: model.data_source,
            source_data: model.source_data,
            partition: model.partition,
            created_at: model.created_at.and_then(|s| DateTime::from_timestamp(s, 0)),
            updated_at: model.updated_at.and_then(|s| DateTime::from_timestamp(s, 0)),
        }
    }
}

fn to_active_model(record: &ProductionRecord, now: i64) -> WellProductionActiveModel {
    WellProductionActiveModel {
        well_code: Set(record.well_code),
        field_code: Set(record.field_code),
        production_period: Set(record.production_period.clone()),
        field_name: Set(record.field_name.clone()),
        well_reference: Set(record.well_reference.clone()),
        well_name: Set(record.well_name.clone()),
        days_on_production: Set(record.days_on_production),
        oil_production_kbd: Set(record.oil_kbd),
        gas_production_mmcfd: Set(record.gas_mmcfd),
        liquids_production_kbd: Set(record.liquids_kbd),
        water_production_kbd: Set(record.water_kbd),
        data_source: Set(record.data_source.clone()),
        source_data: Set(record.source_data.clone()),
        partition: Set(record.partition.clone()),
        created_at: Set(Some(now)),
        updated_at: Set(Some(now)),
    }
}

fn format_ts(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.to_rfc3339()).unwrap_or_default()
}

fn csv_row(r: &ProductionRecord) -> [String; 16] {
    [
        r.field_code.to_string(),
        r.field_name.clone(),
        r.well_code.to_string(),
        r.well_reference.clone(),
        r.well_name.clone(),
        r.production_period.clone(),
        r.days_on_production.to_string(),
        r.oil_kbd.to_string(),
        r.gas_mmcfd.to_string(),
        r.liquids_kbd.to_string(),
        r.water_kbd.to_string(),
        r.data_source.clone(),
        r.source_data.clone(),
        r.partition.clone(),
        format_ts(r.created_at),
        format_ts(r.updated_at),
    ]
}

async fn upsert_chunk<C: ConnectionTrait>(
    conn: &C,
    models: Vec<WellProductionActiveModel>,
) -> Result<u64, DbErr> {
    // created_at 不在更新列中：冲突时保留首次写入时间
    WellProduction::insert_many(models)
        .on_conflict(
            OnConflict::columns([
                WellProductionColumn::WellCode,
                WellProductionColumn::FieldCode,
                WellProductionColumn::ProductionPeriod,
            ])
            .update_columns([
                WellProductionColumn::FieldName,
                WellProductionColumn::WellReference,
                WellProductionColumn::WellName,
                WellProductionColumn::DaysOnProduction,
                WellProductionColumn::OilProductionKbd,
                WellProductionColumn::GasProductionMmcfd,
                WellProductionColumn::LiquidsProductionKbd,
                WellProductionColumn::WaterProductionKbd,
                WellProductionColumn::DataSource,
                WellProductionColumn::SourceData,
                WellProductionColumn::Partition,
                WellProductionColumn::UpdatedAt,
            ])
            .to_owned(),
        )
        .exec_without_returning(conn)
        .await
}

impl ProductionRepository {
    pub async fn ensure_schema(db: &DatabaseConnection) -> Result<(), StorageError> {
        Ok(crate::storage::ensure_schema(db).await?)
    }

    /// 返回候选键中已存在于表内的子集（只读）
    pub async fn existing_keys(
        db: &DatabaseConnection,
        candidates: &HashSet<NaturalKey>,
    ) -> Result<HashSet<NaturalKey>, StorageError> {
        let mut found = HashSet::new();
        if candidates.is_empty() {
            return Ok(found);
        }

        let keys: Vec<&NaturalKey> = candidates.iter().collect();
        for chunk in keys.chunks(KEY_LOOKUP_CHUNK) {
            let mut cond = Condition::any();
            for k in chunk {
                cond = cond.add(
                    Condition::all()
                        .add(WellProductionColumn::WellCode.eq(k.well_code))
                        .add(WellProductionColumn::FieldCode.eq(k.field_code))
                        .add(WellProductionColumn::ProductionPeriod.eq(k.production_period.clone())),
                );
            }
            let rows = WellProduction::find()
                .select_only()
                .column(WellProductionColumn::WellCode)
                .column(WellProductionColumn::FieldCode)
                .column(WellProductionColumn::ProductionPeriod)
                .filter(cond)
                .into_model::<KeyRow>()
                .all(db)
                .await?;
            found.extend(
                rows.into_iter()
                    .map(|r| NaturalKey::new(r.well_code, r.field_code, r.production_period)),
            );
        }
        Ok(found)
    }

    /// 批量 upsert，单事务提交：要么整批可见，要么整批回滚
    pub async fn bulk_upsert(
        db: &DatabaseConnection,
        records: &[ProductionRecord],
    ) -> Result<u64, StorageError> {
        if records.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().timestamp();
        let total = records.len() as u64;
        let txn = db.begin().await?;

        for chunk in records.chunks(UPSERT_CHUNK) {
            let models = chunk.iter().map(|r| to_active_model(r, now)).collect();
            upsert_chunk(&txn, models).await?;
        }

        txn.commit().await?;
        debug!("bulk_upsert committed {} rows", total);
        Ok(total)
    }

    pub async fn get_by_well_code(
        db: &DatabaseConnection,
        well_code: i64,
    ) -> Result<Vec<ProductionRecord>, StorageError> {
        Self::get_by_well_code_in_range(db, well_code, &PeriodRange::default()).await
    }

    /// 按井号查询，可选周期区间，按周期倒序
    pub async fn get_by_well_code_in_range(
        db: &DatabaseConnection,
        well_code: i64,
        range: &PeriodRange,
    ) -> Result<Vec<ProductionRecord>, StorageError> {
        let well_code = StorageError::positive_code("well_code", well_code)?;
        let rows = WellProduction::find()
            .filter(WellProductionColumn::WellCode.eq(well_code))
            .filter(range.condition())
            .order_by_desc(WellProductionColumn::ProductionPeriod)
            .all(db)
            .await?;
        Ok(rows.into_iter().map(ProductionRecord::from).collect())
    }

    pub async fn get_by_field_code(
        db: &DatabaseConnection,
        field_code: i64,
    ) -> Result<Vec<ProductionRecord>, StorageError> {
        let field_code = StorageError::positive_code("field_code", field_code)?;
        let rows = WellProduction::find()
            .filter(WellProductionColumn::FieldCode.eq(field_code))
            .all(db)
            .await?;
        Ok(rows.into_iter().map(ProductionRecord::from).collect())
    }

    pub async fn count(db: &DatabaseConnection) -> Result<u64, StorageError> {
        Ok(WellProduction::find().count(db).await?)
    }

    /// 分页列表，page 从 0 开始
    pub async fn list_page(
        db: &DatabaseConnection,
        page: u64,
        size: u64,
    ) -> Result<RecordPage, StorageError> {
        let size = size.max(1);
        let paginator = WellProduction::find()
            .order_by_asc(WellProductionColumn::WellCode)
            .order_by_asc(WellProductionColumn::FieldCode)
            .order_by_desc(WellProductionColumn::ProductionPeriod)
            .paginate(db, size);
        let totals = paginator.num_items_and_pages().await?;
        let items = paginator.fetch_page(page).await?;
        Ok(RecordPage {
            items: items.into_iter().map(ProductionRecord::from).collect(),
            total: totals.number_of_items,
            page,
            size,
            pages: totals.number_of_pages,
        })
    }

    /// 单条聚合 SQL 完成统计，不在应用侧累加
    pub async fn statistics(db: &DatabaseConnection) -> Result<ProductionStats, StorageError> {
        let stats = WellProduction::find()
            .select_only()
            .column_as(Expr::cust("COUNT(*)"), "total_records")
            .column_as(Expr::cust("COUNT(DISTINCT well_code)"), "total_wells")
            .column_as(Expr::cust("COUNT(DISTINCT field_code)"), "total_fields")
            .column_as(
                Expr::cust("COUNT(DISTINCT CASE WHEN days_on_production > 0 THEN well_code END)"),
                "active_wells",
            )
            .column_as(Expr::cust("COALESCE(SUM(oil_production_kbd), 0.0)"), "total_oil_kbd")
            .column_as(Expr::cust("COALESCE(SUM(gas_production_mmcfd), 0.0)"), "total_gas_mmcfd")
            .column_as(
                Expr::cust("COALESCE(SUM(liquids_production_kbd), 0.0)"),
                "total_liquids_kbd",
            )
            .column_as(Expr::cust("COALESCE(SUM(water_production_kbd), 0.0)"), "total_water_kbd")
            .column_as(Expr::cust("COALESCE(AVG(oil_production_kbd), 0.0)"), "avg_oil_kbd")
            .column_as(Expr::cust("COALESCE(AVG(gas_production_mmcfd), 0.0)"), "avg_gas_mmcfd")
            .column_as(
                Expr::cust("COALESCE(AVG(liquids_production_kbd), 0.0)"),
                "avg_liquids_kbd",
            )
            .column_as(Expr::cust("COALESCE(AVG(water_production_kbd), 0.0)"), "avg_water_kbd")
            .column_as(Expr::cust("MIN(production_period)"), "first_period")
            .column_as(Expr::cust("MAX(production_period)"), "last_period")
            .into_model::<ProductionStats>()
            .one(db)
            .await?;
        Ok(stats.unwrap_or_default())
    }

    /// 分批流式导出 CSV：每次读 batch_size 行、写 batch_size 行
    ///
    /// 先写同目录临时文件再 rename 覆盖目标，读取在同一个读事务里完成（WAL 快照）。
    pub async fn export_stream(
        db: &DatabaseConnection,
        destination: &Path,
        batch_size: u64,
    ) -> Result<PathBuf, StorageError> {
        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
            }
        }
        let file_name = destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "export.csv".to_string());
        let tmp_path = destination.with_file_name(format!(".{}.tmp", file_name));

        let written = match write_export(db, &tmp_path, batch_size).await {
            Ok(written) => written,
            Err(e) => {
                if let Err(rm) = std::fs::remove_file(&tmp_path) {
                    debug!("cannot remove {}: {}", tmp_path.display(), rm);
                }
                return Err(e);
            }
        };

        std::fs::rename(&tmp_path, destination).map_err(|e| StorageError::io(destination, e))?;
        info!("Exported {} records to {}", written, destination.display());
        Ok(destination.to_path_buf())
    }
}

/// 写临时文件，返回写入行数；出错时由调用方清理临时文件
async fn write_export(
    db: &DatabaseConnection,
    tmp_path: &Path,
    batch_size: u64,
) -> Result<u64, StorageError> {
    let file = std::fs::File::create(tmp_path).map_err(|e| StorageError::io(tmp_path, e))?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));
    writer.write_record(CSV_HEADERS)?;

    let txn = db.begin().await?;
    let mut paginator = WellProduction::find()
        .order_by_asc(WellProductionColumn::WellCode)
        .order_by_asc(WellProductionColumn::FieldCode)
        .order_by_asc(WellProductionColumn::ProductionPeriod)
        .paginate(&txn, batch_size.max(1));

    let mut written = 0u64;
    while let Some(models) = paginator.fetch_and_next().await? {
        for model in models {
            let record = ProductionRecord::from(model);
            writer.write_record(&csv_row(&record))?;
            written += 1;
        }
    }
    txn.commit().await?;

    let mut inner = writer
        .into_inner()
        .map_err(|e| StorageError::io(tmp_path, e.into_error()))?;
    inner.flush().map_err(|e| StorageError::io(tmp_path, e))?;
    Ok(written)
}
