use crate::ingest::DataStatus;
use crate::jobs::{ImportJob, JobStatus};
use crate::storage::entity::import_job::{
    ActiveModel as ImportJobActiveModel, Column as ImportJobColumn, Entity as ImportJobEntity,
    Model as ImportJobModel,
};
use crate::storage::StorageError;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};

const TERMINAL_STATUSES: [&str; 2] = ["completed", "failed"];

pub struct JobRepository;

fn to_active_model(job: &ImportJob) -> ImportJobActiveModel {
    ImportJobActiveModel {
        job_id: Set(job.job_id.clone()),
        status: Set(job.status.as_str().to_string()),
        created_at: Set(job.created_at.timestamp_millis()),
        started_at: Set(job.started_at.map(|t| t.timestamp_millis())),
        completed_at: Set(job.completed_at.map(|t| t.timestamp_millis())),
        total_records: Set(job.total_records as i64),
        new_records: Set(job.new_records as i64),
        duplicate_records: Set(job.duplicate_records as i64),
        failed_records: Set(job.failed_records as i64),
        pages_processed: Set(job.pages_processed as i32),
        pages_failed: Set(job.pages_failed as i32),
        expected_records: Set(job.expected_records.map(|n| n as i64)),
        max_pages: Set(job.max_pages.map(|n| n as i64)),
        data_status: Set(job.data_status.map(|s| s.as_str().to_string())),
        error: Set(job.error.clone()),
    }
}

fn from_model(model: ImportJobModel) -> Option<ImportJob> {
    let status = JobStatus::from_name(&model.status)?;
    Some(ImportJob {
        job_id: model.job_id,
        status,
        created_at: DateTime::from_timestamp_millis(model.created_at)?,
        started_at: model.started_at.and_then(DateTime::from_timestamp_millis),
        completed_at: model.completed_at.and_then(DateTime::from_timestamp_millis),
        total_records: model.total_records.max(0) as u64,
        new_records: model.new_records.max(0) as u64,
        duplicate_records: model.duplicate_records.max(0) as u64,
        failed_records: model.failed_records.max(0) as u64,
        pages_processed: model.pages_processed.max(0) as u32,
        pages_failed: model.pages_failed.max(0) as u32,
        expected_records: model.expected_records.map(|n| n.max(0) as u64),
        max_pages: model.max_pages.map(|n| n.max(0) as usize),
        data_status: model.data_status.as_deref().and_then(DataStatus::from_name),
        error: model.error,
    })
}

impl JobRepository {
    /// 写入（或覆盖）一条任务记录
    pub async fn save(db: &DatabaseConnection, job: &ImportJob) -> Result<(), StorageError> {
        ImportJobEntity::insert(to_active_model(job))
            .on_conflict(
                OnConflict::column(ImportJobColumn::JobId)
                    .update_columns([
                        ImportJobColumn::Status,
                        ImportJobColumn::StartedAt,
                        ImportJobColumn::CompletedAt,
                        ImportJobColumn::TotalRecords,
                        ImportJobColumn::NewRecords,
                        ImportJobColumn::DuplicateRecords,
                        ImportJobColumn::FailedRecords,
                        ImportJobColumn::PagesProcessed,
                        ImportJobColumn::PagesFailed,
                        ImportJobColumn::ExpectedRecords,
                        ImportJobColumn::DataStatus,
                        ImportJobColumn::Error,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(db)
            .await?;
        debug!("Persisted import job {} ({})", job.job_id, job.status);
        Ok(())
    }

    /// 最近 limit 个已结束任务，按创建时间从旧到新
    pub async fn load_recent(
        db: &DatabaseConnection,
        limit: usize,
    ) -> Result<Vec<ImportJob>, StorageError> {
        let rows = ImportJobEntity::find()
            .filter(ImportJobColumn::Status.is_in(TERMINAL_STATUSES))
            .order_by_desc(ImportJobColumn::CreatedAt)
            .limit(limit as u64)
            .all(db)
            .await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows.into_iter().rev() {
            let job_id = row.job_id.clone();
            match from_model(row) {
                Some(job) => jobs.push(job),
                None => warn!("Skipping unreadable job record {}", job_id),
            }
        }
        Ok(jobs)
    }

    /// 只保留最新的 keep 条，返回删除条数
    pub async fn prune(db: &DatabaseConnection, keep: usize) -> Result<u64, StorageError> {
        let ids: Vec<String> = ImportJobEntity::find()
            .select_only()
            .column(ImportJobColumn::JobId)
            .order_by_desc(ImportJobColumn::CreatedAt)
            .into_tuple::<String>()
            .all(db)
            .await?;
        let stale: Vec<String> = ids.into_iter().skip(keep).collect();
        if stale.is_empty() {
            return Ok(0);
        }
        let res = ImportJobEntity::delete_many()
            .filter(ImportJobColumn::JobId.is_in(stale))
            .exec(db)
            .await?;
        Ok(res.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::BatchResult;
    use crate::storage::test_support::temp_db;
    use chrono::Duration;

    fn finished(id: &str, created: DateTime<Utc>) -> ImportJob {
        let mut job = ImportJob::new(id.to_string(), Some(3), created);
        job.mark_running(created);
        let batch = BatchResult {
            total_records: 7,
            new_records: 5,
            duplicate_records: 1,
            failed_records: 1,
            pages_processed: 2,
            data_status: DataStatus::Updated,
            ..Default::default()
        };
        job.complete(&batch, created + Duration::seconds(4));
        job
    }

    #[tokio::test]
    async fn saved_job_reads_back_unchanged() {
        let (_dir, db) = temp_db().await;
        let t0 = DateTime::from_timestamp_millis(1_717_000_000_123).unwrap();
        let job = finished("import_a", t0);
        JobRepository::save(&db, &job).await.unwrap();
        JobRepository::save(&db, &job).await.unwrap();

        let loaded = JobRepository::load_recent(&db, 10).await.unwrap();
        assert_eq!(loaded.len(), 1);
        let back = &loaded[0];
        assert_eq!(back.job_id, "import_a");
        assert_eq!(back.status, JobStatus::Completed);
        assert_eq!(back.created_at, t0);
        assert_eq!(back.completed_at, job.completed_at);
        assert_eq!(back.new_records, 5);
        assert_eq!(back.max_pages, Some(3));
        assert_eq!(back.data_status, Some(DataStatus::Updated));
        assert_eq!(back.execution_time_seconds(Utc::now()), Some(4.0));
    }

    #[tokio::test]
    async fn prune_keeps_the_newest_jobs() {
        let (_dir, db) = temp_db().await;
        let t0 = Utc::now();
        for i in 0..4 {
            let job = finished(&format!("import_{i}"), t0 + Duration::seconds(i));
            JobRepository::save(&db, &job).await.unwrap();
        }
        assert_eq!(JobRepository::prune(&db, 2).await.unwrap(), 2);
        let ids: Vec<String> = JobRepository::load_recent(&db, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.job_id)
            .collect();
        assert_eq!(ids, vec!["import_2", "import_3"]);
    }
}
