use crate::ingest::{BatchResult, DataStatus, PageResult};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
        ]
        .into_iter()
        .find(|s| s.as_str() == name)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum JobError {
    #[error("an import is already in progress ({active_job_id})")]
    Conflict { active_job_id: String },
    #[error("job not found: {0}")]
    NotFound(String),
}

/// 一次导入任务；只由 ImportJobManager 修改
#[derive(Debug, Clone, Serialize)]
pub struct ImportJob {
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_records: u64,
    pub new_records: u64,
    pub duplicate_records: u64,
    pub failed_records: u64,
    pub pages_processed: u32,
    pub pages_failed: u32,
    /// 上游报告的总条数
    pub expected_records: Option<u64>,
    pub max_pages: Option<usize>,
    pub data_status: Option<DataStatus>,
    pub error: Option<String>,
}

impl ImportJob {
    pub fn new(job_id: String, max_pages: Option<usize>, now: DateTime<Utc>) -> Self {
        Self {
            job_id,
            status: JobStatus::Pending,
            created_at: now,
            started_at: None,
            completed_at: None,
            total_records: 0,
            new_records: 0,
            duplicate_records: 0,
            failed_records: 0,
            pages_processed: 0,
            pages_failed: 0,
            expected_records: None,
            max_pages,
            data_status: None,
            error: None,
        }
    }

    /// Pending -> Running；其他状态下返回 false
    pub fn mark_running(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != JobStatus::Pending {
            return false;
        }
        self.status = JobStatus::Running;
        self.started_at = Some(now);
        true
    }

    pub fn apply_page(&mut self, page: &PageResult) {
        if self.status.is_terminal() {
            return;
        }
        self.total_records += page.fetched;
        self.new_records += page.new_records;
        self.duplicate_records += page.duplicate_records;
        self.failed_records += page.failed_records;
        self.pages_processed += 1;
        if page.is_failed() {
            self.pages_failed += 1;
        }
    }

    /// 以 BatchResult 为准覆盖实时计数
    pub fn complete(&mut self, batch: &BatchResult, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.total_records = batch.total_records;
        self.new_records = batch.new_records;
        self.duplicate_records = batch.duplicate_records;
        self.failed_records = batch.failed_records;
        self.pages_processed = batch.pages_processed;
        self.pages_failed = batch.pages_failed;
        self.data_status = Some(batch.data_status);
        self.status = JobStatus::Completed;
        self.started_at.get_or_insert(now);
        self.completed_at = Some(now);
        true
    }

    /// Pending 也可直接失败（第一页之前出错）
    pub fn fail(&mut self, message: String, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Failed;
        self.error = Some(message);
        self.completed_at = Some(now);
        true
    }

    pub fn execution_time_seconds(&self, now: DateTime<Utc>) -> Option<f64> {
        let started = self.started_at?;
        let end = self.completed_at.unwrap_or(now);
        Some((end - started).num_milliseconds().max(0) as f64 / 1000.0)
    }

    pub fn progress_percentage(&self) -> Option<f64> {
        match self.status {
            JobStatus::Pending => Some(0.0),
            JobStatus::Completed => Some(100.0),
            JobStatus::Running | JobStatus::Failed => {
                if let Some(expected) = self.expected_records.filter(|e| *e > 0) {
                    Some((self.total_records as f64 / expected as f64 * 100.0).min(100.0))
                } else if let Some(max) = self.max_pages.filter(|m| *m > 0) {
                    Some((self.pages_processed as f64 / max as f64 * 100.0).min(100.0))
                } else {
                    None
                }
            }
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> JobSnapshot {
        JobSnapshot {
            execution_time_seconds: self.execution_time_seconds(now),
            progress_percentage: self.progress_percentage(),
            job: self.clone(),
        }
    }
}

/// 某一时刻的任务副本（加锁时拷贝）
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    #[serde(flatten)]
    pub job: ImportJob,
    pub execution_time_seconds: Option<f64>,
    pub progress_percentage: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn terminal_states_are_final() {
        let t0 = Utc::now();
        let mut job = ImportJob::new("import_x".into(), None, t0);
        assert!(job.mark_running(t0));
        assert!(!job.mark_running(t0));
        assert!(job.fail("boom".into(), t0 + Duration::seconds(2)));
        assert!(!job.complete(&BatchResult::default(), t0));
        assert!(!job.fail("again".into(), t0));
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert_eq!(job.execution_time_seconds(t0 + Duration::seconds(9)), Some(2.0));
    }

    #[test]
    fn pending_can_fail_directly() {
        let t0 = Utc::now();
        let mut job = ImportJob::new("import_y".into(), None, t0);
        assert!(job.fail("storage unavailable".into(), t0));
        assert_eq!(job.started_at, None);
        assert_eq!(job.execution_time_seconds(t0), None);
    }

    #[test]
    fn progress_uses_expected_count_then_max_pages() {
        let t0 = Utc::now();
        let mut job = ImportJob::new("import_z".into(), Some(4), t0);
        assert_eq!(job.progress_percentage(), Some(0.0));
        job.mark_running(t0);
        job.apply_page(&PageResult {
            fetched: 25,
            new_records: 25,
            ..Default::default()
        });
        assert_eq!(job.progress_percentage(), Some(25.0));
        job.expected_records = Some(50);
        assert_eq!(job.progress_percentage(), Some(50.0));

        let mut open = ImportJob::new("import_w".into(), None, t0);
        open.mark_running(t0);
        assert_eq!(open.progress_percentage(), None);
    }
}
