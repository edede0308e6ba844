use super::model::{ImportJob, JobError, JobSnapshot};
use crate::config::ImportConfig;
use crate::ingest::{ImportEvent, ImportPipeline};
use crate::session::ProductionSource;
use crate::storage::repository::JobRepository;
use crate::storage::StorageError;
use chrono::Utc;
use log::{error, info, warn};
use sea_orm::DatabaseConnection;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

/// 任务表：按创建顺序保存，超出上限时淘汰最早的已结束任务
#[derive(Default)]
struct JobTable {
    jobs: HashMap<String, ImportJob>,
    order: VecDeque<String>,
}

impl JobTable {
    fn active(&self) -> Option<&ImportJob> {
        self.jobs.values().find(|j| !j.status.is_terminal())
    }

    fn insert(&mut self, job: ImportJob) {
        self.order.push_back(job.job_id.clone());
        self.jobs.insert(job.job_id.clone(), job);
    }

    fn evict(&mut self, limit: usize) {
        while self.order.len() > limit {
            let Some(pos) = self
                .order
                .iter()
                .position(|id| self.jobs.get(id).map_or(true, |j| j.status.is_terminal()))
            else {
                break;
            };
            if let Some(id) = self.order.remove(pos) {
                self.jobs.remove(&id);
            }
        }
    }
}

fn lock(jobs: &Mutex<JobTable>) -> MutexGuard<'_, JobTable> {
    // 持锁代码不会 panic 到一半留下坏状态，中毒后继续使用
    jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 导入任务调度：单飞（同一时刻最多一个未结束任务）+ 可轮询状态
///
/// 已结束的任务写入 import_jobs 表，重启后由 `new` 重新载入。
pub struct ImportJobManager {
    jobs: Arc<Mutex<JobTable>>,
    db: Arc<DatabaseConnection>,
    source: Arc<dyn ProductionSource>,
    history_limit: usize,
}

impl ImportJobManager {
    pub async fn new(
        db: Arc<DatabaseConnection>,
        source: Arc<dyn ProductionSource>,
        history_limit: usize,
    ) -> Result<Self, StorageError> {
        let history_limit = history_limit.max(1);
        crate::storage::ensure_schema(&db).await?;

        let mut table = JobTable::default();
        for job in JobRepository::load_recent(&db, history_limit).await? {
            table.insert(job);
        }
        if !table.order.is_empty() {
            info!("Restored {} finished import job(s)", table.order.len());
        }

        Ok(Self {
            jobs: Arc::new(Mutex::new(table)),
            db,
            source,
            history_limit,
        })
    }

    /// 登记任务并在后台启动，立即返回 job_id
    pub fn start_import(&self, config: ImportConfig) -> Result<String, JobError> {
        let job_id = format!("import_{}", uuid::Uuid::new_v4().simple());
        {
            let mut table = lock(&self.jobs);
            if let Some(active) = table.active() {
                return Err(JobError::Conflict {
                    active_job_id: active.job_id.clone(),
                });
            }
            table.insert(ImportJob::new(job_id.clone(), config.max_pages, Utc::now()));
            table.evict(self.history_limit);
        }

        let pipeline = ImportPipeline::new(self.source.clone(), self.db.clone(), config);
        tokio::spawn(run_job(
            self.jobs.clone(),
            self.db.clone(),
            self.history_limit,
            job_id.clone(),
            pipeline,
        ));

        info!("Import job {} scheduled", job_id);
        Ok(job_id)
    }

    pub fn get_status(&self, job_id: &str) -> Result<JobSnapshot, JobError> {
        let table = lock(&self.jobs);
        table
            .jobs
            .get(job_id)
            .map(|job| job.snapshot(Utc::now()))
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    /// 最近的在前
    pub fn list_jobs(&self) -> Vec<JobSnapshot> {
        let now = Utc::now();
        let table = lock(&self.jobs);
        table
            .order
            .iter()
            .rev()
            .filter_map(|id| table.jobs.get(id))
            .map(|job| job.snapshot(now))
            .collect()
    }

    pub fn active_job(&self) -> Option<JobSnapshot> {
        lock(&self.jobs).active().map(|job| job.snapshot(Utc::now()))
    }

    /// 轮询直到任务结束
    pub async fn wait_for(&self, job_id: &str, poll: Duration) -> Result<JobSnapshot, JobError> {
        loop {
            let snapshot = self.get_status(job_id)?;
            if snapshot.job.status.is_terminal() {
                return Ok(snapshot);
            }
            tokio::time::sleep(poll).await;
        }
    }
}

fn apply_event(jobs: &Mutex<JobTable>, job_id: &str, event: ImportEvent) {
    let mut table = lock(jobs);
    let Some(job) = table.jobs.get_mut(job_id) else {
        return;
    };
    match event {
        ImportEvent::Started => {
            if job.mark_running(Utc::now()) {
                info!("Import job {} running", job_id);
            }
        }
        ImportEvent::TotalKnown(total) => job.expected_records = Some(total),
        ImportEvent::PageDone(page) => job.apply_page(&page),
    }
}

async fn run_job(
    jobs: Arc<Mutex<JobTable>>,
    db: Arc<DatabaseConnection>,
    history_limit: usize,
    job_id: String,
    pipeline: ImportPipeline,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ImportEvent>();

    // 管道放在独立任务里，等待其 JoinHandle：panic 也能落到 Failed
    let run = tokio::spawn(async move {
        let result = pipeline.run(&tx).await;
        drop(tx);
        result
    });

    let consume = async {
        while let Some(event) = rx.recv().await {
            apply_event(&jobs, &job_id, event);
        }
    };

    // 先排空事件再做最终状态切换
    let (outcome, ()) = tokio::join!(run, consume);

    let current = lock(&jobs).jobs.get(&job_id).cloned();
    let Some(mut job) = current else {
        warn!("Import job {} vanished before finalizing", job_id);
        return;
    };

    let now = Utc::now();
    match outcome {
        Ok(Ok(batch)) => {
            job.complete(&batch, now);
            info!(
                "Import job {} completed: total={} new={} dup={} failed={} ({})",
                job_id,
                batch.total_records,
                batch.new_records,
                batch.duplicate_records,
                batch.failed_records,
                batch.data_status
            );
        }
        Ok(Err(e)) => {
            error!("Import job {} failed: {}", job_id, e);
            job.fail(e.to_string(), now);
        }
        Err(join_err) => {
            error!("Import job {} task aborted: {}", job_id, join_err);
            job.fail(format!("import task aborted: {}", join_err), now);
        }
    }

    // 先落库再切换内存状态：轮询看到终态时历史已可跨进程查询
    if let Err(e) = JobRepository::save(&db, &job).await {
        warn!("Import job {} not persisted: {}", job_id, e);
    }
    match JobRepository::prune(&db, history_limit).await {
        Ok(0) => {}
        Ok(n) => info!("Pruned {} old import job record(s)", n),
        Err(e) => warn!("Pruning job history failed: {}", e),
    }

    // 未结束的任务不会被淘汰，条目一定还在
    if let Some(slot) = lock(&jobs).jobs.get_mut(&job_id) {
        *slot = job;
    }
}
