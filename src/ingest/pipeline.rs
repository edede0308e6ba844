use super::model::{BatchResult, ImportError, ImportEvent, PageResult, MAX_ROW_ERRORS_PER_PAGE};
use super::transform::transform_row;
use crate::config::ImportConfig;
use crate::model::{NaturalKey, ProductionRecord};
use crate::session::{PageRequest, ProductionSource, SourceError, SourcePage};
use crate::storage::repository::ProductionRepository;
use crate::storage::StorageError;
use log::{debug, info, warn};
use sea_orm::DatabaseConnection;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::sleep;

/// 指数退避（base * 2^attempt，封顶 max），带 0~20% jitter
pub fn backoff_delay(config: &ImportConfig, attempt: u32) -> Duration {
    let exp = config
        .retry_base_delay
        .saturating_mul(1u32 << attempt.min(16));
    let capped = exp.min(config.retry_max_delay);
    let jitter = capped.mul_f64(rand::random::<f64>() * 0.2);
    (capped + jitter).min(config.retry_max_delay)
}

/// 分页导入管道：逐页拉取、校验、去重分类、批量 upsert
pub struct ImportPipeline {
    source: Arc<dyn ProductionSource>,
    db: Arc<DatabaseConnection>,
    config: ImportConfig,
}

impl ImportPipeline {
    pub fn new(
        source: Arc<dyn ProductionSource>,
        db: Arc<DatabaseConnection>,
        config: ImportConfig,
    ) -> Self {
        Self { source, db, config }
    }

    pub async fn run(
        &self,
        events: &mpsc::UnboundedSender<ImportEvent>,
    ) -> Result<BatchResult, ImportError> {
        let started = Instant::now();
        ProductionRepository::ensure_schema(&self.db).await?;

        let _ = events.send(ImportEvent::Started);
        info!(
            "Import started from {} (page_size={}, max_pages={:?}, offset={})",
            self.source.name(),
            self.config.page_size,
            self.config.max_pages,
            self.config.start_offset
        );

        let mut batch = BatchResult::default();
        let mut offset = self.config.start_offset;
        let mut total_count: Option<u64> = None;
        let mut consecutive_failures = 0u32;

        loop {
            if let Some(max) = self.config.max_pages {
                if batch.pages_processed as usize >= max {
                    info!("Reached max_pages={}, stopping", max);
                    break;
                }
            }
            if let Some(total) = total_count {
                if offset >= total {
                    break;
                }
            }

            let page_number = batch.pages_processed + 1;
            let page_started = Instant::now();
            let req = PageRequest {
                offset,
                limit: self.config.page_size,
            };

            let (mut result, has_more) = match self.fetch_with_retry(req).await {
                Ok(page) => {
                    if total_count.is_none() {
                        if let Some(total) = page.total_count {
                            total_count = Some(total);
                            let _ = events.send(ImportEvent::TotalKnown(total));
                        }
                    }
                    let SourcePage { rows, has_more, .. } = page;
                    if rows.is_empty() {
                        debug!("Empty page at offset {}, stopping", offset);
                        break;
                    }
                    offset += rows.len() as u64;
                    (self.process_rows(page_number, req.offset, rows).await, has_more)
                }
                Err(e) if e.is_unauthorized() => {
                    warn!("Upstream rejected credentials: {}", e);
                    return Err(ImportError::Unauthorized(e));
                }
                Err(e) => {
                    warn!("Page {} (offset {}) skipped: {}", page_number, req.offset, e);
                    offset += self.config.page_size as u64;
                    let failed = PageResult {
                        page_number,
                        offset: req.offset,
                        error: Some(e.to_string()),
                        ..Default::default()
                    };
                    (failed, true)
                }
            };

            result.elapsed = page_started.elapsed();
            let page_failed = result.is_failed();
            let last_error = result.error.clone();

            info!(
                "Page {} offset {}: fetched={} new={} dup={} failed={}{}",
                result.page_number,
                result.offset,
                result.fetched,
                result.new_records,
                result.duplicate_records,
                result.failed_records,
                if page_failed { " [page failed]" } else { "" }
            );

            let _ = events.send(ImportEvent::PageDone(result.clone()));
            batch.absorb(result);

            if page_failed {
                consecutive_failures += 1;
                if self.threshold_crossed(&batch, consecutive_failures) {
                    let err = ImportError::FailureThreshold {
                        failed_pages: batch.pages_failed,
                        attempted_pages: batch.pages_processed,
                        consecutive: consecutive_failures,
                        last_error: last_error.unwrap_or_default(),
                    };
                    warn!("{}", err);
                    return Err(err);
                }
            } else {
                consecutive_failures = 0;
            }

            if !has_more {
                break;
            }
        }

        batch.finish(started.elapsed());
        info!(
            "Import finished: total={} new={} dup={} failed={} pages={} ({} failed) status={} in {:.2}s",
            batch.total_records,
            batch.new_records,
            batch.duplicate_records,
            batch.failed_records,
            batch.pages_processed,
            batch.pages_failed,
            batch.data_status,
            batch.elapsed.as_secs_f64()
        );
        Ok(batch)
    }

    fn threshold_crossed(&self, batch: &BatchResult, consecutive: u32) -> bool {
        if consecutive >= self.config.max_consecutive_page_failures {
            return true;
        }
        if batch.pages_processed < self.config.min_pages_for_ratio {
            return false;
        }
        let ratio = batch.pages_failed as f64 / batch.pages_processed as f64;
        ratio > self.config.max_failure_ratio
    }

    async fn fetch_with_retry(&self, req: PageRequest) -> Result<SourcePage, SourceError> {
        let mut attempt = 0u32;
        loop {
            match self.source.fetch_page(req).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    let delay = match &e {
                        SourceError::RateLimited {
                            retry_after: Some(d),
                        } => (*d).min(self.config.retry_max_delay),
                        _ => backoff_delay(&self.config, attempt),
                    };
                    attempt += 1;
                    warn!(
                        "fetch offset {} failed ({}), retry {}/{} in {:?}",
                        req.offset, e, attempt, self.config.max_retries, delay
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 行校验 + 去重分类 + 写入；整页写入失败时有效行全部计为失败
    async fn process_rows(&self, page_number: u32, offset: u64, rows: Vec<Value>) -> PageResult {
        let mut result = PageResult {
            page_number,
            offset,
            fetched: rows.len() as u64,
            ..Default::default()
        };

        let mut records = Vec::with_capacity(rows.len());
        for (idx, row) in rows.iter().enumerate() {
            match transform_row(row, &self.config.data_source) {
                Ok(record) => records.push(record),
                Err(e) => {
                    result.failed_records += 1;
                    debug!("page {} row {} rejected: {}", page_number, idx, e);
                    if result.row_errors.len() < MAX_ROW_ERRORS_PER_PAGE {
                        result.row_errors.push(format!("row {}: {}", idx, e));
                    }
                }
            }
        }
        drop(rows);

        if records.is_empty() {
            return result;
        }

        match self.write_with_retry(&records).await {
            Ok((existing, written)) => {
                let mut seen: HashSet<NaturalKey> = HashSet::with_capacity(records.len());
                for record in &records {
                    let key = record.key();
                    if existing.contains(&key) || !seen.insert(key) {
                        result.duplicate_records += 1;
                    } else {
                        result.new_records += 1;
                    }
                }
                result.written = written;
            }
            Err(e) => {
                warn!("page {} write failed after retries: {}", page_number, e);
                result.failed_records += records.len() as u64;
                result.error = Some(e.to_string());
            }
        }
        result
    }

    async fn write_with_retry(
        &self,
        records: &[ProductionRecord],
    ) -> Result<(HashSet<NaturalKey>, u64), StorageError> {
        let keys: HashSet<NaturalKey> = records.iter().map(|r| r.key()).collect();
        let mut attempt = 0u32;
        loop {
            match self.write_once(&keys, records).await {
                Ok(out) => return Ok(out),
                Err(e) if attempt < self.config.max_retries => {
                    let delay = backoff_delay(&self.config, attempt);
                    attempt += 1;
                    warn!(
                        "write of {} rows failed ({}), retry {}/{} in {:?}",
                        records.len(),
                        e,
                        attempt,
                        self.config.max_retries,
                        delay
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 先查已存在的键，再整批 upsert（批内事务原子，可安全重试）
    async fn write_once(
        &self,
        keys: &HashSet<NaturalKey>,
        records: &[ProductionRecord],
    ) -> Result<(HashSet<NaturalKey>, u64), StorageError> {
        let existing = ProductionRepository::existing_keys(&self.db, keys).await?;
        let written = ProductionRepository::bulk_upsert(&self.db, records).await?;
        Ok((existing, written))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::model::DataStatus;
    use crate::session::FileSource;
    use crate::storage::test_support::temp_db;
    use async_trait::async_trait;
    use sea_orm::ConnectionTrait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn row(well: i64, field: i64, period: &str) -> Value {
        json!({
            "field_code": field,
            "_field_name": "F",
            "well_code": well,
            "_well_reference": format!("W{}", well),
            "well_name": format!("Well {}", well),
            "production_period": period,
            "days_on_production": 30,
            "oil_production_kbd": 1.0,
            "gas_production_mmcfd": 2.0,
            "liquids_production_kbd": 0.5,
            "water_production_kbd": 0.1
        })
    }

    fn fast_config(page_size: usize) -> ImportConfig {
        ImportConfig {
            page_size,
            retry_base_delay: Duration::from_millis(1),
            retry_max_delay: Duration::from_millis(5),
            data_source: "test".to_string(),
            ..Default::default()
        }
    }

    fn drain(mut rx: mpsc::UnboundedReceiver<ImportEvent>) -> Vec<ImportEvent> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    /// 按脚本返回错误，之后委托给内存数据
    struct ScriptedSource {
        inner: FileSource,
        script: Mutex<Vec<(u64, SourceError)>>,
        calls: AtomicU32,
    }

    impl ScriptedSource {
        fn new(rows: Vec<Value>, script: Vec<(u64, SourceError)>) -> Self {
            Self {
                inner: FileSource::from_rows(rows),
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ProductionSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn fetch_page(&self, req: PageRequest) -> Result<SourcePage, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let scripted = {
                let mut script = self.script.lock().unwrap();
                script
                    .iter()
                    .position(|(off, _)| *off == req.offset)
                    .map(|i| script.remove(i).1)
            };
            match scripted {
                Some(err) => Err(err),
                None => self.inner.fetch_page(req).await,
            }
        }
    }

    struct AlwaysFailing(SourceError);

    #[async_trait]
    impl ProductionSource for AlwaysFailing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn fetch_page(&self, _req: PageRequest) -> Result<SourcePage, SourceError> {
            Err(self.0.clone())
        }
    }

    #[tokio::test]
    async fn one_invalid_row_is_counted_and_paging_continues() {
        let (_dir, db) = temp_db().await;
        let mut rows: Vec<Value> = (0..10).map(|i| row(i, 1, "2024-01")).collect();
        rows[4]["production_period"] = json!("not-a-period");
        rows.extend((10..13).map(|i| row(i, 1, "2024-01")));

        let source = Arc::new(FileSource::from_rows(rows));
        let pipeline = ImportPipeline::new(source, Arc::new(db), fast_config(10));
        let (tx, rx) = mpsc::unbounded_channel();
        let batch = pipeline.run(&tx).await.unwrap();

        assert_eq!(batch.total_records, 13);
        assert_eq!(batch.new_records, 12);
        assert_eq!(batch.failed_records, 1);
        assert_eq!(batch.pages_processed, 2);
        assert_eq!(batch.pages_failed, 0);
        assert_eq!(batch.pages[0].written, 9);
        assert_eq!(batch.errors.len(), 1);
        assert_eq!(batch.data_status, DataStatus::Updated);

        let events = drain(rx);
        assert!(matches!(events[0], ImportEvent::Started));
        assert!(matches!(events[1], ImportEvent::TotalKnown(13)));
        assert_eq!(
            events.iter().filter(|e| matches!(e, ImportEvent::PageDone(_))).count(),
            2
        );
    }

    #[tokio::test]
    async fn day_level_periods_are_stored_as_separate_rows() {
        let (_dir, db) = temp_db().await;
        let db = Arc::new(db);
        let rows = vec![
            row(1, 1, "2024-01-01"),
            row(1, 1, "2024-01-15"),
            row(1, 1, "2024-01-01"),
            row(1, 1, "2024-01"),
        ];
        let pipeline =
            ImportPipeline::new(Arc::new(FileSource::from_rows(rows)), db.clone(), fast_config(10));
        let (tx, _rx) = mpsc::unbounded_channel();
        let batch = pipeline.run(&tx).await.unwrap();
        assert_eq!(batch.new_records, 3);
        assert_eq!(batch.duplicate_records, 1);

        let periods: Vec<String> = ProductionRepository::get_by_well_code(&db, 1)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.production_period)
            .collect();
        assert_eq!(periods, vec!["2024-01-15", "2024-01-01", "2024-01"]);
    }

    #[tokio::test]
    async fn row_without_well_name_is_counted_as_failed() {
        let (_dir, db) = temp_db().await;
        let db = Arc::new(db);
        let mut rows = vec![row(1, 1, "2024-01"), row(2, 1, "2024-01")];
        rows[1].as_object_mut().unwrap().remove("well_name");
        let pipeline =
            ImportPipeline::new(Arc::new(FileSource::from_rows(rows)), db.clone(), fast_config(10));
        let (tx, _rx) = mpsc::unbounded_channel();
        let batch = pipeline.run(&tx).await.unwrap();
        assert_eq!(batch.new_records, 1);
        assert_eq!(batch.failed_records, 1);
        assert!(batch.errors[0].contains("well_name"));
        assert_eq!(ProductionRepository::count(&db).await.unwrap(), 1);
    }

    /// 拉取指定 offset 时删掉产量表，之后的写入全部失败
    struct TableDroppingSource {
        inner: FileSource,
        db: Arc<DatabaseConnection>,
        drop_at: u64,
    }

    #[async_trait]
    impl ProductionSource for TableDroppingSource {
        fn name(&self) -> &str {
            "table-dropping"
        }

        async fn fetch_page(&self, req: PageRequest) -> Result<SourcePage, SourceError> {
            if req.offset == self.drop_at {
                self.db
                    .execute_unprepared("DROP TABLE IF EXISTS well_production")
                    .await
                    .map_err(|e| SourceError::Transport(e.to_string()))?;
            }
            self.inner.fetch_page(req).await
        }
    }

    #[tokio::test]
    async fn persistent_storage_errors_fail_pages_and_count_toward_threshold() {
        let (_dir, db) = temp_db().await;
        let db = Arc::new(db);
        let rows: Vec<Value> = (0..8).map(|i| row(i, 5, "2024-05")).collect();
        let source = Arc::new(TableDroppingSource {
            inner: FileSource::from_rows(rows),
            db: db.clone(),
            drop_at: 2,
        });
        let mut config = fast_config(2);
        config.max_retries = 1;
        config.max_consecutive_page_failures = 2;
        let pipeline = ImportPipeline::new(source, db, config);
        let (tx, rx) = mpsc::unbounded_channel();

        match pipeline.run(&tx).await.unwrap_err() {
            ImportError::FailureThreshold {
                failed_pages,
                attempted_pages,
                consecutive,
                ref last_error,
            } => {
                assert_eq!(failed_pages, 2);
                assert_eq!(attempted_pages, 3);
                assert_eq!(consecutive, 2);
                assert!(last_error.contains("well_production"), "{last_error}");
            }
            other => panic!("unexpected error: {other}"),
        }

        let pages: Vec<PageResult> = drain(rx)
            .into_iter()
            .filter_map(|e| match e {
                ImportEvent::PageDone(p) => Some(p),
                _ => None,
            })
            .collect();
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].new_records, 2);
        assert!(!pages[0].is_failed());
        for page in &pages[1..] {
            assert!(page.is_failed());
            assert_eq!(page.failed_records, 2);
            assert_eq!(page.new_records, 0);
            assert_eq!(page.written, 0);
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried_then_page_succeeds() {
        let (_dir, db) = temp_db().await;
        let rows: Vec<Value> = (0..4).map(|i| row(i, 2, "2024-02")).collect();
        let source = Arc::new(ScriptedSource::new(
            rows,
            vec![
                (0, SourceError::Server { status: 503 }),
                (0, SourceError::RateLimited { retry_after: Some(Duration::from_millis(1)) }),
            ],
        ));
        let pipeline = ImportPipeline::new(source.clone(), Arc::new(db), fast_config(4));
        let (tx, _rx) = mpsc::unbounded_channel();
        let batch = pipeline.run(&tx).await.unwrap();

        assert_eq!(batch.new_records, 4);
        assert_eq!(batch.pages_failed, 0);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rejected_page_is_skipped_and_run_completes() {
        let (_dir, db) = temp_db().await;
        let rows: Vec<Value> = (0..6).map(|i| row(i, 3, "2024-03")).collect();
        let source = Arc::new(ScriptedSource::new(
            rows,
            vec![(2, SourceError::Rejected { status: 400, body: "bad skip".into() })],
        ));
        let pipeline = ImportPipeline::new(source.clone(), Arc::new(db), fast_config(2));
        let (tx, _rx) = mpsc::unbounded_channel();
        let batch = pipeline.run(&tx).await.unwrap();

        assert_eq!(batch.pages_processed, 3);
        assert_eq!(batch.pages_failed, 1);
        assert_eq!(batch.new_records, 4);
        assert!(batch.errors[0].contains("offset 2"));
        // 非瞬时错误不重试
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn persistent_failures_abort_with_threshold() {
        let (_dir, db) = temp_db().await;
        let mut config = fast_config(5);
        config.max_retries = 1;
        let pipeline = ImportPipeline::new(
            Arc::new(AlwaysFailing(SourceError::Transport("connection refused".into()))),
            Arc::new(db),
            config,
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let err = pipeline.run(&tx).await.unwrap_err();
        match err {
            ImportError::FailureThreshold {
                failed_pages,
                consecutive,
                ref last_error,
                ..
            } => {
                assert_eq!(failed_pages, 4);
                assert_eq!(consecutive, 4);
                assert!(last_error.contains("connection refused"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            drain(rx).iter().filter(|e| matches!(e, ImportEvent::PageDone(_))).count(),
            4
        );
    }

    #[tokio::test]
    async fn unauthorized_aborts_immediately() {
        let (_dir, db) = temp_db().await;
        let pipeline = ImportPipeline::new(
            Arc::new(AlwaysFailing(SourceError::Unauthorized { status: 401 })),
            Arc::new(db),
            fast_config(5),
        );
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(
            pipeline.run(&tx).await,
            Err(ImportError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn max_pages_caps_the_run() {
        let (_dir, db) = temp_db().await;
        let rows: Vec<Value> = (0..10).map(|i| row(i, 4, "2024-04")).collect();
        let mut config = fast_config(3);
        config.max_pages = Some(2);
        let pipeline =
            ImportPipeline::new(Arc::new(FileSource::from_rows(rows)), Arc::new(db), config);
        let (tx, _rx) = mpsc::unbounded_channel();
        let batch = pipeline.run(&tx).await.unwrap();
        assert_eq!(batch.pages_processed, 2);
        assert_eq!(batch.total_records, 6);
    }

    #[tokio::test]
    async fn empty_source_reports_no_data() {
        let (_dir, db) = temp_db().await;
        let pipeline = ImportPipeline::new(
            Arc::new(FileSource::from_rows(Vec::new())),
            Arc::new(db),
            fast_config(3),
        );
        let (tx, _rx) = mpsc::unbounded_channel();
        let batch = pipeline.run(&tx).await.unwrap();
        assert_eq!(batch.pages_processed, 0);
        assert_eq!(batch.data_status, DataStatus::NoDataFromSource);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = ImportConfig {
            retry_base_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_millis(1000),
            ..Default::default()
        };
        let d0 = backoff_delay(&config, 0);
        assert!(d0 >= Duration::from_millis(100) && d0 <= Duration::from_millis(120));
        let d2 = backoff_delay(&config, 2);
        assert!(d2 >= Duration::from_millis(400) && d2 <= Duration::from_millis(480));
        assert_eq!(backoff_delay(&config, 20), Duration::from_millis(1000));
    }
}
