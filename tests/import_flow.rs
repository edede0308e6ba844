use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wellsync::session::{FileSource, PageRequest, ProductionSource, SourceError, SourcePage};
use wellsync::storage::establish_connection;
use wellsync::storage::repository::ProductionRepository;
use wellsync::{ImportConfig, ImportJobManager, JobError, JobStatus};

const POLL: Duration = Duration::from_millis(5);

async fn temp_db() -> (TempDir, Arc<DatabaseConnection>) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("wells.db").display());
    let db = establish_connection(&url).await.unwrap();
    (dir, Arc::new(db))
}

fn row(well: i64, field: i64, period: &str, oil: f64) -> Value {
    json!({
        "field_code": field,
        "_field_name": format!("Field {}", field),
        "well_code": well,
        "_well_reference": format!("REF-{}", well),
        "well_name": format!("Well {}", well),
        "production_period": period,
        "days_on_production": 30,
        "oil_production_kbd": oil,
        "gas_production_mmcfd": 1.5,
        "liquids_production_kbd": 0.2,
        "water_production_kbd": 0.4,
        "partition_0": "p0"
    })
}

fn six_rows() -> Vec<Value> {
    vec![
        row(59806, 10, "2023-12", 1.0),
        row(59806, 10, "2024-02", 1.1),
        row(59806, 10, "2024-01", 1.2),
        row(100, 10, "2024-01", 2.0),
        row(101, 11, "2024-01", 3.0),
        row(102, 11, "2024-01", 4.0),
    ]
}

fn config(page_size: usize) -> ImportConfig {
    ImportConfig {
        page_size,
        retry_base_delay: Duration::from_millis(1),
        retry_max_delay: Duration::from_millis(2),
        data_source: "integration".to_string(),
        ..Default::default()
    }
}

/// 以固定页大小分页返回，记录调用次数
struct PagedSource {
    inner: FileSource,
    calls: AtomicUsize,
}

#[async_trait]
impl ProductionSource for PagedSource {
    fn name(&self) -> &str {
        "paged"
    }

    async fn fetch_page(&self, req: PageRequest) -> Result<SourcePage, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut page = self.inner.fetch_page(req).await?;
        page.total_count = None;
        Ok(page)
    }
}

#[tokio::test]
async fn two_pages_then_reimport_is_idempotent() {
    let (_dir, db) = temp_db().await;
    let source = Arc::new(PagedSource {
        inner: FileSource::from_rows(six_rows()),
        calls: AtomicUsize::new(0),
    });
    let manager = ImportJobManager::new(db.clone(), source.clone(), 10).await.unwrap();

    let first = manager.start_import(config(3)).unwrap();
    let snap = manager.wait_for(&first, POLL).await.unwrap();
    assert_eq!(snap.job.status, JobStatus::Completed);
    assert_eq!(snap.job.total_records, 6);
    assert_eq!(snap.job.new_records, 6);
    assert_eq!(snap.job.duplicate_records, 0);
    assert_eq!(snap.job.failed_records, 0);
    assert_eq!(snap.job.pages_processed, 2);
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    assert_eq!(ProductionRepository::count(&db).await.unwrap(), 6);

    let second = manager.start_import(config(3)).unwrap();
    let snap = manager.wait_for(&second, POLL).await.unwrap();
    assert_eq!(snap.job.status, JobStatus::Completed);
    assert_eq!(snap.job.new_records, 0);
    assert_eq!(snap.job.duplicate_records, 6);
    assert_eq!(ProductionRepository::count(&db).await.unwrap(), 6);

    let well = ProductionRepository::get_by_well_code(&db, 59806).await.unwrap();
    let periods: Vec<&str> = well.iter().map(|r| r.production_period.as_str()).collect();
    assert_eq!(periods, vec!["2024-02", "2024-01", "2023-12"]);
    assert_eq!(well[0].data_source, "integration");
    assert_eq!(well[0].partition, "p0");
    assert_eq!(well[0].field_name, "Field 10");

    assert_eq!(
        manager.get_status("import_does_not_exist").unwrap_err(),
        JobError::NotFound("import_does_not_exist".to_string())
    );
}

#[tokio::test]
async fn upstream_corrections_replace_existing_rows() {
    let (_dir, db) = temp_db().await;
    let manager = ImportJobManager::new(db.clone(), Arc::new(FileSource::from_rows(six_rows())), 10)
        .await
        .unwrap();
    let id = manager.start_import(config(10)).unwrap();
    manager.wait_for(&id, POLL).await.unwrap();

    let mut corrected = six_rows();
    corrected[3]["oil_production_kbd"] = json!(9.5);
    let manager = ImportJobManager::new(db.clone(), Arc::new(FileSource::from_rows(corrected)), 10)
        .await
        .unwrap();
    let id = manager.start_import(config(10)).unwrap();
    let snap = manager.wait_for(&id, POLL).await.unwrap();
    assert_eq!(snap.job.duplicate_records, 6);

    let rows = ProductionRepository::get_by_well_code(&db, 100).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].oil_kbd, 9.5);
    assert!(rows[0].created_at.is_some());
}

#[tokio::test]
async fn one_bad_row_in_ten_is_tolerated() {
    let (_dir, db) = temp_db().await;
    let mut rows: Vec<Value> = (0..10).map(|i| row(i, 1, "2024-06", 1.0)).collect();
    rows[7]["oil_production_kbd"] = json!(-4.0);
    rows.extend((10..15).map(|i| row(i, 1, "2024-06", 1.0)));

    let manager = ImportJobManager::new(db.clone(), Arc::new(FileSource::from_rows(rows)), 10)
        .await
        .unwrap();
    let id = manager.start_import(config(10)).unwrap();
    let snap = manager.wait_for(&id, POLL).await.unwrap();

    assert_eq!(snap.job.status, JobStatus::Completed);
    assert_eq!(snap.job.failed_records, 1);
    assert_eq!(snap.job.new_records, 14);
    assert_eq!(snap.job.pages_processed, 2);
    assert_eq!(ProductionRepository::count(&db).await.unwrap(), 14);
}

#[tokio::test]
async fn concurrent_starts_admit_exactly_one() {
    let (_dir, db) = temp_db().await;
    let rows: Vec<Value> = (0..50).map(|i| row(i, 2, "2024-07", 1.0)).collect();
    let manager = Arc::new(
        ImportJobManager::new(db.clone(), Arc::new(FileSource::from_rows(rows)), 10)
            .await
            .unwrap(),
    );

    let a = {
        let m = manager.clone();
        tokio::spawn(async move { m.start_import(config(5)) })
    };
    let b = {
        let m = manager.clone();
        tokio::spawn(async move { m.start_import(config(5)) })
    };
    let results = [a.await.unwrap(), b.await.unwrap()];
    let ok: Vec<&String> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(JobError::Conflict { .. })))
        .count();
    assert_eq!(ok.len(), 1);
    assert_eq!(conflicts, 1);

    let snap = manager.wait_for(ok[0], POLL).await.unwrap();
    assert_eq!(snap.job.new_records, 50);
}

#[tokio::test]
async fn export_larger_than_batch_matches_row_count() {
    let (dir, db) = temp_db().await;
    let rows: Vec<Value> = (0..37).map(|i| row(i, 3, "2024-08", 0.5)).collect();
    let manager = ImportJobManager::new(db.clone(), Arc::new(FileSource::from_rows(rows)), 10)
        .await
        .unwrap();
    let id = manager.start_import(config(8)).unwrap();
    manager.wait_for(&id, POLL).await.unwrap();

    let dest = dir.path().join("exports").join("wells_prod.csv");
    let path = ProductionRepository::export_stream(&db, &dest, 10).await.unwrap();
    let mut reader = csv::Reader::from_path(&path).unwrap();
    assert_eq!(reader.headers().unwrap().len(), 16);
    assert_eq!(reader.records().count(), 37);

    // 再次导出覆盖旧文件
    ProductionRepository::export_stream(&db, &dest, 3).await.unwrap();
    let mut reader = csv::Reader::from_path(&dest).unwrap();
    assert_eq!(reader.records().count(), 37);
}

#[tokio::test]
async fn failing_source_ends_in_failed_job() {
    struct Down;

    #[async_trait]
    impl ProductionSource for Down {
        fn name(&self) -> &str {
            "down"
        }

        async fn fetch_page(&self, _req: PageRequest) -> Result<SourcePage, SourceError> {
            Err(SourceError::Transport("timed out".to_string()))
        }
    }

    let (_dir, db) = temp_db().await;
    let manager = ImportJobManager::new(db.clone(), Arc::new(Down), 10).await.unwrap();
    let mut cfg = config(10);
    cfg.max_retries = 2;
    let id = manager.start_import(cfg).unwrap();
    let snap = manager.wait_for(&id, POLL).await.unwrap();

    assert_eq!(snap.job.status, JobStatus::Failed);
    assert!(snap.job.error.as_deref().unwrap_or_default().contains("timed out"));
    assert_eq!(ProductionRepository::count(&db).await.unwrap(), 0);

    // 失败任务结束后允许再次启动
    assert!(manager.start_import(config(10)).is_ok());
}
