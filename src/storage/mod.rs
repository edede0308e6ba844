pub mod connection;
pub mod entity;
pub mod error;
pub mod repository;

pub use connection::{ensure_schema, establish_connection};
pub use error::StorageError;

#[cfg(test)]
pub(crate) mod test_support {
    use sea_orm::DatabaseConnection;
    use tempfile::TempDir;

    /// 每个测试独立的 sqlite 文件库；TempDir 需与连接同生命周期
    pub async fn temp_db() -> (TempDir, DatabaseConnection) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
        let db = super::establish_connection(&url).await.unwrap();
        (dir, db)
    }
}
