use super::source::{PageRequest, ProductionSource, SourceError, SourcePage};
use async_trait::async_trait;
use log::info;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// 本地 JSON 文件数据源（mock），启动时一次读入
pub struct FileSource {
    path: PathBuf,
    rows: Vec<Value>,
}

impl FileSource {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref().to_path_buf();
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| SourceError::Transport(format!("cannot read {}: {e}", path.display())))?;
        let body: Value = serde_json::from_str(&raw)
            .map_err(|e| SourceError::Decode(format!("{}: {e}", path.display())))?;
        let rows = Self::rows_from(body)?;
        info!("Loaded {} mock rows from {}", rows.len(), path.display());
        Ok(Self { path, rows })
    }

    pub fn from_rows(rows: Vec<Value>) -> Self {
        Self {
            path: PathBuf::from("<memory>"),
            rows,
        }
    }

    /// 支持顶层数组或 {"value": [...]}
    fn rows_from(body: Value) -> Result<Vec<Value>, SourceError> {
        match body {
            Value::Array(rows) => Ok(rows),
            Value::Object(mut map) => match map.remove("value") {
                Some(Value::Array(rows)) => Ok(rows),
                _ => Err(SourceError::Decode(
                    "expected an array or an object with a `value` array".to_string(),
                )),
            },
            _ => Err(SourceError::Decode("unexpected mock file shape".to_string())),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl ProductionSource for FileSource {
    fn name(&self) -> &str {
        "mock-file"
    }

    async fn fetch_page(&self, req: PageRequest) -> Result<SourcePage, SourceError> {
        let total = self.rows.len();
        let start = usize::try_from(req.offset).unwrap_or(usize::MAX).min(total);
        let end = start.saturating_add(req.limit).min(total);
        Ok(SourcePage {
            rows: self.rows[start..end].to_vec(),
            has_more: end < total,
            total_count: Some(total as u64),
        })
    }

    async fn probe(&self) -> Result<(), SourceError> {
        info!("mock source {} has {} rows", self.path.display(), self.rows.len());
        Ok(())
    }
}
