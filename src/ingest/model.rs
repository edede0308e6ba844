use crate::session::SourceError;
use crate::storage::StorageError;
use serde::Serialize;
use std::time::Duration;

/// BatchResult.errors 最多保留的条数
pub const MAX_ERROR_MESSAGES: usize = 50;
/// 每页最多保留的行级错误
pub const MAX_ROW_ERRORS_PER_PAGE: usize = 5;

/// 单行校验失败
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// 整次导入失败（任务进入 Failed）
#[derive(thiserror::Error, Debug)]
pub enum ImportError {
    #[error(
        "aborted: {failed_pages} of {attempted_pages} pages failed ({consecutive} in a row), last error: {last_error}"
    )]
    FailureThreshold {
        failed_pages: u32,
        attempted_pages: u32,
        consecutive: u32,
        last_error: String,
    },
    #[error("upstream authentication failed: {0}")]
    Unauthorized(SourceError),
    #[error("storage unavailable: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DataStatus {
    Updated,
    NoNewDataAllDuplicates,
    AllFailedValidation,
    NoDataFromSource,
    NoNewData,
}

impl DataStatus {
    const ALL: [DataStatus; 5] = [
        DataStatus::Updated,
        DataStatus::NoNewDataAllDuplicates,
        DataStatus::AllFailedValidation,
        DataStatus::NoDataFromSource,
        DataStatus::NoNewData,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DataStatus::Updated => "updated",
            DataStatus::NoNewDataAllDuplicates => "no_new_data_all_duplicates",
            DataStatus::AllFailedValidation => "all_failed_validation",
            DataStatus::NoDataFromSource => "no_data_from_source",
            DataStatus::NoNewData => "no_new_data",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == name)
    }

    pub fn classify(total: u64, new: u64, duplicate: u64, failed: u64) -> Self {
        if total == 0 {
            DataStatus::NoDataFromSource
        } else if new > 0 {
            DataStatus::Updated
        } else if failed >= total {
            DataStatus::AllFailedValidation
        } else if duplicate > 0 && failed == 0 {
            DataStatus::NoNewDataAllDuplicates
        } else {
            DataStatus::NoNewData
        }
    }
}

impl std::fmt::Display for DataStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单页处理结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct PageResult {
    pub page_number: u32,
    pub offset: u64,
    pub fetched: u64,
    pub new_records: u64,
    pub duplicate_records: u64,
    pub failed_records: u64,
    pub written: u64,
    /// 整页失败时的原因
    pub error: Option<String>,
    pub row_errors: Vec<String>,
    pub elapsed: Duration,
}

impl PageResult {
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub total_records: u64,
    pub new_records: u64,
    pub duplicate_records: u64,
    pub failed_records: u64,
    pub pages_processed: u32,
    pub pages_failed: u32,
    pub elapsed: Duration,
    pub errors: Vec<String>,
    pub pages: Vec<PageResult>,
    pub data_status: DataStatus,
}

impl Default for BatchResult {
    fn default() -> Self {
        Self {
            total_records: 0,
            new_records: 0,
            duplicate_records: 0,
            failed_records: 0,
            pages_processed: 0,
            pages_failed: 0,
            elapsed: Duration::ZERO,
            errors: Vec::new(),
            pages: Vec::new(),
            data_status: DataStatus::NoDataFromSource,
        }
    }
}

impl BatchResult {
    pub fn absorb(&mut self, page: PageResult) {
        self.total_records += page.fetched;
        self.new_records += page.new_records;
        self.duplicate_records += page.duplicate_records;
        self.failed_records += page.failed_records;
        self.pages_processed += 1;
        for row_err in &page.row_errors {
            self.push_error(format!("page {}: {}", page.page_number, row_err));
        }
        if let Some(err) = &page.error {
            self.pages_failed += 1;
            self.push_error(format!("page {} (offset {}): {}", page.page_number, page.offset, err));
        }
        self.pages.push(page);
    }

    pub fn push_error(&mut self, message: String) {
        if self.errors.len() < MAX_ERROR_MESSAGES {
            self.errors.push(message);
        }
    }

    pub fn finish(&mut self, elapsed: Duration) {
        self.elapsed = elapsed;
        self.data_status = DataStatus::classify(
            self.total_records,
            self.new_records,
            self.duplicate_records,
            self.failed_records,
        );
    }

    /// 成功率（百分比），无数据时为 0
    pub fn success_rate(&self) -> f64 {
        if self.total_records == 0 {
            return 0.0;
        }
        (self.new_records + self.duplicate_records) as f64 / self.total_records as f64 * 100.0
    }
}

/// 管道 -> 调度器的进度事件
#[derive(Debug, Clone)]
pub enum ImportEvent {
    Started,
    TotalKnown(u64),
    PageDone(PageResult),
}
