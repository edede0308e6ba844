use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// 一页请求：偏移量 + 条数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: u64,
    pub limit: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SourcePage {
    pub rows: Vec<Value>,
    pub has_more: bool,
    /// 上游报告的总条数（如果有）
    pub total_count: Option<u64>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("unauthorized (HTTP {status})")]
    Unauthorized { status: u16 },
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("server error (HTTP {status})")]
    Server { status: u16 },
    #[error("request rejected (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid response: {0}")]
    Decode(String),
}

impl SourceError {
    /// 可重试：网络错误、5xx、429
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SourceError::Transport(_) | SourceError::Server { .. } | SourceError::RateLimited { .. }
        )
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, SourceError::Unauthorized { .. })
    }
}

#[async_trait]
pub trait ProductionSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_page(&self, req: PageRequest) -> Result<SourcePage, SourceError>;

    /// 连通性检查，默认取一条数据
    async fn probe(&self) -> Result<(), SourceError> {
        self.fetch_page(PageRequest { offset: 0, limit: 1 })
            .await
            .map(|_| ())
    }
}
