pub mod file_source;
pub mod odata_session;
pub mod source;

pub use file_source::FileSource;
pub use odata_session::ODataSession;
pub use source::{PageRequest, ProductionSource, SourceError, SourcePage};

use crate::config::SourceConfig;
use std::sync::Arc;

/// 按配置创建上游数据源
pub async fn build_source(cfg: &SourceConfig) -> Result<Arc<dyn ProductionSource>, SourceError> {
    match cfg {
        SourceConfig::OData {
            base_url,
            username,
            password,
            timeout,
        } => Ok(Arc::new(ODataSession::new(
            base_url.clone(),
            username.clone(),
            password.clone(),
            *timeout,
        )?)),
        SourceConfig::MockFile { path } => Ok(Arc::new(FileSource::open(path).await?)),
    }
}
