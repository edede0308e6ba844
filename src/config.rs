use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("missing env {0}")]
    Missing(&'static str),
}

/// 单次导入的分页、重试与失败阈值参数
#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub page_size: usize,
    pub max_pages: Option<usize>,
    pub start_offset: u64,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// 连续失败页数达到该值即中止
    pub max_consecutive_page_failures: u32,
    /// 已尝试页数达到 min_pages_for_ratio 后，失败比例超过该值即中止
    pub max_failure_ratio: f64,
    pub min_pages_for_ratio: u32,
    pub data_source: String,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            page_size: 998,
            max_pages: None,
            start_offset: 0,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(2),
            retry_max_delay: Duration::from_secs(60),
            max_consecutive_page_failures: 5,
            max_failure_ratio: 0.5,
            min_pages_for_ratio: 4,
            data_source: "odata".to_string(),
        }
    }
}

/// 上游数据源配置
#[derive(Debug, Clone)]
pub enum SourceConfig {
    OData {
        base_url: String,
        username: String,
        password: String,
        timeout: Duration,
    },
    MockFile { path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub source: SourceConfig,
    pub export_path: PathBuf,
    pub export_batch_size: u64,
    pub job_history_limit: usize,
    pub import: ImportConfig,
}

impl AppConfig {
    /// 从环境变量读取配置（调用前应已加载 .env）
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let database_url = get("DATABASE_URL")
            .unwrap_or_else(|| "sqlite://data/wells_production.db?mode=rwc".to_string());

        let timeout = Duration::from_secs(parse_or(&get, "REQUEST_TIMEOUT_SECS", 60u64)?);
        let source = match get("MOCK_DATA_PATH") {
            Some(path) => SourceConfig::MockFile {
                path: PathBuf::from(path),
            },
            None => SourceConfig::OData {
                base_url: get("ODATA_BASE_URL").ok_or(ConfigError::Missing("ODATA_BASE_URL"))?,
                username: get("ODATA_USERNAME").ok_or(ConfigError::Missing("ODATA_USERNAME"))?,
                password: get("ODATA_PASSWORD").ok_or(ConfigError::Missing("ODATA_PASSWORD"))?,
                timeout,
            },
        };

        let defaults = ImportConfig::default();
        let page_size: usize = parse_or(&get, "IMPORT_PAGE_SIZE", defaults.page_size)?;
        if page_size == 0 {
            return Err(ConfigError::Invalid {
                key: "IMPORT_PAGE_SIZE",
                value: "0".to_string(),
            });
        }
        let max_pages = match get("IMPORT_MAX_PAGES") {
            Some(v) => Some(parse_value::<usize>("IMPORT_MAX_PAGES", &v)?),
            None => None,
        };
        let max_failure_ratio: f64 =
            parse_or(&get, "IMPORT_MAX_FAILURE_RATIO", defaults.max_failure_ratio)?;
        if !(0.0..=1.0).contains(&max_failure_ratio) {
            return Err(ConfigError::Invalid {
                key: "IMPORT_MAX_FAILURE_RATIO",
                value: max_failure_ratio.to_string(),
            });
        }

        let import = ImportConfig {
            page_size,
            max_pages,
            max_retries: parse_or(&get, "IMPORT_MAX_RETRIES", defaults.max_retries)?,
            retry_base_delay: Duration::from_millis(parse_or(
                &get,
                "IMPORT_RETRY_DELAY_MS",
                defaults.retry_base_delay.as_millis() as u64,
            )?),
            max_failure_ratio,
            data_source: get("DATA_SOURCE_NAME").unwrap_or(defaults.data_source.clone()),
            ..defaults
        };

        let export_batch_size: u64 = parse_or(&get, "EXPORT_BATCH_SIZE", 1000u64)?;

        Ok(Self {
            database_url,
            source,
            export_path: get("EXPORT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/wells_prod.csv")),
            export_batch_size: export_batch_size.max(1),
            job_history_limit: parse_or(&get, "JOB_HISTORY_LIMIT", 100usize)?.max(1),
            import,
        })
    }
}

fn parse_value<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.parse::<T>().map_err(|_| ConfigError::Invalid {
        key,
        value: raw.to_string(),
    })
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(v) => parse_value(key, &v),
        None => Ok(default),
    }
}
