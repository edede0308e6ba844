use super::source::{PageRequest, ProductionSource, SourceError, SourcePage};
use async_trait::async_trait;
use log::{debug, info};
use reqwest::{header, Client, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// OData 数据源会话：Basic 认证 + $top/$skip 分页
pub struct ODataSession {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl ODataSession {
    pub fn new(
        base_url: String,
        username: String,
        password: String,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("wellsync/0.1")
            .build()
            .map_err(|e| SourceError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            username,
            password,
        })
    }

    async fn get_json(&self, query: &[(&str, String)]) -> Result<Value, SourceError> {
        let resp = self
            .client
            .get(&self.base_url)
            .basic_auth(&self.username, Some(&self.password))
            .header(header::ACCEPT, "application/json")
            .query(query)
            .send()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        let status = resp.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(SourceError::Unauthorized {
                    status: status.as_u16(),
                })
            }
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(SourceError::RateLimited {
                    retry_after: parse_retry_after(resp.headers().get(header::RETRY_AFTER)),
                })
            }
            s if s.is_server_error() => {
                return Err(SourceError::Server { status: s.as_u16() })
            }
            _ => {}
        }

        let raw = resp
            .text()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(SourceError::Rejected {
                status: status.as_u16(),
                body: raw.chars().take(200).collect(),
            });
        }

        serde_json::from_str(&raw).map_err(|e| SourceError::Decode(format!("json parse failed: {e}")))
    }
}

/// Retry-After 只支持秒数形式
fn parse_retry_after(value: Option<&header::HeaderValue>) -> Option<Duration> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// 解析 OData JSON 响应：行在 value，总数在 @odata.count
pub fn parse_odata_page(body: Value, req: PageRequest) -> Result<SourcePage, SourceError> {
    let total_count = body.get("@odata.count").and_then(|c| {
        c.as_u64()
            .or_else(|| c.as_str().and_then(|s| s.parse::<u64>().ok()))
    });
    let has_next_link = body
        .get("@odata.nextLink")
        .map(|v| !v.is_null())
        .unwrap_or(false);

    let rows = match body {
        Value::Object(mut map) => match map.remove("value") {
            Some(Value::Array(rows)) => rows,
            Some(_) => return Err(SourceError::Decode("`value` is not an array".to_string())),
            None => return Err(SourceError::Decode("missing `value` in response".to_string())),
        },
        Value::Array(rows) => rows,
        _ => return Err(SourceError::Decode("unexpected response shape".to_string())),
    };

    let fetched_until = req.offset + rows.len() as u64;
    let has_more = match total_count {
        Some(total) => has_next_link || fetched_until < total,
        None => has_next_link || (rows.len() >= req.limit && !rows.is_empty()),
    };

    Ok(SourcePage {
        rows,
        has_more,
        total_count,
    })
}

#[async_trait]
impl ProductionSource for ODataSession {
    fn name(&self) -> &str {
        "odata"
    }

    async fn fetch_page(&self, req: PageRequest) -> Result<SourcePage, SourceError> {
        let query = [
            ("$top", req.limit.to_string()),
            ("$skip", req.offset.to_string()),
            ("$count", "true".to_string()),
            ("$format", "json".to_string()),
        ];
        let body = self.get_json(&query).await?;
        let page = parse_odata_page(body, req)?;
        debug!(
            "{} fetch_page(offset={}, limit={}) -> {} rows, has_more={}",
            self,
            req.offset,
            req.limit,
            page.rows.len(),
            page.has_more
        );
        Ok(page)
    }

    async fn probe(&self) -> Result<(), SourceError> {
        let query = [("$top", "1".to_string()), ("$format", "json".to_string())];
        self.get_json(&query).await?;
        info!("{} probe ok", self);
        Ok(())
    }
}

impl std::fmt::Display for ODataSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<ODataSession [{}]>", self.username)
    }
}

impl std::fmt::Debug for ODataSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<ODataSession [{}]>", self.username)
    }
}
