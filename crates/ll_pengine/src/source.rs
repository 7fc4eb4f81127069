//! 源码拉取

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use ll_core::{LogicLoomError, Result};

/// 按 URL 获取源码文本
#[async_trait]
pub trait SourceFetcher: Send + Sync + 'static {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// 基于 reqwest 的 HTTP 拉取
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LogicLoomError::Unknown(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        debug!(url, "Fetching source");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| LogicLoomError::Consult {
                origin: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(LogicLoomError::Fetch {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response.text().await.map_err(|e| LogicLoomError::Consult {
            origin: url.to_string(),
            message: e.to_string(),
        })
    }
}

/// 固定内容的拉取器, 记录拉取次数
#[derive(Default)]
pub struct StaticFetcher {
    sources: HashMap<String, String>,
    fetches: AtomicUsize,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, url: impl Into<String>, text: impl Into<String>) -> Self {
        self.sources.insert(url.into(), text.into());
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.sources
            .get(url)
            .cloned()
            .ok_or_else(|| LogicLoomError::Fetch {
                url: url.to_string(),
                status: 404,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_fetcher() {
        let fetcher = StaticFetcher::new().with_source("mem://facts.pl", "p(1).");
        assert_eq!(fetcher.fetch("mem://facts.pl").await.unwrap(), "p(1).");
        match fetcher.fetch("mem://missing.pl").await {
            Err(LogicLoomError::Fetch { status, .. }) => assert_eq!(status, 404),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(fetcher.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_http_fetcher_reports_transport_errors() {
        let fetcher = HttpFetcher::new(Duration::from_millis(200)).unwrap();
        // 端口 9 (discard) 通常无人监听
        let err = fetcher.fetch("http://127.0.0.1:9/rules.pl").await.unwrap_err();
        assert!(err.is_source_error());
    }
}
