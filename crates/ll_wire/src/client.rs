//! HTTP 客户端

use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use ll_core::{LogicLoomError, Result};
use ll_pengine::{Reply, Request};

/// 访问 `/pengine/:actor` 的客户端
#[derive(Debug, Clone)]
pub struct PengineClient {
    http: Client,
    base: String,
}

impl PengineClient {
    pub fn new(base: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LogicLoomError::Protocol(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            base: base.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// 发送一个请求; 非 2xx 状态转为错误
    pub async fn send(&self, actor: &str, request: &Request) -> Result<Reply> {
        let url = format!("{}/pengine/{}", self.base, actor);
        debug!(%url, "POST");
        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| transport(&url, e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LogicLoomError::Protocol(format!(
                "{url} answered {status}: {body}"
            )));
        }
        response.json::<Reply>().await.map_err(|e| transport(&url, e))
    }

    pub async fn create(&self, actor: &str) -> Result<Reply> {
        self.send(actor, &Request::create()).await
    }

    pub async fn ask(&self, actor: &str, goal: &str, chunk: Option<usize>) -> Result<Reply> {
        let mut request = Request::ask(goal);
        if let Some(chunk) = chunk {
            request = request.with_chunk(chunk);
        }
        self.send(actor, &request).await
    }

    pub async fn next(&self, actor: &str, id: &str, chunk: Option<usize>) -> Result<Reply> {
        let mut request = Request::next(id);
        if let Some(chunk) = chunk {
            request = request.with_chunk(chunk);
        }
        self.send(actor, &request).await
    }

    pub async fn stop(&self, actor: &str, id: Option<String>) -> Result<Reply> {
        self.send(actor, &Request::stop(id)).await
    }

    pub async fn destroy(&self, actor: &str, id: Option<String>) -> Result<Reply> {
        self.send(actor, &Request::destroy(id)).await
    }

    /// 追加源码到 Actor 的默认模块
    pub async fn consult(&self, actor: &str, text: &str) -> Result<Reply> {
        self.send(actor, &Request::create().with_src_text(text)).await
    }

    pub async fn dump(&self, actor: &str) -> Result<String> {
        let url = format!("{}/pengine/{}/dump", self.base, actor);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| transport(&url, e))?;
        if !response.status().is_success() {
            return Err(LogicLoomError::Fetch {
                url,
                status: response.status().as_u16(),
            });
        }
        response.text().await.map_err(|e| transport(&url, e))
    }

    pub async fn health(&self) -> bool {
        let url = format!("{}/healthz", self.base);
        matches!(self.http.get(&url).send().await, Ok(r) if r.status().is_success())
    }
}

fn transport(url: &str, err: reqwest::Error) -> LogicLoomError {
    LogicLoomError::Consult {
        origin: url.to_string(),
        message: err.to_string(),
    }
}
