//! Pengine 配置

use std::time::Duration;

use ll_durable::DEFAULT_MAX_ENTRY_SIZE;

/// Pengine Actor 配置
#[derive(Debug, Clone)]
pub struct PengineConfig {
    /// 单个 KV 条目的上限 (字节), 超过即分片
    pub max_entry_size: usize,
    /// 每个 `Frame::Ops` 最多携带的操作数
    pub gossip_batch: usize,
    /// 请求未指定 `chunk` 时的默认分页大小
    pub default_chunk: Option<usize>,
    /// 分页大小上限
    pub max_chunk: usize,
    /// 跨 Actor 调用与源码拉取的超时
    pub call_timeout: Duration,
    /// 保存时跳过的模块
    pub save_exclusions: Vec<String>,
}

impl Default for PengineConfig {
    fn default() -> Self {
        Self {
            max_entry_size: DEFAULT_MAX_ENTRY_SIZE,
            gossip_batch: 64,
            default_chunk: None,
            max_chunk: 10_000,
            call_timeout: Duration::from_secs(30),
            save_exclusions: Vec::new(),
        }
    }
}

impl PengineConfig {
    /// 本次批量的结果上限: 请求值, 否则默认值, 否则上限; 总不超过上限
    pub fn chunk_limit(&self, requested: Option<usize>) -> usize {
        requested
            .or(self.default_chunk)
            .unwrap_or(self.max_chunk)
            .min(self.max_chunk)
    }

    pub fn is_excluded(&self, module: &str) -> bool {
        self.save_exclusions.iter().any(|m| m == module)
    }
}
