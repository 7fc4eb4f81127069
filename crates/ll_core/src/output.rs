//! 引擎输出通道

use std::sync::Arc;

use parking_lot::Mutex;

/// 引擎写出的文本: 同步追加到缓冲区, 同时非阻塞地推送给广播任务
#[derive(Clone, Default)]
pub struct OutputSink {
    buffer: Arc<Mutex<String>>,
    tx: Option<flume::Sender<String>>,
}

impl OutputSink {
    pub fn new(tx: flume::Sender<String>) -> Self {
        Self {
            buffer: Arc::default(),
            tx: Some(tx),
        }
    }

    /// 只有缓冲区, 不做广播
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn write(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.buffer.lock().push_str(text);
        if let Some(tx) = &self.tx {
            // 广播端已关闭时直接丢弃
            let _ = tx.send(text.to_string());
        }
    }

    /// 取出并清空缓冲区
    pub fn take(&self) -> String {
        std::mem::take(&mut *self.buffer.lock())
    }

    pub fn contents(&self) -> String {
        self.buffer.lock().clone()
    }
}

impl std::fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSink")
            .field("buffered", &self.buffer.lock().len())
            .field("broadcast", &self.tx.is_some())
            .finish()
    }
}
