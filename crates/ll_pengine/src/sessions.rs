//! 会话注册表: Actor 的活动连接 (客户端与 Gossip 订阅者)

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::protocol::Frame;

/// 会话类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionKind {
    /// 客户端 WebSocket
    Client,
    /// 链接了本模块的其他 Actor
    Gossip,
}

struct Session {
    kind: SessionKind,
    tx: flume::Sender<Frame>,
}

/// 共享的会话表 (id -> 会话)
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<String, Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以指定 id 打开会话; 同 id 的旧会话被替换 (其接收端随之关闭)
    pub fn open(&self, id: impl Into<String>, kind: SessionKind) -> flume::Receiver<Frame> {
        let id = id.into();
        let (tx, rx) = flume::unbounded();
        debug!(session = %id, ?kind, "Session opened");
        self.sessions.lock().insert(id, Session { kind, tx });
        rx
    }

    pub fn close(&self, id: &str) -> bool {
        let removed = self.sessions.lock().remove(id).is_some();
        if removed {
            debug!(session = %id, "Session closed");
        }
        removed
    }

    /// 发送给除 `exclude` 外的所有会话, 返回送达数
    pub fn broadcast(&self, frame: &Frame, exclude: Option<&str>) -> usize {
        self.send_where(frame, |id, _| Some(id) != exclude)
    }

    /// 仅发送给指定类型的会话
    pub fn broadcast_kind(&self, kind: SessionKind, frame: &Frame, exclude: Option<&str>) -> usize {
        self.send_where(frame, |id, k| k == kind && Some(id) != exclude)
    }

    fn send_where(&self, frame: &Frame, accept: impl Fn(&str, SessionKind) -> bool) -> usize {
        let mut sessions = self.sessions.lock();
        let mut delivered = 0;
        // 发送失败说明接收端已断开
        sessions.retain(|id, session| {
            if !accept(id, session.kind) {
                return true;
            }
            match session.tx.send(frame.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    debug!(session = %id, "Pruning closed session");
                    false
                }
            }
        });
        delivered
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.lock().contains_key(id)
    }

    pub fn ids(&self, kind: SessionKind) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sessions
            .lock()
            .iter()
            .filter(|(_, s)| s.kind == kind)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
