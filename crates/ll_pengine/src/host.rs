//! Pengine 宿主: 把 Actor Mesh、存储后端、源码拉取与引擎工厂组装在一起

use std::sync::Arc;

use tracing::debug;

use ll_core::{LogicEngine, Result};
use ll_durable::{ActorMesh, KvBackend, Store};

use crate::actor::{ActorSnapshot, PengineActor};
use crate::config::PengineConfig;
use crate::pengine::Origin;
use crate::protocol::{Frame, Reply, Request};
use crate::sessions::SessionKind;
use crate::source::SourceFetcher;

/// 一个客户端实时会话
pub struct Connection {
    pub session: String,
    pub frames: flume::Receiver<Frame>,
}

/// Pengine 宿主
pub struct PengineHost<E: LogicEngine> {
    mesh: ActorMesh<PengineActor<E>>,
    config: Arc<PengineConfig>,
}

impl<E: LogicEngine> Clone for PengineHost<E> {
    fn clone(&self) -> Self {
        Self {
            mesh: self.mesh.clone(),
            config: self.config.clone(),
        }
    }
}

impl<E: LogicEngine> PengineHost<E> {
    pub fn new(
        config: PengineConfig,
        backend: Arc<dyn KvBackend>,
        fetcher: Arc<dyn SourceFetcher>,
        engine: impl Fn() -> E + Send + Sync + 'static,
    ) -> Self {
        let config = Arc::new(config);
        let shared = config.clone();
        let mesh = ActorMesh::new(move |name, peers| {
            PengineActor::new(
                name,
                engine(),
                Store::new(backend.clone(), name),
                shared.clone(),
                fetcher.clone(),
                peers,
            )
        });
        Self { mesh, config }
    }

    pub fn config(&self) -> &PengineConfig {
        &self.config
    }

    pub fn mesh(&self) -> &ActorMesh<PengineActor<E>> {
        &self.mesh
    }

    /// 处理一次性请求 (HTTP)
    pub async fn request(&self, actor: &str, request: Request) -> Result<Reply> {
        self.dispatch(actor, request, Origin::Direct).await
    }

    /// 处理来自实时会话的请求, 回复同时扇出给该 Actor 的其他会话
    pub async fn request_from(&self, actor: &str, session: &str, request: Request) -> Result<Reply> {
        self.dispatch(actor, request, Origin::Socket(session.to_string()))
            .await
    }

    async fn dispatch(&self, actor: &str, request: Request, origin: Origin) -> Result<Reply> {
        // 非法请求在激活 Actor 之前就拒绝
        request.action()?;
        let address = self.mesh.get(actor).await?;
        let mut pengine = address.lock().await;
        pengine.handle(request, origin).await
    }

    /// 打开客户端会话
    pub async fn connect(&self, actor: &str) -> Result<Connection> {
        let address = self.mesh.get(actor).await?;
        let (session, frames) = address.lock().await.accept_socket(None, SessionKind::Client);
        debug!(actor, session = %session, "Client connected");
        Ok(Connection { session, frames })
    }

    pub async fn disconnect(&self, actor: &str, session: &str) {
        if let Some(address) = self.mesh.lookup(actor).await {
            address.lock().await.close_socket(session);
        }
    }

    /// 所有模块的展示文本
    pub async fn dump(&self, actor: &str) -> Result<String> {
        let address = self.mesh.get(actor).await?;
        let dump = address.lock().await.dump();
        Ok(dump)
    }

    pub async fn snapshot(&self, actor: &str) -> Result<ActorSnapshot> {
        let address = self.mesh.get(actor).await?;
        let snapshot = address.lock().await.snapshot();
        Ok(snapshot)
    }

    /// 驱逐 Actor; 进行中的查询随之丢失
    pub async fn evict(&self, actor: &str) -> bool {
        self.mesh.evict(actor).await
    }

    pub async fn actors(&self) -> Vec<String> {
        self.mesh.all_actors().await
    }
}
