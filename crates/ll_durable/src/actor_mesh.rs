//! Actor Mesh - Actor 生命周期管理
//!
//! 按名称寻址; 首次 `get` 时激活实例, 激活期间实例已加锁,
//! 所以并发请求会等待 `recover` 完成后再执行。

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{error, info};

use ll_core::{LogicLoomError, Result};

/// Actor 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorState {
    /// 正在运行
    Running,
    /// 已暂停
    Suspended,
    /// 已终止
    Terminated,
}

/// Actor 特征
#[async_trait]
pub trait Actor: Send + 'static {
    /// Actor 类型名称
    fn type_name(&self) -> &'static str;

    /// 激活时恢复状态 (从持久化存储读取)
    async fn recover(&mut self) -> Result<()>;

    /// 获取当前状态
    fn state(&self) -> ActorState;
}

/// Actor 地址
pub struct ActorAddress<A> {
    name: Arc<str>,
    cell: Arc<Mutex<A>>,
}

impl<A> Clone for ActorAddress<A> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            cell: self.cell.clone(),
        }
    }
}

impl<A: Actor> ActorAddress<A> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 独占执行 (同一实例一次只处理一个请求)
    pub async fn lock(&self) -> OwnedMutexGuard<A> {
        self.cell.clone().lock_owned().await
    }

    /// 带超时的独占执行, 用于跨 Actor 调用
    pub async fn lock_within(&self, timeout: Duration) -> Result<OwnedMutexGuard<A>> {
        tokio::time::timeout(timeout, self.lock()).await.map_err(|_| {
            LogicLoomError::Actor(format!(
                "actor `{}` did not respond within {:?}",
                self.name, timeout
            ))
        })
    }
}

type Factory<A> = dyn Fn(&str, MeshRef<A>) -> A + Send + Sync;

struct MeshInner<A> {
    actors: RwLock<HashMap<String, ActorAddress<A>>>,
    factory: Box<Factory<A>>,
}

/// Actor Mesh - 管理所有 Actor
pub struct ActorMesh<A> {
    inner: Arc<MeshInner<A>>,
}

impl<A> Clone for ActorMesh<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// 指向 Mesh 的弱引用, Actor 通过它按名称查找对端
pub struct MeshRef<A> {
    inner: Weak<MeshInner<A>>,
}

impl<A> Clone for MeshRef<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A: Actor> MeshRef<A> {
    pub fn upgrade(&self) -> Option<ActorMesh<A>> {
        self.inner.upgrade().map(|inner| ActorMesh { inner })
    }

    /// 获取 (必要时激活) 对端
    pub async fn get(&self, name: &str) -> Result<ActorAddress<A>> {
        match self.upgrade() {
            Some(mesh) => mesh.get(name).await,
            None => Err(LogicLoomError::Actor("actor mesh has shut down".into())),
        }
    }

    /// 查找已激活的实例, 不触发激活
    pub async fn lookup(&self, name: &str) -> Option<ActorAddress<A>> {
        self.upgrade()?.lookup(name).await
    }
}

impl<A: Actor> ActorMesh<A> {
    /// 创建新的 Actor Mesh
    pub fn new(factory: impl Fn(&str, MeshRef<A>) -> A + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(MeshInner {
                actors: RwLock::new(HashMap::new()),
                factory: Box::new(factory),
            }),
        }
    }

    pub fn handle(&self) -> MeshRef<A> {
        MeshRef {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// 获取 Actor, 首次访问时创建并恢复
    pub async fn get(&self, name: &str) -> Result<ActorAddress<A>> {
        if let Some(address) = self.lookup(name).await {
            return Ok(address);
        }

        let (address, mut guard) = {
            let mut actors = self.inner.actors.write().await;
            if let Some(address) = actors.get(name) {
                return Ok(address.clone());
            }
            let actor = (self.inner.factory)(name, self.handle());
            let address = ActorAddress {
                name: Arc::from(name),
                cell: Arc::new(Mutex::new(actor)),
            };
            // 发布前先加锁: 其他请求拿到地址后会等到恢复完成
            let guard = address.cell.clone().lock_owned().await;
            actors.insert(name.to_string(), address.clone());
            (address, guard)
        };

        match guard.recover().await {
            Ok(()) => {
                info!("Activated {} actor `{}`", guard.type_name(), name);
                Ok(address)
            }
            Err(e) => {
                error!("Failed to activate actor `{}`: {}", name, e);
                drop(guard);
                self.inner.actors.write().await.remove(name);
                Err(e)
            }
        }
    }

    /// 查找已激活的实例
    pub async fn lookup(&self, name: &str) -> Option<ActorAddress<A>> {
        self.inner.actors.read().await.get(name).cloned()
    }

    /// 驱逐实例 (模拟宿主回收), 内存状态随之丢失
    pub async fn evict(&self, name: &str) -> bool {
        let removed = self.inner.actors.write().await.remove(name).is_some();
        if removed {
            info!("Evicted actor `{}`", name);
        }
        removed
    }

    /// 获取 Actor 状态
    pub async fn get_state(&self, name: &str) -> Option<ActorState> {
        let address = self.lookup(name).await?;
        let actor = address.lock().await;
        Some(actor.state())
    }

    /// 获取所有 Actor 名称
    pub async fn all_actors(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.actors.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// 获取 Actor 数量
    pub async fn count(&self) -> usize {
        self.inner.actors.read().await.len()
    }
}
