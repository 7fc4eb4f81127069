//! Pengine Actor: 引导恢复、保存周期与导出
//!
//! 每个 Actor 拥有一个引擎实例。保存时把本地模块写入新一代
//! `program/<txid>`, 最后写 TxMeta 作为提交点。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ll_core::{LogicEngine, LogicLoomError, OutputSink, Result, Term, DEFAULT_MODULE};
use ll_durable::{
    Actor, ActorState, LinkRecord, MeshRef, ModuleSource, PengineMetadata, Store, TxMeta,
};

use crate::config::PengineConfig;
use crate::job::Job;
use crate::protocol::{Frame, MetaSnapshot};
use crate::sessions::{SessionKind, SessionRegistry};
use crate::source::SourceFetcher;

pub(crate) const TX_KEY: &str = "tx";
pub(crate) const META_KEY: &str = "meta";
pub(crate) const LINKS_KEY: &str = "links";

pub(crate) fn program_key(txid: u64) -> String {
    format!("program/{txid}")
}

/// 对外部模块的链接; 通道只存在于内存
pub(crate) struct Link {
    pub owner: String,
    pub channel: Option<JoinHandle<()>>,
}

impl Link {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            channel: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.channel.as_ref().is_some_and(|h| !h.is_finished())
    }
}

/// Actor 运行状况 (调试与测试用)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorSnapshot {
    pub name: String,
    pub state: ActorState,
    pub txid: u64,
    pub dirty: bool,
    pub modules: Vec<String>,
    pub links: Vec<String>,
    pub jobs: usize,
    pub sessions: usize,
    pub listeners: Vec<String>,
}

/// Pengine Actor
pub struct PengineActor<E: LogicEngine> {
    pub(crate) name: String,
    pub(crate) id: Option<String>,
    /// 区分同名 Actor 的不同激活
    pub(crate) instance: Uuid,
    pub(crate) state: ActorState,
    pub(crate) engine: E,
    pub(crate) store: Store,
    pub(crate) config: Arc<PengineConfig>,
    pub(crate) fetcher: Arc<dyn SourceFetcher>,
    pub(crate) mesh: MeshRef<PengineActor<E>>,
    pub(crate) sessions: SessionRegistry,
    pub(crate) output: OutputSink,
    pub(crate) txid: u64,
    pub(crate) tx_time: Option<DateTime<Utc>>,
    pub(crate) dirty: bool,
    /// 默认模块在本次请求中被修改, 保存后需通知消费者
    pub(crate) main_changed: bool,
    pub(crate) meta: PengineMetadata,
    pub(crate) links: BTreeMap<String, Link>,
    pub(crate) jobs: HashMap<String, Job<E::Cursor>>,
}

impl<E: LogicEngine> PengineActor<E> {
    pub fn new(
        name: &str,
        engine: E,
        store: Store,
        config: Arc<PengineConfig>,
        fetcher: Arc<dyn SourceFetcher>,
        mesh: MeshRef<PengineActor<E>>,
    ) -> Self {
        Self {
            name: name.to_string(),
            id: None,
            instance: Uuid::new_v4(),
            state: ActorState::Suspended,
            engine,
            store,
            config,
            fetcher,
            mesh,
            sessions: SessionRegistry::new(),
            output: OutputSink::detached(),
            txid: 0,
            tx_time: None,
            dirty: false,
            main_changed: false,
            meta: PengineMetadata::default(),
            links: BTreeMap::new(),
            jobs: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn txid(&self) -> u64 {
        self.txid
    }

    pub fn last_saved(&self) -> Option<DateTime<Utc>> {
        self.tx_time
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn metadata(&self) -> &PengineMetadata {
        &self.meta
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// 设置身份; 已有不同身份时为致命错误
    pub fn set_id(&mut self, id: &str) -> Result<()> {
        match &self.id {
            None => {
                self.id = Some(id.to_string());
                Ok(())
            }
            Some(current) if current == id => Ok(()),
            Some(current) => {
                self.state = ActorState::Terminated;
                Err(LogicLoomError::IdentityConflict {
                    current: current.clone(),
                    requested: id.to_string(),
                })
            }
        }
    }

    /// 为对端打开会话; `label` 为空时分配随机 id
    pub fn accept_socket(
        &mut self,
        label: Option<&str>,
        kind: SessionKind,
    ) -> (String, flume::Receiver<Frame>) {
        let id = label.map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
        let rx = self.sessions.open(id.clone(), kind);
        if kind == SessionKind::Client && !self.meta.listeners.contains(&id) {
            self.meta.listeners.push(id.clone());
            self.dirty = true;
        }
        (id, rx)
    }

    /// 关闭会话; 客户端会话同时从监听者中移除
    pub fn close_socket(&mut self, id: &str) -> bool {
        let closed = self.sessions.close(id);
        let before = self.meta.listeners.len();
        self.meta.listeners.retain(|l| l != id);
        if self.meta.listeners.len() != before {
            self.dirty = true;
        }
        closed
    }

    async fn bootstrap(&mut self) -> Result<()> {
        let name = self.name.clone();
        if let Some(tx) = self.store.get::<TxMeta>(TX_KEY).await? {
            self.set_id(&tx.id)?;
            self.txid = tx.txid;
            self.tx_time = Some(tx.time);
        }
        self.set_id(&name)?;

        if self.txid > 0 {
            let program = self
                .store
                .record::<ModuleSource>(&program_key(self.txid))
                .await?;
            for source in program.values() {
                if let Err(e) = self.engine.consult(&source.text, &source.module) {
                    warn!(actor = %name, module = %source.module, "Skipping module that failed to load: {}", e);
                }
            }
            self.engine.take_transaction();
        }

        self.meta = self.store.get(META_KEY).await?.unwrap_or_default();
        // 上一次激活的会话已不存在
        if !self.meta.listeners.is_empty() {
            self.meta.listeners.clear();
            self.dirty = true;
        }
        let links = self.store.record::<LinkRecord>(LINKS_KEY).await?;
        for link in links.into_values() {
            self.links.insert(link.module, Link::new(link.owner));
        }

        self.install_output();
        info!(
            actor = %name,
            txid = self.txid,
            links = self.links.len(),
            "Pengine recovered"
        );
        Ok(())
    }

    /// 引擎输出经由广播任务推送给会话, 不阻塞查询
    fn install_output(&mut self) {
        let (tx, rx) = flume::unbounded::<String>();
        self.output = OutputSink::new(tx);
        self.engine.set_output(self.output.clone());
        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            while let Ok(text) = rx.recv_async().await {
                sessions.broadcast(&Frame::Output { text }, None);
            }
        });
    }

    /// 保存; 未修改时不写入。返回是否发生了写入
    pub async fn save(&mut self) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }
        let txid = self.txid + 1;
        let time = Utc::now();
        let id = self.id.clone().unwrap_or_else(|| self.name.clone());
        let modules = self.dump_local(txid);
        let generation = program_key(txid);

        // 上次失败的保存可能留下同代残留
        self.store.delete_record(&generation).await?;
        self.store.put_record(&generation, &modules).await?;
        self.store.put(META_KEY, &self.meta).await?;
        let links: BTreeMap<String, LinkRecord> = self
            .links
            .iter()
            .map(|(module, link)| {
                let record = LinkRecord {
                    module: module.clone(),
                    owner: link.owner.clone(),
                };
                (module.clone(), record)
            })
            .collect();
        self.store.put_record(LINKS_KEY, &links).await?;
        self.store.put(TX_KEY, &TxMeta { id, txid, time }).await?;

        self.txid = txid;
        self.tx_time = Some(time);
        self.dirty = false;
        if txid > 1 {
            if let Err(e) = self.store.delete_record(&program_key(txid - 1)).await {
                warn!(actor = %self.name, txid, "Failed to delete previous generation: {}", e);
            }
        }
        info!(actor = %self.name, txid, modules = modules.len(), "Saved");
        Ok(true)
    }

    /// 需要持久化的模块: 排除库模块、配置排除项与外部模块
    pub fn dump_local(&self, txid: u64) -> BTreeMap<String, ModuleSource> {
        self.module_names()
            .into_iter()
            .filter(|m| !self.config.is_excluded(m) && !self.links.contains_key(m))
            .filter_map(|module| {
                let text = self.engine.dump_module(&module);
                if text.is_empty() {
                    return None;
                }
                let source = ModuleSource {
                    module: module.clone(),
                    txid,
                    text,
                };
                Some((module, source))
            })
            .collect()
    }

    /// 含外部模块的完整快照
    pub fn dump_all(&self) -> BTreeMap<String, String> {
        self.module_names()
            .into_iter()
            .map(|m| {
                let text = self.engine.dump_module(&m);
                (m, text)
            })
            .collect()
    }

    /// 展示用文本, 每个模块带 `:- module(Name).` 头
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (module, text) in self.dump_all() {
            out.push_str(&format!(":- module({}).\n", Term::atom(module)));
            out.push_str(&text);
            out.push('\n');
        }
        out
    }

    /// 默认模块的源码 (作为模块主人提供给消费者)
    pub fn dump_default(&self) -> String {
        self.engine.dump_module(DEFAULT_MODULE)
    }

    pub fn module_names(&self) -> Vec<String> {
        self.engine
            .modules()
            .into_iter()
            .filter(|m| !m.library)
            .map(|m| m.name)
            .collect()
    }

    pub(crate) fn module_loaded(&self, module: &str) -> bool {
        self.engine.modules().iter().any(|m| m.name == module)
    }

    pub fn meta_snapshot(&self) -> MetaSnapshot {
        MetaSnapshot {
            title: self.meta.title.clone(),
            application: self.meta.application.clone(),
            src_urls: self.meta.src_urls.clone(),
            modules: self.module_names(),
            txid: self.txid,
        }
    }

    pub fn snapshot(&self) -> ActorSnapshot {
        ActorSnapshot {
            name: self.name.clone(),
            state: self.state,
            txid: self.txid,
            dirty: self.dirty,
            modules: self.module_names(),
            links: self.links.keys().cloned().collect(),
            jobs: self.jobs.len(),
            sessions: self.sessions.len(),
            listeners: self.meta.listeners.clone(),
        }
    }
}

#[async_trait]
impl<E: LogicEngine> Actor for PengineActor<E> {
    fn type_name(&self) -> &'static str {
        "pengine"
    }

    async fn recover(&mut self) -> Result<()> {
        match self.bootstrap().await {
            Ok(()) => {
                self.state = ActorState::Running;
                Ok(())
            }
            Err(e) => {
                if e.is_fatal() {
                    self.state = ActorState::Terminated;
                }
                Err(e)
            }
        }
    }

    fn state(&self) -> ActorState {
        self.state
    }
}

impl<E: LogicEngine> Drop for PengineActor<E> {
    fn drop(&mut self) {
        for (module, link) in &self.links {
            if let Some(handle) = &link.channel {
                debug!(actor = %self.name, module = %module, "Closing gossip channel");
                handle.abort();
            }
        }
    }
}
