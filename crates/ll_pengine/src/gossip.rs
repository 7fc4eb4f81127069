//! 模块链接与复制 (gossip)
//!
//! 模块 `M` 的主人是名为 `M` 的 Actor, 内容为其默认模块。
//! 消费者持有本地副本: 主人本地修改后推送 `Commit` 触发全量同步,
//! 消费者发起的修改经 `transact` 交给主人执行, 再以 `Ops` 推送给其他消费者。

use std::collections::BTreeMap;

use tracing::{debug, info, warn};
use uuid::Uuid;

use ll_core::{parse_term, Answer, LogicEngine, LogicLoomError, Result, TxOp};
use ll_durable::MeshRef;

use crate::actor::{Link, PengineActor};
use crate::protocol::{Frame, TxReply};
use crate::sessions::SessionKind;

impl<E: LogicEngine> PengineActor<E> {
    /// 链接应用模块: 登记、全量同步、打开推送通道
    pub async fn link_app(&mut self, name: &str) -> Result<()> {
        if name == self.name {
            return Err(LogicLoomError::Protocol(format!(
                "actor `{name}` cannot link to itself"
            )));
        }
        if self.links.contains_key(name) && self.module_loaded(name) {
            return self.gossip(name).await;
        }

        self.links
            .entry(name.to_string())
            .or_insert_with(|| Link::new(name));
        self.sync_foreign_module(name).await?;
        self.gossip(name).await?;
        self.dirty = true;
        info!(actor = %self.name, module = %name, "Linked application module");
        Ok(())
    }

    /// 确保到模块主人的推送通道存活
    pub async fn gossip(&mut self, module: &str) -> Result<()> {
        let owner_name = match self.links.get(module) {
            Some(link) if link.is_live() => return Ok(()),
            Some(link) => link.owner.clone(),
            None => {
                return Err(LogicLoomError::Actor(format!(
                    "module `{module}` is not linked"
                )))
            }
        };

        let owner = self.mesh.get(&owner_name).await?;
        let (_, frames) = owner
            .lock_within(self.config.call_timeout)
            .await?
            .accept_socket(Some(&self.name), SessionKind::Gossip);

        let handle = tokio::spawn(gossip_loop(
            self.mesh.clone(),
            self.name.clone(),
            self.instance,
            module.to_string(),
            frames,
        ));
        if let Some(link) = self.links.get_mut(module) {
            link.channel = Some(handle);
        }
        debug!(actor = %self.name, module, owner = %owner_name, "Gossip channel open");
        Ok(())
    }

    /// 拉取主人默认模块的完整源码并在本地重建
    pub async fn sync_foreign_module(&mut self, name: &str) -> Result<()> {
        let owner_name = self
            .links
            .get(name)
            .map_or_else(|| name.to_string(), |l| l.owner.clone());
        let owner = self.mesh.get(&owner_name).await?;
        let source = owner
            .lock_within(self.config.call_timeout)
            .await?
            .dump_default();
        self.reload_foreign(name, &source)
    }

    /// 清空并重新加载外部模块
    pub(crate) fn reload_foreign(&mut self, name: &str, source: &str) -> Result<()> {
        self.engine.clear_module(name);
        let outcome = self.engine.consult(source, name);
        self.engine.take_transaction();
        self.dirty = true;
        outcome?;
        debug!(actor = %self.name, module = %name, bytes = source.len(), "Foreign module synced");
        Ok(())
    }

    /// 在外部模块的命名空间内重放主人推送的操作
    pub fn replicate(&mut self, module: &str, text: &str) -> usize {
        let mut applied = 0;
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let goal = match parse_term(line) {
                Ok(parsed) => parsed.term.qualify(module).to_string(),
                Err(e) => {
                    warn!(actor = %self.name, module, "Unreadable replicated op `{}`: {}", line, e);
                    continue;
                }
            };
            match self.engine.run_once(&goal) {
                Ok(Answer::Success(_)) => applied += 1,
                Ok(other) => warn!(actor = %self.name, module, "Replicated op `{}` gave {:?}", line, other),
                Err(e) => warn!(actor = %self.name, module, "Replicated op `{}` failed: {}", line, e),
            }
        }
        self.engine.take_transaction();
        debug!(actor = %self.name, module, applied, "Replicated ops");
        applied
    }

    /// 把外部模块上的操作按模块分组交给各自的主人
    pub async fn transact(&mut self, ops: Vec<TxOp>) -> Result<()> {
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for op in ops {
            grouped
                .entry(op.module_name().to_string())
                .or_default()
                .push(op.goal().to_string());
        }

        for (module, goals) in grouped {
            let Some(owner_name) = self.links.get(&module).map(|l| l.owner.clone()) else {
                continue;
            };
            let owner = self.mesh.get(&owner_name).await?;
            let text = goals.join("\n");
            let reply = {
                let mut guard = owner.lock_within(self.config.call_timeout).await?;
                guard.handle_transaction(&self.name, &text).await
            };
            match reply {
                TxReply::Accepted => {
                    debug!(actor = %self.name, module = %module, ops = goals.len(), "Foreign transaction accepted")
                }
                TxReply::Resync { source } => {
                    warn!(actor = %self.name, module = %module, "Foreign transaction diverged, resyncing");
                    self.reload_foreign(&module, &source)?;
                }
                TxReply::Failed { reason } => {
                    return Err(LogicLoomError::ForeignTransaction { module, reason });
                }
            }
        }
        Ok(())
    }

    /// 模块主人执行消费者提交的操作 (每行一个目标)
    pub async fn handle_transaction(&mut self, sender: &str, text: &str) -> TxReply {
        let batch = self.config.gossip_batch.max(1);
        let mut buffer: Vec<&str> = Vec::new();
        let mut diverged = false;

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match self.engine.run_once(line) {
                Ok(Answer::Success(_)) => {
                    buffer.push(line);
                    if buffer.len() >= batch {
                        self.flush_ops(sender, &mut buffer);
                    }
                }
                Ok(other) => {
                    warn!(actor = %self.name, sender, "Op `{}` did not apply: {:?}", line, other);
                    diverged = true;
                }
                Err(e) => {
                    warn!(actor = %self.name, sender, "Op `{}` rejected: {}", line, e);
                    diverged = true;
                }
            }
        }
        self.flush_ops(sender, &mut buffer);
        self.engine.take_transaction();
        self.dirty = true;

        if let Err(e) = self.save().await {
            return TxReply::Failed {
                reason: e.to_string(),
            };
        }
        if diverged {
            TxReply::Resync {
                source: self.dump_default(),
            }
        } else {
            TxReply::Accepted
        }
    }

    fn flush_ops(&self, sender: &str, buffer: &mut Vec<&str>) {
        if buffer.is_empty() {
            return;
        }
        let frame = Frame::Ops {
            module: self.name.clone(),
            text: buffer.join("\n"),
        };
        let delivered = self.sessions.broadcast(&frame, Some(sender));
        debug!(actor = %self.name, ops = buffer.len(), delivered, "Broadcast ops");
        buffer.clear();
    }

    /// 为未存活的持久化链接重新同步并打开通道; 失败只记录日志
    pub async fn ensure_links(&mut self) {
        let stale: Vec<String> = self
            .links
            .iter()
            .filter(|(_, link)| !link.is_live())
            .map(|(module, _)| module.clone())
            .collect();
        for module in stale {
            let relinked = match self.sync_foreign_module(&module).await {
                Ok(()) => self.gossip(&module).await,
                Err(e) => Err(e),
            };
            if let Err(e) = relinked {
                warn!(actor = %self.name, module = %module, "Relink failed: {}", e);
            }
        }
    }

    /// 处理模块主人推送的帧
    pub(crate) async fn on_gossip(&mut self, module: &str, frame: Frame) {
        match frame {
            Frame::Commit { .. } => {
                if let Err(e) = self.sync_foreign_module(module).await {
                    warn!(actor = %self.name, module, "Resync failed: {}", e);
                    return;
                }
                if let Err(e) = self.save().await {
                    warn!(actor = %self.name, module, "Save after resync failed: {}", e);
                }
            }
            Frame::Ops { text, .. } => {
                self.replicate(module, &text);
            }
            Frame::Updated { module: updated } => {
                debug!(actor = %self.name, module = %updated, "Upstream module updated");
                return;
            }
            Frame::Reply(_) | Frame::Output { .. } => return,
        }
        self.sessions.broadcast(
            &Frame::Updated {
                module: module.to_string(),
            },
            None,
        );
    }
}

/// 消费者一侧的通道任务; 通道关闭或该次激活被驱逐时结束
async fn gossip_loop<E: LogicEngine>(
    mesh: MeshRef<PengineActor<E>>,
    consumer: String,
    instance: Uuid,
    module: String,
    frames: flume::Receiver<Frame>,
) {
    while let Ok(frame) = frames.recv_async().await {
        let Some(address) = mesh.lookup(&consumer).await else {
            break;
        };
        let mut actor = address.lock().await;
        if actor.instance != instance {
            break;
        }
        actor.on_gossip(&module, frame).await;
    }
    debug!(actor = %consumer, module = %module, "Gossip channel closed");
}
