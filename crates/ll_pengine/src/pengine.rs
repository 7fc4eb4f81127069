//! 请求生命周期: create / ask / next / stop / destroy

use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

use ll_core::{LogicEngine, LogicLoomError, Result, Term, TxOp, DEFAULT_MODULE};
use ll_durable::ActorState;

use crate::actor::PengineActor;
use crate::job::{job_key, BatchEnd, Job};
use crate::protocol::{Action, Event, Frame, Reply, Request};
use crate::sessions::SessionKind;

/// 请求来源; 来自会话的请求会把回复扇出给同一 Actor 的其他会话
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Direct,
    Socket(String),
}

impl<E: LogicEngine> PengineActor<E> {
    /// 处理一个请求
    pub async fn handle(&mut self, request: Request, origin: Origin) -> Result<Reply> {
        if self.state == ActorState::Terminated {
            return Err(LogicLoomError::Actor(format!(
                "actor `{}` is terminated",
                self.name
            )));
        }
        let action = request.action()?;
        self.ensure_links().await;

        let id = request.id.clone();
        let mut reply = match action {
            Action::Stop => self.stop(id.as_deref()),
            Action::Destroy => self.destroy(id.as_deref()),
            Action::Next => {
                let id = id.unwrap_or_default();
                self.next(&id, request.chunk)
            }
            Action::Create | Action::Ask => {
                let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
                match self.prepare(&request).await {
                    Ok(()) if action == Action::Ask => self.ask(&request, id),
                    Ok(()) => Reply::new(Event::Create, id),
                    Err(e) if e.is_source_error() => {
                        info!(actor = %self.name, "Source loading failed: {}", e);
                        Reply::from_error(id, &e)
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        self.commit().await?;
        if reply.event == Event::Create {
            reply.meta = Some(self.meta_snapshot());
        }
        if let Origin::Socket(session) = &origin {
            self.sessions
                .broadcast(&Frame::Reply(reply.clone()), Some(session.as_str()));
        }
        Ok(reply)
    }

    /// 链接应用并加载源码
    async fn prepare(&mut self, request: &Request) -> Result<()> {
        if let Some(title) = &request.title {
            if self.meta.title.as_ref() != Some(title) {
                self.meta.title = Some(title.clone());
                self.dirty = true;
            }
        }

        if let Some(app) = &request.application {
            self.link_app(app).await?;
            if self.meta.application.as_ref() != Some(app) {
                self.meta.application = Some(app.clone());
                self.dirty = true;
            }
        }

        for url in &request.src_url {
            if self.meta.src_urls.contains(url) {
                debug!(actor = %self.name, url = %url, "Source already consulted");
                continue;
            }
            let text = tokio::time::timeout(self.config.call_timeout, self.fetcher.fetch(url))
                .await
                .map_err(|_| LogicLoomError::Actor(format!("fetching {url} timed out")))??;
            self.load_source(&text)?;
            self.meta.src_urls.push(url.clone());
        }

        if let Some(text) = &request.src_text {
            let digest = hex::encode(Sha256::digest(text.as_bytes()));
            if self.meta.src_digest.as_deref() != Some(digest.as_str()) {
                self.load_source(text)?;
                self.meta.src_text = Some(text.clone());
                self.meta.src_digest = Some(digest);
            }
        }
        Ok(())
    }

    fn load_source(&mut self, text: &str) -> Result<()> {
        // 部分子句可能已加载, 失败也要保存
        self.dirty = true;
        self.main_changed = true;
        self.engine.consult(text, DEFAULT_MODULE)
    }

    fn ask(&mut self, request: &Request, id: String) -> Reply {
        let goal = request.ask.as_deref().unwrap_or_default();
        // 新任务不继承之前的输出
        self.output.take();
        let job = match Job::start(&mut self.engine, &id, goal, request.template.as_deref()) {
            Ok(job) => job,
            Err(e) => return Reply::from_error(id, &e),
        };
        let key = job_key(&self.name, &id);
        self.jobs.insert(key.clone(), job);
        self.resume(&key, request.chunk)
    }

    fn next(&mut self, id: &str, chunk: Option<usize>) -> Reply {
        let key = job_key(&self.name, id);
        if !self.jobs.contains_key(&key) {
            let ball = Term::compound(
                "existence_error",
                vec![Term::atom("pengine"), Term::atom(id)],
            );
            return Reply::error(id, &ball);
        }
        self.resume(&key, chunk)
    }

    fn resume(&mut self, key: &str, chunk: Option<usize>) -> Reply {
        let limit = self.config.chunk_limit(chunk);
        let Some(job) = self.jobs.get_mut(key) else {
            return Reply::new(Event::Failure, key);
        };

        let batch = job.run(&mut self.engine, limit);
        job.output.push_str(&self.output.take());

        let id = job.id.clone();
        let success = |more: bool| Reply {
            results: Some(batch.results.clone()),
            more: Some(more),
            projection: Some(job.projection()),
            ..Reply::new(Event::Success, id.clone())
        };
        let (mut reply, keep) = match &batch.end {
            BatchEnd::Error(ball) => (Reply::error(id.clone(), ball), false),
            BatchEnd::Stopped => (Reply::new(Event::Stop, id.clone()), true),
            BatchEnd::Exhausted if batch.results.is_empty() => {
                let failure = Reply {
                    results: Some(Vec::new()),
                    projection: Some(job.projection()),
                    ..Reply::new(Event::Failure, id.clone())
                };
                (failure, false)
            }
            BatchEnd::Exhausted => (success(false), false),
            BatchEnd::Limit => {
                let more = job.has_more();
                (success(more), more)
            }
        };
        reply.time = Some(batch.time);
        if !job.output.is_empty() {
            reply.output = Some(job.output.clone());
        }

        if !keep {
            self.jobs.remove(key);
        }
        debug!(actor = %self.name, job = %id, event = ?reply.event, "Job batch replied");
        reply
    }

    fn stop(&mut self, id: Option<&str>) -> Reply {
        match id {
            Some(id) => {
                if let Some(job) = self.jobs.get_mut(&job_key(&self.name, id)) {
                    job.halt();
                }
            }
            None => self.jobs.values_mut().for_each(Job::halt),
        }
        Reply::new(Event::Stop, id.unwrap_or(&self.name))
    }

    fn destroy(&mut self, id: Option<&str>) -> Reply {
        match id {
            Some(id) => {
                self.jobs.remove(&job_key(&self.name, id));
            }
            None => self.jobs.clear(),
        }
        Reply::new(Event::Destroy, id.unwrap_or(&self.name))
    }

    /// 请求结束: 外部模块的操作交给主人, 本地操作标记为脏, 然后保存
    async fn commit(&mut self) -> Result<()> {
        let ops = self.engine.take_transaction();
        let (foreign, local): (Vec<TxOp>, Vec<TxOp>) = ops.into_iter().partition(|op| {
            op.module
                .as_ref()
                .is_some_and(|m| self.links.contains_key(m))
        });

        if !local.is_empty() {
            self.dirty = true;
            if local.iter().any(|op| op.module_name() == DEFAULT_MODULE) {
                self.main_changed = true;
            }
        }
        if !foreign.is_empty() {
            self.transact(foreign).await?;
        }

        self.save().await?;
        if self.main_changed {
            self.main_changed = false;
            let frame = Frame::Commit {
                module: self.name.clone(),
            };
            let notified = self
                .sessions
                .broadcast_kind(SessionKind::Gossip, &frame, None);
            debug!(actor = %self.name, notified, "Announced commit");
        }
        Ok(())
    }
}
