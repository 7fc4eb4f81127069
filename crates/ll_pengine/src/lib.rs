//! # ll_pengine - Pengine Actor
//!
//! 每个 Actor 包装一个逻辑引擎实例:
//! - 保存周期: 脏标记、分代程序快照、TxMeta 提交点
//! - 模块链接: 外部模块的本地副本, 经由会话推送复制
//! - 查询会话: 分页、可恢复任务、停止与销毁

pub mod actor;
pub mod config;
mod gossip;
pub mod host;
pub mod job;
pub mod pengine;
pub mod protocol;
pub mod sessions;
pub mod source;

pub use actor::{ActorSnapshot, PengineActor};
pub use config::PengineConfig;
pub use host::{Connection, PengineHost};
pub use job::{job_key, Batch, BatchEnd, Job};
pub use pengine::Origin;
pub use protocol::{Action, ErrorInfo, Event, Format, Frame, MetaSnapshot, Reply, Request, TxReply};
pub use sessions::{SessionKind, SessionRegistry};
pub use source::{HttpFetcher, SourceFetcher, StaticFetcher};
