//! # ll_durable - LogicLoom Durable Storage
//!
//! 持久化底座: 受单条大小限制的 KV 后端 (内存 / SQLite)、分片记录存储、
//! 带版本的类型化持久结构, 以及按名称寻址的 Actor 激活/驱逐。

pub mod actor_mesh;
pub mod kv;
pub mod schema;
pub mod store;

pub use actor_mesh::{Actor, ActorAddress, ActorMesh, ActorState, MeshRef};
pub use kv::{KvBackend, MemoryKv, SqliteKv, DEFAULT_MAX_ENTRY_SIZE};
pub use schema::{
    Envelope, LinkRecord, ModuleSource, PengineMetadata, Schema, Stored, TxMeta, SCHEMA_VERSION,
};
pub use store::Store;
