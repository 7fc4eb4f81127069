//! # ll_core - LogicLoom Core Primitives
//!
//! 核心原语层: 项模型与读写、统一错误类型、逻辑引擎能力接口、事务操作与输出通道。
//! 此 crate 是整个项目的基础依赖，不依赖其他业务 crate。

pub mod answer;
pub mod engine;
pub mod error;
pub mod ops;
pub mod output;
pub mod reader;
pub mod term;

pub use answer::Answer;
pub use engine::{LogicEngine, ModuleInfo, Resumable, TxAction, TxOp, DEFAULT_MODULE};
pub use error::{LogicLoomError, Result};
pub use output::OutputSink;
pub use reader::{parse_clauses, parse_term, ParsedTerm};
pub use term::{Bindings, Term};
