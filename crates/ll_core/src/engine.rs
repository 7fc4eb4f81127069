//! 逻辑引擎能力接口
//!
//! Actor 层只依赖这里的 trait, 具体引擎 (如 `ll_engine::MiniLog`) 在宿主处注入。

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::answer::Answer;
use crate::error::Result;
use crate::output::OutputSink;
use crate::term::Term;

/// 默认模块名
pub const DEFAULT_MODULE: &str = "user";

/// 事务中的数据库修改动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxAction {
    Asserta,
    Assertz,
    Retract,
    RetractAll,
}

impl TxAction {
    pub fn name(&self) -> &'static str {
        match self {
            TxAction::Asserta => "asserta",
            TxAction::Assertz => "assertz",
            TxAction::Retract => "retract",
            TxAction::RetractAll => "retractall",
        }
    }
}

/// 查询执行期间捕获的一条数据库修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxOp {
    /// 目标模块 (`None` 表示默认模块)
    pub module: Option<String>,
    pub action: TxAction,
    pub clause: Term,
}

impl TxOp {
    pub fn new(module: Option<String>, action: TxAction, clause: Term) -> Self {
        Self {
            module,
            action,
            clause,
        }
    }

    pub fn module_name(&self) -> &str {
        self.module.as_deref().unwrap_or(DEFAULT_MODULE)
    }

    /// 不带模块限定的目标, 例如 `assertz(fact(1))`
    pub fn goal(&self) -> Term {
        Term::compound(self.action.name(), vec![self.clause.clone()])
    }

    /// 带模块限定的目标, 例如 `shared:assertz(fact(1))`
    pub fn qualified(&self) -> Term {
        self.goal().qualify(self.module_name())
    }
}

impl fmt::Display for TxOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qualified())
    }
}

/// 模块描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub name: String,
    /// 库模块不参与持久化与展示
    pub library: bool,
}

/// 可恢复的求解游标
pub trait Resumable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// 是否还有未消费的选择点
    fn has_choice_points(&self) -> bool;

    /// 停止游标, 之后的 `solve` 返回 `Answer::Stopped`
    fn halt(&mut self);

    /// 查询中的命名变量 (按出现顺序)
    fn variables(&self) -> &[String];
}

/// 逻辑引擎能力
pub trait LogicEngine: Send + 'static {
    type Cursor: Resumable;

    /// 将源码加载到指定模块
    fn consult(&mut self, source: &str, module: &str) -> Result<()>;

    /// 为目标创建游标 (此时不求解)
    fn query(&mut self, goal: &str) -> Result<Self::Cursor>;

    /// 推进游标, 返回下一个结果
    fn solve(&mut self, cursor: &mut Self::Cursor) -> Answer;

    /// 只求第一个解
    fn run_once(&mut self, goal: &str) -> Result<Answer> {
        let mut cursor = self.query(goal)?;
        Ok(self.solve(&mut cursor))
    }

    /// 取出自上次调用以来捕获的数据库修改
    fn take_transaction(&mut self) -> Vec<TxOp>;

    /// 以源码形式导出模块
    fn dump_module(&self, module: &str) -> String;

    fn clear_module(&mut self, module: &str);

    fn modules(&self) -> Vec<ModuleInfo>;

    fn set_output(&mut self, sink: OutputSink);
}
