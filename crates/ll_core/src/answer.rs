//! 求解结果

use serde::{Deserialize, Serialize};

use crate::term::{Bindings, Term};

/// 单次 `solve` 的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Answer {
    /// 一个解 (查询变量的绑定)
    Success(Bindings),
    /// 没有 (更多) 解
    Failure,
    /// 抛出的异常项
    Error(Term),
    /// 游标已被显式停止
    Stopped,
}

impl Answer {
    pub fn is_success(&self) -> bool {
        matches!(self, Answer::Success(_))
    }

    /// 异常项 (仅 `Error`)
    pub fn ball(&self) -> Option<&Term> {
        match self {
            Answer::Error(ball) => Some(ball),
            _ => None,
        }
    }
}
