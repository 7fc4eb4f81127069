//! 全局错误处理机制

use thiserror::Error;

/// LogicLoom 统一错误类型
#[derive(Error, Debug)]
pub enum LogicLoomError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Syntax error: {message} (near `{fragment}`)")]
    Syntax { message: String, fragment: String },

    #[error("Consult error in {origin}: {message}")]
    Consult { origin: String, message: String },

    #[error("Fetch of {url} failed with status {status}")]
    Fetch { url: String, status: u16 },

    #[error("Actor error: {0}")]
    Actor(String),

    #[error("Identity conflict: actor is `{current}`, got `{requested}`")]
    IdentityConflict { current: String, requested: String },

    #[error("Foreign transaction on module `{module}` failed: {reason}")]
    ForeignTransaction { module: String, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl LogicLoomError {
    /// 构造语法错误, 截取出错附近的片段
    pub fn syntax(message: impl Into<String>, fragment: &str) -> Self {
        let fragment: String = fragment.chars().take(40).collect();
        LogicLoomError::Syntax {
            message: message.into(),
            fragment,
        }
    }

    /// 是否为不可恢复的配置错误
    pub fn is_fatal(&self) -> bool {
        matches!(self, LogicLoomError::IdentityConflict { .. })
    }

    /// 是否属于源码加载阶段的错误 (以 error 事件回复, 而非请求失败)
    pub fn is_source_error(&self) -> bool {
        matches!(
            self,
            LogicLoomError::Syntax { .. }
                | LogicLoomError::Consult { .. }
                | LogicLoomError::Fetch { .. }
        )
    }
}

/// 统一 Result 类型别名
pub type Result<T> = std::result::Result<T, LogicLoomError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let conflict = LogicLoomError::IdentityConflict {
            current: "a".into(),
            requested: "b".into(),
        };
        assert!(conflict.is_fatal());
        assert!(!conflict.is_source_error());

        let fetch = LogicLoomError::Fetch {
            url: "https://example.org/x.pl".into(),
            status: 404,
        };
        assert!(fetch.is_source_error());
        assert_eq!(
            fetch.to_string(),
            "Fetch of https://example.org/x.pl failed with status 404"
        );
    }

    #[test]
    fn test_syntax_fragment_is_truncated() {
        let long = "x".repeat(100);
        match LogicLoomError::syntax("unexpected token", &long) {
            LogicLoomError::Syntax { fragment, .. } => assert_eq!(fragment.len(), 40),
            other => panic!("unexpected {other:?}"),
        }
    }
}
