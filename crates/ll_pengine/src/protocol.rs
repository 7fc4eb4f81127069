//! 查询会话协议: 请求、回复与推送帧

use serde::{Deserialize, Serialize};
use serde_json::Value;

use ll_core::{LogicLoomError, Result, Term};

/// 回复格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Json,
    Text,
}

/// 客户端请求
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Request {
    pub id: Option<String>,
    /// 要链接的应用 (另一个 Actor 的名称)
    pub application: Option<String>,
    pub ask: Option<String>,
    pub src_text: Option<String>,
    pub src_url: Vec<String>,
    pub template: Option<String>,
    pub chunk: Option<usize>,
    pub create: bool,
    pub destroy: bool,
    pub stop: bool,
    pub next: bool,
    pub format: Format,
    pub title: Option<String>,
}

/// 解析后的请求动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Ask,
    Next,
    Stop,
    Destroy,
}

impl Request {
    pub fn create() -> Self {
        Self {
            create: true,
            ..Default::default()
        }
    }

    pub fn ask(goal: impl Into<String>) -> Self {
        Self {
            ask: Some(goal.into()),
            ..Default::default()
        }
    }

    pub fn next(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            next: true,
            ..Default::default()
        }
    }

    pub fn stop(id: Option<String>) -> Self {
        Self {
            id,
            stop: true,
            ..Default::default()
        }
    }

    pub fn destroy(id: Option<String>) -> Self {
        Self {
            id,
            destroy: true,
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_chunk(mut self, chunk: usize) -> Self {
        self.chunk = Some(chunk);
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn with_application(mut self, application: impl Into<String>) -> Self {
        self.application = Some(application.into());
        self
    }

    pub fn with_src_text(mut self, text: impl Into<String>) -> Self {
        self.src_text = Some(text.into());
        self
    }

    pub fn with_src_url(mut self, url: impl Into<String>) -> Self {
        self.src_url.push(url.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// 校验并解析动作: stop > destroy > next > ask > create
    pub fn action(&self) -> Result<Action> {
        if self.chunk == Some(0) {
            return Err(LogicLoomError::Protocol("chunk must be at least 1".into()));
        }
        if self.next && self.id.is_none() {
            return Err(LogicLoomError::Protocol("next requires a query id".into()));
        }
        if self.ask.as_deref().is_some_and(|goal| goal.trim().is_empty()) {
            return Err(LogicLoomError::Protocol("ask must not be empty".into()));
        }

        let action = if self.stop {
            Action::Stop
        } else if self.destroy {
            Action::Destroy
        } else if self.next {
            Action::Next
        } else if self.ask.is_some() {
            Action::Ask
        } else {
            Action::Create
        };
        Ok(action)
    }
}

/// 回复事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Event {
    Create,
    Destroy,
    Success,
    Failure,
    Error,
    Stop,
}

/// `create` 回复携带的元数据快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaSnapshot {
    pub title: Option<String>,
    pub application: Option<String>,
    pub src_urls: Vec<String>,
    pub modules: Vec<String>,
    pub txid: u64,
}

/// 异常项的扁平化诊断
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// 原始异常项
    pub ball: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub found: Option<String>,
    pub message: String,
}

impl ErrorInfo {
    /// 展开 `error(Formal, Context)`; `type_error/2` 等二元形式给出 expected/found
    pub fn from_ball(ball: &Term) -> Self {
        let formal = match ball {
            Term::Compound(f, args) if f == "error" && args.len() == 2 => &args[0],
            other => other,
        };
        let (kind, expected, found) = match formal {
            Term::Compound(f, args) if args.len() == 2 && f.ends_with("_error") => (
                f.clone(),
                Some(args[0].to_string()),
                Some(args[1].to_string()),
            ),
            Term::Compound(f, _) | Term::Atom(f) => (f.clone(), None, None),
            _ => ("throw".to_string(), None, None),
        };
        let message = match (&expected, &found) {
            (Some(expected), Some(found)) => format!("{kind}: expected {expected}, found {found}"),
            _ => format!("Unhandled exception: {ball}"),
        };
        Self {
            ball: ball.to_string(),
            kind,
            expected,
            found,
            message,
        }
    }
}

/// 一次请求的回复
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub event: Event,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub more: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<MetaSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl Reply {
    pub fn new(event: Event, id: impl Into<String>) -> Self {
        Self {
            event,
            id: id.into(),
            results: None,
            more: None,
            projection: None,
            time: None,
            output: None,
            meta: None,
            error: None,
        }
    }

    pub fn error(id: impl Into<String>, ball: &Term) -> Self {
        Self {
            error: Some(ErrorInfo::from_ball(ball)),
            ..Self::new(Event::Error, id)
        }
    }

    /// 把加载或解析失败转换为异常项回复
    pub fn from_error(id: impl Into<String>, err: &LogicLoomError) -> Self {
        let formal = match err {
            LogicLoomError::Syntax { message, .. } => {
                Term::compound("syntax_error", vec![Term::atom(message.as_str())])
            }
            LogicLoomError::Fetch { url, status } => Term::compound(
                "fetch_error",
                vec![Term::atom(url.as_str()), Term::Int(i64::from(*status))],
            ),
            LogicLoomError::Consult { origin, .. } => {
                Term::compound("consult_error", vec![Term::atom(origin.as_str())])
            }
            other => Term::compound("system_error", vec![Term::atom(other.to_string())]),
        };
        let ball = Term::compound("error", vec![formal, Term::atom(err.to_string())]);
        Self::error(id, &ball)
    }

    pub fn is_error(&self) -> bool {
        self.event == Event::Error
    }

    /// 纯文本渲染 (`format=text`)
    pub fn to_text(&self) -> String {
        match self.event {
            Event::Create => format!("created {}\n", self.id),
            Event::Destroy => format!("destroyed {}\n", self.id),
            Event::Stop => format!("stopped {}\n", self.id),
            Event::Failure => self.with_output("false.\n"),
            Event::Error => {
                let message = self.error.as_ref().map_or("error", |e| e.message.as_str());
                self.with_output(&format!("ERROR: {message}\n"))
            }
            Event::Success => {
                let mut text = String::new();
                for result in self.results.iter().flatten() {
                    text.push_str(&render_result(result));
                    text.push('\n');
                }
                text.push_str(if self.more == Some(true) { ";\n" } else { "true.\n" });
                self.with_output(&text)
            }
        }
    }

    fn with_output(&self, text: &str) -> String {
        match &self.output {
            Some(output) if !output.is_empty() => format!("{output}{text}"),
            _ => text.to_string(),
        }
    }
}

fn render_result(result: &Value) -> String {
    match result {
        Value::Object(map) if map.is_empty() => "true".to_string(),
        Value::Object(map) => map
            .iter()
            .map(|(var, value)| format!("{var} = {value}"))
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

/// 推送到会话的帧
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// 其他会话发起请求的回复
    Reply(Reply),
    /// 引擎输出
    Output { text: String },
    /// 模块主人的增量操作, 每行一个目标
    Ops { module: String, text: String },
    /// 模块主人本地修改后要求全量同步
    Commit { module: String },
    /// 消费者已更新其外部模块
    Updated { module: String },
}

/// 模块主人对外部事务的答复
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TxReply {
    Accepted,
    Resync { source: String },
    Failed { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use ll_core::parse_term;

    #[test]
    fn test_action_priority() {
        let mut request = Request::ask("true").with_id("q");
        assert_eq!(request.action().unwrap(), Action::Ask);
        request.next = true;
        assert_eq!(request.action().unwrap(), Action::Next);
        request.destroy = true;
        assert_eq!(request.action().unwrap(), Action::Destroy);
        request.stop = true;
        assert_eq!(request.action().unwrap(), Action::Stop);
        assert_eq!(Request::create().action().unwrap(), Action::Create);
        assert_eq!(Request::default().action().unwrap(), Action::Create);
    }

    #[test]
    fn test_validation() {
        let invalid = [
            Request::ask("member(X, [1])").with_chunk(0),
            Request {
                next: true,
                ..Default::default()
            },
            Request::ask("   "),
        ];
        for request in invalid {
            assert!(matches!(request.action(), Err(LogicLoomError::Protocol(_))));
        }
    }

    #[test]
    fn test_request_defaults_from_json() {
        let request: Request =
            serde_json::from_str(r#"{"ask": "p(X)", "chunk": 2, "format": "text"}"#).unwrap();
        assert_eq!(request.ask.as_deref(), Some("p(X)"));
        assert_eq!(request.chunk, Some(2));
        assert_eq!(request.format, Format::Text);
        assert!(request.src_url.is_empty());
        assert!(!request.next);
    }

    #[test]
    fn test_error_flattening() {
        let ball = parse_term("error(type_error(evaluable, foo/0), context(is/2, _))")
            .unwrap()
            .term;
        let info = ErrorInfo::from_ball(&ball);
        assert_eq!(info.kind, "type_error");
        assert_eq!(info.expected.as_deref(), Some("evaluable"));
        assert_eq!(info.found.as_deref(), Some("foo / 0"));

        let raw = parse_term("existence_error(pengine, q1)").unwrap().term;
        let info = ErrorInfo::from_ball(&raw);
        assert_eq!(info.kind, "existence_error");
        assert_eq!(info.found.as_deref(), Some("q1"));

        let info = ErrorInfo::from_ball(&Term::atom("oops"));
        assert_eq!(info.kind, "oops");
        assert_eq!(info.message, "Unhandled exception: oops");
    }

    #[test]
    fn test_reply_json_omits_empty_fields() {
        let reply = Reply::new(Event::Destroy, "q1");
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json, serde_json::json!({"event": "destroy", "id": "q1"}));
    }

    #[test]
    fn test_frame_layout() {
        let frame = Frame::Ops {
            module: "shared".into(),
            text: "assertz(fact(1))".into(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "ops");
        assert_eq!(json["module"], "shared");

        let reply = Frame::Reply(Reply::new(Event::Stop, "q"));
        let back: Frame = serde_json::from_str(&serde_json::to_string(&reply).unwrap()).unwrap();
        assert_eq!(back, reply);
    }

    #[test]
    fn test_text_rendering() {
        let mut reply = Reply::new(Event::Success, "q");
        reply.results = Some(vec![serde_json::json!({"X": 1}), serde_json::json!({"X": 2})]);
        reply.more = Some(true);
        reply.output = Some("hello\n".into());
        assert_eq!(reply.to_text(), "hello\nX = 1\nX = 2\n;\n");
        assert_eq!(Reply::new(Event::Failure, "q").to_text(), "false.\n");
    }
}
