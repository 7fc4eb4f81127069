//! 查询任务: 可恢复游标与结果缓存

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use ll_core::{parse_term, Answer, Bindings, LogicEngine, Resumable, Result, Term};

/// 任务在 Actor 内的登记键
pub fn job_key(actor: &str, id: &str) -> String {
    format!("{actor}_{id}")
}

/// 一次批量执行的结束方式
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEnd {
    /// 达到分页上限
    Limit,
    /// 解已耗尽
    Exhausted,
    Error(Term),
    Stopped,
}

#[derive(Debug)]
pub struct Batch {
    pub results: Vec<Value>,
    pub end: BatchEnd,
    /// 本批耗时 (秒)
    pub time: f64,
}

/// 一个进行中的查询
pub struct Job<C> {
    pub id: String,
    pub ask: String,
    template: Option<Term>,
    pub cursor: C,
    /// 已返回过的全部结果
    pub results: Vec<Value>,
    /// 任务期间引擎写出的文本
    pub output: String,
    pub created: DateTime<Utc>,
}

impl<C: Resumable> Job<C> {
    pub fn start<E>(engine: &mut E, id: &str, ask: &str, template: Option<&str>) -> Result<Self>
    where
        E: LogicEngine<Cursor = C>,
    {
        let template = template.map(|t| parse_term(t).map(|p| p.term)).transpose()?;
        let cursor = engine.query(ask)?;
        Ok(Self {
            id: id.to_string(),
            ask: ask.to_string(),
            template,
            cursor,
            results: Vec::new(),
            output: String::new(),
            created: Utc::now(),
        })
    }

    /// 拉取至多 `limit` 个解
    pub fn run<E>(&mut self, engine: &mut E, limit: usize) -> Batch
    where
        E: LogicEngine<Cursor = C>,
    {
        let started = Instant::now();
        let mut results = Vec::new();
        let end = loop {
            if results.len() >= limit {
                break BatchEnd::Limit;
            }
            match engine.solve(&mut self.cursor) {
                Answer::Success(bindings) => results.push(self.project(&bindings)),
                Answer::Failure => break BatchEnd::Exhausted,
                Answer::Error(ball) => break BatchEnd::Error(ball),
                Answer::Stopped => break BatchEnd::Stopped,
            }
        };
        self.results.extend(results.iter().cloned());
        let time = started.elapsed().as_secs_f64();
        debug!(job = %self.id, count = results.len(), ?end, "Batch finished");
        Batch { results, end, time }
    }

    /// 查询变量名 (回复的 projection)
    pub fn projection(&self) -> Vec<String> {
        self.cursor.variables().to_vec()
    }

    /// 仍可能有更多解
    pub fn has_more(&self) -> bool {
        self.cursor.has_choice_points()
    }

    pub fn halt(&mut self) {
        self.cursor.halt();
    }

    /// 按模板投影; 无模板时为 `{变量: 值}`, 未绑定的变量不出现
    fn project(&self, bindings: &Bindings) -> Value {
        if let Some(template) = &self.template {
            return template.substitute(bindings).to_json();
        }
        let object: Map<String, Value> = self
            .cursor
            .variables()
            .iter()
            .filter_map(|var| match bindings.get(var) {
                Some(Term::Var(_)) | None => None,
                Some(value) => Some((var.clone(), value.to_json())),
            })
            .collect();
        Value::Object(object)
    }
}
