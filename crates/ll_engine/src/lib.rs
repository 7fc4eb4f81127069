//! # ll_engine - MiniLog 参考引擎
//!
//! 实现 `ll_core::LogicEngine` 的小型逻辑引擎: 模块化子句库、
//! 深度优先回溯、可序列化游标与事务捕获。用于驱动 Actor 层的端到端流程,
//! 并不追求完整的 Prolog 语义。

mod arith;
mod builtins;
mod cursor;
mod database;
mod error;
pub mod library;
mod machine;

use ll_core::{
    parse_clauses, parse_term, Answer, LogicEngine, LogicLoomError, ModuleInfo, OutputSink,
    Result, Term, TxOp, DEFAULT_MODULE,
};
use tracing::{debug, error};

pub use cursor::Cursor;
use database::{Clause, Database};
use machine::Machine;

/// 单次 `solve` 的默认推理步数上限
pub const DEFAULT_MAX_INFERENCES: u64 = 5_000_000;

/// MiniLog 引擎实例 (每个 Actor 一个)
pub struct MiniLog {
    db: Database,
    tx: Vec<TxOp>,
    sink: OutputSink,
    max_inferences: u64,
}

impl Default for MiniLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MiniLog {
    pub fn new() -> Self {
        let mut engine = Self {
            db: Database::default(),
            tx: Vec::new(),
            sink: OutputSink::detached(),
            max_inferences: DEFAULT_MAX_INFERENCES,
        };
        if let Err(e) = engine.consult(library::LISTS_SOURCE, library::LISTS) {
            error!("Failed to load library {}: {}", library::LISTS, e);
        }
        engine.db.module_mut(library::LISTS).library = true;
        engine
    }

    pub fn with_max_inferences(mut self, limit: u64) -> Self {
        self.max_inferences = limit;
        self
    }

    fn run_directive(&mut self, goal: Term, module: &str) -> Result<()> {
        let text = goal.to_string();
        let mut cursor = Cursor::new(Term::atom("true"), module, Vec::new(), 0);
        cursor.goals[0].goal = anonymous_to_fresh(&mut cursor, &goal);
        match self.solve(&mut cursor) {
            Answer::Success(_) => Ok(()),
            Answer::Error(ball) => Err(LogicLoomError::Consult {
                origin: module.to_string(),
                message: format!("directive `{text}` raised {ball}"),
            }),
            _ => Err(LogicLoomError::Consult {
                origin: module.to_string(),
                message: format!("directive `{text}` failed"),
            }),
        }
    }

    fn add_clause(&mut self, term: Term, module: &str) -> Result<()> {
        if term.indicator() == Some(("-->", 2)) {
            return Err(LogicLoomError::Consult {
                origin: module.to_string(),
                message: "grammar rules are not supported".into(),
            });
        }
        let clause = Clause::from_term(term).map_err(|ball| LogicLoomError::Consult {
            origin: module.to_string(),
            message: ball.to_string(),
        })?;
        let Some((name, arity)) = clause.head.indicator().map(|(n, a)| (n.to_string(), a)) else {
            return Ok(());
        };
        self.db.module_mut(module).entry(&name, arity).clauses.push(clause);
        Ok(())
    }
}

impl LogicEngine for MiniLog {
    type Cursor = Cursor;

    fn consult(&mut self, source: &str, module: &str) -> Result<()> {
        let clauses = parse_clauses(source)?;
        let count = clauses.len();
        let captured = std::mem::take(&mut self.tx);
        self.db.module_mut(module);
        let mut outcome = Ok(());
        for term in clauses {
            let step = match term {
                Term::Compound(f, mut args) if f == ":-" && args.len() == 1 => {
                    match args.pop() {
                        Some(Term::Compound(d, _)) | Some(Term::Atom(d)) if d == "module" => Ok(()),
                        Some(goal) => self.run_directive(goal, module),
                        None => Ok(()),
                    }
                }
                clause => self.add_clause(clause, module),
            };
            if let Err(e) = step {
                outcome = Err(e);
                break;
            }
        }
        self.tx = captured;
        debug!(module, clauses = count, ok = outcome.is_ok(), "Consulted source");
        outcome
    }

    fn query(&mut self, goal: &str) -> Result<Cursor> {
        let parsed = parse_term(goal)?;
        let mut cursor = Cursor::new(Term::atom("true"), DEFAULT_MODULE, parsed.variables, 0);
        cursor.goals[0].goal = anonymous_to_fresh(&mut cursor, &parsed.term);
        Ok(cursor)
    }

    fn solve(&mut self, cursor: &mut Cursor) -> Answer {
        if cursor.halted {
            return Answer::Stopped;
        }
        if cursor.done {
            return Answer::Failure;
        }
        let mut machine = Machine::new(self);
        let found = if cursor.started {
            match machine.backtrack(cursor) {
                Ok(true) => machine.run(cursor),
                other => other,
            }
        } else {
            cursor.started = true;
            machine.run(cursor)
        };
        match found {
            Ok(true) => Answer::Success(cursor.projection()),
            Ok(false) => {
                cursor.done = true;
                Answer::Failure
            }
            Err(ball) => {
                cursor.done = true;
                cursor.goals.clear();
                cursor.choices.clear();
                Answer::Error(ball)
            }
        }
    }

    fn take_transaction(&mut self) -> Vec<TxOp> {
        std::mem::take(&mut self.tx)
    }

    fn dump_module(&self, module: &str) -> String {
        self.db.module(module).map(|m| m.dump()).unwrap_or_default()
    }

    fn clear_module(&mut self, module: &str) {
        self.db.clear(module);
    }

    fn modules(&self) -> Vec<ModuleInfo> {
        self.db.infos()
    }

    fn set_output(&mut self, sink: OutputSink) {
        self.sink = sink;
    }
}

/// 查询中的每个 `_` 都是独立变量
fn anonymous_to_fresh(cursor: &mut Cursor, term: &Term) -> Term {
    match term {
        Term::Var(v) if v == "_" => cursor.fresh_var(),
        Term::Compound(f, args) => Term::Compound(
            f.clone(),
            args.iter().map(|a| anonymous_to_fresh(cursor, a)).collect(),
        ),
        other => other.clone(),
    }
}

