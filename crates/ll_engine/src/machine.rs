//! 求解机: 目标栈驱动的深度优先搜索与回溯

use std::collections::HashMap;

use ll_core::{Term, TxAction, TxOp, DEFAULT_MODULE};

use crate::cursor::{could_match, deref, resolve, unify, Alternative, Choice, Cursor, Env, Frame};
use crate::error::{existence_error, indicator, instantiation_error, resource_error, type_error};
use crate::MiniLog;

/// 单步结果: `Ok(false)` 表示失败需回溯, `Err` 为抛出的异常项
pub(crate) type Step = Result<bool, Term>;

pub(crate) struct Machine<'a> {
    pub(crate) engine: &'a mut MiniLog,
    steps: u64,
}

impl<'a> Machine<'a> {
    pub fn new(engine: &'a mut MiniLog) -> Self {
        Self { engine, steps: 0 }
    }

    /// 运行到下一个解 (`Ok(true)`) 或耗尽 (`Ok(false)`)
    pub fn run(&mut self, c: &mut Cursor) -> Step {
        loop {
            let Some(frame) = c.goals.pop() else {
                return Ok(true);
            };
            self.tick()?;
            if !self.step(c, frame)? && !self.backtrack(c)? {
                return Ok(false);
            }
        }
    }

    /// 恢复最近的选择点
    pub fn backtrack(&mut self, c: &mut Cursor) -> Step {
        while let Some(choice) = c.choices.pop() {
            c.goals = choice.goals;
            c.env = choice.env;
            match choice.alt {
                Alternative::Goal(frame) => {
                    c.goals.push(frame);
                    return Ok(true);
                }
                Alternative::Clauses {
                    goal,
                    pred_module,
                    next,
                } => {
                    if self.try_clauses(c, &goal, &pred_module, next) {
                        return Ok(true);
                    }
                }
                Alternative::Between { var, next, high } => {
                    between_from(c, &var, next, high);
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn tick(&mut self) -> Result<(), Term> {
        self.steps += 1;
        if self.steps > self.engine.max_inferences {
            return Err(resource_error("inferences"));
        }
        Ok(())
    }

    fn step(&mut self, c: &mut Cursor, frame: Frame) -> Step {
        let goal = deref(&frame.goal, &c.env);
        let (name, args) = match &goal {
            Term::Var(_) => return Err(instantiation_error()),
            Term::Atom(a) => (a.clone(), Vec::new()),
            Term::Compound(f, args) => (f.clone(), args.clone()),
            other => return Err(type_error("callable", other.clone())),
        };
        let push = |c: &mut Cursor, goal: Term, module: &str, cut_to: usize| {
            c.goals.push(Frame {
                goal,
                module: module.to_string(),
                cut_to,
            })
        };

        match (name.as_str(), args.len()) {
            ("true", 0) => Ok(true),
            ("fail" | "false", 0) => Ok(false),
            ("!", 0) => {
                c.choices.truncate(frame.cut_to);
                Ok(true)
            }
            (",", 2) => {
                push(c, args[1].clone(), &frame.module, frame.cut_to);
                push(c, args[0].clone(), &frame.module, frame.cut_to);
                Ok(true)
            }
            (";", 2) => {
                if let Term::Compound(f, branch) = deref(&args[0], &c.env) {
                    if f == "->" && branch.len() == 2 {
                        return self.if_then_else(c, &frame, &branch[0], &branch[1], Some(&args[1]));
                    }
                }
                c.choices.push(Choice {
                    goals: c.goals.clone(),
                    env: c.env.clone(),
                    alt: Alternative::Goal(Frame {
                        goal: args[1].clone(),
                        module: frame.module.clone(),
                        cut_to: frame.cut_to,
                    }),
                });
                push(c, args[0].clone(), &frame.module, frame.cut_to);
                Ok(true)
            }
            ("->", 2) => self.if_then_else(c, &frame, &args[0], &args[1], None),
            ("\\+" | "not", 1) => {
                let found = self.sub_solve(c, args[0].clone(), &frame.module, Some(1))?;
                Ok(found.is_empty())
            }
            ("call", n) if n >= 1 => {
                let goal = add_args(deref(&args[0], &c.env), &args[1..])?;
                let barrier = c.choices.len();
                push(c, goal, &frame.module, barrier);
                Ok(true)
            }
            ("once", 1) => {
                let goal = Term::compound(",", vec![args[0].clone(), Term::atom("!")]);
                let barrier = c.choices.len();
                push(c, goal, &frame.module, barrier);
                Ok(true)
            }
            ("ignore", 1) => {
                let found = self.sub_solve(c, args[0].clone(), &frame.module, Some(1))?;
                if let Some(env) = found.into_iter().next() {
                    c.env = env;
                }
                Ok(true)
            }
            (":", 2) => match deref(&args[0], &c.env) {
                Term::Atom(module) => {
                    push(c, args[1].clone(), &module, frame.cut_to);
                    Ok(true)
                }
                Term::Var(_) => Err(instantiation_error()),
                other => Err(type_error("module", other)),
            },
            ("findall", 3) => {
                let found = self.sub_solve(c, args[1].clone(), &frame.module, None)?;
                let items = found.iter().map(|env| resolve(&args[0], env)).collect();
                Ok(unify(&Term::proper_list(items), &args[2], &mut c.env))
            }
            ("forall", 2) => {
                let counter = Term::compound(
                    ",",
                    vec![args[0].clone(), Term::compound("\\+", vec![args[1].clone()])],
                );
                let found = self.sub_solve(c, counter, &frame.module, Some(1))?;
                Ok(found.is_empty())
            }
            ("between", 3) => between(c, &args),
            _ => match self.builtin(c, &frame, &name, &args) {
                Some(result) => result,
                None => self.call_user(c, &frame, &goal, &name, args.len()),
            },
        }
    }

    fn if_then_else(
        &mut self,
        c: &mut Cursor,
        frame: &Frame,
        cond: &Term,
        then: &Term,
        otherwise: Option<&Term>,
    ) -> Step {
        let found = self.sub_solve(c, cond.clone(), &frame.module, Some(1))?;
        let next = match found.into_iter().next() {
            Some(env) => {
                c.env = env;
                then
            }
            None => match otherwise {
                Some(goal) => goal,
                None => return Ok(false),
            },
        };
        c.goals.push(Frame {
            goal: next.clone(),
            module: frame.module.clone(),
            cut_to: frame.cut_to,
        });
        Ok(true)
    }

    /// 在当前绑定上求解子目标, 返回每个解的绑定
    pub fn sub_solve(
        &mut self,
        c: &mut Cursor,
        goal: Term,
        module: &str,
        max: Option<usize>,
    ) -> Result<Vec<Env>, Term> {
        let mut sub = c.nested(goal, module);
        let mut found = Vec::new();
        let mut more = self.run(&mut sub)?;
        while more {
            found.push(sub.env.clone());
            if max.is_some_and(|m| found.len() >= m) {
                break;
            }
            more = self.backtrack(&mut sub)? && self.run(&mut sub)?;
        }
        c.next_var = sub.next_var;
        Ok(found)
    }

    fn call_user(&mut self, c: &mut Cursor, frame: &Frame, goal: &Term, name: &str, arity: usize) -> Step {
        let Some((pred_module, _)) = self.engine.db.lookup(&frame.module, name, arity) else {
            return Err(existence_error("procedure", indicator(name, arity)));
        };
        let pred_module = pred_module.to_string();
        Ok(self.try_clauses(c, goal, &pred_module, 0))
    }

    /// 从第 `start` 条子句开始尝试; 仅当后续还有可能匹配的子句时才压入选择点
    fn try_clauses(&self, c: &mut Cursor, goal: &Term, pred_module: &str, start: usize) -> bool {
        let Some((name, arity)) = goal.indicator() else {
            return false;
        };
        let Some(pred) = self
            .engine
            .db
            .module(pred_module)
            .and_then(|m| m.get(name, arity))
        else {
            return false;
        };
        let snapshot = c.env.clone();
        for idx in start..pred.clauses.len() {
            let clause = &pred.clauses[idx];
            if !could_match(&clause.head, goal, &snapshot) {
                continue;
            }
            let mut names = HashMap::new();
            let head = c.rename(&clause.head, &mut names);
            let body = c.rename(&clause.body, &mut names);
            if unify(&head, goal, &mut c.env) {
                let barrier = c.choices.len();
                let more = pred.clauses[idx + 1..]
                    .iter()
                    .any(|later| could_match(&later.head, goal, &snapshot));
                if more {
                    c.choices.push(Choice {
                        goals: c.goals.clone(),
                        env: snapshot,
                        alt: Alternative::Clauses {
                            goal: goal.clone(),
                            pred_module: pred_module.to_string(),
                            next: idx + 1,
                        },
                    });
                }
                c.goals.push(Frame {
                    goal: body,
                    module: pred_module.to_string(),
                    cut_to: barrier,
                });
                return true;
            }
            c.env.clone_from(&snapshot);
        }
        false
    }

    /// 记录一条数据库修改
    pub fn record(&mut self, module: &str, action: TxAction, clause: Term) {
        let module = (module != DEFAULT_MODULE).then(|| module.to_string());
        self.engine.tx.push(TxOp::new(module, action, clause));
    }
}

fn add_args(goal: Term, extra: &[Term]) -> Result<Term, Term> {
    if extra.is_empty() {
        return Ok(goal);
    }
    match goal {
        Term::Atom(name) => Ok(Term::Compound(name, extra.to_vec())),
        Term::Compound(name, mut args) => {
            args.extend_from_slice(extra);
            Ok(Term::Compound(name, args))
        }
        Term::Var(_) => Err(instantiation_error()),
        other => Err(type_error("callable", other)),
    }
}

fn between(c: &mut Cursor, args: &[Term]) -> Step {
    let low = match deref(&args[0], &c.env) {
        Term::Int(i) => i,
        Term::Var(_) => return Err(instantiation_error()),
        other => return Err(type_error("integer", other)),
    };
    let high = match deref(&args[1], &c.env) {
        Term::Int(i) => Some(i),
        Term::Atom(a) if a == "inf" || a == "infinite" => None,
        Term::Var(_) => return Err(instantiation_error()),
        other => return Err(type_error("integer", other)),
    };
    match deref(&args[2], &c.env) {
        Term::Int(x) => Ok(x >= low && high.map_or(true, |h| x <= h)),
        var @ Term::Var(_) => {
            if high.is_some_and(|h| low > h) {
                return Ok(false);
            }
            between_from(c, &var, low, high);
            Ok(true)
        }
        other => Err(type_error("integer", other)),
    }
}

fn between_from(c: &mut Cursor, var: &Term, value: i64, high: Option<i64>) {
    if value < i64::MAX && high.map_or(true, |h| value < h) {
        c.choices.push(Choice {
            goals: c.goals.clone(),
            env: c.env.clone(),
            alt: Alternative::Between {
                var: var.clone(),
                next: value + 1,
                high,
            },
        });
    }
    unify(var, &Term::Int(value), &mut c.env);
}
