//! 可序列化的求解游标: 目标栈 + 选择点栈 + 变量绑定

use std::collections::HashMap;

use ll_core::{Bindings, Resumable, Term};
use serde::{Deserialize, Serialize};

/// 变量名 -> 绑定值
pub(crate) type Env = HashMap<String, Term>;

/// 待执行的目标
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Frame {
    pub goal: Term,
    pub module: String,
    /// `!` 截断选择点栈到此高度
    pub cut_to: usize,
}

/// 回溯时的替代分支
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum Alternative {
    /// 从第 `next` 条子句继续尝试
    Clauses {
        goal: Term,
        pred_module: String,
        next: usize,
    },
    /// 析取的右支
    Goal(Frame),
    /// `between/3` 的下一个值
    Between {
        var: Term,
        next: i64,
        high: Option<i64>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Choice {
    pub goals: Vec<Frame>,
    pub env: Env,
    pub alt: Alternative,
}

/// MiniLog 的游标
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cursor {
    pub(crate) goals: Vec<Frame>,
    pub(crate) choices: Vec<Choice>,
    pub(crate) env: Env,
    pub(crate) query_vars: Vec<String>,
    pub(crate) next_var: u64,
    pub(crate) started: bool,
    pub(crate) done: bool,
    pub(crate) halted: bool,
}

impl Cursor {
    pub(crate) fn new(goal: Term, module: &str, query_vars: Vec<String>, next_var: u64) -> Self {
        Self {
            goals: vec![Frame {
                goal,
                module: module.to_string(),
                cut_to: 0,
            }],
            choices: Vec::new(),
            env: Env::new(),
            query_vars,
            next_var,
            started: false,
            done: false,
            halted: false,
        }
    }

    /// 以当前绑定为起点的子游标 (用于 `\+`、`->`、`findall/3`)
    pub(crate) fn nested(&self, goal: Term, module: &str) -> Self {
        let mut sub = Cursor::new(goal, module, Vec::new(), self.next_var);
        sub.env = self.env.clone();
        sub.started = true;
        sub
    }

    pub(crate) fn fresh_var(&mut self) -> Term {
        self.next_var += 1;
        Term::Var(format!("_G{}", self.next_var))
    }

    /// 当前解的投影
    pub(crate) fn projection(&self) -> Bindings {
        self.query_vars
            .iter()
            .map(|v| (v.clone(), resolve(&Term::Var(v.clone()), &self.env)))
            .collect()
    }

    /// 子句变量改名 (每次调用得到新的变量)
    pub(crate) fn rename(&mut self, term: &Term, names: &mut HashMap<String, Term>) -> Term {
        match term {
            Term::Var(v) if v == "_" => self.fresh_var(),
            Term::Var(v) => {
                if let Some(t) = names.get(v) {
                    return t.clone();
                }
                let fresh = self.fresh_var();
                names.insert(v.clone(), fresh.clone());
                fresh
            }
            Term::Compound(f, args) => Term::Compound(
                f.clone(),
                args.iter().map(|a| self.rename(a, names)).collect(),
            ),
            other => other.clone(),
        }
    }
}

impl Resumable for Cursor {
    fn has_choice_points(&self) -> bool {
        !self.done && !self.halted && !self.choices.is_empty()
    }

    fn halt(&mut self) {
        self.halted = true;
        self.goals.clear();
        self.choices.clear();
    }

    fn variables(&self) -> &[String] {
        &self.query_vars
    }
}

/// 沿绑定链解引用一层
pub(crate) fn deref(term: &Term, env: &Env) -> Term {
    let mut current = term;
    while let Term::Var(v) = current {
        match env.get(v) {
            Some(next) => current = next,
            None => break,
        }
    }
    current.clone()
}

/// 完全代入
pub(crate) fn resolve(term: &Term, env: &Env) -> Term {
    match deref(term, env) {
        Term::Compound(f, args) => {
            Term::Compound(f, args.iter().map(|a| resolve(a, env)).collect())
        }
        other => other,
    }
}

/// 合一 (无 occurs check), 失败时 `env` 可能已部分修改, 由调用方恢复
pub(crate) fn unify(a: &Term, b: &Term, env: &mut Env) -> bool {
    let a = deref(a, env);
    let b = deref(b, env);
    match (&a, &b) {
        (Term::Var(x), Term::Var(y)) if x == y => true,
        (Term::Var(x), _) => {
            env.insert(x.clone(), b);
            true
        }
        (_, Term::Var(y)) => {
            env.insert(y.clone(), a);
            true
        }
        (Term::Compound(f, xs), Term::Compound(g, ys)) => {
            f == g && xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| unify(x, y, env))
        }
        _ => a == b,
    }
}

/// 首参数索引: 子句头是否可能与目标合一
pub(crate) fn could_match(head: &Term, goal: &Term, env: &Env) -> bool {
    let (Term::Compound(_, hargs), Term::Compound(_, gargs)) = (head, goal) else {
        return true;
    };
    let (Some(h), Some(g)) = (hargs.first(), gargs.first()) else {
        return true;
    };
    match (h, deref(g, env)) {
        (Term::Var(_), _) | (_, Term::Var(_)) => true,
        (Term::Compound(f, xs), Term::Compound(g, ys)) => *f == g && xs.len() == ys.len(),
        (h, g) => *h == g,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unify_binds_through_chains() {
        let mut env = Env::new();
        let x = Term::var("X");
        let y = Term::var("Y");
        assert!(unify(&x, &y, &mut env));
        assert!(unify(&y, &Term::compound("f", vec![Term::Int(1)]), &mut env));
        assert_eq!(resolve(&x, &env).to_string(), "f(1)");
        assert!(!unify(&x, &Term::compound("f", vec![Term::Int(2)]), &mut env));
    }

    #[test]
    fn test_first_argument_indexing() {
        let env = Env::new();
        let head = Term::compound("p", vec![Term::Int(1)]);
        assert!(could_match(&head, &Term::compound("p", vec![Term::var("X")]), &env));
        assert!(!could_match(&head, &Term::compound("p", vec![Term::Int(2)]), &env));
    }

    #[test]
    fn test_cursor_survives_serialization() {
        let mut cursor = Cursor::new(Term::atom("true"), "user", vec!["X".into()], 0);
        let fresh = cursor.fresh_var();
        let json = serde_json::to_string(&cursor).unwrap();
        let back: Cursor = serde_json::from_str(&json).unwrap();
        assert_eq!(back.next_var, 1);
        assert_eq!(fresh, Term::var("_G1"));
        assert_eq!(back.variables(), &["X".to_string()]);
    }
}
