//! 模块化子句数据库

use std::collections::{BTreeMap, HashMap};

use ll_core::ops::is_symbol_char;
use ll_core::{ModuleInfo, Term, DEFAULT_MODULE};

use crate::error::{instantiation_error, type_error};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Clause {
    pub head: Term,
    pub body: Term,
}

impl Clause {
    /// 由 `H :- B` 或事实 `H` 构造, 失败时返回异常项
    pub fn from_term(term: Term) -> Result<Self, Term> {
        let (head, body) = match term {
            Term::Compound(f, mut args) if f == ":-" && args.len() == 2 => {
                let body = args.pop().unwrap_or_else(|| Term::atom("true"));
                let head = args.pop().unwrap_or_else(|| Term::atom("true"));
                (head, body)
            }
            other => (other, Term::atom("true")),
        };
        match &head {
            Term::Var(_) => Err(instantiation_error()),
            Term::Atom(_) | Term::Compound(..) => Ok(Self { head, body }),
            other => Err(type_error("callable", other.clone())),
        }
    }

    pub fn to_term(&self) -> Term {
        if self.body == Term::atom("true") {
            self.head.clone()
        } else {
            Term::compound(":-", vec![self.head.clone(), self.body.clone()])
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Predicate {
    pub name: String,
    pub arity: usize,
    pub dynamic: bool,
    pub clauses: Vec<Clause>,
}

#[derive(Debug, Default)]
pub(crate) struct Module {
    pub library: bool,
    preds: Vec<Predicate>,
    index: HashMap<(String, usize), usize>,
}

impl Module {
    pub fn get(&self, name: &str, arity: usize) -> Option<&Predicate> {
        self.index
            .get(&(name.to_string(), arity))
            .and_then(|i| self.preds.get(*i))
    }

    /// 取得谓词, 不存在时创建
    pub fn entry(&mut self, name: &str, arity: usize) -> &mut Predicate {
        let key = (name.to_string(), arity);
        let idx = match self.index.get(&key) {
            Some(i) => *i,
            None => {
                self.preds.push(Predicate {
                    name: name.to_string(),
                    arity,
                    dynamic: false,
                    clauses: Vec::new(),
                });
                self.index.insert(key, self.preds.len() - 1);
                self.preds.len() - 1
            }
        };
        &mut self.preds[idx]
    }

    /// 以可重新加载的源码形式导出
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for pred in &self.preds {
            if pred.dynamic {
                out.push_str(&format!(
                    ":- dynamic {}/{}.\n",
                    Term::atom(pred.name.as_str()),
                    pred.arity
                ));
            }
            for clause in &pred.clauses {
                let mut text = readable_vars(&clause.to_term()).to_string();
                if text.ends_with(is_symbol_char) {
                    text.push(' ');
                }
                out.push_str(&text);
                out.push_str(".\n");
            }
        }
        out
    }
}

/// 所有模块
#[derive(Debug)]
pub(crate) struct Database {
    modules: BTreeMap<String, Module>,
}

impl Default for Database {
    fn default() -> Self {
        let mut modules = BTreeMap::new();
        modules.insert(DEFAULT_MODULE.to_string(), Module::default());
        Self { modules }
    }
}

impl Database {
    pub fn module(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    pub fn module_mut(&mut self, name: &str) -> &mut Module {
        self.modules.entry(name.to_string()).or_default()
    }

    /// 查找顺序: 上下文模块 -> 默认模块 -> 库模块
    pub fn lookup(&self, context: &str, name: &str, arity: usize) -> Option<(&str, &Predicate)> {
        let scoped = [context, DEFAULT_MODULE]
            .into_iter()
            .filter_map(|m| self.modules.get_key_value(m));
        let libraries = self.modules.iter().filter(|(_, m)| m.library);
        scoped
            .chain(libraries)
            .find_map(|(m, module)| module.get(name, arity).map(|p| (m.as_str(), p)))
    }

    pub fn clear(&mut self, name: &str) {
        if name == DEFAULT_MODULE {
            self.modules.insert(name.to_string(), Module::default());
        } else {
            self.modules.remove(name);
        }
    }

    pub fn infos(&self) -> Vec<ModuleInfo> {
        self.modules
            .iter()
            .map(|(name, m)| ModuleInfo {
                name: name.clone(),
                library: m.library,
            })
            .collect()
    }
}

/// 变量改写为 `A`, `B`, ... 以便阅读
fn readable_vars(term: &Term) -> Term {
    fn collect(term: &Term, names: &mut Vec<String>) {
        match term {
            Term::Var(v) if v != "_" && !names.contains(v) => names.push(v.clone()),
            Term::Compound(_, args) => args.iter().for_each(|a| collect(a, names)),
            _ => {}
        }
    }
    let mut names = Vec::new();
    collect(term, &mut names);
    let bindings = names
        .into_iter()
        .enumerate()
        .map(|(i, v)| {
            let letter = char::from(b'A' + (i % 26) as u8);
            let name = if i < 26 {
                letter.to_string()
            } else {
                format!("{letter}{}", i / 26)
            };
            (v, Term::Var(name))
        })
        .collect();
    term.substitute(&bindings)
}
