//! 项 (Term) 数据模型

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ops::{self, is_symbol_char};

/// 变量绑定 (变量名 -> 已解析的项)
pub type Bindings = BTreeMap<String, Term>;

/// 空表原子
pub const NIL: &str = "[]";
/// 表构造子
pub const CONS: &str = ".";

/// 逻辑项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Term {
    Atom(String),
    Int(i64),
    Float(f64),
    Str(String),
    Var(String),
    Compound(String, Vec<Term>),
}

impl Term {
    pub fn atom(name: impl Into<String>) -> Self {
        Term::Atom(name.into())
    }

    pub fn var(name: impl Into<String>) -> Self {
        Term::Var(name.into())
    }

    pub fn compound(name: impl Into<String>, args: Vec<Term>) -> Self {
        Term::Compound(name.into(), args)
    }

    /// 由元素和尾部构造表
    pub fn list(items: Vec<Term>, tail: Term) -> Self {
        items
            .into_iter()
            .rev()
            .fold(tail, |acc, item| Term::Compound(CONS.into(), vec![item, acc]))
    }

    /// 由元素构造真表
    pub fn proper_list(items: Vec<Term>) -> Self {
        Self::list(items, Term::atom(NIL))
    }

    /// 将真表展开为元素序列
    pub fn as_list(&self) -> Option<Vec<&Term>> {
        let mut items = Vec::new();
        let mut cursor = self;
        loop {
            match cursor {
                Term::Atom(a) if a == NIL => return Some(items),
                Term::Compound(f, args) if f == CONS && args.len() == 2 => {
                    items.push(&args[0]);
                    cursor = &args[1];
                }
                _ => return None,
            }
        }
    }

    /// 谓词指示符 (名称, 元数)
    pub fn indicator(&self) -> Option<(&str, usize)> {
        match self {
            Term::Atom(a) => Some((a, 0)),
            Term::Compound(f, args) => Some((f, args.len())),
            _ => None,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Term::Atom(_) | Term::Compound(..))
    }

    /// 拆分模块限定 `M:G`
    pub fn strip_module(&self) -> (Option<&str>, &Term) {
        match self {
            Term::Compound(f, args) if f == ":" && args.len() == 2 => match &args[0] {
                Term::Atom(m) => {
                    let (inner, goal) = args[1].strip_module();
                    (inner.or(Some(m.as_str())), goal)
                }
                _ => (None, self),
            },
            _ => (None, self),
        }
    }

    /// 加上模块限定
    pub fn qualify(self, module: &str) -> Term {
        Term::Compound(":".into(), vec![Term::atom(module), self])
    }

    /// 按出现顺序收集命名变量 (忽略 `_` 开头的变量)
    pub fn variables(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut Vec<String>) {
        match self {
            Term::Var(v) if !v.starts_with('_') => {
                if !out.contains(v) {
                    out.push(v.clone());
                }
            }
            Term::Compound(_, args) => args.iter().for_each(|a| a.collect_vars(out)),
            _ => {}
        }
    }

    /// 用绑定替换变量
    pub fn substitute(&self, bindings: &Bindings) -> Term {
        match self {
            Term::Var(v) => bindings.get(v).cloned().unwrap_or_else(|| self.clone()),
            Term::Compound(f, args) => Term::Compound(
                f.clone(),
                args.iter().map(|a| a.substitute(bindings)).collect(),
            ),
            other => other.clone(),
        }
    }

    /// JSON 投影 (回复中 results 的编码)
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::{json, Value};
        if let Some(items) = self.as_list() {
            return Value::Array(items.into_iter().map(Term::to_json).collect());
        }
        match self {
            Term::Atom(a) => Value::String(a.clone()),
            Term::Int(i) => json!(i),
            Term::Float(f) => json!(f),
            Term::Str(s) => Value::String(s.clone()),
            Term::Var(v) => Value::String(format!("_{}", v.trim_start_matches('_'))),
            Term::Compound(f, args) => json!({
                "functor": f,
                "args": args.iter().map(Term::to_json).collect::<Vec<_>>(),
            }),
        }
    }

    /// 以 `write/1` 的方式输出 (字符串与原子不加引号)
    pub fn to_plain_string(&self) -> String {
        match self {
            Term::Atom(a) | Term::Str(a) => a.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_term(f, self, 1200)
    }
}

fn write_term(f: &mut fmt::Formatter<'_>, term: &Term, max: u16) -> fmt::Result {
    match term {
        Term::Atom(a) => {
            let op_priority = ops::infix(a)
                .or_else(|| ops::prefix(a))
                .map(|d| d.priority)
                .unwrap_or(0);
            if op_priority > max {
                write!(f, "({})", quote_atom(a))
            } else {
                f.write_str(&quote_atom(a))
            }
        }
        Term::Int(i) => write!(f, "{i}"),
        Term::Float(x) => f.write_str(&format_float(*x)),
        Term::Str(s) => write!(f, "\"{}\"", escape(s, '"')),
        Term::Var(v) => f.write_str(v),
        Term::Compound(name, args) => write_compound(f, term, name, args, max),
    }
}

fn write_compound(
    f: &mut fmt::Formatter<'_>,
    term: &Term,
    name: &str,
    args: &[Term],
    max: u16,
) -> fmt::Result {
    if name == CONS && args.len() == 2 {
        return write_list(f, term);
    }
    if name == "{}" && args.len() == 1 {
        f.write_str("{")?;
        write_term(f, &args[0], 1200)?;
        return f.write_str("}");
    }
    if args.len() == 2 {
        if let Some(def) = ops::infix(name) {
            let (lmax, rmax) = def.arg_max();
            let wrap = def.priority > max;
            if wrap {
                f.write_str("(")?;
            }
            write_term(f, &args[0], lmax)?;
            let right = RightOperand(&args[1], rmax).to_string();
            match name {
                "," => f.write_str(", ")?,
                ":" if !right.starts_with(is_symbol_char) => f.write_str(":")?,
                _ => write!(f, " {} ", quote_atom(name))?,
            }
            f.write_str(&right)?;
            if wrap {
                f.write_str(")")?;
            }
            return Ok(());
        }
    }
    if args.len() == 1 && name != "-" {
        if let Some(def) = ops::prefix(name) {
            let (_, amax) = def.arg_max();
            let wrap = def.priority > max;
            if wrap {
                f.write_str("(")?;
            }
            write!(f, "{} ", quote_atom(name))?;
            write_term(f, &args[0], amax)?;
            if wrap {
                f.write_str(")")?;
            }
            return Ok(());
        }
    }
    write!(f, "{}(", quote_atom(name))?;
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write_term(f, arg, 999)?;
    }
    f.write_str(")")
}

fn write_list(f: &mut fmt::Formatter<'_>, term: &Term) -> fmt::Result {
    f.write_str("[")?;
    let mut cursor = term;
    let mut first = true;
    loop {
        match cursor {
            Term::Compound(name, args) if name == CONS && args.len() == 2 => {
                if !first {
                    f.write_str(", ")?;
                }
                write_term(f, &args[0], 999)?;
                first = false;
                cursor = &args[1];
            }
            Term::Atom(a) if a == NIL => break,
            tail => {
                f.write_str("|")?;
                write_term(f, tail, 999)?;
                break;
            }
        }
    }
    f.write_str("]")
}

struct RightOperand<'a>(&'a Term, u16);

impl fmt::Display for RightOperand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_term(f, self.0, self.1)
    }
}

fn format_float(x: f64) -> String {
    if x.is_nan() {
        return "nan".into();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf".into() } else { "-inf".into() };
    }
    let s = format!("{x:?}");
    match s.find(|c| c == 'e' || c == 'E') {
        Some(pos) if !s[..pos].contains('.') => format!("{}.0{}", &s[..pos], &s[pos..]),
        _ => s,
    }
}

/// 按需为原子加引号
pub fn quote_atom(atom: &str) -> String {
    if needs_no_quotes(atom) {
        atom.to_string()
    } else {
        format!("'{}'", escape(atom, '\''))
    }
}

fn needs_no_quotes(atom: &str) -> bool {
    if matches!(atom, "[]" | "!" | ";" | "{}") {
        return true;
    }
    let mut chars = atom.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => atom.chars().all(|c| c.is_alphanumeric() || c == '_'),
        Some(_) => atom != "." && atom.chars().all(is_symbol_char),
        None => false,
    }
}

fn escape(text: &str, quote: char) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(name: &str, args: Vec<Term>) -> Term {
        Term::compound(name, args)
    }

    #[test]
    fn test_write_clause_with_operators() {
        let clause = c(
            ":-",
            vec![
                c("parent", vec![Term::var("X")]),
                c(
                    ",",
                    vec![
                        c("father", vec![Term::var("X"), Term::var("_")]),
                        c("\\+", vec![c("orphan", vec![Term::var("X")])]),
                    ],
                ),
            ],
        );
        assert_eq!(
            clause.to_string(),
            "parent(X) :- father(X, _), \\+ orphan(X)"
        );
    }

    #[test]
    fn test_write_parenthesizes_lower_priority_operands() {
        // (a ; b), c
        let t = c(
            ",",
            vec![c(";", vec![Term::atom("a"), Term::atom("b")]), Term::atom("c")],
        );
        assert_eq!(t.to_string(), "(a ; b), c");
        // m:(a, b)
        let q = c(
            ",",
            vec![Term::atom("a"), Term::atom("b")],
        )
        .qualify("m");
        assert_eq!(q.to_string(), "m:(a, b)");
    }

    #[test]
    fn test_write_lists_and_quoting() {
        let l = Term::list(
            vec![Term::Int(1), Term::atom("Hello world")],
            Term::var("T"),
        );
        assert_eq!(l.to_string(), "[1, 'Hello world'|T]");
        assert_eq!(Term::atom("[]").to_string(), "[]");
        assert_eq!(Term::atom(",").to_string(), "','");
        assert_eq!(Term::Str("say \"hi\"".into()).to_string(), "\"say \\\"hi\\\"\"");
        assert_eq!(Term::Float(1e100).to_string(), "1.0e100");
    }

    #[test]
    fn test_strip_module_and_variables() {
        let g = c("assertz", vec![c("fact", vec![Term::var("X"), Term::var("Y")])]).qualify("shared");
        let (m, inner) = g.strip_module();
        assert_eq!(m, Some("shared"));
        assert_eq!(inner.indicator(), Some(("assertz", 1)));
        assert_eq!(g.variables(), vec!["X".to_string(), "Y".to_string()]);
    }

    #[test]
    fn test_json_projection() {
        let t = c("point", vec![Term::Int(1), Term::proper_list(vec![Term::atom("a")])]);
        assert_eq!(
            t.to_json(),
            serde_json::json!({"functor": "point", "args": [1, ["a"]]})
        );
    }
}
