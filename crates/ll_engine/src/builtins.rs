//! 内建谓词

use std::cmp::Ordering;
use std::collections::HashMap;

use ll_core::{Term, TxAction};

use crate::arith::eval;
use crate::cursor::{deref, resolve, unify, Cursor, Frame};
use crate::database::Clause;
use crate::error::{format_error, instantiation_error, type_error};
use crate::machine::{Machine, Step};

impl Machine<'_> {
    /// 执行内建谓词; 返回 `None` 表示不是内建谓词
    pub(crate) fn builtin(
        &mut self,
        c: &mut Cursor,
        frame: &Frame,
        name: &str,
        args: &[Term],
    ) -> Option<Step> {
        let result = match (name, args.len()) {
            ("=", 2) => Ok(unify(&args[0], &args[1], &mut c.env)),
            ("\\=", 2) => {
                let mut scratch = c.env.clone();
                Ok(!unify(&args[0], &args[1], &mut scratch))
            }
            ("==", 2) => Ok(resolve(&args[0], &c.env) == resolve(&args[1], &c.env)),
            ("\\==", 2) => Ok(resolve(&args[0], &c.env) != resolve(&args[1], &c.env)),
            ("is", 2) => eval(&args[1], &c.env).map(|n| unify(&args[0], &n.to_term(), &mut c.env)),
            ("=:=" | "=\\=" | "<" | ">" | "=<" | ">=", 2) => compare(name, c, args),
            ("var", 1) => Ok(matches!(deref(&args[0], &c.env), Term::Var(_))),
            ("nonvar", 1) => Ok(!matches!(deref(&args[0], &c.env), Term::Var(_))),
            ("atom", 1) => Ok(matches!(deref(&args[0], &c.env), Term::Atom(_))),
            ("number", 1) => Ok(matches!(deref(&args[0], &c.env), Term::Int(_) | Term::Float(_))),
            ("integer", 1) => Ok(matches!(deref(&args[0], &c.env), Term::Int(_))),
            ("float", 1) => Ok(matches!(deref(&args[0], &c.env), Term::Float(_))),
            ("string", 1) => Ok(matches!(deref(&args[0], &c.env), Term::Str(_))),
            ("atomic", 1) => Ok(!matches!(
                deref(&args[0], &c.env),
                Term::Var(_) | Term::Compound(..)
            )),
            ("compound", 1) => Ok(matches!(deref(&args[0], &c.env), Term::Compound(..))),
            ("callable", 1) => Ok(deref(&args[0], &c.env).is_callable()),
            ("is_list", 1) => Ok(resolve(&args[0], &c.env).as_list().is_some()),
            ("=..", 2) => univ(c, args),
            ("copy_term", 2) => {
                let original = resolve(&args[0], &c.env);
                let copy = c.rename(&original, &mut HashMap::new());
                Ok(unify(&copy, &args[1], &mut c.env))
            }
            ("assert" | "assertz", 1) => self.assert_clause(c, frame, TxAction::Assertz, &args[0]),
            ("asserta", 1) => self.assert_clause(c, frame, TxAction::Asserta, &args[0]),
            ("retract", 1) => self.retract(c, frame, &args[0]),
            ("retractall", 1) => self.retract_all(c, frame, &args[0]),
            ("dynamic", 1) => self.declare_dynamic(&resolve(&args[0], &c.env), &frame.module),
            ("write", 1) => self.emit(&resolve(&args[0], &c.env).to_plain_string()),
            ("print" | "writeq", 1) => self.emit(&resolve(&args[0], &c.env).to_string()),
            ("writeln", 1) => self.emit(&format!("{}\n", resolve(&args[0], &c.env).to_plain_string())),
            ("nl", 0) => self.emit("\n"),
            ("tab", 1) => eval(&args[0], &c.env).and_then(|n| match n.to_term() {
                Term::Int(i) => self.emit(&" ".repeat(i.max(0) as usize)),
                other => Err(type_error("integer", other)),
            }),
            ("format", 1) => format(&resolve(&args[0], &c.env), &[]).and_then(|s| self.emit(&s)),
            ("format", 2) => {
                let list = resolve(&args[1], &c.env);
                let items: Vec<Term> = match list.as_list() {
                    Some(items) => items.into_iter().cloned().collect(),
                    None => vec![list],
                };
                format(&resolve(&args[0], &c.env), &items).and_then(|s| self.emit(&s))
            }
            ("throw", 1) => match resolve(&args[0], &c.env) {
                Term::Var(_) => Err(instantiation_error()),
                ball => Err(ball),
            },
            _ => return None,
        };
        Some(result)
    }

    fn emit(&mut self, text: &str) -> Step {
        self.engine.sink.write(text);
        Ok(true)
    }

    fn assert_clause(&mut self, c: &Cursor, frame: &Frame, action: TxAction, arg: &Term) -> Step {
        let term = resolve(arg, &c.env);
        let (qualifier, inner) = term.strip_module();
        let module = qualifier.unwrap_or(&frame.module).to_string();
        let clause = Clause::from_term(inner.clone())?;
        let stored = clause.to_term();
        let (name, arity) = head_indicator(&clause.head)?;
        let pred = self.engine.db.module_mut(&module).entry(&name, arity);
        pred.dynamic = true;
        match action {
            TxAction::Asserta => pred.clauses.insert(0, clause),
            _ => pred.clauses.push(clause),
        }
        self.record(&module, action, stored);
        Ok(true)
    }

    /// 删除第一条匹配的子句 (确定性)
    fn retract(&mut self, c: &mut Cursor, frame: &Frame, arg: &Term) -> Step {
        let term = resolve(arg, &c.env);
        let (qualifier, inner) = term.strip_module();
        let module = qualifier.unwrap_or(&frame.module).to_string();
        let (head, body) = match inner {
            Term::Compound(f, args) if f == ":-" && args.len() == 2 => (&args[0], args[1].clone()),
            other => (other, Term::atom("true")),
        };
        let (name, arity) = head_indicator(head)?;
        let Some(pred) = self
            .engine
            .db
            .module(&module)
            .and_then(|m| m.get(&name, arity))
        else {
            return Ok(false);
        };
        let mut matched = None;
        for (idx, clause) in pred.clauses.iter().enumerate() {
            let mut names = HashMap::new();
            let stored_head = c.rename(&clause.head, &mut names);
            let stored_body = c.rename(&clause.body, &mut names);
            let mut env = c.env.clone();
            if unify(head, &stored_head, &mut env) && unify(&body, &stored_body, &mut env) {
                c.env = env;
                matched = Some(idx);
                break;
            }
        }
        let Some(idx) = matched else {
            return Ok(false);
        };
        self.engine.db.module_mut(&module).entry(&name, arity).clauses.remove(idx);
        let removed = resolve(inner, &c.env);
        self.record(&module, TxAction::Retract, removed);
        Ok(true)
    }

    fn retract_all(&mut self, c: &mut Cursor, frame: &Frame, arg: &Term) -> Step {
        let term = resolve(arg, &c.env);
        let (qualifier, head) = term.strip_module();
        let module = qualifier.unwrap_or(&frame.module).to_string();
        let (name, arity) = head_indicator(head)?;
        let mut kept = Vec::new();
        let pred = self.engine.db.module_mut(&module).entry(&name, arity);
        pred.dynamic = true;
        for clause in std::mem::take(&mut pred.clauses) {
            let mut names = HashMap::new();
            let stored_head = c.rename(&clause.head, &mut names);
            let mut scratch = c.env.clone();
            if !unify(head, &stored_head, &mut scratch) {
                kept.push(clause);
            }
        }
        pred.clauses = kept;
        self.record(&module, TxAction::RetractAll, head.clone());
        Ok(true)
    }

    fn declare_dynamic(&mut self, spec: &Term, module: &str) -> Step {
        if let Some(items) = spec.as_list() {
            for item in items {
                self.declare_dynamic(item, module)?;
            }
            return Ok(true);
        }
        match spec {
            Term::Compound(f, args) if f == "," && args.len() == 2 => {
                self.declare_dynamic(&args[0], module)?;
                self.declare_dynamic(&args[1], module)
            }
            Term::Compound(f, args) if f == ":" && args.len() == 2 => match &args[0] {
                Term::Atom(m) => self.declare_dynamic(&args[1], m),
                other => Err(type_error("module", other.clone())),
            },
            Term::Compound(f, args) if f == "/" && args.len() == 2 => match (&args[0], &args[1]) {
                (Term::Atom(name), Term::Int(arity)) if *arity >= 0 => {
                    self.engine
                        .db
                        .module_mut(module)
                        .entry(name, *arity as usize)
                        .dynamic = true;
                    Ok(true)
                }
                (Term::Var(_), _) | (_, Term::Var(_)) => Err(instantiation_error()),
                _ => Err(type_error("predicate_indicator", spec.clone())),
            },
            Term::Var(_) => Err(instantiation_error()),
            other => Err(type_error("predicate_indicator", other.clone())),
        }
    }
}

fn head_indicator(head: &Term) -> Result<(String, usize), Term> {
    match head {
        Term::Var(_) => Err(instantiation_error()),
        other => other
            .indicator()
            .map(|(n, a)| (n.to_string(), a))
            .ok_or_else(|| type_error("callable", other.clone())),
    }
}

fn compare(op: &str, c: &Cursor, args: &[Term]) -> Step {
    let ord = eval(&args[0], &c.env)?.compare(eval(&args[1], &c.env)?);
    Ok(match op {
        "=:=" => ord == Ordering::Equal,
        "=\\=" => ord != Ordering::Equal,
        "<" => ord == Ordering::Less,
        ">" => ord == Ordering::Greater,
        "=<" => ord != Ordering::Greater,
        _ => ord != Ordering::Less,
    })
}

fn univ(c: &mut Cursor, args: &[Term]) -> Step {
    match deref(&args[0], &c.env) {
        Term::Var(_) => {
            let list = resolve(&args[1], &c.env);
            let items = list.as_list().ok_or_else(instantiation_error)?;
            let built = match items.split_first() {
                Some((Term::Atom(name), [])) => Term::atom(name.as_str()),
                Some((Term::Atom(name), rest)) => {
                    Term::compound(name.as_str(), rest.iter().map(|t| (*t).clone()).collect())
                }
                Some((single, [])) => (*single).clone(),
                Some((other, _)) => return Err(type_error("atom", (*other).clone())),
                None => return Err(type_error("list", list.clone())),
            };
            Ok(unify(&args[0], &built, &mut c.env))
        }
        Term::Compound(f, fargs) => {
            let mut items = vec![Term::Atom(f)];
            items.extend(fargs);
            Ok(unify(&Term::proper_list(items), &args[1], &mut c.env))
        }
        atomic => Ok(unify(&Term::proper_list(vec![atomic]), &args[1], &mut c.env)),
    }
}

/// `format/2` 的子集: `~w ~a ~d ~p ~q ~s ~n ~~`
fn format(template: &Term, args: &[Term]) -> Result<String, Term> {
    let text = match template {
        Term::Atom(s) | Term::Str(s) => s.clone(),
        Term::Var(_) => return Err(instantiation_error()),
        other => return Err(type_error("text", other.clone())),
    };
    let mut args = args.iter();
    let mut out = String::new();
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '~' {
            out.push(ch);
            continue;
        }
        let directive = chars.next().ok_or_else(|| format_error("truncated directive"))?;
        match directive {
            'n' => out.push('\n'),
            '~' => out.push('~'),
            'w' | 'a' | 'd' | 'p' | 'q' | 's' => {
                let arg = args.next().ok_or_else(|| format_error("not enough arguments"))?;
                match directive {
                    'd' if !matches!(arg, Term::Int(_)) => {
                        return Err(type_error("integer", arg.clone()))
                    }
                    'p' | 'q' => out.push_str(&arg.to_string()),
                    _ => out.push_str(&arg.to_plain_string()),
                }
            }
            other => return Err(format_error(&format!("unknown directive ~{other}"))),
        }
    }
    if args.next().is_some() {
        return Err(format_error("too many arguments"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_directives() {
        let out = format(
            &Term::Str("~w has ~d items~n".into()),
            &[Term::atom("cart"), Term::Int(3)],
        )
        .unwrap();
        assert_eq!(out, "cart has 3 items\n");
        assert!(format(&Term::atom("~d"), &[Term::atom("x")]).is_err());
        assert!(format(&Term::atom("~w"), &[]).is_err());
        assert!(format(&Term::atom("plain"), &[Term::Int(1)]).is_err());
    }
}
