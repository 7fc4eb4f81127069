//! 算术求值 (`is/2` 与数值比较)

use std::cmp::Ordering;

use ll_core::Term;

use crate::cursor::{deref, Env};
use crate::error::{evaluation_error, indicator, instantiation_error, type_error};

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    pub fn to_term(self) -> Term {
        match self {
            Num::Int(i) => Term::Int(i),
            Num::Float(x) => Term::Float(x),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(x) => x,
        }
    }

    /// 数值比较 (`=:=`, `<` 等)
    pub fn compare(self, other: Num) -> Ordering {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => a.cmp(&b),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()).unwrap_or(Ordering::Equal),
        }
    }
}

type Eval = Result<Num, Term>;

pub(crate) fn eval(term: &Term, env: &Env) -> Eval {
    match deref(term, env) {
        Term::Int(i) => Ok(Num::Int(i)),
        Term::Float(x) => Ok(Num::Float(x)),
        Term::Var(_) => Err(instantiation_error()),
        Term::Atom(a) => match a.as_str() {
            "pi" => Ok(Num::Float(std::f64::consts::PI)),
            "e" => Ok(Num::Float(std::f64::consts::E)),
            "inf" | "infinite" => Ok(Num::Float(f64::INFINITY)),
            _ => Err(type_error("evaluable", indicator(&a, 0))),
        },
        Term::Compound(f, args) if args.len() == 1 => unary(&f, eval(&args[0], env)?),
        Term::Compound(f, args) if args.len() == 2 => {
            binary(&f, eval(&args[0], env)?, eval(&args[1], env)?)
        }
        Term::Compound(f, args) => Err(type_error("evaluable", indicator(&f, args.len()))),
        other => Err(type_error("evaluable", other)),
    }
}

fn overflow() -> Term {
    evaluation_error("int_overflow")
}

fn require_int(n: Num) -> Result<i64, Term> {
    match n {
        Num::Int(i) => Ok(i),
        Num::Float(x) => Err(type_error("integer", Term::Float(x))),
    }
}

fn to_int(x: f64) -> Eval {
    if x.is_finite() && x >= i64::MIN as f64 && x <= i64::MAX as f64 {
        Ok(Num::Int(x as i64))
    } else {
        Err(overflow())
    }
}

fn unary(name: &str, x: Num) -> Eval {
    match (name, x) {
        ("-", Num::Int(i)) => i.checked_neg().map(Num::Int).ok_or_else(overflow),
        ("-", Num::Float(f)) => Ok(Num::Float(-f)),
        ("+", n) => Ok(n),
        ("abs", Num::Int(i)) => i.checked_abs().map(Num::Int).ok_or_else(overflow),
        ("abs", Num::Float(f)) => Ok(Num::Float(f.abs())),
        ("sign", Num::Int(i)) => Ok(Num::Int(i.signum())),
        ("sign", Num::Float(f)) => Ok(Num::Float(f.signum())),
        ("float", n) => Ok(Num::Float(n.as_f64())),
        ("integer" | "round", n) => to_int(n.as_f64().round()),
        ("truncate", n) => to_int(n.as_f64().trunc()),
        ("floor", n) => to_int(n.as_f64().floor()),
        ("ceiling", n) => to_int(n.as_f64().ceil()),
        ("sqrt", n) => Ok(Num::Float(n.as_f64().sqrt())),
        ("exp", n) => Ok(Num::Float(n.as_f64().exp())),
        ("log", n) => Ok(Num::Float(n.as_f64().ln())),
        ("sin", n) => Ok(Num::Float(n.as_f64().sin())),
        ("cos", n) => Ok(Num::Float(n.as_f64().cos())),
        _ => Err(type_error("evaluable", indicator(name, 1))),
    }
}

fn binary(name: &str, a: Num, b: Num) -> Eval {
    use Num::{Float, Int};
    match (name, a, b) {
        ("+", Int(x), Int(y)) => x.checked_add(y).map(Int).ok_or_else(overflow),
        ("-", Int(x), Int(y)) => x.checked_sub(y).map(Int).ok_or_else(overflow),
        ("*", Int(x), Int(y)) => x.checked_mul(y).map(Int).ok_or_else(overflow),
        ("+", x, y) => Ok(Float(x.as_f64() + y.as_f64())),
        ("-", x, y) => Ok(Float(x.as_f64() - y.as_f64())),
        ("*", x, y) => Ok(Float(x.as_f64() * y.as_f64())),
        ("/", _, Int(0)) => Err(evaluation_error("zero_divisor")),
        ("/", Int(x), Int(y)) if x.checked_rem(y) == Some(0) => x.checked_div(y).map(Int).ok_or_else(overflow),
        ("/", x, y) => Ok(Float(x.as_f64() / y.as_f64())),
        ("//" | "mod" | "rem", x, y) => {
            let (x, y) = (require_int(x)?, require_int(y)?);
            if y == 0 {
                return Err(evaluation_error("zero_divisor"));
            }
            let result = match name {
                "//" => x.checked_div(y),
                "rem" => x.checked_rem(y),
                // 结果与除数同号
                _ => x.checked_rem(y).map(|r| if r != 0 && (r < 0) != (y < 0) { r + y } else { r }),
            };
            result.map(Int).ok_or_else(overflow)
        }
        ("min", x, y) => Ok(if x.compare(y) == std::cmp::Ordering::Greater { y } else { x }),
        ("max", x, y) => Ok(if x.compare(y) == std::cmp::Ordering::Less { y } else { x }),
        ("**", x, y) => Ok(Float(x.as_f64().powf(y.as_f64()))),
        ("^", Int(x), Int(y)) => {
            let exp = u32::try_from(y).map_err(|_| type_error("not_less_than_zero", Term::Int(y)))?;
            x.checked_pow(exp).map(Int).ok_or_else(overflow)
        }
        ("^", x, y) => Ok(Float(x.as_f64().powf(y.as_f64()))),
        _ => Err(type_error("evaluable", indicator(name, 2))),
    }
}
