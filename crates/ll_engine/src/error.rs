//! 异常项构造 (ISO 风格 `error(Formal, Context)`)

use ll_core::Term;

pub(crate) fn error_term(formal: Term) -> Term {
    Term::compound("error", vec![formal, Term::var("_")])
}

pub(crate) fn instantiation_error() -> Term {
    error_term(Term::atom("instantiation_error"))
}

pub(crate) fn type_error(kind: &str, culprit: Term) -> Term {
    error_term(Term::compound("type_error", vec![Term::atom(kind), culprit]))
}

pub(crate) fn existence_error(kind: &str, culprit: Term) -> Term {
    error_term(Term::compound(
        "existence_error",
        vec![Term::atom(kind), culprit],
    ))
}

pub(crate) fn evaluation_error(what: &str) -> Term {
    error_term(Term::compound("evaluation_error", vec![Term::atom(what)]))
}

pub(crate) fn resource_error(what: &str) -> Term {
    error_term(Term::compound("resource_error", vec![Term::atom(what)]))
}

pub(crate) fn format_error(message: &str) -> Term {
    error_term(Term::compound("format", vec![Term::Str(message.to_string())]))
}

/// `Name/Arity`
pub(crate) fn indicator(name: &str, arity: usize) -> Term {
    Term::compound("/", vec![Term::atom(name), Term::Int(arity as i64)])
}
