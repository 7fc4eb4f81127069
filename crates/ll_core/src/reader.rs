//! 项读取器: 词法分析 + 运算符优先级解析

use crate::error::{LogicLoomError, Result};
use crate::ops::{self, is_symbol_char};
use crate::term::{Term, NIL};

/// 解析结果: 项及其命名变量 (按出现顺序)
#[derive(Debug, Clone)]
pub struct ParsedTerm {
    pub term: Term,
    pub variables: Vec<String>,
}

/// 解析单个项, 末尾的 `.` 可省略
pub fn parse_term(source: &str) -> Result<ParsedTerm> {
    let mut parser = Parser::new(source)?;
    let (term, _) = parser.parse(1200)?;
    if parser.peek_is_end() {
        parser.pos += 1;
    }
    if parser.pos < parser.tokens.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(ParsedTerm {
        variables: term.variables(),
        term,
    })
}

/// 解析以 `.` 结尾的子句序列
pub fn parse_clauses(source: &str) -> Result<Vec<Term>> {
    let mut parser = Parser::new(source)?;
    let mut clauses = Vec::new();
    while parser.pos < parser.tokens.len() {
        let (term, _) = parser.parse(1200)?;
        if !parser.peek_is_end() {
            return Err(parser.error("operator expected or missing `.`"));
        }
        parser.pos += 1;
        clauses.push(term);
    }
    Ok(clauses)
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Name(String),
    Quoted(String),
    Var(String),
    Int(i64),
    Float(f64),
    Str(String),
    Punct(char),
    End,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    offset: usize,
    spaced: bool,
}

struct Lexer<'a> {
    src: &'a str,
    chars: Vec<(usize, char)>,
    i: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices().collect(),
            i: 0,
        }
    }

    fn peek(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.i + ahead).map(|(_, c)| *c)
    }

    fn offset(&self) -> usize {
        self.chars.get(self.i).map(|(o, _)| *o).unwrap_or(self.src.len())
    }

    fn error(&self, message: &str) -> LogicLoomError {
        LogicLoomError::syntax(message, &self.src[self.offset()..])
    }

    fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let spaced = self.skip_layout()?;
            let Some(c) = self.peek(0) else { break };
            let offset = self.offset();
            let tok = if c.is_ascii_digit() {
                self.number()?
            } else if c == '_' || c.is_uppercase() {
                Tok::Var(self.take_while(|c| c.is_alphanumeric() || c == '_'))
            } else if c.is_alphabetic() {
                Tok::Name(self.take_while(|c| c.is_alphanumeric() || c == '_'))
            } else if c == '\'' {
                Tok::Quoted(self.quoted('\'')?)
            } else if c == '"' {
                Tok::Str(self.quoted('"')?)
            } else if matches!(c, '(' | ')' | '[' | ']' | '{' | '}' | ',' | '|') {
                self.i += 1;
                Tok::Punct(c)
            } else if c == '!' || c == ';' {
                self.i += 1;
                Tok::Name(c.to_string())
            } else if c == '.' && self.peek(1).map_or(true, |n| n.is_whitespace() || n == '%') {
                self.i += 1;
                Tok::End
            } else if is_symbol_char(c) {
                Tok::Name(self.take_while(is_symbol_char))
            } else {
                return Err(self.error("unexpected character"));
            };
            tokens.push(Token { tok, offset, spaced });
        }
        Ok(tokens)
    }

    fn skip_layout(&mut self) -> Result<bool> {
        let start = self.i;
        loop {
            match (self.peek(0), self.peek(1)) {
                (Some(c), _) if c.is_whitespace() => self.i += 1,
                (Some('%'), _) => {
                    while let Some(c) = self.peek(0) {
                        if c == '\n' {
                            break;
                        }
                        self.i += 1;
                    }
                }
                (Some('/'), Some('*')) => {
                    self.i += 2;
                    loop {
                        match (self.peek(0), self.peek(1)) {
                            (Some('*'), Some('/')) => {
                                self.i += 2;
                                break;
                            }
                            (Some(_), _) => self.i += 1,
                            (None, _) => return Err(self.error("unterminated block comment")),
                        }
                    }
                }
                _ => break,
            }
        }
        Ok(self.i > start)
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek(0) {
            if !pred(c) {
                break;
            }
            out.push(c);
            self.i += 1;
        }
        out
    }

    fn number(&mut self) -> Result<Tok> {
        let mut text = self.take_while(|c| c.is_ascii_digit());
        let mut is_float = false;
        if self.peek(0) == Some('.') && self.peek(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.i += 1;
            text.push('.');
            text.push_str(&self.take_while(|c| c.is_ascii_digit()));
        }
        if matches!(self.peek(0), Some('e' | 'E')) {
            let sign = matches!(self.peek(1), Some('+' | '-'));
            let digit_at = if sign { 2 } else { 1 };
            if self.peek(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                text.push('e');
                self.i += 1;
                if sign {
                    text.push(self.peek(0).unwrap_or('+'));
                    self.i += 1;
                }
                text.push_str(&self.take_while(|c| c.is_ascii_digit()));
            }
        }
        if is_float {
            text.parse::<f64>()
                .map(Tok::Float)
                .map_err(|_| self.error("malformed float"))
        } else {
            text.parse::<i64>()
                .map(Tok::Int)
                .map_err(|_| self.error("integer out of range"))
        }
    }

    fn quoted(&mut self, quote: char) -> Result<String> {
        self.i += 1;
        let mut out = String::new();
        loop {
            match self.peek(0) {
                None => return Err(self.error("unterminated quoted text")),
                Some(c) if c == quote => {
                    if self.peek(1) == Some(quote) {
                        out.push(quote);
                        self.i += 2;
                    } else {
                        self.i += 1;
                        return Ok(out);
                    }
                }
                Some('\\') => {
                    let escaped = match self.peek(1) {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some(c) => c,
                        None => return Err(self.error("unterminated escape")),
                    };
                    out.push(escaped);
                    self.i += 2;
                }
                Some(c) => {
                    out.push(c);
                    self.i += 1;
                }
            }
        }
    }
}

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Result<Self> {
        Ok(Self {
            src,
            tokens: Lexer::new(src).tokenize()?,
            pos: 0,
        })
    }

    fn error(&self, message: &str) -> LogicLoomError {
        let offset = self
            .tokens
            .get(self.pos)
            .map(|t| t.offset)
            .unwrap_or(self.src.len());
        LogicLoomError::syntax(message, &self.src[offset..])
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_is_end(&self) -> bool {
        matches!(self.peek().map(|t| &t.tok), Some(Tok::End))
    }

    fn expect(&mut self, c: char) -> Result<()> {
        match self.peek().map(|t| &t.tok) {
            Some(Tok::Punct(p)) if *p == c => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.error(&format!("expected `{c}`"))),
        }
    }

    fn parse(&mut self, max: u16) -> Result<(Term, u16)> {
        let (mut left, mut left_prec) = self.primary(max)?;
        loop {
            let name = match self.peek().map(|t| &t.tok) {
                Some(Tok::Name(n)) => n.clone(),
                Some(Tok::Punct(',')) => ",".to_string(),
                Some(Tok::Punct('|')) => ";".to_string(),
                _ => break,
            };
            let Some(def) = ops::infix(&name) else { break };
            let (lmax, rmax) = def.arg_max();
            if def.priority > max || left_prec > lmax {
                break;
            }
            self.pos += 1;
            let (right, _) = self.parse(rmax)?;
            left = Term::Compound(name, vec![left, right]);
            left_prec = def.priority;
        }
        Ok((left, left_prec))
    }

    fn primary(&mut self, max: u16) -> Result<(Term, u16)> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error("unexpected end of input"));
        };
        self.pos += 1;
        match token.tok {
            Tok::Int(i) => Ok((Term::Int(i), 0)),
            Tok::Float(x) => Ok((Term::Float(x), 0)),
            Tok::Var(v) => Ok((Term::Var(v), 0)),
            Tok::Str(s) => Ok((Term::Str(s), 0)),
            Tok::Punct('(') => {
                let (inner, _) = self.parse(1200)?;
                self.expect(')')?;
                Ok((inner, 0))
            }
            Tok::Punct('[') => self.list().map(|t| (t, 0)),
            Tok::Punct('{') => {
                if self.try_punct('}') {
                    return Ok((Term::atom("{}"), 0));
                }
                let (inner, _) = self.parse(1200)?;
                self.expect('}')?;
                Ok((Term::compound("{}", vec![inner]), 0))
            }
            Tok::Name(name) => self.name(name, true, max),
            Tok::Quoted(name) => self.name(name, false, max),
            Tok::End => {
                self.pos -= 1;
                Err(self.error("unexpected end of clause"))
            }
            Tok::Punct(_) => {
                self.pos -= 1;
                Err(self.error("unexpected punctuation"))
            }
        }
    }

    fn try_punct(&mut self, c: char) -> bool {
        if matches!(self.peek().map(|t| &t.tok), Some(Tok::Punct(p)) if *p == c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn name(&mut self, name: String, bare: bool, max: u16) -> Result<(Term, u16)> {
        let next = self.peek().cloned();
        if let Some(Token {
            tok: Tok::Punct('('),
            spaced: false,
            ..
        }) = next
        {
            self.pos += 1;
            let mut args = vec![self.parse(999)?.0];
            while self.try_punct(',') {
                args.push(self.parse(999)?.0);
            }
            self.expect(')')?;
            return Ok((Term::Compound(name, args), 0));
        }
        if bare && name == "-" {
            if let Some(Token { tok, spaced: false, .. }) = &next {
                match tok {
                    Tok::Int(i) => {
                        self.pos += 1;
                        return Ok((Term::Int(-i), 0));
                    }
                    Tok::Float(x) => {
                        self.pos += 1;
                        return Ok((Term::Float(-x), 0));
                    }
                    _ => {}
                }
            }
        }
        if bare {
            if let Some(def) = ops::prefix(&name) {
                if def.priority <= max && next.as_ref().is_some_and(|t| starts_term(&t.tok)) {
                    let (_, amax) = def.arg_max();
                    let (arg, _) = self.parse(amax)?;
                    return Ok((Term::Compound(name, vec![arg]), def.priority));
                }
            }
        }
        Ok((Term::Atom(name), 0))
    }

    fn list(&mut self) -> Result<Term> {
        if self.try_punct(']') {
            return Ok(Term::atom(NIL));
        }
        let mut items = vec![self.parse(999)?.0];
        while self.try_punct(',') {
            items.push(self.parse(999)?.0);
        }
        let tail = if self.try_punct('|') {
            self.parse(999)?.0
        } else {
            Term::atom(NIL)
        };
        self.expect(']')?;
        Ok(Term::list(items, tail))
    }
}

fn starts_term(tok: &Tok) -> bool {
    match tok {
        Tok::Int(_) | Tok::Float(_) | Tok::Var(_) | Tok::Str(_) | Tok::Quoted(_) => true,
        Tok::Punct(c) => matches!(c, '(' | '[' | '{'),
        Tok::Name(n) => ops::infix(n).is_none() || ops::prefix(n).is_some(),
        Tok::End => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clause_and_directive() {
        let clauses = parse_clauses(
            "% family\n:- dynamic visited/1.\nparent(X, Y) :- father(X, Y) ; mother(X, Y).\n",
        )
        .unwrap();
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[0].to_string(), ":- dynamic visited / 1");
        assert_eq!(
            clauses[1].to_string(),
            "parent(X, Y) :- father(X, Y) ; mother(X, Y)"
        );
    }

    #[test]
    fn test_operator_priorities() {
        let t = parse_term("X is 1 + 2 * 3 - -4").unwrap().term;
        assert_eq!(t.to_string(), "X is 1 + 2 * 3 - -4");
        match t {
            Term::Compound(f, args) => {
                assert_eq!(f, "is");
                assert_eq!(args[1].indicator(), Some(("-", 2)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_lists_strings_and_quoted_atoms() {
        let parsed = parse_term("foo([a, 'B c'|T], \"text\", 2.5e3, {x})").unwrap();
        assert_eq!(parsed.variables, vec!["T".to_string()]);
        assert_eq!(
            parsed.term.to_string(),
            "foo([a, 'B c'|T], \"text\", 2500.0, {x})"
        );
    }

    #[test]
    fn test_module_qualified_goal() {
        let t = parse_term("shared:assertz(fact(1))").unwrap().term;
        let (module, goal) = t.strip_module();
        assert_eq!(module, Some("shared"));
        assert_eq!(goal.to_string(), "assertz(fact(1))");
    }

    #[test]
    fn test_round_trip_through_writer() {
        let src = "a(X) :- (b(X) -> c ; \\+ d), m:e([1, 2|Y], 'it''s').";
        let first = parse_clauses(src).unwrap();
        let again = parse_clauses(&format!("{}.", first[0])).unwrap();
        assert_eq!(first, again);
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse_clauses("foo(.").is_err());
        assert!(parse_clauses("foo(a) bar").is_err());
        assert!(parse_term("'unterminated").is_err());
        match parse_clauses("ok. broken(").unwrap_err() {
            LogicLoomError::Syntax { .. } => {}
            other => panic!("unexpected {other:?}"),
        }
    }
}
