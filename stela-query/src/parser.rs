//! Recursive-descent parser for the supported SPARQL subset.
//!
//! Covers SELECT/CONSTRUCT with basic graph patterns, property-path `+` and
//! `*` on fixed predicates, FILTER expressions, BIND, VALUES, and the text
//! search predicates `ql:contains-word` / `ql:contains-entity`. Parse
//! errors carry the byte position of the offending token.

use crate::error::{QueryError, Result};
use crate::variable::Variable;
use stela_core::CompOp;

pub const RDF_TYPE: &str = "<http://www.w3.org/1999/02/22-rdf-syntax-ns#type>";

// ============================================================================
// AST
// ============================================================================

/// A term in surface form: IRIs with angle brackets, literals with quotes
/// and datatype suffix.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum RawTerm {
    Iri(String),
    Literal(String),
    Var(Variable),
}

impl RawTerm {
    pub fn as_var(&self) -> Option<&Variable> {
        match self {
            RawTerm::Var(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, RawTerm::Var(_))
    }

    /// The surface string of a non-variable term.
    pub fn surface(&self) -> Option<&str> {
        match self {
            RawTerm::Iri(s) | RawTerm::Literal(s) => Some(s),
            RawTerm::Var(_) => None,
        }
    }
}

impl std::fmt::Display for RawTerm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawTerm::Iri(s) | RawTerm::Literal(s) => write!(f, "{s}"),
            RawTerm::Var(v) => write!(f, "{v}"),
        }
    }
}

/// Property-path modifier on a predicate.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PathModifier {
    None,
    /// `+`: one or more steps.
    OneOrMore,
    /// `*`: zero or more steps.
    ZeroOrMore,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RawTriple {
    pub subject: RawTerm,
    pub predicate: RawTerm,
    pub object: RawTerm,
    pub path: PathModifier,
}

/// Arithmetic operators (re-declared here to keep the AST self-contained).
pub use crate::expression::ArithOp;

#[derive(Clone, Debug, PartialEq)]
pub enum RawExpr {
    Term(RawTerm),
    And(Vec<RawExpr>),
    Or(Vec<RawExpr>),
    Not(Box<RawExpr>),
    Compare(CompOp, Box<RawExpr>, Box<RawExpr>),
    Arith(ArithOp, Box<RawExpr>, Box<RawExpr>),
    Neg(Box<RawExpr>),
    /// Function call by (upper-cased) name.
    Call(String, Vec<RawExpr>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ValuesClause {
    pub variables: Vec<Variable>,
    /// `None` entries are UNDEF.
    pub rows: Vec<Vec<Option<RawTerm>>>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PatternElement {
    Triple(RawTriple),
    Filter(RawExpr),
    Bind { expr: RawExpr, target: Variable },
    Values(ValuesClause),
    ContainsWord { text: Variable, word: String },
    ContainsEntity { text: Variable, entity: RawTerm },
}

#[derive(Clone, Debug, PartialEq)]
pub enum QueryForm {
    Select {
        variables: Vec<Variable>,
        select_all: bool,
        distinct: bool,
    },
    Construct {
        template: Vec<RawTriple>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParsedQuery {
    pub form: QueryForm,
    pub elements: Vec<PatternElement>,
    pub order_by: Vec<Variable>,
    pub limit: Option<u64>,
}

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
enum Tok {
    Iri(String),
    /// Full literal surface form.
    Literal(String),
    Var(String),
    /// Bare word: keywords, prefixed names, function names.
    Word(String),
    Num(String),
    Sym(&'static str),
    /// An IRI immediately followed by a path modifier, e.g. `<p>+`.
    PathIri(String, PathModifier),
}

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    fn error(&self, msg: impl Into<String>) -> QueryError {
        QueryError::parse(self.pos, msg)
    }

    fn skip_ws(&mut self) {
        while self.pos < self.bytes.len() {
            let b = self.bytes[self.pos];
            if b.is_ascii_whitespace() {
                self.pos += 1;
            } else if b == b'#' {
                while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    /// Next token plus its start position; `None` at end of input.
    fn next(&mut self) -> Result<Option<(usize, Tok)>> {
        self.skip_ws();
        if self.pos >= self.bytes.len() {
            return Ok(None);
        }
        let start = self.pos;
        let b = self.bytes[self.pos];
        let tok = match b {
            b'<' if self.looks_like_iri() => {
                let end = self.src[self.pos..]
                    .find('>')
                    .map(|i| self.pos + i)
                    .ok_or_else(|| self.error("unterminated IRI"))?;
                let iri = self.src[self.pos..=end].to_owned();
                self.pos = end + 1;
                // A directly attached `+` or `*` is a property path.
                match self.bytes.get(self.pos) {
                    Some(b'+') => {
                        self.pos += 1;
                        Tok::PathIri(iri, PathModifier::OneOrMore)
                    }
                    Some(b'*') => {
                        self.pos += 1;
                        Tok::PathIri(iri, PathModifier::ZeroOrMore)
                    }
                    _ => Tok::Iri(iri),
                }
            }
            b'"' => {
                let mut end = self.pos + 1;
                while end < self.bytes.len() && self.bytes[end] != b'"' {
                    if self.bytes[end] == b'\\' {
                        end += 1;
                    }
                    end += 1;
                }
                if end >= self.bytes.len() {
                    return Err(self.error("unterminated string literal"));
                }
                let mut lit_end = end + 1;
                // Optional datatype suffix.
                if self.src[lit_end..].starts_with("^^<") {
                    let close = self.src[lit_end..]
                        .find('>')
                        .map(|i| lit_end + i)
                        .ok_or_else(|| self.error("unterminated datatype IRI"))?;
                    lit_end = close + 1;
                }
                let lit = self.src[self.pos..lit_end].to_owned();
                self.pos = lit_end;
                Tok::Literal(lit)
            }
            b'?' => {
                let end = self.scan_while(self.pos + 1, |c| c.is_ascii_alphanumeric() || c == b'_');
                if end == self.pos + 1 {
                    return Err(self.error("expected variable name after '?'"));
                }
                let name = self.src[self.pos + 1..end].to_owned();
                self.pos = end;
                Tok::Var(name)
            }
            b'0'..=b'9' => {
                let end = self.scan_while(self.pos, |c| c.is_ascii_digit() || c == b'.');
                let num = self.src[self.pos..end].to_owned();
                self.pos = end;
                Tok::Num(num)
            }
            b'-' if self
                .bytes
                .get(self.pos + 1)
                .is_some_and(|c| c.is_ascii_digit()) =>
            {
                let end = self.scan_while(self.pos + 1, |c| c.is_ascii_digit() || c == b'.');
                let num = self.src[self.pos..end].to_owned();
                self.pos = end;
                Tok::Num(num)
            }
            _ if b.is_ascii_alphabetic() || b == b'_' => {
                let end = self.scan_while(self.pos, |c| {
                    c.is_ascii_alphanumeric() || c == b'_' || c == b':' || c == b'-'
                });
                let word = self.src[self.pos..end].to_owned();
                self.pos = end;
                Tok::Word(word)
            }
            _ => {
                let two = self.src.get(self.pos..self.pos + 2);
                let sym: &'static str = match two {
                    Some("<=") => "<=",
                    Some(">=") => ">=",
                    Some("!=") => "!=",
                    Some("&&") => "&&",
                    Some("||") => "||",
                    _ => match b {
                        b'{' => "{",
                        b'}' => "}",
                        b'(' => "(",
                        b')' => ")",
                        b'.' => ".",
                        b',' => ",",
                        b';' => ";",
                        b'*' => "*",
                        b'+' => "+",
                        b'-' => "-",
                        b'/' => "/",
                        b'<' => "<",
                        b'>' => ">",
                        b'=' => "=",
                        b'!' => "!",
                        _ => return Err(self.error(format!("unexpected character '{}'", b as char))),
                    },
                };
                self.pos += sym.len();
                Tok::Sym(sym)
            }
        };
        Ok(Some((start, tok)))
    }

    fn scan_while(&self, mut from: usize, pred: impl Fn(u8) -> bool) -> usize {
        while from < self.bytes.len() && pred(self.bytes[from]) {
            from += 1;
        }
        from
    }

    /// `<` starts an IRI when a `>` appears before any whitespace.
    fn looks_like_iri(&self) -> bool {
        for &b in &self.bytes[self.pos + 1..] {
            if b == b'>' {
                return true;
            }
            if b.is_ascii_whitespace() {
                return false;
            }
        }
        false
    }
}

fn tokenize(src: &str) -> Result<Vec<(usize, Tok)>> {
    let mut lexer = Lexer::new(src);
    let mut out = Vec::new();
    while let Some(tok) = lexer.next()? {
        out.push(tok);
    }
    Ok(out)
}

// ============================================================================
// Parser
// ============================================================================

struct Parser {
    tokens: Vec<(usize, Tok)>,
    at: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.at).map(|(_, t)| t)
    }

    fn pos(&self) -> usize {
        self.tokens
            .get(self.at)
            .or_else(|| self.tokens.last())
            .map_or(0, |(p, _)| *p)
    }

    fn error(&self, msg: impl Into<String>) -> QueryError {
        QueryError::parse(self.pos(), msg)
    }

    fn advance(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.at).map(|(_, t)| t.clone());
        if tok.is_some() {
            self.at += 1;
        }
        tok
    }

    fn expect_sym(&mut self, sym: &str) -> Result<()> {
        match self.advance() {
            Some(Tok::Sym(s)) if s == sym => Ok(()),
            other => Err(self.error(format!("expected '{sym}', found {other:?}"))),
        }
    }

    fn keyword(&mut self, kw: &str) -> bool {
        if let Some(Tok::Word(w)) = self.peek() {
            if w.eq_ignore_ascii_case(kw) {
                self.at += 1;
                return true;
            }
        }
        false
    }

    // ---- Query forms ----

    fn parse_query(&mut self) -> Result<ParsedQuery> {
        let form = if self.keyword("SELECT") {
            let distinct = self.keyword("DISTINCT");
            let mut variables = Vec::new();
            let mut select_all = false;
            loop {
                match self.peek() {
                    Some(Tok::Var(_)) => {
                        let Some(Tok::Var(name)) = self.advance() else {
                            unreachable!()
                        };
                        variables.push(Variable::new(name));
                    }
                    Some(Tok::Sym("*")) => {
                        self.at += 1;
                        select_all = true;
                        break;
                    }
                    _ => break,
                }
            }
            if variables.is_empty() && !select_all {
                return Err(self.error("SELECT needs variables or '*'"));
            }
            QueryForm::Select {
                variables,
                select_all,
                distinct,
            }
        } else if self.keyword("CONSTRUCT") {
            self.expect_sym("{")?;
            let mut template = Vec::new();
            while self.peek() != Some(&Tok::Sym("}")) {
                template.push(self.parse_triple()?);
                if self.peek() == Some(&Tok::Sym(".")) {
                    self.at += 1;
                }
            }
            self.expect_sym("}")?;
            QueryForm::Construct { template }
        } else {
            return Err(self.error("expected SELECT or CONSTRUCT"));
        };

        if !self.keyword("WHERE") {
            return Err(self.error("expected WHERE"));
        }
        self.expect_sym("{")?;
        let elements = self.parse_group()?;
        self.expect_sym("}")?;

        let mut order_by = Vec::new();
        if self.keyword("ORDER") {
            if !self.keyword("BY") {
                return Err(self.error("expected BY after ORDER"));
            }
            while let Some(Tok::Var(_)) = self.peek() {
                let Some(Tok::Var(name)) = self.advance() else {
                    unreachable!()
                };
                order_by.push(Variable::new(name));
            }
        }

        let mut limit = None;
        if self.keyword("LIMIT") {
            match self.advance() {
                Some(Tok::Num(n)) => {
                    limit = Some(
                        n.parse::<u64>()
                            .map_err(|_| self.error("invalid LIMIT"))?,
                    )
                }
                _ => return Err(self.error("expected number after LIMIT")),
            }
        }

        if self.at != self.tokens.len() {
            return Err(self.error("trailing tokens after query"));
        }
        Ok(ParsedQuery {
            form,
            elements,
            order_by,
            limit,
        })
    }

    // ---- Graph patterns ----

    fn parse_group(&mut self) -> Result<Vec<PatternElement>> {
        let mut elements = Vec::new();
        loop {
            match self.peek() {
                None | Some(Tok::Sym("}")) => break,
                Some(Tok::Sym(".")) => {
                    self.at += 1;
                }
                Some(Tok::Word(w)) if w.eq_ignore_ascii_case("FILTER") => {
                    self.at += 1;
                    self.expect_sym("(")?;
                    let expr = self.parse_expr()?;
                    self.expect_sym(")")?;
                    elements.push(PatternElement::Filter(expr));
                }
                Some(Tok::Word(w)) if w.eq_ignore_ascii_case("BIND") => {
                    self.at += 1;
                    self.expect_sym("(")?;
                    let expr = self.parse_expr()?;
                    if !self.keyword("AS") {
                        return Err(self.error("expected AS in BIND"));
                    }
                    let target = match self.advance() {
                        Some(Tok::Var(name)) => Variable::new(name),
                        _ => return Err(self.error("expected variable after AS")),
                    };
                    self.expect_sym(")")?;
                    elements.push(PatternElement::Bind { expr, target });
                }
                Some(Tok::Word(w)) if w.eq_ignore_ascii_case("VALUES") => {
                    self.at += 1;
                    elements.push(PatternElement::Values(self.parse_values()?));
                }
                _ => {
                    let triple = self.parse_triple()?;
                    elements.push(classify_triple(triple, || self.error("bad text predicate"))?);
                }
            }
        }
        Ok(elements)
    }

    fn parse_values(&mut self) -> Result<ValuesClause> {
        // Single-variable form: VALUES ?v { t1 t2 ... }
        if let Some(Tok::Var(_)) = self.peek() {
            let Some(Tok::Var(name)) = self.advance() else {
                unreachable!()
            };
            let variable = Variable::new(name);
            self.expect_sym("{")?;
            let mut rows = Vec::new();
            while self.peek() != Some(&Tok::Sym("}")) {
                rows.push(vec![self.parse_values_entry()?]);
            }
            self.expect_sym("}")?;
            return Ok(ValuesClause {
                variables: vec![variable],
                rows,
            });
        }
        // Multi-variable form: VALUES (?a ?b) { (t u) ... }
        self.expect_sym("(")?;
        let mut variables = Vec::new();
        while let Some(Tok::Var(_)) = self.peek() {
            let Some(Tok::Var(name)) = self.advance() else {
                unreachable!()
            };
            variables.push(Variable::new(name));
        }
        self.expect_sym(")")?;
        self.expect_sym("{")?;
        let mut rows = Vec::new();
        while self.peek() == Some(&Tok::Sym("(")) {
            self.at += 1;
            let mut row = Vec::new();
            for _ in 0..variables.len() {
                row.push(self.parse_values_entry()?);
            }
            self.expect_sym(")")?;
            rows.push(row);
        }
        self.expect_sym("}")?;
        Ok(ValuesClause { variables, rows })
    }

    fn parse_values_entry(&mut self) -> Result<Option<RawTerm>> {
        if self.keyword("UNDEF") {
            return Ok(None);
        }
        Ok(Some(self.parse_term()?))
    }

    fn parse_triple(&mut self) -> Result<RawTriple> {
        let subject = self.parse_term()?;
        let (predicate, path) = self.parse_predicate()?;
        let object = self.parse_term()?;
        Ok(RawTriple {
            subject,
            predicate,
            object,
            path,
        })
    }

    fn parse_predicate(&mut self) -> Result<(RawTerm, PathModifier)> {
        match self.advance() {
            Some(Tok::Iri(iri)) => Ok((RawTerm::Iri(iri), PathModifier::None)),
            Some(Tok::PathIri(iri, modifier)) => Ok((RawTerm::Iri(iri), modifier)),
            Some(Tok::Var(name)) => Ok((RawTerm::Var(Variable::new(name)), PathModifier::None)),
            Some(Tok::Word(w)) if w == "a" => {
                Ok((RawTerm::Iri(RDF_TYPE.to_owned()), PathModifier::None))
            }
            Some(Tok::Word(w)) if w.starts_with("ql:") => {
                Ok((RawTerm::Iri(w), PathModifier::None))
            }
            other => Err(self.error(format!("expected predicate, found {other:?}"))),
        }
    }

    fn parse_term(&mut self) -> Result<RawTerm> {
        match self.advance() {
            Some(Tok::Iri(iri)) => Ok(RawTerm::Iri(iri)),
            Some(Tok::Literal(lit)) => Ok(RawTerm::Literal(lit)),
            Some(Tok::Var(name)) => Ok(RawTerm::Var(Variable::new(name))),
            Some(Tok::Num(n)) => Ok(RawTerm::Literal(number_literal(&n))),
            Some(Tok::Word(w)) if w == "true" || w == "false" => Ok(RawTerm::Literal(format!(
                "\"{w}\"^^<http://www.w3.org/2001/XMLSchema#boolean>"
            ))),
            other => Err(self.error(format!("expected term, found {other:?}"))),
        }
    }

    // ---- Expressions ----

    fn parse_expr(&mut self) -> Result<RawExpr> {
        let mut parts = vec![self.parse_and()?];
        while self.peek() == Some(&Tok::Sym("||")) {
            self.at += 1;
            parts.push(self.parse_and()?);
        }
        Ok(if parts.len() == 1 {
            parts.pop().expect("non-empty")
        } else {
            RawExpr::Or(parts)
        })
    }

    fn parse_and(&mut self) -> Result<RawExpr> {
        let mut parts = vec![self.parse_rel()?];
        while self.peek() == Some(&Tok::Sym("&&")) {
            self.at += 1;
            parts.push(self.parse_rel()?);
        }
        Ok(if parts.len() == 1 {
            parts.pop().expect("non-empty")
        } else {
            RawExpr::And(parts)
        })
    }

    fn parse_rel(&mut self) -> Result<RawExpr> {
        let left = self.parse_add()?;
        let op = match self.peek() {
            Some(Tok::Sym("=")) => Some(CompOp::Eq),
            Some(Tok::Sym("!=")) => Some(CompOp::Ne),
            Some(Tok::Sym("<")) => Some(CompOp::Lt),
            Some(Tok::Sym("<=")) => Some(CompOp::Le),
            Some(Tok::Sym(">")) => Some(CompOp::Gt),
            Some(Tok::Sym(">=")) => Some(CompOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.at += 1;
            let right = self.parse_add()?;
            return Ok(RawExpr::Compare(op, Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn parse_add(&mut self) -> Result<RawExpr> {
        let mut left = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Sym("+")) => ArithOp::Add,
                Some(Tok::Sym("-")) => ArithOp::Sub,
                _ => break,
            };
            self.at += 1;
            let right = self.parse_mul()?;
            left = RawExpr::Arith(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_mul(&mut self) -> Result<RawExpr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Sym("*")) => ArithOp::Mul,
                Some(Tok::Sym("/")) => ArithOp::Div,
                _ => break,
            };
            self.at += 1;
            let right = self.parse_unary()?;
            left = RawExpr::Arith(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<RawExpr> {
        match self.peek() {
            Some(Tok::Sym("!")) => {
                self.at += 1;
                Ok(RawExpr::Not(Box::new(self.parse_unary()?)))
            }
            Some(Tok::Sym("-")) => {
                self.at += 1;
                Ok(RawExpr::Neg(Box::new(self.parse_unary()?)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<RawExpr> {
        match self.peek().cloned() {
            Some(Tok::Sym("(")) => {
                self.at += 1;
                let inner = self.parse_expr()?;
                self.expect_sym(")")?;
                Ok(inner)
            }
            Some(Tok::Word(w)) if self.tokens.get(self.at + 1).map(|(_, t)| t) == Some(&Tok::Sym("(")) => {
                self.at += 2;
                let mut args = Vec::new();
                if self.peek() != Some(&Tok::Sym(")")) {
                    loop {
                        args.push(self.parse_expr()?);
                        if self.peek() == Some(&Tok::Sym(",")) {
                            self.at += 1;
                        } else {
                            break;
                        }
                    }
                }
                self.expect_sym(")")?;
                Ok(RawExpr::Call(w.to_uppercase(), args))
            }
            _ => {
                let term = self.parse_term()?;
                Ok(RawExpr::Term(term))
            }
        }
    }
}

/// Turn a raw triple into a pattern element, routing the text-search
/// predicates.
fn classify_triple(
    triple: RawTriple,
    error: impl Fn() -> QueryError,
) -> Result<PatternElement> {
    let RawTerm::Iri(predicate) = &triple.predicate else {
        return Ok(PatternElement::Triple(triple));
    };
    match predicate.as_str() {
        "ql:contains-word" => {
            let Some(text) = triple.subject.as_var().cloned() else {
                return Err(error());
            };
            let Some(word) = triple.object.surface() else {
                return Err(error());
            };
            Ok(PatternElement::ContainsWord {
                text,
                word: stela_index::literal_body(word).to_owned(),
            })
        }
        "ql:contains-entity" => {
            let Some(text) = triple.subject.as_var().cloned() else {
                return Err(error());
            };
            Ok(PatternElement::ContainsEntity {
                text,
                entity: triple.object,
            })
        }
        _ => Ok(PatternElement::Triple(triple)),
    }
}

fn number_literal(num: &str) -> String {
    if num.contains('.') {
        format!("\"{num}\"^^<http://www.w3.org/2001/XMLSchema#double>")
    } else {
        format!("\"{num}\"^^<http://www.w3.org/2001/XMLSchema#integer>")
    }
}

/// Parse a query string.
pub fn parse_query(text: &str) -> Result<ParsedQuery> {
    let tokens = tokenize(text)?;
    let mut parser = Parser { tokens, at: 0 };
    parser.parse_query()
}

// ============================================================================
// Tests
// ============================================================================
