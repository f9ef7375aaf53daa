//! Tree-interpreted n-ary expressions over `ValueId` columns.
//!
//! Expression nodes own their children; evaluation walks the tree once per
//! fragment and produces a column of ids aligned with the input table.
//! Strings materialised by expressions (`CONCAT`, `STR`, ...) go into the
//! fragment's local vocabulary.
//!
//! Variables are resolved to column indices at planning time, so expression
//! cache keys never contain variable names.

use crate::context::ExecutionContext;
use crate::error::{QueryError, Result};
use stela_core::{CompOp, Datatype, IdTable, LocalVocab, ValueId};
use stela_index::literal_body;

/// Binary arithmetic operators.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl std::fmt::Display for ArithOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
        };
        write!(f, "{s}")
    }
}

/// An owned expression tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Expression {
    Literal(ValueId),
    /// A string constant that is not part of the global vocabulary; it is
    /// materialised into the fragment's local vocab on evaluation.
    TextLiteral(String),
    /// A variable, resolved to its input column.
    Column(usize),
    And(Vec<Expression>),
    Or(Vec<Expression>),
    Not(Box<Expression>),
    Compare {
        op: CompOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Arithmetic {
        op: ArithOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    UnaryMinus(Box<Expression>),
    Bound(Box<Expression>),
    Coalesce(Vec<Expression>),
    Concat(Vec<Expression>),
    Str(Box<Expression>),
    StrLen(Box<Expression>),
    UCase(Box<Expression>),
    LCase(Box<Expression>),
    Year(Box<Expression>),
    Month(Box<Expression>),
    Day(Box<Expression>),
    /// Geodesic distance in kilometers between two points or geometry
    /// centroids.
    GeoDistance {
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Regex {
        target: Box<Expression>,
        pattern: String,
    },
}

impl Expression {
    /// Validate constructs that can fail independent of data, e.g. regex
    /// patterns. Called once at planning time.
    pub fn validate(&self) -> Result<()> {
        match self {
            Expression::Regex { pattern, target } => {
                regex::Regex::new(pattern)
                    .map_err(|e| QueryError::other(format!("invalid REGEX pattern: {e}")))?;
                target.validate()
            }
            other => {
                for child in other.children() {
                    child.validate()?;
                }
                Ok(())
            }
        }
    }

    fn children(&self) -> Vec<&Expression> {
        match self {
            Expression::Literal(_) | Expression::TextLiteral(_) | Expression::Column(_) => vec![],
            Expression::And(cs) | Expression::Or(cs) | Expression::Coalesce(cs)
            | Expression::Concat(cs) => cs.iter().collect(),
            Expression::Not(c)
            | Expression::UnaryMinus(c)
            | Expression::Bound(c)
            | Expression::Str(c)
            | Expression::StrLen(c)
            | Expression::UCase(c)
            | Expression::LCase(c)
            | Expression::Year(c)
            | Expression::Month(c)
            | Expression::Day(c) => vec![c],
            Expression::Compare { left, right, .. }
            | Expression::Arithmetic { left, right, .. }
            | Expression::GeoDistance { left, right } => vec![left, right],
            Expression::Regex { target, .. } => vec![target],
        }
    }

    /// Stable identifier used inside operator cache keys. Names columns and
    /// fixed ids only, never variables.
    pub fn cache_key(&self) -> String {
        match self {
            Expression::Literal(id) => format!("{id:?}"),
            Expression::TextLiteral(s) => format!("STRING({s:?})"),
            Expression::Column(col) => format!("col_{col}"),
            Expression::And(cs) => nary_key("AND", cs),
            Expression::Or(cs) => nary_key("OR", cs),
            Expression::Not(c) => format!("NOT({})", c.cache_key()),
            Expression::Compare { op, left, right } => {
                format!("({} {op} {})", left.cache_key(), right.cache_key())
            }
            Expression::Arithmetic { op, left, right } => {
                format!("({} {op} {})", left.cache_key(), right.cache_key())
            }
            Expression::UnaryMinus(c) => format!("(- {})", c.cache_key()),
            Expression::Bound(c) => format!("BOUND({})", c.cache_key()),
            Expression::Coalesce(cs) => nary_key("COALESCE", cs),
            Expression::Concat(cs) => nary_key("CONCAT", cs),
            Expression::Str(c) => format!("STR({})", c.cache_key()),
            Expression::StrLen(c) => format!("STRLEN({})", c.cache_key()),
            Expression::UCase(c) => format!("UCASE({})", c.cache_key()),
            Expression::LCase(c) => format!("LCASE({})", c.cache_key()),
            Expression::Year(c) => format!("YEAR({})", c.cache_key()),
            Expression::Month(c) => format!("MONTH({})", c.cache_key()),
            Expression::Day(c) => format!("DAY({})", c.cache_key()),
            Expression::GeoDistance { left, right } => format!(
                "geof:distance({}, {})",
                left.cache_key(),
                right.cache_key()
            ),
            Expression::Regex { target, pattern } => {
                format!("REGEX({}, {pattern:?})", target.cache_key())
            }
        }
    }

    /// Evaluate to one id per input row.
    pub fn evaluate(
        &self,
        ctx: &ExecutionContext,
        table: &IdTable,
        vocab: &mut LocalVocab,
    ) -> Result<Vec<ValueId>> {
        let rows = table.num_rows();
        match self {
            Expression::Literal(id) => Ok(vec![*id; rows]),
            Expression::TextLiteral(s) => {
                let id = vocab.get_or_add_word(s);
                Ok(vec![id; rows])
            }
            Expression::Column(col) => Ok(table.column(*col).collect()),
            Expression::And(cs) => {
                let columns = eval_all(cs, ctx, table, vocab)?;
                Ok((0..rows)
                    .map(|r| bool_id(columns.iter().all(|c| ebv(c[r]))))
                    .collect())
            }
            Expression::Or(cs) => {
                let columns = eval_all(cs, ctx, table, vocab)?;
                Ok((0..rows)
                    .map(|r| bool_id(columns.iter().any(|c| ebv(c[r]))))
                    .collect())
            }
            Expression::Not(c) => {
                let inner = c.evaluate(ctx, table, vocab)?;
                Ok(inner.into_iter().map(|id| bool_id(!ebv(id))).collect())
            }
            Expression::Compare { op, left, right } => {
                let l = left.evaluate(ctx, table, vocab)?;
                let r = right.evaluate(ctx, table, vocab)?;
                Ok(l.into_iter()
                    .zip(r)
                    .map(|(a, b)| compare_ids(*op, a, b))
                    .collect())
            }
            Expression::Arithmetic { op, left, right } => {
                let l = left.evaluate(ctx, table, vocab)?;
                let r = right.evaluate(ctx, table, vocab)?;
                Ok(l.into_iter()
                    .zip(r)
                    .map(|(a, b)| arithmetic(*op, a, b))
                    .collect())
            }
            Expression::UnaryMinus(c) => {
                let inner = c.evaluate(ctx, table, vocab)?;
                Ok(inner
                    .into_iter()
                    .map(|id| arithmetic(ArithOp::Sub, ValueId::int(0).expect("in range"), id))
                    .collect())
            }
            Expression::Bound(c) => {
                let inner = c.evaluate(ctx, table, vocab)?;
                Ok(inner
                    .into_iter()
                    .map(|id| ValueId::from_bool(!id.is_undefined()))
                    .collect())
            }
            Expression::Coalesce(cs) => {
                let columns = eval_all(cs, ctx, table, vocab)?;
                Ok((0..rows)
                    .map(|r| {
                        columns
                            .iter()
                            .map(|c| c[r])
                            .find(|id| !id.is_undefined())
                            .unwrap_or(ValueId::UNDEFINED)
                    })
                    .collect())
            }
            Expression::Concat(cs) => {
                let columns = eval_all(cs, ctx, table, vocab)?;
                let mut out = Vec::with_capacity(rows);
                for r in 0..rows {
                    let mut s = String::new();
                    let mut defined = true;
                    for c in &columns {
                        match string_of(ctx, vocab, c[r]) {
                            Some(part) => s.push_str(&part),
                            None => {
                                defined = false;
                                break;
                            }
                        }
                    }
                    out.push(if defined {
                        vocab.get_or_add_word(&format!("\"{s}\""))
                    } else {
                        ValueId::UNDEFINED
                    });
                }
                Ok(out)
            }
            Expression::Str(c) => {
                let inner = c.evaluate(ctx, table, vocab)?;
                let mut out = Vec::with_capacity(rows);
                for id in inner {
                    out.push(match string_of(ctx, vocab, id) {
                        Some(s) => vocab.get_or_add_word(&format!("\"{s}\"")),
                        None => ValueId::UNDEFINED,
                    });
                }
                Ok(out)
            }
            Expression::StrLen(c) => {
                let inner = c.evaluate(ctx, table, vocab)?;
                let mut out = Vec::with_capacity(rows);
                for id in inner {
                    out.push(match string_of(ctx, vocab, id) {
                        Some(s) => ValueId::int(s.chars().count() as i64)
                            .unwrap_or(ValueId::UNDEFINED),
                        None => ValueId::UNDEFINED,
                    });
                }
                Ok(out)
            }
            Expression::UCase(c) => self.eval_case(ctx, table, vocab, c, true),
            Expression::LCase(c) => self.eval_case(ctx, table, vocab, c, false),
            Expression::Year(c) => eval_date_part(c, ctx, table, vocab, 0),
            Expression::Month(c) => eval_date_part(c, ctx, table, vocab, 1),
            Expression::Day(c) => eval_date_part(c, ctx, table, vocab, 2),
            Expression::GeoDistance { left, right } => {
                let l = left.evaluate(ctx, table, vocab)?;
                let r = right.evaluate(ctx, table, vocab)?;
                let mut out = Vec::with_capacity(rows);
                for (a, b) in l.into_iter().zip(r) {
                    out.push(match (point_of(ctx, a)?, point_of(ctx, b)?) {
                        (Some(p), Some(q)) => ValueId::double(haversine_km(p, q)),
                        _ => ValueId::UNDEFINED,
                    });
                }
                Ok(out)
            }
            Expression::Regex { target, pattern } => {
                let re = regex::Regex::new(pattern)
                    .map_err(|e| QueryError::other(format!("invalid REGEX pattern: {e}")))?;
                let inner = target.evaluate(ctx, table, vocab)?;
                let mut out = Vec::with_capacity(rows);
                for id in inner {
                    out.push(match string_of(ctx, vocab, id) {
                        Some(s) => ValueId::from_bool(re.is_match(&s)),
                        None => ValueId::UNDEFINED,
                    });
                }
                Ok(out)
            }
        }
    }

    fn eval_case(
        &self,
        ctx: &ExecutionContext,
        table: &IdTable,
        vocab: &mut LocalVocab,
        child: &Expression,
        upper: bool,
    ) -> Result<Vec<ValueId>> {
        let inner = child.evaluate(ctx, table, vocab)?;
        let mut out = Vec::with_capacity(inner.len());
        for id in inner {
            out.push(match string_of(ctx, vocab, id) {
                Some(s) => {
                    let cased = if upper {
                        s.to_uppercase()
                    } else {
                        s.to_lowercase()
                    };
                    vocab.get_or_add_word(&format!("\"{cased}\""))
                }
                None => ValueId::UNDEFINED,
            });
        }
        Ok(out)
    }
}

fn nary_key(name: &str, children: &[Expression]) -> String {
    let parts: Vec<String> = children.iter().map(|c| c.cache_key()).collect();
    format!("{name}({})", parts.join(", "))
}

fn eval_all(
    children: &[Expression],
    ctx: &ExecutionContext,
    table: &IdTable,
    vocab: &mut LocalVocab,
) -> Result<Vec<Vec<ValueId>>> {
    children
        .iter()
        .map(|c| c.evaluate(ctx, table, vocab))
        .collect()
}

// ============================================================================
// Value semantics
// ============================================================================

fn bool_id(b: bool) -> ValueId {
    ValueId::from_bool(b)
}

/// Effective boolean value. Undefined and unknown datatypes are false.
pub fn ebv(id: ValueId) -> bool {
    match id.datatype() {
        Datatype::Undefined => false,
        Datatype::Bool => id.payload() == 1,
        Datatype::Int => id.decode_int() != 0,
        Datatype::Double => {
            let v = id.decode_double();
            v != 0.0 && !v.is_nan()
        }
        // Defined non-numeric values (IRIs, strings, dates, points) count
        // as true; SPARQL's type-error cases collapse to false upstream.
        _ => true,
    }
}

/// Datatype-aware comparison producing a boolean id, or UNDEFINED when the
/// operands are incomparable.
pub fn compare_ids(op: CompOp, a: ValueId, b: ValueId) -> ValueId {
    if a.is_undefined() || b.is_undefined() {
        return ValueId::UNDEFINED;
    }
    let ordering = if a.datatype().is_numeric() && b.datatype().is_numeric() {
        a.as_numeric()
            .expect("numeric")
            .total_cmp(&b.as_numeric().expect("numeric"))
    } else if a.datatype() == b.datatype() {
        a.as_u64().cmp(&b.as_u64())
    } else {
        return ValueId::UNDEFINED;
    };
    let result = match op {
        CompOp::Lt => ordering.is_lt(),
        CompOp::Le => ordering.is_le(),
        CompOp::Eq => ordering.is_eq(),
        CompOp::Ne => ordering.is_ne(),
        CompOp::Ge => ordering.is_ge(),
        CompOp::Gt => ordering.is_gt(),
    };
    ValueId::from_bool(result)
}

fn arithmetic(op: ArithOp, a: ValueId, b: ValueId) -> ValueId {
    let (Some(x), Some(y)) = (a.as_numeric(), b.as_numeric()) else {
        return ValueId::UNDEFINED;
    };
    let both_int = a.datatype() == Datatype::Int && b.datatype() == Datatype::Int;
    if both_int && op != ArithOp::Div {
        let (ai, bi) = (a.decode_int(), b.decode_int());
        let result = match op {
            ArithOp::Add => ai.checked_add(bi),
            ArithOp::Sub => ai.checked_sub(bi),
            ArithOp::Mul => ai.checked_mul(bi),
            ArithOp::Div => unreachable!(),
        };
        if let Some(v) = result {
            if let Ok(id) = ValueId::int(v) {
                return id;
            }
        }
        // Overflow falls through to the double domain.
    }
    let value = match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div => x / y,
    };
    ValueId::double(value)
}

/// Render an id as a plain string (literal body for strings, decimal form
/// for numbers). `None` for undefined.
pub fn string_of(
    ctx: &ExecutionContext,
    vocab: &LocalVocab,
    id: ValueId,
) -> Option<String> {
    match id.datatype() {
        Datatype::Undefined => None,
        Datatype::Bool => Some(if id.payload() == 1 { "true" } else { "false" }.to_owned()),
        Datatype::Int => Some(id.decode_int().to_string()),
        Datatype::Double => Some(format_double(id.decode_double())),
        Datatype::Date => {
            let (y, m, d) = civil_from_days(id.decode_int());
            Some(format!("{y:04}-{m:02}-{d:02}"))
        }
        Datatype::GeoPoint => {
            let (lat, lng) = id.decode_geo_point();
            Some(format!("POINT({lng} {lat})"))
        }
        Datatype::VocabIndex => {
            let term = ctx.index.term_for_id(id).ok()?;
            Some(term_text(&term))
        }
        Datatype::LocalVocabIndex => {
            let word = vocab.get(id)?;
            Some(term_text(&word))
        }
        Datatype::TextRecordIndex | Datatype::BlankNodeIndex => None,
    }
}

/// Plain text of a term: literal body without quotes, IRI without angle
/// brackets.
fn term_text(term: &str) -> String {
    if term.starts_with('"') {
        literal_body(term).to_owned()
    } else if let Some(inner) = term.strip_prefix('<').and_then(|t| t.strip_suffix('>')) {
        inner.to_owned()
    } else {
        term.to_owned()
    }
}

fn format_double(v: f64) -> String {
    if v == v.trunc() && v.abs() < 1e15 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

fn eval_date_part(
    child: &Expression,
    ctx: &ExecutionContext,
    table: &IdTable,
    vocab: &mut LocalVocab,
    part: usize,
) -> Result<Vec<ValueId>> {
    let inner = child.evaluate(ctx, table, vocab)?;
    Ok(inner
        .into_iter()
        .map(|id| {
            if id.datatype() != Datatype::Date {
                return ValueId::UNDEFINED;
            }
            let (y, m, d) = civil_from_days(id.decode_int());
            let v = [y, m as i64, d as i64][part];
            ValueId::int(v).unwrap_or(ValueId::UNDEFINED)
        })
        .collect())
}

/// Inverse of days-from-civil (Gregorian).
pub fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = z - era * 146097;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

/// Resolve an id to a WGS84 point: direct geo points, or geometry-info
/// centroids of WKT vocabulary entries.
fn point_of(ctx: &ExecutionContext, id: ValueId) -> Result<Option<(f64, f64)>> {
    match id.datatype() {
        Datatype::GeoPoint => Ok(Some(id.decode_geo_point())),
        Datatype::VocabIndex => Ok(ctx.index.geo_info(id)?.map(|info| info.centroid)),
        _ => Ok(None),
    }
}

/// Great-circle distance in kilometers between two (lat, lng) points.
fn haversine_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let (lat1, lng1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lng2) = (b.0.to_radians(), b.1.to_radians());
    let dlat = lat2 - lat1;
    let dlng = lng2 - lng1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

// ============================================================================
// Tests
// ============================================================================
