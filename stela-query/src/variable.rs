//! Query variables and the variable-to-column mapping.

use std::collections::BTreeMap;

/// A SPARQL variable, stored without the leading `?`.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Variable(String);

impl Variable {
    /// Create a variable; accepts the name with or without the leading `?`.
    pub fn new(name: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        Self(name.strip_prefix('?').unwrap_or(name).to_owned())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "?{}", self.0)
    }
}

/// Whether a column is guaranteed to hold a defined value in every row.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UndefStatus {
    AlwaysDefined,
    PossiblyUndefined,
}

/// Column index plus definedness of one output variable.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ColumnInfo {
    pub column: usize,
    pub undef: UndefStatus,
}

impl ColumnInfo {
    pub fn always_defined(column: usize) -> Self {
        Self {
            column,
            undef: UndefStatus::AlwaysDefined,
        }
    }

    pub fn possibly_undefined(column: usize) -> Self {
        Self {
            column,
            undef: UndefStatus::PossiblyUndefined,
        }
    }
}

/// Map from variable to output column. Ordered so cache keys and EXPLAIN
/// output are deterministic.
pub type VariableToColumnMap = BTreeMap<Variable, ColumnInfo>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_normalises_question_mark() {
        assert_eq!(Variable::new("?x"), Variable::new("x"));
        assert_eq!(Variable::new("?x").to_string(), "?x");
        assert_eq!(Variable::new("x").name(), "x");
    }
}
