//! Text-index scans for `ql:contains-word` and `ql:contains-entity`.
//!
//! A word scan yields `(text record, score)` rows; an entity scan yields
//! `(text record, entity, score)` rows, or `(text record, score)` when the
//! entity is fixed. A trailing `*` on the word requests a prefix match.
//!
//! Cache keys depend on the word, its prefix-ness and a fixed entity, but
//! never on the text or entity variable names: renaming those does not
//! change the produced table. A fixed entity that is not part of the
//! knowledge graph is a construction-time error.

use crate::context::ExecutionContext;
use crate::error::{QueryError, Result};
use crate::operator::{single_fragment_stream, Operator, QueryExecutionTree, TableStream};
use crate::variable::{ColumnInfo, Variable, VariableToColumnMap};
use stela_core::{IdTable, LocalVocab, ValueId};
use stela_index::Index;
use std::sync::Arc;

/// The entity position of a `ql:contains-entity` scan.
#[derive(Clone, Debug)]
pub enum EntityRef {
    Variable(Variable),
    Fixed { term: String, id: ValueId },
}

/// Score-column variable, derived the way the rest of the engine expects:
/// `?ql_score_<textVar>_var_<entityVar>` or
/// `?ql_score_<textVar>_fixedEntity_<escaped>`.
fn score_variable(text_var: &Variable, entity: &EntityRef) -> Variable {
    match entity {
        EntityRef::Variable(v) => {
            Variable::new(format!("ql_score_{}_var_{}", text_var.name(), v.name()))
        }
        EntityRef::Fixed { term, .. } => {
            let escaped: String = term
                .chars()
                .map(|c| {
                    if c.is_alphanumeric() {
                        c.to_string()
                    } else {
                        format!("_{}_", c as u32)
                    }
                })
                .collect();
            Variable::new(format!(
                "ql_score_{}_fixedEntity_{escaped}",
                text_var.name()
            ))
        }
    }
}

// ============================================================================
// TextIndexScanForEntity
// ============================================================================

#[derive(Clone)]
pub struct TextIndexScanForEntity {
    index: Arc<Index>,
    text_var: Variable,
    entity: EntityRef,
    word: String,
}

impl std::fmt::Debug for TextIndexScanForEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextIndexScanForEntity")
            .field("text_var", &self.text_var)
            .field("entity", &self.entity)
            .field("word", &self.word)
            .finish()
    }
}

impl TextIndexScanForEntity {
    /// Scan with an entity variable.
    pub fn new(
        index: Arc<Index>,
        text_var: Variable,
        entity_var: Variable,
        word: impl Into<String>,
    ) -> Self {
        Self {
            index,
            text_var,
            entity: EntityRef::Variable(entity_var),
            word: word.into(),
        }
    }

    /// Scan with a fixed entity. Fails if the entity is unknown to the
    /// knowledge graph.
    pub fn with_fixed_entity(
        index: Arc<Index>,
        text_var: Variable,
        fixed_entity: String,
        word: impl Into<String>,
    ) -> Result<Self> {
        let Some(id) = index.id_for_term(&fixed_entity) else {
            return Err(QueryError::UnknownEntity(format!(
                "The entity {fixed_entity} is not part of the underlying knowledge graph and \
                 can therefore not be used as the object of ql:contains-entity"
            )));
        };
        Ok(Self {
            index,
            text_var,
            entity: EntityRef::Fixed {
                term: fixed_entity,
                id,
            },
            word: word.into(),
        })
    }

    fn has_fixed_entity(&self) -> bool {
        matches!(self.entity, EntityRef::Fixed { .. })
    }
}

impl Operator for TextIndexScanForEntity {
    fn result_width(&self) -> usize {
        if self.has_fixed_entity() {
            2
        } else {
            3
        }
    }

    fn result_sorted_on(&self) -> Vec<usize> {
        vec![0]
    }

    fn variable_columns(&self) -> VariableToColumnMap {
        let mut map = VariableToColumnMap::new();
        map.insert(self.text_var.clone(), ColumnInfo::always_defined(0));
        let score_col = match &self.entity {
            EntityRef::Variable(v) => {
                map.insert(v.clone(), ColumnInfo::always_defined(1));
                2
            }
            EntityRef::Fixed { .. } => 1,
        };
        map.insert(
            score_variable(&self.text_var, &self.entity),
            ColumnInfo::always_defined(score_col),
        );
        map
    }

    fn cache_key(&self) -> String {
        // The word (including its prefix marker) and the fixed entity id
        // identify the result; variable names do not.
        match &self.entity {
            EntityRef::Variable(_) => {
                format!("ENTITY INDEX SCAN: word {:?} with variable entity", self.word)
            }
            EntityRef::Fixed { id, .. } => {
                format!("ENTITY INDEX SCAN: word {:?} fixed entity {id:?}", self.word)
            }
        }
    }

    fn size_estimate(&self) -> u64 {
        let postings = self.index.text_index().postings_for(&self.word);
        match &self.entity {
            EntityRef::Variable(_) => postings.len() as u64,
            EntityRef::Fixed { id, .. } => {
                postings.iter().filter(|p| p.entity == *id).count() as u64
            }
        }
    }

    fn cost_estimate(&self) -> u64 {
        self.size_estimate()
    }

    fn known_empty_result(&self) -> bool {
        !self.index.text_index().word_is_known(&self.word)
    }

    fn children(&self) -> Vec<&Arc<QueryExecutionTree>> {
        vec![]
    }

    fn descriptor(&self) -> String {
        match &self.entity {
            EntityRef::Variable(v) => format!(
                "TextIndexScanForEntity {} {} {:?}",
                self.text_var, v, self.word
            ),
            EntityRef::Fixed { term, .. } => format!(
                "TextIndexScanForEntity {} {term} {:?}",
                self.text_var, self.word
            ),
        }
    }

    fn column_originates_from_graph(&self, variable: &Variable) -> bool {
        matches!(&self.entity, EntityRef::Variable(v) if v == variable)
    }

    fn compute(&self, ctx: &ExecutionContext) -> Result<TableStream> {
        let postings = self.index.text_index().postings_for(&self.word);
        let mut table = IdTable::new(self.result_width(), ctx.budget.clone());
        for posting in postings {
            let text = ValueId::text_record_index(posting.text_record);
            let score = ValueId::double(posting.score as f64);
            match &self.entity {
                EntityRef::Variable(_) => {
                    table.push_row(&[text, posting.entity, score])?;
                }
                EntityRef::Fixed { id, .. } => {
                    if posting.entity == *id {
                        table.push_row(&[text, score])?;
                    }
                }
            }
        }
        Ok(single_fragment_stream((table, LocalVocab::new())))
    }
}

// ============================================================================
// TextIndexScanForWord
// ============================================================================

#[derive(Clone)]
pub struct TextIndexScanForWord {
    index: Arc<Index>,
    text_var: Variable,
    word: String,
}

impl TextIndexScanForWord {
    pub fn new(index: Arc<Index>, text_var: Variable, word: impl Into<String>) -> Self {
        Self {
            index,
            text_var,
            word: word.into(),
        }
    }
}

impl Operator for TextIndexScanForWord {
    fn result_width(&self) -> usize {
        2
    }

    fn result_sorted_on(&self) -> Vec<usize> {
        vec![0]
    }

    fn variable_columns(&self) -> VariableToColumnMap {
        let mut map = VariableToColumnMap::new();
        map.insert(self.text_var.clone(), ColumnInfo::always_defined(0));
        map.insert(
            Variable::new(format!("ql_score_{}", self.text_var.name())),
            ColumnInfo::always_defined(1),
        );
        map
    }

    fn cache_key(&self) -> String {
        format!("WORD INDEX SCAN: word {:?}", self.word)
    }

    fn size_estimate(&self) -> u64 {
        self.index.text_index().postings_for(&self.word).len() as u64
    }

    fn cost_estimate(&self) -> u64 {
        self.size_estimate()
    }

    fn known_empty_result(&self) -> bool {
        !self.index.text_index().word_is_known(&self.word)
    }

    fn children(&self) -> Vec<&Arc<QueryExecutionTree>> {
        vec![]
    }

    fn descriptor(&self) -> String {
        format!("TextIndexScanForWord {} {:?}", self.text_var, self.word)
    }

    fn compute(&self, ctx: &ExecutionContext) -> Result<TableStream> {
        let postings = self.index.text_index().postings_for(&self.word);
        let mut table = IdTable::new(2, ctx.budget.clone());
        let mut last_record = None;
        for posting in postings {
            // One row per text record; entity fan-out is not visible here.
            if last_record == Some(posting.text_record) {
                continue;
            }
            last_record = Some(posting.text_record);
            table.push_row(&[
                ValueId::text_record_index(posting.text_record),
                ValueId::double(posting.score as f64),
            ])?;
        }
        Ok(single_fragment_stream((table, LocalVocab::new())))
    }
}
