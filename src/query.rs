use std::fmt;
use std::sync::Arc;

use crate::datatype::Value;
use crate::filter::Predicate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connective {
    And,
    Or,
}
impl fmt::Display for Connective {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Connective::And => write!(f, "AND"),
            Connective::Or => write!(f, "OR"),
        }
    }
}

/// Accumulates clauses left to right and compiles them into one predicate.
///
/// The compiled predicate walks the clauses from the right: an `OR` clause
/// that holds decides a match, an `AND` clause that fails decides a miss,
/// anything else defers to the clauses further left. The first clause
/// settles whatever is left undecided. For `a AND b OR c` this reads as
/// `(a AND b) OR c`.
#[derive(Clone, Default)]
pub struct QueryBuilder {
    clauses: Vec<(Connective, Predicate)>,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn add(&mut self, connective: Connective, predicate: Predicate) {
        // the opening clause has nothing to its left to connect with
        let connective = if self.clauses.is_empty() {
            Connective::And
        } else {
            connective
        };
        self.clauses.push((connective, predicate));
    }
    pub fn reset(&mut self) {
        self.clauses.clear();
    }
    pub fn len(&self) -> usize {
        self.clauses.len()
    }
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
    /// `None` when there are no clauses, meaning everything is selected.
    pub fn compile(&self) -> Option<Predicate> {
        match self.clauses.len() {
            0 => None,
            1 => Some(Arc::clone(&self.clauses[0].1)),
            _ => {
                let clauses = self.clauses.clone();
                Some(Arc::new(move |record: &Value| {
                    for (connective, predicate) in clauses.iter().skip(1).rev() {
                        match (connective, predicate(record)) {
                            (Connective::Or, true) => return true,
                            (Connective::And, false) => return false,
                            _ => (),
                        }
                    }
                    (clauses[0].1)(record)
                }))
            }
        }
    }
}
impl fmt::Debug for QueryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let connectives: Vec<String> = self.clauses.iter().map(|(c, _)| c.to_string()).collect();
        f.debug_struct("QueryBuilder")
            .field("clauses", &connectives)
            .finish()
    }
}
