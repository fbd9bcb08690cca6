//! Predicate expression tree, ordering and fetch requests over owners.
//!
//! # Responsibility
//! - Represent filters as a small tagged expression tree evaluated directly
//!   against owner records.
//! - Validate attribute names against the `Owner` entity description.
//!
//! # Invariants
//! - Comparisons between mismatched scalar kinds are never true, except `Ne`.
//! - An empty `In` set matches nothing.

use super::{StoreError, StoreResult};
use crate::model::entity::{EntityDescription, OWNER_ENTITY};
use crate::model::record::{Owner, OwnerId, Scalar};
use std::cmp::Ordering;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn matches(self, left: &Scalar, right: &Scalar) -> bool {
        let ordering = match (left, right) {
            (Scalar::Int(a), Scalar::Int(b)) => a.cmp(b),
            (Scalar::Text(a), Scalar::Text(b)) => a.cmp(b),
            _ => return self == Self::Ne,
        };
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
        }
    }
}

/// Filter over owner attributes, composable with boolean operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Matches every owner.
    True,
    Compare {
        attribute: String,
        op: CompareOp,
        value: Scalar,
    },
    In {
        attribute: String,
        values: BTreeSet<Scalar>,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn compare(attribute: impl Into<String>, op: CompareOp, value: impl Into<Scalar>) -> Self {
        Self::Compare {
            attribute: attribute.into(),
            op,
            value: value.into(),
        }
    }

    /// `owner_id IN ids`, the shape used to narrow a query to search results.
    pub fn owner_id_in<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = OwnerId>,
    {
        Self::In {
            attribute: "owner_id".to_string(),
            values: ids.into_iter().map(Scalar::Int).collect(),
        }
    }

    pub fn evaluate(&self, owner: &Owner) -> bool {
        match self {
            Self::True => true,
            Self::Compare {
                attribute,
                op,
                value,
            } => owner
                .attribute(attribute)
                .is_some_and(|actual| op.matches(&actual, value)),
            Self::In { attribute, values } => owner
                .attribute(attribute)
                .is_some_and(|actual| values.contains(&actual)),
            Self::And(items) => items.iter().all(|item| item.evaluate(owner)),
            Self::Or(items) => items.iter().any(|item| item.evaluate(owner)),
            Self::Not(inner) => !inner.evaluate(owner),
        }
    }

    /// Rejects attribute names the entity does not declare.
    pub fn validate(&self, entity: &EntityDescription) -> StoreResult<()> {
        match self {
            Self::True => Ok(()),
            Self::Compare { attribute, .. } | Self::In { attribute, .. } => {
                ensure_attribute(entity, attribute)
            }
            Self::And(items) | Self::Or(items) => {
                items.iter().try_for_each(|item| item.validate(entity))
            }
            Self::Not(inner) => inner.validate(entity),
        }
    }
}

/// One ordering key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortDescriptor {
    pub attribute: String,
    pub ascending: bool,
}

impl SortDescriptor {
    pub fn ascending(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            ascending: true,
        }
    }

    pub fn descending(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            ascending: false,
        }
    }
}

impl Default for SortDescriptor {
    fn default() -> Self {
        Self::ascending("owner_id")
    }
}

/// Owner query: filter, ordering and watched relationship key paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub predicate: Predicate,
    pub sort: Vec<SortDescriptor>,
    /// `relationship.attribute` paths whose changes refresh matched owners.
    pub relationship_key_paths: Vec<String>,
}

impl FetchRequest {
    pub fn new(predicate: Predicate) -> Self {
        Self {
            predicate,
            ..Self::default()
        }
    }

    pub fn watching(mut self, key_path: impl Into<String>) -> Self {
        self.relationship_key_paths.push(key_path.into());
        self
    }

    pub fn sorted_by(mut self, sort: Vec<SortDescriptor>) -> Self {
        self.sort = sort;
        self
    }

    pub fn validate(&self) -> StoreResult<()> {
        self.predicate.validate(&OWNER_ENTITY)?;
        self.sort
            .iter()
            .try_for_each(|descriptor| ensure_attribute(&OWNER_ENTITY, &descriptor.attribute))
    }

    /// Compares two owners by the sort descriptors, falling back to identity.
    pub(crate) fn compare(&self, left: &Owner, right: &Owner) -> Ordering {
        for descriptor in &self.sort {
            let ordering = left
                .attribute(&descriptor.attribute)
                .cmp(&right.attribute(&descriptor.attribute));
            let ordering = if descriptor.ascending {
                ordering
            } else {
                ordering.reverse()
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        left.owner_id.cmp(&right.owner_id)
    }
}

impl Default for FetchRequest {
    fn default() -> Self {
        Self {
            predicate: Predicate::True,
            sort: vec![SortDescriptor::default()],
            relationship_key_paths: Vec::new(),
        }
    }
}

fn ensure_attribute(entity: &EntityDescription, attribute: &str) -> StoreResult<()> {
    if entity.has_attribute(attribute) {
        return Ok(());
    }
    Err(StoreError::UnknownAttribute {
        entity: entity.name,
        attribute: attribute.to_string(),
    })
}
