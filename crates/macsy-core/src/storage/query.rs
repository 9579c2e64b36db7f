//! Native predicate and update documents
//!
//! These are the only shapes the backing store understands. A [`Query`]
//! holds at most one [`FieldPredicate`] per attribute, mirroring how
//! operator documents are keyed by attribute in a document store.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::{BlackboardError, Result};
use crate::models::{Document, DocumentId, ID_FIELD};

/// Result order by document identifier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

impl SortOrder {
    pub fn is_ascending(self) -> bool {
        self == SortOrder::Ascending
    }
}

/// Conditions on the document identifier
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdPredicate {
    pub eq: Option<DocumentId>,
    /// Inclusive lower bound
    pub gte: Option<DocumentId>,
    /// Exclusive upper bound
    pub lt: Option<DocumentId>,
}

impl IdPredicate {
    pub fn is_empty(&self) -> bool {
        self.eq.is_none() && self.gte.is_none() && self.lt.is_none()
    }
}

/// Conditions on one attribute
///
/// Membership operators treat a scalar attribute as a one-element set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldPredicate {
    pub eq: Option<Value>,
    pub exists: Option<bool>,
    /// Every value must be present
    pub all: Vec<Value>,
    /// No value may be present
    pub none: Vec<Value>,
}

impl FieldPredicate {
    pub fn is_empty(&self) -> bool {
        self.eq.is_none() && self.exists.is_none() && self.all.is_empty() && self.none.is_empty()
    }

    pub fn has_membership(&self) -> bool {
        !self.all.is_empty() || !self.none.is_empty()
    }
}

/// A conjunction of predicates over one collection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub id: IdPredicate,
    pub fields: BTreeMap<String, FieldPredicate>,
}

impl Query {
    /// Match-everything query
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_empty() && self.fields.values().all(FieldPredicate::is_empty)
    }

    pub fn by_id(id: DocumentId) -> Self {
        let mut query = Self::new();
        query.id.eq = Some(id);
        query
    }

    pub fn field(&self, name: &str) -> Option<&FieldPredicate> {
        self.fields.get(name)
    }

    pub fn field_mut(&mut self, name: &str) -> &mut FieldPredicate {
        self.fields.entry(name.to_string()).or_default()
    }

    pub fn eq(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.field_mut(name).eq = Some(value.into());
        self
    }

    pub fn exists(mut self, name: &str, exists: bool) -> Self {
        self.field_mut(name).exists = Some(exists);
        self
    }

    /// Add values to the "contains all of" set of an attribute
    pub fn contains_all(mut self, name: &str, values: impl IntoIterator<Item = Value>) -> Self {
        let predicate = self.field_mut(name);
        for value in values {
            if !predicate.all.contains(&value) {
                predicate.all.push(value);
            }
        }
        self
    }

    /// Add values to the "contains none of" set of an attribute
    pub fn contains_none(mut self, name: &str, values: impl IntoIterator<Item = Value>) -> Self {
        let predicate = self.field_mut(name);
        for value in values {
            if !predicate.none.contains(&value) {
                predicate.none.push(value);
            }
        }
        self
    }

    /// Parse a raw query in document-store operator syntax
    ///
    /// Supported: `{"attr": value}`, `{"attr": {"$eq" | "$exists" | "$all" |
    /// "$nin": ...}}`, and for `_id` also `{"$gte": id, "$lt": id}`.
    pub fn from_json(value: &Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            BlackboardError::invalid(format!("Raw query must be a JSON object: {}", value))
        })?;

        let mut query = Query::new();
        for (key, condition) in object {
            if key == ID_FIELD {
                parse_id_condition(&mut query.id, condition)?;
            } else {
                parse_field_condition(query.field_mut(key), key, condition)?;
            }
        }
        Ok(query)
    }
}

fn operator_document(value: &Value) -> Option<&Map<String, Value>> {
    match value {
        Value::Object(map)
            if !map.is_empty()
                && map.keys().all(|k| k.starts_with('$'))
                && !map.contains_key("$oid") =>
        {
            Some(map)
        }
        _ => None,
    }
}

fn parse_id_condition(predicate: &mut IdPredicate, condition: &Value) -> Result<()> {
    let Some(ops) = operator_document(condition) else {
        predicate.eq = Some(DocumentId::from_json(condition)?);
        return Ok(());
    };
    for (op, operand) in ops {
        let id = DocumentId::from_json(operand)?;
        match op.as_str() {
            "$eq" => predicate.eq = Some(id),
            "$gte" => predicate.gte = Some(id),
            "$lt" => predicate.lt = Some(id),
            other => {
                return Err(BlackboardError::invalid(format!(
                    "Unsupported operator '{}' on {}",
                    other, ID_FIELD
                )))
            }
        }
    }
    Ok(())
}

fn parse_field_condition(predicate: &mut FieldPredicate, key: &str, condition: &Value) -> Result<()> {
    let Some(ops) = operator_document(condition) else {
        predicate.eq = Some(condition.clone());
        return Ok(());
    };
    for (op, operand) in ops {
        match op.as_str() {
            "$eq" => predicate.eq = Some(operand.clone()),
            "$exists" => {
                let flag = operand.as_bool().ok_or_else(|| {
                    BlackboardError::invalid(format!("$exists on '{}' needs a boolean", key))
                })?;
                predicate.exists = Some(flag);
            }
            "$all" => predicate.all = operand_list(key, op, operand)?,
            "$nin" => predicate.none = operand_list(key, op, operand)?,
            other => {
                return Err(BlackboardError::invalid(format!(
                    "Unsupported operator '{}' on '{}'",
                    other, key
                )))
            }
        }
    }
    Ok(())
}

fn operand_list(key: &str, op: &str, operand: &Value) -> Result<Vec<Value>> {
    match operand {
        Value::Array(items) => Ok(items.clone()),
        _ => Err(BlackboardError::invalid(format!(
            "{} on '{}' needs a list: {}",
            op, key, operand
        ))),
    }
}

/// A single-document modification
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    /// Attributes overwritten with a new value
    pub set: Map<String, Value>,
    /// Values merged into array attributes (set union)
    pub add_to_set: BTreeMap<String, Vec<Value>>,
    /// Values removed from array attributes
    pub pull: BTreeMap<String, Vec<Value>>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
            && self.add_to_set.values().all(Vec::is_empty)
            && self.pull.values().all(Vec::is_empty)
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(key.into(), value.into());
        self
    }

    pub fn add_to_set(mut self, key: impl Into<String>, values: Vec<Value>) -> Self {
        self.add_to_set.entry(key.into()).or_default().extend(values);
        self
    }

    pub fn pull(mut self, key: impl Into<String>, values: Vec<Value>) -> Self {
        self.pull.entry(key.into()).or_default().extend(values);
        self
    }

    /// Every attribute this update touches
    pub fn touched(&self) -> impl Iterator<Item = &str> {
        self.set
            .keys()
            .chain(self.add_to_set.keys())
            .chain(self.pull.keys())
            .map(String::as_str)
    }

    /// Apply to a document in place
    ///
    /// A scalar attribute that receives `add_to_set` values is promoted to
    /// a one-element array first. The identifier is never modified.
    pub fn apply(&self, doc: &mut Document) {
        for (key, value) in &self.set {
            if key != ID_FIELD {
                doc.fields.insert(key.clone(), value.clone());
            }
        }

        for (key, values) in &self.add_to_set {
            if values.is_empty() && doc.fields.contains_key(key) {
                continue;
            }
            let entry = doc
                .fields
                .entry(key.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            if !entry.is_array() {
                let scalar = entry.take();
                *entry = Value::Array(vec![scalar]);
            }
            if let Value::Array(items) = entry {
                for value in values {
                    if !items.contains(value) {
                        items.push(value.clone());
                    }
                }
            }
        }

        for (key, values) in &self.pull {
            if let Some(Value::Array(items)) = doc.fields.get_mut(key) {
                items.retain(|item| !values.contains(item));
            }
        }
    }
}
