//! Document filters and their translation to store predicates
//!
//! A [`Filter`] is the declarative request of `find`/`count`: tag
//! membership, attribute presence, a creation date window, sort and limit,
//! or a raw predicate that bypasses everything else. [`FilterTranslator`]
//! turns it into a native [`Query`], resolving every tag reference up front
//! so that an unresolvable tag fails the call before any query runs.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{BlackboardError, Result};
use crate::models::{ObjectId, TagRef, CONTROL_TAGS_FIELD, TAGS_FIELD};
use crate::storage::{FieldPredicate, Query, SortOrder};
use crate::tags::TagCatalog;

/// A validated document filter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    /// Every listed tag must be present
    pub tags: Vec<TagRef>,
    /// None of the listed tags may be present
    pub without_tags: Vec<TagRef>,
    /// Attributes that must exist
    pub fields: Vec<String>,
    /// Attributes that must be absent
    pub without_fields: Vec<String>,
    /// Inclusive lower bound on creation date
    ///
    /// Only date-based blackboards support date bounds; standard ones
    /// reject them with `InvalidArgument`.
    pub min_date: Option<DateTime<Utc>>,
    /// Exclusive upper bound on creation date
    pub max_date: Option<DateTime<Utc>>,
    pub sort: SortOrder,
    /// Maximum number of documents; 0 means unbounded
    pub limit: usize,
    /// Raw predicate overriding the options above
    pub query: Option<Query>,
}

impl Filter {
    /// Match-everything filter, newest first
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> FilterBuilder {
        FilterBuilder::default()
    }

    /// Parse the loose JSON form used by annotation modules
    ///
    /// Every option except `sort`, `limit` and `query` must be a list, even
    /// with a single value. With several dates per bound the most
    /// restrictive one applies.
    pub fn from_json(value: &Value) -> Result<Self> {
        let options = value
            .as_object()
            .ok_or_else(|| BlackboardError::invalid(format!("Filter must be a JSON object: {}", value)))?;

        let mut filter = Filter::new();
        for (key, value) in options {
            match key.as_str() {
                "tags" => filter.tags = tag_refs(value)?,
                "without_tags" => filter.without_tags = tag_refs(value)?,
                "fields" => filter.fields = names(value)?,
                "without_fields" => filter.without_fields = names(value)?,
                "min_date" => filter.min_date = dates(value)?.into_iter().max(),
                "max_date" => filter.max_date = dates(value)?.into_iter().min(),
                "sort" => filter.sort = parse_sort(value)?,
                "limit" => {
                    filter.limit = value
                        .as_u64()
                        .and_then(|n| usize::try_from(n).ok())
                        .ok_or_else(|| {
                            BlackboardError::invalid(format!("limit must be a non-negative integer: {}", value))
                        })?
                }
                "query" => filter.query = Some(Query::from_json(value)?),
                other => {
                    return Err(BlackboardError::invalid(format!("Unknown filter option: '{}'", other)))
                }
            }
        }
        Ok(filter)
    }
}

fn as_list(value: &Value) -> Result<&Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| BlackboardError::invalid(format!("Argument needs to be a list: {}", value)))
}

fn tag_refs(value: &Value) -> Result<Vec<TagRef>> {
    as_list(value)?
        .iter()
        .map(|item| match item {
            Value::Number(n) => n
                .as_i64()
                .map(TagRef::Id)
                .ok_or_else(|| BlackboardError::invalid(format!("Invalid tag id: {}", item))),
            Value::String(name) => Ok(TagRef::Name(name.clone())),
            other => Err(BlackboardError::invalid(format!("Invalid tag reference: {}", other))),
        })
        .collect()
}

fn names(value: &Value) -> Result<Vec<String>> {
    as_list(value)?
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| BlackboardError::invalid(format!("Invalid attribute name: {}", item)))
        })
        .collect()
}

fn dates(value: &Value) -> Result<Vec<DateTime<Utc>>> {
    as_list(value)?
        .iter()
        .map(|item| match item {
            Value::String(s) => parse_date(s),
            other => Err(BlackboardError::invalid(format!("Invalid date: {}", other))),
        })
        .collect()
}

fn parse_sort(value: &Value) -> Result<SortOrder> {
    match value {
        Value::String(s) if s.eq_ignore_ascii_case("ascending") || s.eq_ignore_ascii_case("asc") => {
            Ok(SortOrder::Ascending)
        }
        Value::String(s) if s.eq_ignore_ascii_case("descending") || s.eq_ignore_ascii_case("desc") => {
            Ok(SortOrder::Descending)
        }
        Value::Number(n) if n.as_i64() == Some(1) => Ok(SortOrder::Ascending),
        Value::Number(n) if n.as_i64() == Some(-1) => Ok(SortOrder::Descending),
        other => Err(BlackboardError::invalid(format!("Invalid sort order: {}", other))),
    }
}

/// Parse a date string as UTC
///
/// Accepts RFC 3339 and `YYYY-MM-DD[ HH:MM:SS]`, `YYYY-MM-DDTHH:MM:SS`,
/// `YYYY/MM/DD`.
pub fn parse_date(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(dt.and_utc());
        }
    }
    for format in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            if let Some(dt) = date.and_hms_opt(0, 0, 0) {
                return Ok(dt.and_utc());
            }
        }
    }
    Err(BlackboardError::invalid(format!("Unparseable date: '{}'", s)))
}

/// Incremental construction of a [`Filter`]
///
/// Date strings are parsed eagerly; the first error is reported by
/// [`FilterBuilder::build`].
#[derive(Debug, Default)]
pub struct FilterBuilder {
    filter: Filter,
    error: Option<BlackboardError>,
}

impl FilterBuilder {
    pub fn tag(mut self, reference: impl Into<TagRef>) -> Self {
        self.filter.tags.push(reference.into());
        self
    }

    pub fn tags<R: Into<TagRef>>(mut self, references: impl IntoIterator<Item = R>) -> Self {
        self.filter.tags.extend(references.into_iter().map(Into::into));
        self
    }

    pub fn without_tags<R: Into<TagRef>>(mut self, references: impl IntoIterator<Item = R>) -> Self {
        self.filter.without_tags.extend(references.into_iter().map(Into::into));
        self
    }

    pub fn fields<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.filter.fields.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn without_fields<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.filter.without_fields.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn min_date(mut self, date: DateTime<Utc>) -> Self {
        self.filter.min_date = Some(date);
        self
    }

    pub fn max_date(mut self, date: DateTime<Utc>) -> Self {
        self.filter.max_date = Some(date);
        self
    }

    pub fn min_date_str(self, date: &str) -> Self {
        match parse_date(date) {
            Ok(date) => self.min_date(date),
            Err(e) => self.fail(e),
        }
    }

    pub fn max_date_str(self, date: &str) -> Self {
        match parse_date(date) {
            Ok(date) => self.max_date(date),
            Err(e) => self.fail(e),
        }
    }

    pub fn sort(mut self, sort: SortOrder) -> Self {
        self.filter.sort = sort;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.filter.limit = limit;
        self
    }

    /// Raw predicate; all other predicate options are ignored
    pub fn query(mut self, query: Query) -> Self {
        self.filter.query = Some(query);
        self
    }

    pub fn build(self) -> Result<Filter> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.filter),
        }
    }

    fn fail(mut self, error: BlackboardError) -> Self {
        self.error.get_or_insert(error);
        self
    }
}

/// Converts filters to native queries of one blackboard
pub struct FilterTranslator<'a> {
    catalog: &'a TagCatalog,
}

impl<'a> FilterTranslator<'a> {
    pub fn new(catalog: &'a TagCatalog) -> Self {
        Self { catalog }
    }

    /// Build the native query of `filter`
    ///
    /// Tag references are routed to `control_tags` or `tags` by their kind.
    /// A membership predicate on an attribute replaces any existence
    /// predicate on it. Date bounds become an identifier range.
    pub fn translate(&self, filter: &Filter) -> Result<Query> {
        if let Some(raw) = &filter.query {
            return Ok(raw.clone());
        }

        let mut query = Query::new();
        for name in &filter.fields {
            query.field_mut(name).exists = Some(true);
        }
        for name in &filter.without_fields {
            query.field_mut(name).exists = Some(false);
        }

        for reference in &filter.tags {
            let (field, id) = self.route(reference)?;
            push_unique(&mut query.field_mut(field).all, id);
        }
        for reference in &filter.without_tags {
            let (field, id) = self.route(reference)?;
            push_unique(&mut query.field_mut(field).none, id);
        }

        query
            .fields
            .values_mut()
            .filter(|predicate| predicate.has_membership())
            .for_each(|predicate: &mut FieldPredicate| predicate.exists = None);

        if let Some(min) = filter.min_date {
            query.id.gte = Some(ObjectId::from_datetime(min).into());
        }
        if let Some(max) = filter.max_date {
            query.id.lt = Some(ObjectId::from_datetime(max).into());
        }

        debug!(?query, "Translated filter");
        Ok(query)
    }

    fn route(&self, reference: &TagRef) -> Result<(&'static str, i64)> {
        let tag = self.catalog.resolve(reference)?;
        let field = if tag.is_control {
            CONTROL_TAGS_FIELD
        } else {
            TAGS_FIELD
        };
        Ok((field, tag.id))
    }
}

fn push_unique(values: &mut Vec<Value>, id: i64) {
    let value = Value::from(id);
    if !values.contains(&value) {
        values.push(value);
    }
}

/// Serialize a filter back to its JSON form
///
/// Raw queries are not representable and are omitted.
impl From<&Filter> for Value {
    fn from(filter: &Filter) -> Self {
        let mut map = Map::new();
        if !filter.tags.is_empty() {
            map.insert("tags".into(), tag_refs_json(&filter.tags));
        }
        if !filter.without_tags.is_empty() {
            map.insert("without_tags".into(), tag_refs_json(&filter.without_tags));
        }
        if !filter.fields.is_empty() {
            map.insert("fields".into(), Value::from(filter.fields.clone()));
        }
        if !filter.without_fields.is_empty() {
            map.insert("without_fields".into(), Value::from(filter.without_fields.clone()));
        }
        if let Some(min) = filter.min_date {
            map.insert("min_date".into(), Value::from(vec![min.to_rfc3339()]));
        }
        if let Some(max) = filter.max_date {
            map.insert("max_date".into(), Value::from(vec![max.to_rfc3339()]));
        }
        let sort = if filter.sort.is_ascending() { "ascending" } else { "descending" };
        map.insert("sort".into(), Value::from(sort));
        if filter.limit > 0 {
            map.insert("limit".into(), Value::from(filter.limit));
        }
        Value::Object(map)
    }
}

fn tag_refs_json(refs: &[TagRef]) -> Value {
    refs.iter()
        .map(|reference| match reference {
            TagRef::Id(id) => Value::from(*id),
            TagRef::Name(name) => Value::from(name.as_str()),
        })
        .collect()
}
