use crate::error::{MappingError, MappingResult};
use crate::record::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Separator between identity field values in a composite identity key.
pub const IDENTITY_SEPARATOR: &str = "|";

/// Static description of a resource type, declared next to its mapper.
///
/// This is where a resource author says which field(s) form the stable cloud
/// identity and which fields are server- or database-generated and must not
/// take part in structural comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    /// Table the resource type lives in.
    pub table: String,
    /// Fields whose values, joined with `|`, form the identity key.
    pub identity_fields: Vec<String>,
    /// Fields ignored by structural comparison.
    #[serde(default)]
    pub excluded_fields: BTreeSet<String>,
    /// Auto-increment column, if any. Never part of identity or comparison.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_id_field: Option<String>,
}

impl EntityDescriptor {
    pub fn new(table: &str, identity_fields: &[&str]) -> Self {
        Self {
            table: table.into(),
            identity_fields: identity_fields.iter().map(|f| f.to_string()).collect(),
            excluded_fields: BTreeSet::new(),
            db_id_field: None,
        }
    }

    /// Excludes fields from structural comparison.
    pub fn exclude(mut self, fields: &[&str]) -> Self {
        self.excluded_fields
            .extend(fields.iter().map(|f| f.to_string()));
        self
    }

    /// Declares the table's auto-increment column.
    pub fn with_db_id(mut self, field: &str) -> Self {
        self.db_id_field = Some(field.into());
        self
    }

    /// Whether `field` takes part in structural comparison.
    pub fn compares(&self, field: &str) -> bool {
        !self.excluded_fields.contains(field) && self.db_id_field.as_deref() != Some(field)
    }

    /// Identity key of a record. Missing identity fields render as empty.
    ///
    /// Composite keys join the field values with [`IDENTITY_SEPARATOR`],
    /// backslash-escaping separators and backslashes inside each value so
    /// `("a|b", "c")` and `("a", "b|c")` stay distinct. A single-field key is
    /// the value itself.
    pub fn identity_of(&self, record: &Record) -> String {
        let text = |f: &String| record.get(f).map(scalar_text).unwrap_or_default();
        match self.identity_fields.as_slice() {
            [single] => text(single),
            fields => fields
                .iter()
                .map(|f| escape_identity_part(&text(f)))
                .collect::<Vec<_>>()
                .join(IDENTITY_SEPARATOR),
        }
    }

    /// Structural equality over every compared field. An absent field and an
    /// explicit `null` are the same thing.
    pub fn structurally_equal(&self, a: &Record, b: &Record) -> bool {
        let fields: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
        fields
            .into_iter()
            .filter(|f| self.compares(f))
            .all(|f| {
                let left = a.get(f).unwrap_or(&Value::Null);
                let right = b.get(f).unwrap_or(&Value::Null);
                left == right
            })
    }

    /// Flat text rendering of a record for plans.
    pub fn print(&self, record: &Record) -> BTreeMap<String, String> {
        record
            .fields()
            .map(|(k, v)| (k.clone(), scalar_text(v)))
            .collect()
    }
}

fn escape_identity_part(part: &str) -> String {
    part.replace('\\', "\\\\")
        .replace(IDENTITY_SEPARATOR, "\\|")
}

/// Renders a JSON value as plain text: strings unquoted, null empty, nested
/// values as compact JSON.
fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        nested => nested.to_string(),
    }
}

// ── Field extraction ─────────────────────────────────────────────

/// What an extractor produced for one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    Value(Value),
    /// Leave the field out of the record.
    Omit,
}

impl Extracted {
    /// `Omit` for `None`, the value otherwise.
    pub fn from_option<T: Into<Value>>(value: Option<T>) -> Self {
        match value {
            Some(v) => Extracted::Value(v.into()),
            None => Extracted::Omit,
        }
    }
}

type ExtractorFn<R> = Box<dyn Fn(&R) -> Extracted + Send + Sync>;

struct FieldSpec<R> {
    name: String,
    required: bool,
    extract: ExtractorFn<R>,
}

/// Table of `(field, extractor)` pairs turning a raw provider payload `R`
/// into a [`Record`].
///
/// ```
/// use cloudrow_model::{Extracted, FieldTable};
///
/// struct RawGroup { group_id: String, description: Option<String> }
///
/// let table = FieldTable::new("security_group")
///     .required("group_id", |g: &RawGroup| Extracted::Value(g.group_id.clone().into()))
///     .field("description", |g: &RawGroup| Extracted::from_option(g.description.clone()));
///
/// let record = table
///     .extract(&RawGroup { group_id: "sg-1".into(), description: None })
///     .unwrap();
/// assert_eq!(record.get_str("group_id"), Some("sg-1"));
/// assert!(!record.contains("description"));
/// ```
pub struct FieldTable<R> {
    table: String,
    fields: Vec<FieldSpec<R>>,
}

impl<R> FieldTable<R> {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.into(),
            fields: Vec::new(),
        }
    }

    /// Adds an optional field; `Extracted::Omit` leaves it out.
    pub fn field<F>(mut self, name: &str, extract: F) -> Self
    where
        F: Fn(&R) -> Extracted + Send + Sync + 'static,
    {
        self.fields.push(FieldSpec {
            name: name.into(),
            required: false,
            extract: Box::new(extract),
        });
        self
    }

    /// Adds a required field; `Extracted::Omit` is a [`MappingError::MissingField`].
    pub fn required<F>(mut self, name: &str, extract: F) -> Self
    where
        F: Fn(&R) -> Extracted + Send + Sync + 'static,
    {
        self.fields.push(FieldSpec {
            name: name.into(),
            required: true,
            extract: Box::new(extract),
        });
        self
    }

    /// Field names in declaration order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Builds a record from a raw payload.
    pub fn extract(&self, raw: &R) -> MappingResult<Record> {
        let mut record = Record::new();
        for spec in &self.fields {
            match (spec.extract)(raw) {
                Extracted::Value(v) => {
                    record.set(spec.name.clone(), v);
                }
                Extracted::Omit if spec.required => {
                    return Err(MappingError::MissingField {
                        table: self.table.clone(),
                        field: spec.name.clone(),
                    });
                }
                Extracted::Omit => {}
            }
        }
        Ok(record)
    }

    /// Builds records from many payloads, stopping at the first failure.
    pub fn extract_all<'a, I>(&self, raws: I) -> MappingResult<Vec<Record>>
    where
        I: IntoIterator<Item = &'a R>,
        R: 'a,
    {
        raws.into_iter().map(|raw| self.extract(raw)).collect()
    }
}
