//! Per-collection record schemas.
//!
//! Documents in the hosted backend are schemaless, so every collection the
//! application writes to gets an explicit schema here. Payloads are checked
//! when they enter the queue; a violation surfaces as
//! [`SyncqError::SchemaMismatch`] instead of a half-formed document reaching
//! the backend. Collections without a registered schema are accepted as-is.

mod validators;

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::SyncqError;
use crate::sync::OperationKind;

pub use validators::{is_valid_date, is_valid_email, is_valid_phone, is_valid_url};

/// The type a field value must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Non-empty string.
    Text,
    Number,
    Bool,
    /// RFC 3339 timestamp or `YYYY-MM-DD`.
    Date,
    Email,
    Phone,
    Url,
    List,
    Object,
    Any,
}

impl FieldKind {
    fn check(self, value: &Value) -> Result<(), String> {
        let ok = match self {
            Self::Text => value.as_str().is_some_and(|s| !s.trim().is_empty()),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::Date => value.as_str().is_some_and(is_valid_date),
            Self::Email => value.as_str().is_some_and(is_valid_email),
            Self::Phone => value.as_str().is_some_and(is_valid_phone),
            Self::Url => value.as_str().is_some_and(is_valid_url),
            Self::List => value.is_array(),
            Self::Object => value.is_object(),
            Self::Any => true,
        };
        if ok {
            Ok(())
        } else {
            Err(format!("expected {}, got {value}", self.describe()))
        }
    }

    const fn describe(self) -> &'static str {
        match self {
            Self::Text => "non-empty text",
            Self::Number => "a number",
            Self::Bool => "a boolean",
            Self::Date => "a date",
            Self::Email => "an email address",
            Self::Phone => "a phone number",
            Self::Url => "a URL",
            Self::List => "a list",
            Self::Object => "an object",
            Self::Any => "any value",
        }
    }
}

/// One field in a collection schema.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
}

/// Schema for the documents of one collection.
#[derive(Debug, Clone)]
pub struct CollectionSchema {
    pub collection: String,
    pub fields: Vec<FieldSpec>,
}

impl CollectionSchema {
    #[must_use]
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn required(mut self, name: &str, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            kind,
            required: true,
        });
        self
    }

    #[must_use]
    pub fn optional(mut self, name: &str, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            kind,
            required: false,
        });
        self
    }

    /// Validate a payload written by an operation of the given kind.
    ///
    /// Creates must carry every required field. Updates are partial, so only
    /// the fields present are checked, and a required field may not be
    /// nulled out. Deletes carry no payload and always pass.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` naming the first offending field.
    pub fn validate(&self, kind: OperationKind, payload: &Map<String, Value>) -> Result<(), SyncqError> {
        if kind == OperationKind::Delete {
            return Ok(());
        }

        for field in &self.fields {
            match payload.get(&field.name) {
                None if field.required && kind == OperationKind::Create => {
                    return Err(self.mismatch(field, "required field is missing".to_string()));
                }
                None => {}
                Some(Value::Null) if field.required => {
                    return Err(self.mismatch(field, "required field is null".to_string()));
                }
                Some(Value::Null) => {}
                Some(value) => field.kind.check(value).map_err(|r| self.mismatch(field, r))?,
            }
        }
        Ok(())
    }

    fn mismatch(&self, field: &FieldSpec, reason: String) -> SyncqError {
        SyncqError::SchemaMismatch {
            collection: self.collection.clone(),
            field: field.name.clone(),
            reason,
        }
    }
}

/// Registry of collection schemas, keyed by collection name.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, CollectionSchema>,
}

impl SchemaRegistry {
    /// A registry with no schemas; every payload is accepted.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry preloaded with the dashboard's core collections.
    #[must_use]
    pub fn with_defaults() -> Self {
        use FieldKind::{Date, List, Number, Text};

        let mut registry = Self::empty();
        registry.register(
            CollectionSchema::new("tasks")
                .required("title", Text)
                .required("projectId", Text)
                .optional("description", FieldKind::Any)
                .optional("stage", Text)
                .optional("priority", Text)
                .optional("assignee", Text)
                .optional("dueDate", Date)
                .optional("hours", Number)
                .optional("tags", List),
        );
        registry.register(
            CollectionSchema::new("projects")
                .required("name", Text)
                .optional("description", FieldKind::Any)
                .optional("phase", Text)
                .optional("priority", Text)
                .optional("startDate", Date)
                .optional("endDate", Date)
                .optional("budget", Number)
                .optional("team", List),
        );
        registry.register(
            CollectionSchema::new("clients")
                .required("name", Text)
                .optional("contactName", Text)
                .optional("email", FieldKind::Email)
                .optional("phone", FieldKind::Phone)
                .optional("website", FieldKind::Url),
        );
        registry.register(
            CollectionSchema::new("expenses")
                .required("category", Text)
                .required("amount", Number)
                .required("date", Date)
                .optional("currency", Text)
                .optional("projectId", Text)
                .optional("receiptUrl", FieldKind::Url),
        );
        registry.register(
            CollectionSchema::new("events")
                .required("title", Text)
                .required("start", Date)
                .optional("end", Date)
                .optional("type", Text),
        );
        registry.register(
            CollectionSchema::new("timeEntries")
                .required("hours", Number)
                .required("date", Date)
                .optional("projectId", Text)
                .optional("taskId", Text),
        );
        registry.register(
            CollectionSchema::new("leaveRequests")
                .required("startDate", Date)
                .required("endDate", Date)
                .optional("type", Text)
                .optional("reason", FieldKind::Any),
        );
        registry
    }

    /// Register or replace the schema for a collection.
    pub fn register(&mut self, schema: CollectionSchema) {
        self.schemas.insert(schema.collection.clone(), schema);
    }

    #[must_use]
    pub fn get(&self, collection: &str) -> Option<&CollectionSchema> {
        self.schemas.get(collection)
    }

    /// Validate a payload against its collection's schema, if one exists.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` if the payload violates the schema.
    pub fn validate(
        &self,
        kind: OperationKind,
        collection: &str,
        payload: &Map<String, Value>,
    ) -> Result<(), SyncqError> {
        self.get(collection)
            .map_or(Ok(()), |schema| schema.validate(kind, payload))
    }
}
