//! Explicit model schema descriptions.
//!
//! A model is declared as an ordered list of columns rather than discovered
//! from a type. The store crate turns a [`ModelSchema`] into a table; file
//! columns get no SQL column and keep their content in the chunk table.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::{Error, Result};

/// Tables the store keeps for itself; models may not claim them.
pub const RESERVED_TABLES: &[&str] = &["file_chunks", "file_generations"];

/// Semantic type of a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Text,
    Integer,
    Float,
    Boolean,
    Bytes,
    Json,
    Timestamp,
    /// Content stored as chunks under a key derived from the record.
    File,
}

impl ColumnKind {
    /// Whether values of this kind live in the record's own table.
    pub fn is_stored_inline(self) -> bool {
        self != ColumnKind::File
    }
}

/// One column of a model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub indexed: bool,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnSpec {
    /// A nullable column without constraints.
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            unique: false,
            indexed: false,
            nullable: true,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Text)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Float)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Boolean)
    }

    pub fn bytes(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Bytes)
    }

    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Json)
    }

    pub fn timestamp(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Timestamp)
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::File)
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// A model: table name, integer primary key and ordered columns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSchema {
    pub name: String,
    pub table_name: String,
    pub primary_key: String,
    pub columns: Vec<ColumnSpec>,
}

impl ModelSchema {
    /// Start building a schema for the model `name`.
    ///
    /// The table name defaults to `name` in snake case (`ImageFile` ->
    /// `image_file`) and the primary key to `id`.
    pub fn builder(name: impl Into<String>) -> ModelSchemaBuilder {
        let name = name.into();
        ModelSchemaBuilder {
            table_name: None,
            primary_key: "id".to_string(),
            columns: Vec::new(),
            name,
        }
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Columns with a SQL column of their own, in declaration order.
    pub fn stored_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter().filter(|c| c.kind.is_stored_inline())
    }

    /// File columns, in declaration order.
    pub fn file_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter().filter(|c| c.kind == ColumnKind::File)
    }
}

/// Builder for [`ModelSchema`].
#[derive(Debug)]
pub struct ModelSchemaBuilder {
    name: String,
    table_name: Option<String>,
    primary_key: String,
    columns: Vec<ColumnSpec>,
}

impl ModelSchemaBuilder {
    pub fn table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    pub fn primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    /// Validate names and constraints and produce the schema.
    pub fn build(self) -> Result<ModelSchema> {
        let table_name = self
            .table_name
            .unwrap_or_else(|| camel_to_snake(&self.name));
        check_identifier("table name", &table_name)?;
        if RESERVED_TABLES
            .iter()
            .any(|reserved| reserved.eq_ignore_ascii_case(&table_name))
        {
            return Err(Error::InvalidSchema(format!(
                "table name '{table_name}' is reserved"
            )));
        }
        check_identifier("primary key", &self.primary_key)?;

        let mut seen = HashSet::new();
        seen.insert(self.primary_key.as_str());
        for column in &self.columns {
            check_identifier("column name", &column.name)?;
            if !seen.insert(column.name.as_str()) {
                return Err(Error::InvalidSchema(format!(
                    "duplicate column '{}' in {}",
                    column.name, self.name
                )));
            }
            if column.kind == ColumnKind::File && (column.unique || column.indexed) {
                return Err(Error::InvalidSchema(format!(
                    "file column '{}' cannot be unique or indexed",
                    column.name
                )));
            }
        }

        Ok(ModelSchema {
            name: self.name,
            table_name,
            primary_key: self.primary_key,
            columns: self.columns,
        })
    }
}

/// `CamelCase` to `snake_case`.
pub fn camel_to_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

// Identifiers are interpolated into SQL, so only plain ASCII names pass.
fn check_identifier(what: &str, ident: &str) -> Result<()> {
    let mut chars = ident.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if !valid || ident.len() > 63 {
        return Err(Error::InvalidSchema(format!("invalid {what}: '{ident}'")));
    }
    Ok(())
}
