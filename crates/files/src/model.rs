//! Records of explicit model schemas.

use std::collections::BTreeMap;
use std::sync::Arc;

use rowgrid_core::{ModelSchema, Value, Values};

use crate::column::{FileColumn, RecordHook};
use crate::error::{FilesError, FilesResult};
use crate::registry::{Database, Registry};

/// A model schema bound to a database.
#[derive(Clone, Debug)]
pub struct Model {
    schema: Arc<ModelSchema>,
    database: Database,
}

impl Model {
    /// Bind `schema` to `database`, creating its table if needed.
    pub async fn bind(schema: ModelSchema, database: &Database) -> FilesResult<Self> {
        database.store().create_table(&schema).await?;
        tracing::debug!(
            model = %schema.name,
            table = %schema.table_name,
            alias = %database.alias(),
            "Bound model"
        );
        Ok(Self {
            schema: Arc::new(schema),
            database: database.clone(),
        })
    }

    /// Bind `schema` to the ambient database of the global registry.
    pub async fn bind_current(schema: ModelSchema) -> FilesResult<Self> {
        let database = Registry::global().current()?;
        Self::bind(schema, &database).await
    }

    pub fn schema(&self) -> &ModelSchema {
        &self.schema
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    fn file_columns(&self, pk: Option<i64>) -> BTreeMap<String, FileColumn> {
        self.schema
            .file_columns()
            .map(|c| {
                let column = match pk {
                    Some(pk) => FileColumn::bound(
                        self.database.clone(),
                        &self.schema.table_name,
                        &c.name,
                        pk,
                    ),
                    None => {
                        FileColumn::new(self.database.clone(), &self.schema.table_name, &c.name)
                    }
                };
                (c.name.clone(), column)
            })
            .collect()
    }

    /// A new, unsaved record with every column unset.
    pub fn new_record(&self) -> Record {
        Record {
            model: self.clone(),
            pk: None,
            values: Values::new(),
            files: self.file_columns(None),
        }
    }

    fn loaded(&self, pk: i64, values: Values) -> Record {
        Record {
            model: self.clone(),
            pk: Some(pk),
            values,
            files: self.file_columns(Some(pk)),
        }
    }

    /// Load a record by primary key.
    pub async fn get(&self, pk: i64) -> FilesResult<Record> {
        let values = self
            .database
            .store()
            .fetch_record(&self.schema, pk)
            .await?
            .ok_or_else(|| FilesError::NotFound(format!("{} {pk}", self.schema.name)))?;
        Ok(self.loaded(pk, values))
    }

    /// All records ordered by primary key.
    pub async fn all(&self) -> FilesResult<Vec<Record>> {
        let rows = self.database.store().fetch_records(&self.schema).await?;
        Ok(rows
            .into_iter()
            .map(|(pk, values)| self.loaded(pk, values))
            .collect())
    }

    pub async fn count(&self) -> FilesResult<u64> {
        Ok(self.database.store().count_records(&self.schema).await?)
    }
}

/// One row of a model plus its file columns.
#[derive(Debug)]
pub struct Record {
    model: Model,
    pk: Option<i64>,
    values: Values,
    files: BTreeMap<String, FileColumn>,
}

impl Record {
    /// Primary key, once saved.
    pub fn pk(&self) -> Option<i64> {
        self.pk
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Value of a column, or `None` if the column is unset or unknown.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    /// Set a column value, checking it against the schema.
    pub fn set(&mut self, column: &str, value: impl Into<Value>) -> FilesResult<()> {
        let value = value.into();
        let schema = self.model.schema();
        let def = schema.column(column).ok_or_else(|| {
            FilesError::Validation(format!("{} has no column '{column}'", schema.name))
        })?;
        if !def.kind.is_stored_inline() {
            return Err(FilesError::Validation(format!(
                "'{column}' is a file column; use Record::file"
            )));
        }
        if !value.fits(def.kind) {
            return Err(rowgrid_core::Error::InvalidValue {
                column: column.to_string(),
                reason: format!("expected {:?}, got {}", def.kind, value.type_name()),
            }
            .into());
        }
        self.values.insert(column.to_string(), value);
        Ok(())
    }

    /// The file column `column`.
    pub fn file(&mut self, column: &str) -> FilesResult<&mut FileColumn> {
        let model = self.model.schema().name.clone();
        self.files
            .get_mut(column)
            .ok_or_else(|| FilesError::Validation(format!("{model} has no file column '{column}'")))
    }

    /// Insert or update the row, then flush buffered file writes.
    ///
    /// Returns the primary key.
    pub async fn save(&mut self) -> FilesResult<i64> {
        let store = self.model.database.store();
        let schema = self.model.schema.as_ref();
        let pk = match self.pk {
            Some(pk) => {
                store.update_record(schema, pk, &self.values).await?;
                pk
            }
            None => {
                let pk = store.insert_record(schema, &self.values).await?;
                self.pk = Some(pk);
                pk
            }
        };

        for column in self.files.values_mut() {
            column.after_save(pk).await?;
        }
        tracing::debug!(model = %schema.name, pk, "Saved record");
        Ok(pk)
    }

    /// Delete the row and the content of its file columns.
    ///
    /// Both go in one transaction; if it fails the record and its files stay.
    pub async fn delete(mut self) -> FilesResult<()> {
        let Some(pk) = self.pk else {
            return Err(FilesError::Validation(format!(
                "cannot delete an unsaved {}",
                self.model.schema.name
            )));
        };
        let mut file_keys = Vec::with_capacity(self.files.len());
        for column in self.files.values_mut() {
            file_keys.extend(column.on_delete()?);
        }
        let removed = self
            .model
            .database
            .store()
            .delete_record(&self.model.schema, pk, &file_keys)
            .await?;
        if !removed {
            return Err(FilesError::NotFound(format!(
                "{} {pk}",
                self.model.schema.name
            )));
        }
        tracing::debug!(model = %self.model.schema.name, pk, "Deleted record");
        Ok(())
    }
}
