//! SQL text shared by the SQLite and PostgreSQL backends.

use rowgrid_core::{ColumnKind, ColumnSpec, ModelSchema, Value, Values};

use crate::error::{StoreError, StoreResult};

/// The two SQL flavours the stores speak.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    /// Placeholder for the `n`th (1-based) bound parameter.
    pub(crate) fn placeholder(self, n: usize) -> String {
        match self {
            Dialect::Sqlite => "?".to_string(),
            Dialect::Postgres => format!("${n}"),
        }
    }

    fn column_type(self, kind: ColumnKind) -> &'static str {
        match (self, kind) {
            (_, ColumnKind::Text | ColumnKind::Json) => "TEXT",
            (Dialect::Sqlite, ColumnKind::Integer | ColumnKind::Boolean) => "INTEGER",
            (Dialect::Sqlite, ColumnKind::Float) => "REAL",
            (Dialect::Sqlite, ColumnKind::Bytes) => "BLOB",
            (Dialect::Sqlite, ColumnKind::Timestamp) => "TEXT",
            (Dialect::Postgres, ColumnKind::Integer) => "BIGINT",
            (Dialect::Postgres, ColumnKind::Boolean) => "BOOLEAN",
            (Dialect::Postgres, ColumnKind::Float) => "DOUBLE PRECISION",
            (Dialect::Postgres, ColumnKind::Bytes) => "BYTEA",
            (Dialect::Postgres, ColumnKind::Timestamp) => "TIMESTAMPTZ",
            // never emitted: file columns have no SQL column
            (_, ColumnKind::File) => "TEXT",
        }
    }

    fn primary_key_type(self) -> &'static str {
        match self {
            Dialect::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
            Dialect::Postgres => "BIGSERIAL PRIMARY KEY",
        }
    }
}

/// Quote an identifier. Schema names are validated to plain ASCII, so no
/// escaping is needed.
pub(crate) fn quote(ident: &str) -> String {
    format!("\"{ident}\"")
}

/// `CREATE TABLE` plus one `CREATE INDEX` per indexed column.
pub(crate) fn create_table_statements(schema: &ModelSchema, dialect: Dialect) -> Vec<String> {
    let table = quote(&schema.table_name);
    let mut defs = vec![format!(
        "{} {}",
        quote(&schema.primary_key),
        dialect.primary_key_type()
    )];
    for column in schema.stored_columns() {
        let mut def = format!("{} {}", quote(&column.name), dialect.column_type(column.kind));
        if !column.nullable {
            def.push_str(" NOT NULL");
        }
        if column.unique {
            def.push_str(" UNIQUE");
        }
        defs.push(def);
    }

    let mut statements = vec![format!(
        "CREATE TABLE IF NOT EXISTS {table} ({})",
        defs.join(", ")
    )];
    for column in schema.stored_columns().filter(|c| c.indexed && !c.unique) {
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS {} ON {table} ({})",
            quote(&format!("idx_{}_{}", schema.table_name, column.name)),
            quote(&column.name)
        ));
    }
    statements
}

pub(crate) fn drop_table_statement(schema: &ModelSchema) -> String {
    format!("DROP TABLE IF EXISTS {}", quote(&schema.table_name))
}

/// Column list for selects: primary key first, then stored columns.
pub(crate) fn select_list(schema: &ModelSchema) -> String {
    std::iter::once(quote(&schema.primary_key))
        .chain(schema.stored_columns().map(|c| quote(&c.name)))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn insert_statement(
    schema: &ModelSchema,
    columns: &[(&ColumnSpec, &Value)],
    dialect: Dialect,
) -> String {
    let table = quote(&schema.table_name);
    let pk = quote(&schema.primary_key);
    if columns.is_empty() {
        return format!("INSERT INTO {table} DEFAULT VALUES RETURNING {pk}");
    }
    let names: Vec<String> = columns.iter().map(|(c, _)| quote(&c.name)).collect();
    let params: Vec<String> = (1..=columns.len()).map(|n| dialect.placeholder(n)).collect();
    format!(
        "INSERT INTO {table} ({}) VALUES ({}) RETURNING {pk}",
        names.join(", "),
        params.join(", ")
    )
}

/// `UPDATE ... WHERE pk = <last placeholder>`.
pub(crate) fn update_statement(
    schema: &ModelSchema,
    columns: &[(&ColumnSpec, &Value)],
    dialect: Dialect,
) -> String {
    let assignments: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, (c, _))| format!("{} = {}", quote(&c.name), dialect.placeholder(i + 1)))
        .collect();
    format!(
        "UPDATE {} SET {} WHERE {} = {}",
        quote(&schema.table_name),
        assignments.join(", "),
        quote(&schema.primary_key),
        dialect.placeholder(columns.len() + 1)
    )
}

/// Resolve `values` against the schema, in declaration order.
///
/// Unknown names, file columns and values of the wrong type are rejected.
pub(crate) fn bound_columns<'a>(
    schema: &'a ModelSchema,
    values: &'a Values,
) -> StoreResult<Vec<(&'a ColumnSpec, &'a Value)>> {
    for (name, value) in values {
        let column = schema.column(name).ok_or_else(|| {
            StoreError::Validation(format!("{} has no column '{name}'", schema.name))
        })?;
        if !column.kind.is_stored_inline() {
            return Err(StoreError::Validation(format!(
                "file column '{name}' cannot be stored as a value"
            )));
        }
        if !value.fits(column.kind) {
            return Err(StoreError::Validation(format!(
                "column '{name}' expects {:?}, got {}",
                column.kind,
                value.type_name()
            )));
        }
    }
    Ok(schema
        .stored_columns()
        .filter_map(|c| values.get(&c.name).map(|v| (c, v)))
        .collect())
}

pub(crate) fn decode_json(column: &str, text: String) -> StoreResult<Value> {
    serde_json::from_str(&text)
        .map(Value::Json)
        .map_err(|e| StoreError::Integrity(format!("column '{column}' holds invalid JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowgrid_core::ColumnSpec;

    fn city() -> ModelSchema {
        ModelSchema::builder("City")
            .column(ColumnSpec::text("name").not_null().indexed())
            .column(ColumnSpec::integer("population"))
            .column(ColumnSpec::file("map"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_create_table_sqlite() {
        let statements = create_table_statements(&city(), Dialect::Sqlite);
        assert_eq!(
            statements[0],
            r#"CREATE TABLE IF NOT EXISTS "city" ("id" INTEGER PRIMARY KEY AUTOINCREMENT, "name" TEXT NOT NULL, "population" INTEGER)"#
        );
        assert_eq!(
            statements[1],
            r#"CREATE INDEX IF NOT EXISTS "idx_city_name" ON "city" ("name")"#
        );
    }

    #[test]
    fn test_create_table_postgres_types() {
        let statements = create_table_statements(&city(), Dialect::Postgres);
        assert!(statements[0].contains(r#""id" BIGSERIAL PRIMARY KEY"#));
        assert!(statements[0].contains(r#""population" BIGINT"#));
        assert!(!statements[0].contains("map"));
    }

    #[test]
    fn test_insert_and_update_placeholders() {
        let schema = city();
        let mut values = Values::new();
        values.insert("name".to_string(), Value::from("London"));
        values.insert("population".to_string(), Value::from(9i64));
        let columns = bound_columns(&schema, &values).unwrap();

        assert_eq!(
            insert_statement(&schema, &columns, Dialect::Postgres),
            r#"INSERT INTO "city" ("name", "population") VALUES ($1, $2) RETURNING "id""#
        );
        assert_eq!(
            update_statement(&schema, &columns, Dialect::Sqlite),
            r#"UPDATE "city" SET "name" = ?, "population" = ? WHERE "id" = ?"#
        );
        assert_eq!(
            insert_statement(&schema, &[], Dialect::Sqlite),
            r#"INSERT INTO "city" DEFAULT VALUES RETURNING "id""#
        );
    }

    #[test]
    fn test_bound_columns_rejects_bad_values() {
        let schema = city();
        let mut values = Values::new();
        values.insert("nope".to_string(), Value::Null);
        assert!(bound_columns(&schema, &values).is_err());

        let mut values = Values::new();
        values.insert("map".to_string(), Value::Null);
        assert!(bound_columns(&schema, &values).is_err());

        let mut values = Values::new();
        values.insert("population".to_string(), Value::from("many"));
        assert!(matches!(
            bound_columns(&schema, &values),
            Err(StoreError::Validation(_))
        ));
    }
}
