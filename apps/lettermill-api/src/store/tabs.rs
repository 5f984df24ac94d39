//! Catalog persistence: letter types, fields, templates, signatures, and
//! canonical employee records.

use std::str::FromStr;

use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use lettermill_core::model::{
    DataSourceKind, EmployeeRecord, Field, FieldType, LetterTemplate, LetterType, SignatureAsset,
};

#[derive(Clone)]
pub struct TabStore {
    pool: SqlitePool,
}

#[derive(FromRow)]
struct DbLetterType {
    id: String,
    name: String,
    source: String,
    active: bool,
    key_column: String,
    table_override: Option<String>,
    owner_user_id: String,
}

#[derive(FromRow)]
struct DbField {
    key: String,
    name: String,
    field_type: String,
    required: bool,
    field_order: i32,
    default_value: Option<String>,
}

impl TabStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Load a letter type with its ordered fields.
    pub async fn get_letter_type(&self, id: &str) -> Result<Option<LetterType>, sqlx::Error> {
        let Some(row) = sqlx::query_as::<_, DbLetterType>(
            "SELECT id, name, source, active, key_column, table_override, owner_user_id \
             FROM letter_types WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let db_fields = sqlx::query_as::<_, DbField>(
            "SELECT key, name, field_type, required, field_order, default_value \
             FROM fields WHERE letter_type_id = ? ORDER BY field_order",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let fields = db_fields
            .into_iter()
            .map(|f| Field {
                field_type: FieldType::from_str(&f.field_type).unwrap_or(FieldType::Text),
                key: f.key,
                name: f.name,
                required: f.required,
                order: f.field_order,
                default_value: f.default_value,
            })
            .collect();

        debug!(id, "loaded letter type");
        Ok(Some(LetterType {
            source: DataSourceKind::from_str(&row.source).unwrap_or(DataSourceKind::FileImport),
            id: row.id,
            name: row.name,
            active: row.active,
            key_column: row.key_column,
            table_override: row.table_override,
            owner_user_id: row.owner_user_id,
            fields,
        }))
    }

    pub async fn get_template(&self, id: &str) -> Result<Option<LetterTemplate>, sqlx::Error> {
        sqlx::query_as::<_, (String, String, String, String)>(
            "SELECT id, letter_type_id, name, body FROM templates WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map(|row| {
            row.map(|(id, letter_type_id, name, body)| LetterTemplate {
                id,
                letter_type_id,
                name,
                body,
            })
        })
    }

    /// Look up a signature asset by id first, then by display name.
    pub async fn get_signature(&self, id_or_name: &str) -> Result<Option<SignatureAsset>, sqlx::Error> {
        sqlx::query_as::<_, (String, String, String)>(
            "SELECT id, display_name, path FROM signatures \
             WHERE id = ? OR display_name = ? LIMIT 1",
        )
        .bind(id_or_name)
        .bind(id_or_name)
        .fetch_optional(&self.pool)
        .await
        .map(|row| {
            row.map(|(id, display_name, path)| SignatureAsset {
                id,
                display_name,
                path,
            })
        })
    }

    pub async fn get_employee(
        &self,
        letter_type_id: &str,
        key: &str,
    ) -> Result<Option<EmployeeRecord>, sqlx::Error> {
        sqlx::query_as::<_, (String, String, String)>(
            "SELECT key, name, email FROM employees WHERE letter_type_id = ? AND key = ?",
        )
        .bind(letter_type_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map(|row| row.map(|(key, name, email)| EmployeeRecord { key, name, email }))
    }

    /// Insert a letter type with its fields. Used by the import boundary and
    /// by tests seeding a catalog.
    pub async fn insert_letter_type(&self, tab: &LetterType) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO letter_types \
             (id, name, source, active, key_column, table_override, owner_user_id) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&tab.id)
        .bind(&tab.name)
        .bind(tab.source.to_string())
        .bind(tab.active)
        .bind(&tab.key_column)
        .bind(&tab.table_override)
        .bind(&tab.owner_user_id)
        .execute(&self.pool)
        .await?;

        for field in &tab.fields {
            sqlx::query(
                "INSERT INTO fields \
                 (letter_type_id, key, name, field_type, required, field_order, default_value) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&tab.id)
            .bind(&field.key)
            .bind(&field.name)
            .bind(field.field_type.to_string())
            .bind(field.required)
            .bind(field.order)
            .bind(&field.default_value)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn insert_template(&self, template: &LetterTemplate) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO templates (id, letter_type_id, name, body) VALUES (?, ?, ?, ?)")
            .bind(&template.id)
            .bind(&template.letter_type_id)
            .bind(&template.name)
            .bind(&template.body)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_signature(&self, asset: &SignatureAsset) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO signatures (id, display_name, path) VALUES (?, ?, ?)")
            .bind(&asset.id)
            .bind(&asset.display_name)
            .bind(&asset.path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_employee(
        &self,
        letter_type_id: &str,
        employee: &EmployeeRecord,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO employees (letter_type_id, key, name, email) VALUES (?, ?, ?, ?)")
            .bind(letter_type_id)
            .bind(&employee.key)
            .bind(&employee.name)
            .bind(&employee.email)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
