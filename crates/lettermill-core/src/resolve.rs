//! Placeholder resolution.
//!
//! Builds the token map a template is filled from. Source column names are
//! end-user-defined strings and are not guaranteed to equal any field key,
//! so lookup walks display name, then key, case-sensitive then
//! case-insensitive, and finally a fixed synonym alias table so templates
//! stay stable across uploads with varying headers. Missing columns are a
//! diagnostic, never an error: bulk generation must not fail a whole batch
//! for one missing column.

use std::collections::HashMap;

use chrono::Utc;
use tracing::debug;

use crate::model::{EmployeeRecord, Field};

/// Common synonym aliases, applied to fields the row lookup left empty.
/// Keyed by field key (matched case-insensitively) to the source column
/// spellings seen across uploads.
const ALIASES: &[(&str, &[&str])] = &[
    ("EmpID", &["EMP ID", "EmployeeId", "Employee_ID", "EMPID"]),
    ("EmpName", &["EMP NAME", "Employee Name", "Full Name", "NAME"]),
    ("Email", &["EMAIL", "E-mail", "Mail ID", "Email Address"]),
    ("Salary", &["CTC", "SALARY", "Gross Salary", "Annual CTC"]),
    ("Designation", &["DESIGNATION", "Role", "Job Title", "Title"]),
    ("Department", &["DEPT", "DEPARTMENT", "Department Name"]),
    ("DateOfJoining", &["DOJ", "Date of Joining", "Joining Date"]),
];

/// Resolved token → value map with case-insensitive lookup.
#[derive(Debug, Clone, Default)]
pub struct TokenMap {
    values: HashMap<String, String>,
}

impl TokenMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, token: &str, value: String) {
        self.values.insert(token.to_string(), value);
    }

    /// Exact lookup first, then case-insensitive.
    pub fn get(&self, token: &str) -> Option<&str> {
        if let Some(v) = self.values.get(token) {
            return Some(v.as_str());
        }
        self.values
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(token))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, token: &str) -> bool {
        self.get(token).is_some()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.values.iter()
    }
}

impl From<HashMap<String, String>> for TokenMap {
    fn from(values: HashMap<String, String>) -> Self {
        Self { values }
    }
}

/// Row lookup: exact match first, then case-insensitive.
fn row_get<'a>(row: &'a HashMap<String, String>, column: &str) -> Option<&'a str> {
    if let Some(v) = row.get(column) {
        return Some(v.as_str());
    }
    row.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(column))
        .map(|(_, v)| v.as_str())
}

/// Resolve a field against the row: display name, then key, first hit wins.
fn resolve_field(row: &HashMap<String, String>, field: &Field) -> Option<String> {
    row_get(row, &field.name)
        .or_else(|| row_get(row, &field.key))
        .map(str::to_string)
}

/// Alias pass for a field the direct lookup missed.
fn resolve_alias(row: &HashMap<String, String>, field: &Field) -> Option<String> {
    let synonyms = ALIASES
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(&field.key))
        .map(|(_, synonyms)| *synonyms)?;
    synonyms
        .iter()
        .find_map(|column| row_get(row, column))
        .map(str::to_string)
}

/// Build the token map for one employee.
///
/// Seeds canonical employee attributes, resolves each field against the row
/// (empty string on a total miss — resolution never fails for a missing
/// column), injects system placeholders, and finally applies caller
/// overrides, which win over every other source.
pub fn resolve(
    employee: &EmployeeRecord,
    row: &HashMap<String, String>,
    fields: &[Field],
    organization: &str,
    overrides: Option<&HashMap<String, String>>,
) -> TokenMap {
    let mut map = TokenMap::new();

    // Canonical employee attributes.
    map.insert("EmployeeId", employee.key.clone());
    map.insert("EmployeeName", employee.name.clone());
    map.insert("Email", employee.email.clone());
    map.insert("FirstName", employee.first_name().to_string());
    map.insert("LastName", employee.last_name().to_string());

    for field in fields {
        let value = resolve_field(row, field)
            .or_else(|| resolve_alias(row, field))
            .or_else(|| field.default_value.clone());

        let value = match value {
            Some(v) => v,
            None => {
                debug!(
                    field = %field.key,
                    display_name = %field.name,
                    "no row column or alias matched field, rendering empty"
                );
                String::new()
            }
        };
        map.insert(&field.key, value);
    }

    // System placeholders.
    let today = Utc::now().format("%B %d, %Y").to_string();
    map.insert("CurrentDate", today.clone());
    map.insert("Date", today);
    map.insert("OrganizationName", organization.to_string());

    // Caller overrides take precedence over all other sources.
    if let Some(overrides) = overrides {
        for (token, value) in overrides {
            map.insert(token, value.clone());
        }
    }

    map
}
