//! SQL dialects
//!
//! Vendor-specific statement generation for the relational backends:
//! identifier quoting, positional placeholders, conflict-resolving inserts
//! and catalog introspection.

use sea_orm::DbBackend;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// SQL dialect of a relational backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    MySql,
    Postgres,
    Sqlite,
}

/// Column description returned by `describe_table`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<JsonValue>,
}

impl Dialect {
    pub fn from_backend(backend: DbBackend) -> Self {
        match backend {
            DbBackend::MySql => Dialect::MySql,
            DbBackend::Postgres => Dialect::Postgres,
            DbBackend::Sqlite => Dialect::Sqlite,
        }
    }

    pub fn backend(&self) -> DbBackend {
        match self {
            Dialect::MySql => DbBackend::MySql,
            Dialect::Postgres => DbBackend::Postgres,
            Dialect::Sqlite => DbBackend::Sqlite,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Dialect::MySql => "mysql",
            Dialect::Postgres => "postgres",
            Dialect::Sqlite => "sqlite",
        }
    }

    /// Quote a single identifier, doubling any embedded quote character.
    pub fn quote_identifier(&self, name: &str) -> String {
        match self {
            Dialect::MySql => format!("`{}`", name.replace('`', "``")),
            Dialect::Postgres | Dialect::Sqlite => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }

    /// Quote a possibly schema-qualified name such as `public.orders`.
    pub fn quote_qualified(&self, name: &str) -> String {
        name.split('.')
            .map(|part| self.quote_identifier(part))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Positional placeholder for the 1-based parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::MySql | Dialect::Sqlite => "?".to_string(),
            Dialect::Postgres => format!("${}", index),
        }
    }

    /// Append a LIMIT/OFFSET page to `base`.
    pub fn paginate(&self, base: &str, limit: u64, offset: u64) -> String {
        format!("{} LIMIT {} OFFSET {}", base, limit, offset)
    }

    /// Insert that overwrites every non-key column on a key collision.
    ///
    /// MySQL resolves against any primary/unique key and ignores `keys`;
    /// PostgreSQL and SQLite need the conflict target spelled out.
    pub fn upsert_sql(&self, table: &str, columns: &[&str], keys: &[&str]) -> String {
        let quoted: Vec<String> = columns.iter().map(|c| self.quote_identifier(c)).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| self.placeholder(i)).collect();
        let insert = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quote_qualified(table),
            quoted.join(", "),
            placeholders.join(", ")
        );

        match self {
            Dialect::MySql => {
                let updates: Vec<String> = quoted
                    .iter()
                    .map(|c| format!("{} = VALUES({})", c, c))
                    .collect();
                format!("{} ON DUPLICATE KEY UPDATE {}", insert, updates.join(", "))
            }
            Dialect::Postgres | Dialect::Sqlite => {
                let target: Vec<String> = keys.iter().map(|k| self.quote_identifier(k)).collect();
                let updates: Vec<String> = columns
                    .iter()
                    .filter(|c| !keys.contains(c))
                    .map(|c| {
                        let q = self.quote_identifier(c);
                        format!("{} = EXCLUDED.{}", q, q)
                    })
                    .collect();
                if updates.is_empty() {
                    format!("{} ON CONFLICT ({}) DO NOTHING", insert, target.join(", "))
                } else {
                    format!(
                        "{} ON CONFLICT ({}) DO UPDATE SET {}",
                        insert,
                        target.join(", "),
                        updates.join(", ")
                    )
                }
            }
        }
    }

    /// Statement listing the user tables of the current database.
    pub fn list_tables_sql(&self) -> &'static str {
        match self {
            Dialect::MySql => "SHOW TABLES",
            Dialect::Postgres => {
                "SELECT table_name FROM information_schema.tables WHERE table_schema = 'public' ORDER BY table_name"
            }
            Dialect::Sqlite => {
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name"
            }
        }
    }

    /// Statement and parameters describing the columns of `table`.
    pub fn describe_table_sql(&self, table: &str) -> (String, Vec<JsonValue>) {
        match self {
            Dialect::MySql => (
                format!("SHOW COLUMNS FROM {}", self.quote_qualified(table)),
                Vec::new(),
            ),
            Dialect::Postgres => (
                "SELECT column_name, data_type, is_nullable, column_default \
                 FROM information_schema.columns \
                 WHERE table_name = $1 AND table_schema = 'public' \
                 ORDER BY ordinal_position"
                    .to_string(),
                vec![JsonValue::String(table.to_string())],
            ),
            Dialect::Sqlite => (
                "SELECT name, type, \"notnull\", dflt_value FROM pragma_table_info(?) ORDER BY cid"
                    .to_string(),
                vec![JsonValue::String(table.to_string())],
            ),
        }
    }

    /// Extract a table name from one row of [`Dialect::list_tables_sql`].
    pub fn table_name_from_row(&self, row: &JsonValue) -> Option<String> {
        let object = row.as_object()?;
        let value = match self {
            Dialect::MySql => object.values().next(),
            Dialect::Postgres => object.get("table_name"),
            Dialect::Sqlite => object.get("name"),
        }?;
        value.as_str().map(str::to_string)
    }

    /// Extract a column description from one row of [`Dialect::describe_table_sql`].
    pub fn column_from_row(&self, row: &JsonValue) -> Option<ColumnInfo> {
        let object = row.as_object()?;
        let text = |key: &str| object.get(key).and_then(|v| v.as_str()).map(str::to_string);
        let default = |key: &str| object.get(key).cloned().filter(|v| !v.is_null());

        match self {
            Dialect::MySql => Some(ColumnInfo {
                name: text("Field")?,
                data_type: text("Type")?,
                nullable: text("Null").as_deref() == Some("YES"),
                default: default("Default"),
            }),
            Dialect::Postgres => Some(ColumnInfo {
                name: text("column_name")?,
                data_type: text("data_type")?,
                nullable: text("is_nullable").as_deref() == Some("YES"),
                default: default("column_default"),
            }),
            Dialect::Sqlite => Some(ColumnInfo {
                name: text("name")?,
                data_type: text("type").unwrap_or_default(),
                nullable: object
                    .get("notnull")
                    .and_then(|v| v.as_i64())
                    .is_none_or(|flag| flag == 0),
                default: default("dflt_value"),
            }),
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
