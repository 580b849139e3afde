//! Multi-row upserts and key lookups

use rusqlite::types::{FromSql, ToSql, Value as SqlValue};
use rusqlite::{Transaction, params_from_iter};
use std::collections::BTreeSet;

/// Host parameter limit of older SQLite builds; statements stay below it.
const MAX_PARAMS: usize = 999;

/// What to do when an inserted row collides with an existing key.
#[derive(Debug, Clone, Copy)]
pub(crate) enum OnConflict {
    /// Leave the existing row untouched.
    Ignore,
    /// Overwrite every non-key column. Columns listed in `keep_when_null`
    /// keep their stored value when the new one is NULL.
    Update {
        keep_when_null: &'static [&'static str],
    },
}

/// A bulk `INSERT ... ON CONFLICT` into one table.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Upsert {
    pub table: &'static str,
    pub columns: &'static [&'static str],
    pub key: &'static [&'static str],
    pub on_conflict: OnConflict,
}

impl Upsert {
    /// SQL for a statement inserting `rows` rows.
    pub fn sql(&self, rows: usize) -> String {
        let row = format!("({})", placeholders(self.columns.len()));
        let values = vec![row.as_str(); rows].join(", ");

        let action = match self.on_conflict {
            OnConflict::Ignore => "DO NOTHING".to_string(),
            OnConflict::Update { keep_when_null } => {
                let assignments: Vec<String> = self
                    .columns
                    .iter()
                    .filter(|column| !self.key.contains(*column))
                    .map(|column| {
                        if keep_when_null.contains(column) {
                            format!(
                                "{column} = COALESCE(excluded.{column}, {table}.{column})",
                                table = self.table
                            )
                        } else {
                            format!("{column} = excluded.{column}")
                        }
                    })
                    .collect();
                if assignments.is_empty() {
                    "DO NOTHING".to_string()
                } else {
                    format!("DO UPDATE SET {}", assignments.join(", "))
                }
            }
        };

        format!(
            "INSERT INTO {} ({}) VALUES {} ON CONFLICT ({}) {}",
            self.table,
            self.columns.join(", "),
            values,
            self.key.join(", "),
            action
        )
    }

    /// Insert `rows`, each holding one value per column, in as few
    /// statements as the parameter limit allows. Returns the number of rows
    /// inserted or updated.
    pub fn execute(&self, transaction: &Transaction<'_>, rows: &[Vec<SqlValue>]) -> rusqlite::Result<usize> {
        let per_statement = (MAX_PARAMS / self.columns.len()).max(1);
        let mut changed = 0;
        for chunk in rows.chunks(per_statement) {
            let mut statement = transaction.prepare_cached(&self.sql(chunk.len()))?;
            changed += statement.execute(params_from_iter(chunk.iter().flatten()))?;
        }
        Ok(changed)
    }
}

/// The subset of `candidates` present in `table.column`.
pub(crate) fn existing_keys<K>(
    transaction: &Transaction<'_>,
    table: &str,
    column: &str,
    candidates: &BTreeSet<K>,
) -> rusqlite::Result<BTreeSet<K>>
where
    K: ToSql + FromSql + Ord,
{
    let candidates: Vec<&K> = candidates.iter().collect();
    let mut found = BTreeSet::new();
    for chunk in candidates.chunks(MAX_PARAMS) {
        let sql = format!(
            "SELECT {column} FROM {table} WHERE {column} IN ({})",
            placeholders(chunk.len())
        );
        let mut statement = transaction.prepare(&sql)?;
        let rows = statement.query_map(params_from_iter(chunk.iter()), |row| row.get::<_, K>(0))?;
        for row in rows {
            found.insert(row?);
        }
    }
    Ok(found)
}

/// Delete every row of `table` whose `column` is one of `keys`.
pub(crate) fn delete_where_in<K: ToSql>(
    transaction: &Transaction<'_>,
    table: &str,
    column: &str,
    keys: &[K],
) -> rusqlite::Result<usize> {
    let mut deleted = 0;
    for chunk in keys.chunks(MAX_PARAMS) {
        let sql = format!(
            "DELETE FROM {table} WHERE {column} IN ({})",
            placeholders(chunk.len())
        );
        deleted += transaction.execute(&sql, params_from_iter(chunk.iter()))?;
    }
    Ok(deleted)
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

pub(crate) fn text(value: &str) -> SqlValue {
    SqlValue::Text(value.to_string())
}

pub(crate) fn opt_text(value: Option<&str>) -> SqlValue {
    value.map_or(SqlValue::Null, text)
}

pub(crate) fn int(value: impl Into<i64>) -> SqlValue {
    SqlValue::Integer(value.into())
}

pub(crate) fn opt_int<T: Into<i64>>(value: Option<T>) -> SqlValue {
    value.map_or(SqlValue::Null, int)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    const WIDGETS: Upsert = Upsert {
        table: "widgets",
        columns: &["name", "size", "colour"],
        key: &["name"],
        on_conflict: OnConflict::Update {
            keep_when_null: &["colour"],
        },
    };

    fn connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE widgets (name TEXT PRIMARY KEY, size INTEGER, colour TEXT)",
            [],
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_upsert_sql() {
        assert_eq!(
            WIDGETS.sql(2),
            "INSERT INTO widgets (name, size, colour) VALUES (?, ?, ?), (?, ?, ?) \
             ON CONFLICT (name) DO UPDATE SET size = excluded.size, \
             colour = COALESCE(excluded.colour, widgets.colour)"
        );

        let ignore = Upsert {
            on_conflict: OnConflict::Ignore,
            ..WIDGETS
        };
        assert!(ignore.sql(1).ends_with("ON CONFLICT (name) DO NOTHING"));
    }

    #[test]
    fn test_upsert_keeps_value_when_null() {
        let mut conn = connection();
        let tx = conn.transaction().unwrap();
        WIDGETS
            .execute(&tx, &[vec![text("a"), int(1), text("red")]])
            .unwrap();
        WIDGETS
            .execute(&tx, &[vec![text("a"), int(2), SqlValue::Null]])
            .unwrap();
        let (size, colour): (i64, String) = tx
            .query_row("SELECT size, colour FROM widgets WHERE name = 'a'", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!((size, colour.as_str()), (2, "red"));
    }

    #[test]
    fn test_chunking_past_parameter_limit() {
        let mut conn = connection();
        let tx = conn.transaction().unwrap();
        let rows: Vec<Vec<SqlValue>> = (0..1000)
            .map(|i| vec![text(&format!("w{}", i)), int(i), SqlValue::Null])
            .collect();
        assert_eq!(WIDGETS.execute(&tx, &rows).unwrap(), 1000);

        let wanted: BTreeSet<String> = ["w1", "w999", "missing"].iter().map(|s| s.to_string()).collect();
        let found = existing_keys(&tx, "widgets", "name", &wanted).unwrap();
        assert_eq!(found.len(), 2);
        assert!(!found.contains("missing"));

        let keys: Vec<String> = (0..1000).map(|i| format!("w{}", i)).collect();
        assert_eq!(delete_where_in(&tx, "widgets", "name", &keys).unwrap(), 1000);
    }
}
