//! Directory-of-CSV persistent store
//!
//! A database is a directory holding one CSV file per table.  Input tables
//! are read once at command start; derived tables are rewritten whole at
//! command end.  The log table is append-only.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::types::LogRow;
use crate::error::{Error, Result};

/// Handle on a database directory.
#[derive(Debug, Clone)]
pub struct Database {
    dir: PathBuf,
}

impl Database {
    /// Open an existing database directory.
    pub fn open(dir: &Path) -> Result<Database> {
        if !dir.is_dir() {
            return Err(Error::Usage(format!(
                "database directory {} does not exist",
                dir.display()
            )));
        }
        Ok(Database {
            dir: dir.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn table_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.csv"))
    }

    pub fn table_exists(&self, table: &str) -> bool {
        self.table_path(table).is_file()
    }

    /// Read a whole table.  A missing file is an empty table only when
    /// `required` is false.
    pub fn read_table<T: DeserializeOwned>(&self, table: &str, required: bool) -> Result<Vec<T>> {
        let path = self.table_path(table);
        if !path.is_file() {
            if required {
                return Err(Error::table(table, None, "table file is missing"));
            }
            return Ok(Vec::new());
        }
        let file = File::open(&path)?;
        let mut reader = csv::Reader::from_reader(file);
        let mut rows = Vec::new();
        for (index, record) in reader.deserialize::<T>().enumerate() {
            let row = record.map_err(|e| Error::table(table, index, e.to_string()))?;
            rows.push(row);
        }
        Ok(rows)
    }

    /// Rewrite a whole derived table.
    pub fn write_table<T: Serialize>(&self, table: &str, rows: &[T]) -> Result<()> {
        let path = self.table_path(table);
        let file = File::create(&path)?;
        let mut writer = csv::Writer::from_writer(file);
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Write a JSON document (used for the warm-start blob).
    pub fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.dir.join(format!("{name}.json"));
        let file = File::create(&path)?;
        serde_json::to_writer_pretty(file, value)?;
        Ok(())
    }

    /// Read a JSON document if present.
    pub fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.dir.join(format!("{name}.json"));
        if !path.is_file() {
            return Ok(None);
        }
        let file = File::open(&path)?;
        Ok(Some(serde_json::from_reader(file)?))
    }

    /// Remove a derived table if it exists (used by `init` to clear stale
    /// outputs).
    pub fn remove_table(&self, table: &str) -> Result<()> {
        let path = self.table_path(table);
        if path.is_file() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Append one message to the log table, creating it on first use.
    pub fn log_message(
        &self,
        message_type: &str,
        table_name: Option<&str>,
        row_id: Option<usize>,
        message: &str,
    ) -> Result<()> {
        let path = self.table_path("log");
        let new_file = !path.is_file();
        let log_id = if new_file {
            0
        } else {
            // count existing rows for the next id
            let file = File::open(&path)?;
            csv::Reader::from_reader(file).into_records().count()
        };
        let row = LogRow {
            log_id,
            message_type: message_type.to_string(),
            table_name: table_name.map(str::to_string),
            row_id,
            unix_time: chrono::Utc::now().timestamp(),
            message: message.to_string(),
        };
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(new_file)
            .from_writer(file);
        writer.serialize(&row)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::types::AgeRow;

    fn temp_db() -> Database {
        let dir = std::env::temp_dir().join(format!("epimod_store_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        Database::open(&dir).unwrap()
    }

    #[test]
    fn test_write_read_round_trip() {
        let db = temp_db();
        let rows = vec![
            AgeRow { age_id: 0, age: 0.0 },
            AgeRow {
                age_id: 1,
                age: 100.0,
            },
        ];
        db.write_table("age", &rows).unwrap();
        let back: Vec<AgeRow> = db.read_table("age", true).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[1].age, 100.0);
    }

    #[test]
    fn test_missing_optional_table() {
        let db = temp_db();
        let rows: Vec<AgeRow> = db.read_table("no_such_table", false).unwrap();
        assert!(rows.is_empty());
        assert!(db.read_table::<AgeRow>("no_such_table", true).is_err());
    }

    #[test]
    fn test_log_append() {
        let db = temp_db();
        let _ = db.remove_table("log");
        db.log_message("command", None, None, "begin fit").unwrap();
        db.log_message("error", Some("data"), Some(3), "bad row").unwrap();
        let rows: Vec<LogRow> = db.read_table("log", true).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].log_id, 1);
        assert_eq!(rows[1].table_name.as_deref(), Some("data"));
    }
}
