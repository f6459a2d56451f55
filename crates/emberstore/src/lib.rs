//! `emberstore`: the row store behind the game server.
//!
//! Everything with a persistent identity saves through one narrow contract:
//! insert/update/select/delete over string-keyed rows. Models load by their
//! identity tuple (e.g. `area` + `id` fields) and save by the opaque storage
//! id the store hands out; storage ids never leak into gameplay.
//!
//! Two implementations: `JsonStore` keeps one pretty-printed JSON file per
//! table under a data directory (written tmp-then-rename so a crash never
//! leaves a half file), and `MemStore` backs unit tests.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type RowId = u64;
pub type Row = BTreeMap<String, Value>;

/// Field-equality criteria; an empty list matches every row.
pub type Criteria<'a> = &'a [(&'a str, Value)];

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Corrupt { table: String, detail: String },
    NoSuchRow { table: String, id: RowId },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "store io: {e}"),
            StoreError::Corrupt { table, detail } => {
                write!(f, "table {table} is corrupt: {detail}")
            }
            StoreError::NoSuchRow { table, id } => {
                write!(f, "no row {id} in table {table}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

pub trait Store: Send {
    fn insert(&self, table: &str, row: Row) -> Result<RowId, StoreError>;
    fn update(&self, table: &str, id: RowId, row: Row) -> Result<usize, StoreError>;
    fn select(&self, table: &str, criteria: Criteria) -> Result<Vec<(RowId, Row)>, StoreError>;
    fn delete(&self, table: &str, criteria: Criteria) -> Result<usize, StoreError>;
}

fn row_matches(row: &Row, criteria: Criteria) -> bool {
    criteria
        .iter()
        .all(|(k, v)| row.get(*k).map(|have| have == v).unwrap_or(false))
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Table {
    next_id: RowId,
    rows: BTreeMap<RowId, Row>,
}

impl Table {
    fn alloc(&mut self) -> RowId {
        self.next_id += 1;
        self.next_id
    }
}

/// One JSON file per table under `dir`, loaded lazily and rewritten whole on
/// every mutation. Fine for the row counts a single world carries.
pub struct JsonStore {
    dir: PathBuf,
    tables: Mutex<HashMap<String, Table>>,
}

impl JsonStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            tables: Mutex::new(HashMap::new()),
        })
    }

    fn table_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.json"))
    }

    fn load_table(&self, table: &str) -> Result<Table, StoreError> {
        let path = self.table_path(table);
        let s = match std::fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Table::default());
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str::<Table>(&s).map_err(|e| StoreError::Corrupt {
            table: table.to_string(),
            detail: e.to_string(),
        })
    }

    fn save_table(&self, table: &str, t: &Table) -> Result<(), StoreError> {
        let s = serde_json::to_string_pretty(t).map_err(|e| StoreError::Corrupt {
            table: table.to_string(),
            detail: e.to_string(),
        })?;
        let path = self.table_path(table);
        let tmp = self.dir.join(format!("{table}.json.tmp"));
        std::fs::write(&tmp, s)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn with_table<T>(
        &self,
        table: &str,
        mutate: bool,
        f: impl FnOnce(&mut Table) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        if !tables.contains_key(table) {
            let t = self.load_table(table)?;
            tables.insert(table.to_string(), t);
        }
        let t = tables.get_mut(table).unwrap();
        let out = f(t)?;
        if mutate {
            self.save_table(table, t)?;
        }
        Ok(out)
    }
}

impl Store for JsonStore {
    fn insert(&self, table: &str, row: Row) -> Result<RowId, StoreError> {
        self.with_table(table, true, |t| {
            let id = t.alloc();
            t.rows.insert(id, row);
            Ok(id)
        })
    }

    fn update(&self, table: &str, id: RowId, row: Row) -> Result<usize, StoreError> {
        let table_name = table.to_string();
        self.with_table(table, true, |t| match t.rows.get_mut(&id) {
            Some(slot) => {
                *slot = row;
                Ok(1)
            }
            None => Err(StoreError::NoSuchRow {
                table: table_name,
                id,
            }),
        })
    }

    fn select(&self, table: &str, criteria: Criteria) -> Result<Vec<(RowId, Row)>, StoreError> {
        self.with_table(table, false, |t| {
            Ok(t.rows
                .iter()
                .filter(|(_, row)| row_matches(row, criteria))
                .map(|(id, row)| (*id, row.clone()))
                .collect())
        })
    }

    fn delete(&self, table: &str, criteria: Criteria) -> Result<usize, StoreError> {
        self.with_table(table, true, |t| {
            let doomed = t
                .rows
                .iter()
                .filter(|(_, row)| row_matches(row, criteria))
                .map(|(id, _)| *id)
                .collect::<Vec<_>>();
            for id in &doomed {
                t.rows.remove(id);
            }
            Ok(doomed.len())
        })
    }
}

/// In-memory store for tests. Same semantics, no disk.
#[derive(Default)]
pub struct MemStore {
    tables: Mutex<HashMap<String, Table>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_table<T>(
        &self,
        table: &str,
        f: impl FnOnce(&mut Table) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let t = tables.entry(table.to_string()).or_default();
        f(t)
    }
}

impl Store for MemStore {
    fn insert(&self, table: &str, row: Row) -> Result<RowId, StoreError> {
        self.with_table(table, |t| {
            let id = t.alloc();
            t.rows.insert(id, row);
            Ok(id)
        })
    }

    fn update(&self, table: &str, id: RowId, row: Row) -> Result<usize, StoreError> {
        let table_name = table.to_string();
        self.with_table(table, |t| match t.rows.get_mut(&id) {
            Some(slot) => {
                *slot = row;
                Ok(1)
            }
            None => Err(StoreError::NoSuchRow {
                table: table_name,
                id,
            }),
        })
    }

    fn select(&self, table: &str, criteria: Criteria) -> Result<Vec<(RowId, Row)>, StoreError> {
        self.with_table(table, |t| {
            Ok(t.rows
                .iter()
                .filter(|(_, row)| row_matches(row, criteria))
                .map(|(id, row)| (*id, row.clone()))
                .collect())
        })
    }

    fn delete(&self, table: &str, criteria: Criteria) -> Result<usize, StoreError> {
        self.with_table(table, |t| {
            let doomed = t
                .rows
                .iter()
                .filter(|(_, row)| row_matches(row, criteria))
                .map(|(id, _)| *id)
                .collect::<Vec<_>>();
            for id in &doomed {
                t.rows.remove(id);
            }
            Ok(doomed.len())
        })
    }
}

/// Build a row from literal pairs without spelling out the map.
#[macro_export]
macro_rules! row {
    ($($k:expr => $v:expr),* $(,)?) => {{
        let mut r = $crate::Row::new();
        $( r.insert($k.to_string(), ::serde_json::json!($v)); )*
        r
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exercise(store: &dyn Store) {
        let id = store
            .insert("players", row! { "name" => "bob", "hp" => 20 })
            .unwrap();
        let id2 = store
            .insert("players", row! { "name" => "alice", "hp" => 25 })
            .unwrap();
        assert_ne!(id, id2);

        let hits = store.select("players", &[("name", json!("bob"))]).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, id);
        assert_eq!(hits[0].1.get("hp"), Some(&json!(20)));

        let n = store
            .update("players", id, row! { "name" => "bob", "hp" => 15 })
            .unwrap();
        assert_eq!(n, 1);
        let hits = store.select("players", &[("name", json!("bob"))]).unwrap();
        assert_eq!(hits[0].1.get("hp"), Some(&json!(15)));

        // Unknown row id is a hard error, not a silent zero.
        assert!(store.update("players", 9999, Row::new()).is_err());

        let n = store.delete("players", &[("name", json!("bob"))]).unwrap();
        assert_eq!(n, 1);
        assert!(store
            .select("players", &[("name", json!("bob"))])
            .unwrap()
            .is_empty());

        // Empty criteria match everything.
        assert_eq!(store.select("players", &[]).unwrap().len(), 1);
    }

    #[test]
    fn mem_store_contract() {
        exercise(&MemStore::new());
    }

    #[test]
    fn json_store_contract_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&JsonStore::open(dir.path()).unwrap());

        // A fresh handle sees what the old one wrote.
        let store = JsonStore::open(dir.path()).unwrap();
        let rows = store.select("players", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1.get("name"), Some(&json!("alice")));

        // Ids keep growing after reload instead of colliding.
        let id = store.insert("players", row! { "name" => "carol" }).unwrap();
        assert!(id > rows[0].0);
    }

    #[test]
    fn missing_table_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path()).unwrap();
        assert!(store.select("nothing", &[]).unwrap().is_empty());
    }
}
