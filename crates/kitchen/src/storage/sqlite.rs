//! SQLite-based local store

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use log::warn;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use rusqlite_migration::{M, Migrations};

use super::{LocalStore, LocalStoreFactory};
use crate::models::{AssetReference, EntityKind, Entree, Ingredient, Recipe, Record, RecordId, TenantId};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            CREATE TABLE ingredients (
                id TEXT PRIMARY KEY,
                location_id TEXT NOT NULL,
                name TEXT NOT NULL,
                unit TEXT NOT NULL DEFAULT '',
                unit_cost REAL NOT NULL DEFAULT 0,
                supplier TEXT,
                modified_at INTEGER NOT NULL  -- microseconds since epoch, UTC
            );

            CREATE TABLE recipes (
                id TEXT PRIMARY KEY,
                location_id TEXT NOT NULL,
                name TEXT NOT NULL,
                lines TEXT NOT NULL DEFAULT '[]',  -- JSON array of recipe lines
                portions INTEGER NOT NULL DEFAULT 1,
                instructions TEXT NOT NULL DEFAULT '',
                photo TEXT,
                modified_at INTEGER NOT NULL
            );

            CREATE TABLE entrees (
                id TEXT PRIMARY KEY,
                location_id TEXT NOT NULL,
                name TEXT NOT NULL,
                recipe_ids TEXT NOT NULL DEFAULT '[]',  -- JSON array of recipe ids
                menu_price REAL NOT NULL DEFAULT 0,
                photo TEXT,
                modified_at INTEGER NOT NULL
            );
            "#,
        ),
        // Migration 2: Delta selection indexes
        M::up(
            r#"
            CREATE INDEX idx_ingredients_delta ON ingredients(location_id, modified_at);
            CREATE INDEX idx_recipes_delta ON recipes(location_id, modified_at);
            CREATE INDEX idx_entrees_delta ON entrees(location_id, modified_at);
            "#,
        ),
    ])
}

const INGREDIENT_COLUMNS: &str = "id, location_id, name, unit, unit_cost, supplier, modified_at";
const RECIPE_COLUMNS: &str =
    "id, location_id, name, lines, portions, instructions, photo, modified_at";
const ENTREE_COLUMNS: &str = "id, location_id, name, recipe_ids, menu_price, photo, modified_at";

fn columns(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Ingredient => INGREDIENT_COLUMNS,
        EntityKind::Recipe => RECIPE_COLUMNS,
        EntityKind::Entree => ENTREE_COLUMNS,
    }
}

/// SQLite-based implementation of [`LocalStore`]
pub struct SqliteLocalStore {
    conn: Mutex<Connection>,
}

impl SqliteLocalStore {
    /// Open (or create) the database at `db_path` and bring its schema up
    /// to date
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        // WAL lets the CRUD layer keep reading while a sync round writes.
        // foreign_keys stays at the SQLite default: cross-kind references are
        // resolved by the pull order, not by constraints.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// A factory that opens a new connection to `db_path` for every round
    pub fn factory(db_path: impl Into<PathBuf>) -> impl LocalStoreFactory + 'static {
        let db_path = db_path.into();
        move || -> Result<Box<dyn LocalStore>> {
            Ok(Box::new(SqliteLocalStore::open(&db_path)?) as Box<dyn LocalStore>)
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("SQLite connection lock poisoned"))
    }

    /// Run a select for `kind` and decode the rows, skipping rows that fail
    /// to decode
    fn query_records(
        &self,
        kind: EntityKind,
        where_clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Record>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY modified_at ASC, id ASC",
            columns(kind),
            kind.table(),
            where_clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params, |row| record_from_row(kind, row))?;

        let mut records = Vec::new();
        for row in rows {
            match row {
                Ok(record) => records.push(record),
                Err(e @ rusqlite::Error::FromSqlConversionFailure(..))
                | Err(e @ rusqlite::Error::InvalidColumnType(..)) => {
                    warn!("Skipping malformed {} row: {}", kind, e);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(records)
    }
}

fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn conversion_error(
    idx: usize,
    ty: Type,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, err.into())
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let micros: i64 = row.get(idx)?;
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| conversion_error(idx, Type::Integer, "timestamp out of range"))
}

fn json_at<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, Type::Text, e))
}

fn record_from_row(kind: EntityKind, row: &Row<'_>) -> rusqlite::Result<Record> {
    let id = RecordId::new(row.get::<_, String>(0)?);
    let location_id = TenantId::new(row.get::<_, String>(1)?);
    let name: String = row.get(2)?;

    Ok(match kind {
        EntityKind::Ingredient => Record::Ingredient(Ingredient {
            id,
            location_id,
            name,
            unit: row.get(3)?,
            unit_cost: row.get(4)?,
            supplier: row.get(5)?,
            modified_at: timestamp_at(row, 6)?,
        }),
        EntityKind::Recipe => Record::Recipe(Recipe {
            id,
            location_id,
            name,
            lines: json_at(row, 3)?,
            portions: row.get(4)?,
            instructions: row.get(5)?,
            photo: AssetReference::from(row.get::<_, Option<String>>(6)?),
            modified_at: timestamp_at(row, 7)?,
        }),
        EntityKind::Entree => Record::Entree(Entree {
            id,
            location_id,
            name,
            recipe_ids: json_at(row, 3)?,
            menu_price: row.get(4)?,
            photo: AssetReference::from(row.get::<_, Option<String>>(5)?),
            modified_at: timestamp_at(row, 6)?,
        }),
    })
}

impl LocalStore for SqliteLocalStore {
    fn get(&self, kind: EntityKind, id: &RecordId) -> Result<Option<Record>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ?",
            columns(kind),
            kind.table()
        );
        let record = conn
            .query_row(&sql, [id.as_str()], |row| record_from_row(kind, row))
            .optional()
            .with_context(|| format!("Failed to load {} {}", kind.as_str(), id))?;
        Ok(record)
    }

    fn upsert(&self, record: Record) -> Result<()> {
        let conn = self.conn()?;

        // ON CONFLICT DO UPDATE keeps the row in place instead of deleting
        // and re-inserting it like INSERT OR REPLACE would
        match &record {
            Record::Ingredient(r) => {
                conn.execute(
                    "INSERT INTO ingredients
                     (id, location_id, name, unit, unit_cost, supplier, modified_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT(id) DO UPDATE SET
                        location_id = excluded.location_id,
                        name = excluded.name,
                        unit = excluded.unit,
                        unit_cost = excluded.unit_cost,
                        supplier = excluded.supplier,
                        modified_at = excluded.modified_at",
                    params![
                        r.id.as_str(),
                        r.location_id.as_str(),
                        r.name,
                        r.unit,
                        r.unit_cost,
                        r.supplier,
                        to_micros(r.modified_at),
                    ],
                )?;
            }
            Record::Recipe(r) => {
                let lines = serde_json::to_string(&r.lines).context("Failed to encode recipe lines")?;
                conn.execute(
                    "INSERT INTO recipes
                     (id, location_id, name, lines, portions, instructions, photo, modified_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT(id) DO UPDATE SET
                        location_id = excluded.location_id,
                        name = excluded.name,
                        lines = excluded.lines,
                        portions = excluded.portions,
                        instructions = excluded.instructions,
                        photo = excluded.photo,
                        modified_at = excluded.modified_at",
                    params![
                        r.id.as_str(),
                        r.location_id.as_str(),
                        r.name,
                        lines,
                        r.portions,
                        r.instructions,
                        r.photo.to_value(),
                        to_micros(r.modified_at),
                    ],
                )?;
            }
            Record::Entree(r) => {
                let recipe_ids =
                    serde_json::to_string(&r.recipe_ids).context("Failed to encode recipe ids")?;
                conn.execute(
                    "INSERT INTO entrees
                     (id, location_id, name, recipe_ids, menu_price, photo, modified_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT(id) DO UPDATE SET
                        location_id = excluded.location_id,
                        name = excluded.name,
                        recipe_ids = excluded.recipe_ids,
                        menu_price = excluded.menu_price,
                        photo = excluded.photo,
                        modified_at = excluded.modified_at",
                    params![
                        r.id.as_str(),
                        r.location_id.as_str(),
                        r.name,
                        recipe_ids,
                        r.menu_price,
                        r.photo.to_value(),
                        to_micros(r.modified_at),
                    ],
                )?;
            }
        }

        Ok(())
    }

    fn list_modified_since(
        &self,
        kind: EntityKind,
        tenant: &TenantId,
        after: DateTime<Utc>,
    ) -> Result<Vec<Record>> {
        self.query_records(
            kind,
            "location_id = ? AND modified_at > ?",
            params![tenant.as_str(), to_micros(after)],
        )
    }

    fn list_all(&self, kind: EntityKind, tenant: &TenantId) -> Result<Vec<Record>> {
        self.query_records(kind, "location_id = ?", params![tenant.as_str()])
    }

    fn count_for_tenant(&self, tenant: &TenantId) -> Result<usize> {
        let conn = self.conn()?;
        let mut total = 0usize;
        for kind in EntityKind::ALL {
            let sql = format!("SELECT COUNT(*) FROM {} WHERE location_id = ?", kind.table());
            let count: i64 = conn.query_row(&sql, [tenant.as_str()], |row| row.get(0))?;
            total += count as usize;
        }
        Ok(total)
    }
}
