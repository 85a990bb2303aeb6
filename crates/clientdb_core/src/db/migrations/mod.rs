//! SQLite migration registry and executor.
//!
//! # Responsibility
//! - Resolve schema migrations from the embedded bundle or a script directory.
//! - Apply pending migrations in ascending version order, one transaction each.
//! - Offer an opt-in destructive clean that wipes every table before re-applying.
//!
//! # Invariants
//! - `version` values are unique, non-zero and strictly increasing.
//! - A version recorded in `schema_history` is never applied again unless a
//!   clean wiped the history first.
//! - The history row and `PRAGMA user_version` are written in the same
//!   transaction as the script itself.
//! - Script files are named `NNNN_description.sql`.

use crate::config::MigrationConfig;
use crate::db::{Database, DbError, DbResult};
use log::{error, info, warn};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

const HISTORY_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS schema_history (
    version INTEGER PRIMARY KEY,
    description TEXT NOT NULL,
    script TEXT NOT NULL,
    checksum TEXT NOT NULL,
    installed_on INTEGER NOT NULL DEFAULT (strftime('%s', 'now') * 1000),
    execution_ms INTEGER NOT NULL
);";

#[derive(Debug, Clone, Copy)]
struct EmbeddedMigration {
    version: u32,
    description: &'static str,
    script: &'static str,
    sql: &'static str,
}

const EMBEDDED_MIGRATIONS: &[EmbeddedMigration] = &[EmbeddedMigration {
    version: 1,
    description: "create client",
    script: "0001_create_client.sql",
    sql: include_str!("0001_create_client.sql"),
}];

/// Returns the latest migration version bundled with this binary.
pub fn latest_version() -> u32 {
    EMBEDDED_MIGRATIONS
        .last()
        .map_or(0, |migration| migration.version)
}

/// One versioned schema change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: u32,
    pub description: String,
    /// Script file name, kept in history for diagnostics.
    pub script: String,
    pub sql: String,
}

impl Migration {
    pub fn new(version: u32, description: impl Into<String>, sql: impl Into<String>) -> Self {
        let description = description.into();
        let script = format!("{version:04}_{}.sql", description.replace(' ', "_"));
        Self {
            version,
            description,
            script,
            sql: sql.into(),
        }
    }

    /// Builds a migration from a `NNNN_description.sql` file name and body.
    pub fn from_script(script: &str, sql: impl Into<String>) -> DbResult<Self> {
        match parse_script_name(script) {
            Some(Ok((version, description))) => Ok(Self {
                version,
                description,
                script: script.to_string(),
                sql: sql.into(),
            }),
            Some(Err(err)) => Err(err),
            None => Err(DbError::InvalidMigrationSet(format!(
                "`{script}` is not a migration script name"
            ))),
        }
    }

    /// SHA-256 of the script body as lowercase hex.
    pub fn checksum(&self) -> String {
        format!("{:x}", Sha256::digest(self.sql.as_bytes()))
    }
}

/// Ordered, validated collection of migrations.
#[derive(Debug, Clone)]
pub struct MigrationSet {
    migrations: Vec<Migration>,
}

impl MigrationSet {
    /// Sorts `migrations` by version and rejects zero or duplicate versions.
    pub fn new(mut migrations: Vec<Migration>) -> DbResult<Self> {
        migrations.sort_by_key(|migration| migration.version);

        if let Some(first) = migrations.first() {
            if first.version == 0 {
                return Err(DbError::InvalidMigrationSet(format!(
                    "`{}` uses reserved version 0",
                    first.script
                )));
            }
        }
        for pair in migrations.windows(2) {
            if pair[0].version == pair[1].version {
                return Err(DbError::InvalidMigrationSet(format!(
                    "`{}` and `{}` share version {}",
                    pair[0].script, pair[1].script, pair[0].version
                )));
            }
        }

        Ok(Self { migrations })
    }

    /// Scripts compiled into this binary.
    pub fn embedded() -> Self {
        Self {
            migrations: EMBEDDED_MIGRATIONS
                .iter()
                .map(|migration| Migration {
                    version: migration.version,
                    description: migration.description.to_string(),
                    script: migration.script.to_string(),
                    sql: migration.sql.to_string(),
                })
                .collect(),
        }
    }

    /// Loads every `NNNN_description.sql` file in `dir`.
    ///
    /// Files whose names do not start with a digit or do not end in `.sql`
    /// are ignored.
    pub fn from_dir(dir: impl AsRef<Path>) -> DbResult<Self> {
        let dir = dir.as_ref();
        let mut migrations = Vec::new();

        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let (version, description) = match parse_script_name(name) {
                Some(parsed) => parsed?,
                None => continue,
            };
            let sql = std::fs::read_to_string(entry.path())?;
            migrations.push(Migration {
                version,
                description,
                script: name.to_string(),
                sql,
            });
        }

        info!(
            "event=migrations_load module=migrations status=ok source=dir count={} dir={}",
            migrations.len(),
            dir.display()
        );
        Self::new(migrations)
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    pub fn get(&self, version: u32) -> Option<&Migration> {
        self.migrations
            .binary_search_by_key(&version, |migration| migration.version)
            .ok()
            .map(|index| &self.migrations[index])
    }

    pub fn latest_version(&self) -> u32 {
        self.migrations.last().map_or(0, |migration| migration.version)
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

/// Outcome of one `migrate` run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Versions applied by this run, ascending.
    pub applied: Vec<u32>,
    /// Highest applied version after the run.
    pub schema_version: u32,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Application state of one migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    Pending,
    Applied,
    /// Applied, but the resolved script no longer matches the recorded checksum.
    ChecksumMismatch,
    /// Recorded in history with a version newer than any resolved script.
    Future,
    /// Recorded in history but absent from the resolved set.
    Missing,
}

impl MigrationState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Applied => "applied",
            Self::ChecksumMismatch => "checksum_mismatch",
            Self::Future => "future",
            Self::Missing => "missing",
        }
    }
}

/// Status row returned by [`Migrator::info`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationInfo {
    pub version: u32,
    pub description: String,
    pub script: String,
    pub state: MigrationState,
    /// Epoch ms when the migration was recorded, if applied.
    pub installed_on: Option<i64>,
}

#[derive(Debug, Clone)]
struct AppliedMigration {
    description: String,
    script: String,
    checksum: String,
    installed_on: i64,
}

/// Applies a [`MigrationSet`] to a [`Database`].
pub struct Migrator {
    set: MigrationSet,
    config: MigrationConfig,
}

impl Migrator {
    pub fn new(set: MigrationSet, config: MigrationConfig) -> Self {
        Self { set, config }
    }

    /// Embedded scripts with clean disabled.
    pub fn embedded() -> Self {
        Self::new(MigrationSet::embedded(), MigrationConfig::default())
    }

    /// Resolves scripts from `config.scripts_dir`, or the embedded bundle.
    pub fn from_config(config: MigrationConfig) -> DbResult<Self> {
        let set = match &config.scripts_dir {
            Some(dir) => MigrationSet::from_dir(dir)?,
            None => MigrationSet::embedded(),
        };
        Ok(Self::new(set, config))
    }

    pub fn set(&self) -> &MigrationSet {
        &self.set
    }

    /// Applies every pending migration.
    ///
    /// Running it again without new scripts is a no-op.
    ///
    /// # Errors
    /// - [`DbError::ChecksumMismatch`] when an applied script was edited.
    /// - [`DbError::UnsupportedSchemaVersion`] when the database is newer.
    /// - [`DbError::MigrationFailed`] when a script fails; migrations applied
    ///   before it stay applied, the failing one leaves no trace.
    pub fn migrate(&self, db: &Database) -> DbResult<MigrationReport> {
        let started_at = Instant::now();
        info!(
            "event=migrate module=migrations status=start resolved={}",
            self.set.len()
        );

        let result = db.acquire().and_then(|conn| self.migrate_on(&conn));
        match &result {
            Ok(report) => info!(
                "event=migrate module=migrations status=ok applied={} schema_version={} duration_ms={}",
                report.applied.len(),
                report.schema_version,
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=migrate module=migrations status=error duration_ms={} error_code={} error={}",
                started_at.elapsed().as_millis(),
                err.code(),
                err
            ),
        }
        result
    }

    /// Drops every table and view, history included.
    ///
    /// Returns the number of dropped objects.
    ///
    /// # Errors
    /// - [`DbError::CleanDisabled`] unless `clean_enabled` is set.
    pub fn clean(&self, db: &Database) -> DbResult<usize> {
        if !self.config.clean_enabled {
            warn!("event=clean module=migrations status=rejected error_code=clean_disabled");
            return Err(DbError::CleanDisabled);
        }

        let started_at = Instant::now();
        warn!("event=clean module=migrations status=start");
        let result = db.acquire().and_then(|conn| clean_on(&conn));
        match &result {
            Ok(dropped) => warn!(
                "event=clean module=migrations status=ok dropped={} duration_ms={}",
                dropped,
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=clean module=migrations status=error duration_ms={} error_code={} error={}",
                started_at.elapsed().as_millis(),
                err.code(),
                err
            ),
        }
        result
    }

    /// Wipes the database, then applies every migration from scratch.
    pub fn clean_and_migrate(&self, db: &Database) -> DbResult<MigrationReport> {
        self.clean(db)?;
        self.migrate(db)
    }

    /// Reports the state of every resolved and recorded migration.
    pub fn info(&self, db: &Database) -> DbResult<Vec<MigrationInfo>> {
        let result = db.acquire().and_then(|conn| self.info_on(&conn));
        if let Err(err) = &result {
            error!(
                "event=migration_info module=migrations status=error error_code={} error={}",
                err.code(),
                err
            );
        }
        result
    }

    fn info_on(&self, conn: &Connection) -> DbResult<Vec<MigrationInfo>> {
        let applied = if history_table_exists(conn)? {
            load_applied(conn)?
        } else {
            BTreeMap::new()
        };

        let mut infos: Vec<MigrationInfo> = self
            .set
            .migrations()
            .iter()
            .map(|migration| {
                let record = applied.get(&migration.version);
                let state = match record {
                    Some(record) if record.checksum == migration.checksum() => {
                        MigrationState::Applied
                    }
                    Some(_) => MigrationState::ChecksumMismatch,
                    None => MigrationState::Pending,
                };
                MigrationInfo {
                    version: migration.version,
                    description: migration.description.clone(),
                    script: migration.script.clone(),
                    state,
                    installed_on: record.map(|record| record.installed_on),
                }
            })
            .collect();

        let latest = self.set.latest_version();
        for (version, record) in &applied {
            if self.set.get(*version).is_some() {
                continue;
            }
            infos.push(MigrationInfo {
                version: *version,
                description: record.description.clone(),
                script: record.script.clone(),
                state: if *version > latest {
                    MigrationState::Future
                } else {
                    MigrationState::Missing
                },
                installed_on: Some(record.installed_on),
            });
        }

        infos.sort_by_key(|info| info.version);
        Ok(infos)
    }

    fn migrate_on(&self, conn: &Connection) -> DbResult<MigrationReport> {
        conn.execute_batch(HISTORY_TABLE_SQL)?;
        let applied = load_applied(conn)?;
        self.validate_applied(&applied)?;

        let mut report = MigrationReport {
            applied: Vec::new(),
            schema_version: applied.keys().next_back().copied().unwrap_or(0),
        };

        for migration in self.set.migrations() {
            if applied.contains_key(&migration.version) {
                continue;
            }
            if apply_migration(conn, migration)? {
                report.applied.push(migration.version);
            }
            report.schema_version = report.schema_version.max(migration.version);
        }

        Ok(report)
    }

    fn validate_applied(&self, applied: &BTreeMap<u32, AppliedMigration>) -> DbResult<()> {
        let latest_supported = self.set.latest_version();
        let highest_applied = applied.keys().next_back().copied().unwrap_or(0);

        if highest_applied > latest_supported {
            return Err(DbError::UnsupportedSchemaVersion {
                db_version: highest_applied,
                latest_supported,
            });
        }

        for (version, record) in applied {
            let Some(resolved) = self.set.get(*version) else {
                return Err(DbError::InvalidMigrationSet(format!(
                    "applied migration {version} (`{}`) is missing from the resolved set",
                    record.script
                )));
            };
            let checksum = resolved.checksum();
            if checksum != record.checksum {
                return Err(DbError::ChecksumMismatch {
                    version: *version,
                    applied: record.checksum.clone(),
                    resolved: checksum,
                });
            }
        }

        if let Some(stale) = self
            .set
            .migrations()
            .iter()
            .find(|migration| {
                migration.version < highest_applied && !applied.contains_key(&migration.version)
            })
        {
            return Err(DbError::InvalidMigrationSet(format!(
                "pending migration {} (`{}`) is older than applied version {highest_applied}",
                stale.version, stale.script
            )));
        }

        Ok(())
    }
}

/// Applies one migration; returns `false` when a concurrent runner got there first.
fn apply_migration(conn: &Connection, migration: &Migration) -> DbResult<bool> {
    let started_at = Instant::now();
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    let already_applied: i64 = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM schema_history WHERE version = ?1);",
        [migration.version],
        |row| row.get(0),
    )?;
    if already_applied == 1 {
        tx.rollback()?;
        return Ok(false);
    }

    if let Err(source) = tx.execute_batch(&migration.sql) {
        if let Err(rollback_err) = tx.rollback() {
            warn!(
                "event=migration_apply module=migrations status=rollback_failed version={} error={}",
                migration.version, rollback_err
            );
        }
        error!(
            "event=migration_apply module=migrations status=error version={} script={} error_code=script_failed error={}",
            migration.version, migration.script, source
        );
        return Err(DbError::MigrationFailed {
            version: migration.version,
            description: migration.description.clone(),
            source,
        });
    }

    let execution_ms = i64::try_from(started_at.elapsed().as_millis()).unwrap_or(i64::MAX);
    tx.execute(
        "INSERT INTO schema_history (
            version,
            description,
            script,
            checksum,
            execution_ms
        ) VALUES (?1, ?2, ?3, ?4, ?5);",
        params![
            migration.version,
            migration.description.as_str(),
            migration.script.as_str(),
            migration.checksum(),
            execution_ms,
        ],
    )?;
    tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))?;
    tx.commit()?;

    info!(
        "event=migration_apply module=migrations status=ok version={} script={} duration_ms={}",
        migration.version, migration.script, execution_ms
    );
    Ok(true)
}

fn clean_on(conn: &Connection) -> DbResult<usize> {
    let objects = {
        let mut stmt = conn.prepare(
            "SELECT type, name
             FROM sqlite_master
             WHERE type IN ('view', 'table')
               AND substr(name, 1, 7) != 'sqlite_'
             ORDER BY CASE type WHEN 'view' THEN 0 ELSE 1 END, name;",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let objects = rows.collect::<Result<Vec<_>, _>>()?;
        objects
    };

    // Foreign key enforcement cannot be toggled inside a transaction.
    conn.execute_batch("PRAGMA foreign_keys = OFF;")?;
    let result = drop_objects(conn, &objects);
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    result?;

    Ok(objects.len())
}

fn drop_objects(conn: &Connection, objects: &[(String, String)]) -> DbResult<()> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    for (kind, name) in objects {
        let keyword = if kind == "view" { "VIEW" } else { "TABLE" };
        tx.execute_batch(&format!(
            "DROP {keyword} IF EXISTS \"{}\";",
            name.replace('"', "\"\"")
        ))?;
    }
    tx.execute_batch("PRAGMA user_version = 0;")?;
    tx.commit()?;
    Ok(())
}

fn history_table_exists(conn: &Connection) -> DbResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = 'schema_history'
        );",
        [],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn load_applied(conn: &Connection) -> DbResult<BTreeMap<u32, AppliedMigration>> {
    let mut stmt = conn.prepare(
        "SELECT version, description, script, checksum, installed_on
         FROM schema_history
         ORDER BY version ASC;",
    )?;
    let mut rows = stmt.query([])?;
    let mut applied = BTreeMap::new();

    while let Some(row) = rows.next()? {
        applied.insert(
            row.get::<_, u32>("version")?,
            AppliedMigration {
                description: row.get("description")?,
                script: row.get("script")?,
                checksum: row.get("checksum")?,
                installed_on: row.get("installed_on")?,
            },
        );
    }

    Ok(applied)
}

/// Parses `NNNN_description.sql`.
///
/// Returns `None` for files that are not migration candidates (no `.sql`
/// extension or not starting with a digit) and an error for candidates whose
/// version prefix is malformed.
fn parse_script_name(name: &str) -> Option<DbResult<(u32, String)>> {
    let stem = name.strip_suffix(".sql")?;
    if !stem.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }

    let malformed = || {
        DbError::InvalidMigrationSet(format!(
            "`{name}` must be named NNNN_description.sql"
        ))
    };

    let Some((prefix, rest)) = stem.split_once('_') else {
        return Some(Err(malformed()));
    };
    if rest.is_empty() || !prefix.chars().all(|c| c.is_ascii_digit()) {
        return Some(Err(malformed()));
    }

    let version = match prefix.parse::<u32>() {
        Ok(version) => version,
        Err(_) => return Some(Err(malformed())),
    };

    Some(Ok((version, rest.replace('_', " "))))
}
