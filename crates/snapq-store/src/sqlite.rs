//! `SQLite` snapshot store.

use rusqlite::types::Value as SqliteValue;
use rusqlite::{Connection, OptionalExtension, Result as SqliteResult, Row, ToSql};
use snapq_core::{
    BaseFilter, CdoSnapshot, CommitIdError, CommitMetadata, GlobalId, QueryParams,
};
use snapq_sql::row::{OWNER_FRAGMENT, OWNER_LOCAL_ID, OWNER_TYPE_NAME};
use snapq_sql::schema::{commit, commit_property, global_id, snapshot};
use snapq_sql::{
    QueryError, RowError, SchemaNames, SnapshotQuery, SnapshotQueryAssembler,
    SnapshotQueryExecutor, SnapshotRow, SqlValue,
};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::config::StoreConfig;

/// `SQLite`-backed snapshot store.
pub struct SqliteSnapshotStore {
    conn: Connection,
    assembler: SnapshotQueryAssembler,
}

impl SqliteSnapshotStore {
    /// Open or create a snapshot database.
    ///
    /// A configured schema other than `main` or `temp` is attached from a
    /// sibling file named `<path>.<schema>`.
    ///
    /// # Errors
    ///
    /// Returns error if database cannot be opened or initialized.
    pub fn open(path: &Path, assembler: SnapshotQueryAssembler) -> SqliteResult<Self> {
        let conn = Connection::open(path)?;
        if let Some(schema) = attachable_schema(assembler.names()) {
            let attached = format!("{}.{schema}", path.display());
            conn.execute(&format!("ATTACH DATABASE ?1 AS {schema}"), [attached])?;
        }

        let store = Self { conn, assembler };
        store.init_schema()?;
        tracing::info!(path = %path.display(), "Opened snapshot store");
        Ok(store)
    }

    /// Create an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns error if database cannot be created.
    pub fn in_memory(assembler: SnapshotQueryAssembler) -> SqliteResult<Self> {
        let conn = Connection::open_in_memory()?;
        if let Some(schema) = attachable_schema(assembler.names()) {
            conn.execute(&format!("ATTACH DATABASE ':memory:' AS {schema}"), [])?;
        }

        let store = Self { conn, assembler };
        store.init_schema()?;
        Ok(store)
    }

    /// Open the database described by `config`.
    ///
    /// # Errors
    ///
    /// Returns error if the configured names are invalid or the database
    /// cannot be opened.
    pub fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        let assembler = config.assembler()?;
        Ok(Self::open(&config.db_path, assembler)?)
    }

    /// Query assembler used by [`Self::find_snapshots`].
    #[must_use]
    pub fn assembler(&self) -> &SnapshotQueryAssembler {
        &self.assembler
    }

    /// Initialize database schema.
    fn init_schema(&self) -> SqliteResult<()> {
        let names = self.assembler.names();
        let index_prefix = names
            .schema()
            .map_or_else(String::new, |schema| format!("{schema}."));

        self.conn.execute_batch(&format!(
            r"
            -- Object identities; value objects point at their owner
            CREATE TABLE IF NOT EXISTS {global_ids} (
                {gid_pk} INTEGER PRIMARY KEY AUTOINCREMENT,
                {local_id} TEXT,
                {fragment} TEXT,
                {type_name} TEXT NOT NULL,
                {owner_fk} INTEGER REFERENCES {global_ids_local}({gid_pk})
            );

            CREATE TABLE IF NOT EXISTS {commits} (
                {commit_pk} INTEGER PRIMARY KEY AUTOINCREMENT,
                {author} TEXT NOT NULL,
                {date} INTEGER NOT NULL,
                {commit_id} REAL NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS {properties} (
                {prop_commit_fk} INTEGER NOT NULL REFERENCES {commits_local}({commit_pk}),
                {prop_name} TEXT NOT NULL,
                {prop_value} TEXT NOT NULL,
                PRIMARY KEY ({prop_commit_fk}, {prop_name})
            );

            -- Append-only snapshot log
            CREATE TABLE IF NOT EXISTS {snapshots} (
                {snapshot_pk} INTEGER PRIMARY KEY AUTOINCREMENT,
                {snapshot_type} TEXT NOT NULL,
                {version} INTEGER NOT NULL,
                {state} TEXT NOT NULL,
                {changed} TEXT NOT NULL,
                {managed_type} TEXT NOT NULL,
                {snapshot_gid_fk} INTEGER NOT NULL REFERENCES {global_ids_local}({gid_pk}),
                {snapshot_commit_fk} INTEGER NOT NULL REFERENCES {commits_local}({commit_pk}),
                UNIQUE({snapshot_gid_fk}, {version})
            );

            CREATE INDEX IF NOT EXISTS {index_prefix}{snapshots_local}_managed_type_idx
                ON {snapshots_local}({managed_type});
            CREATE INDEX IF NOT EXISTS {index_prefix}{snapshots_local}_commit_idx
                ON {snapshots_local}({snapshot_commit_fk});
            CREATE INDEX IF NOT EXISTS {index_prefix}{global_ids_local}_owner_idx
                ON {global_ids_local}({owner_fk});
            ",
            global_ids = names.global_id_table(),
            global_ids_local = names.local_name("global_id"),
            commits = names.commit_table(),
            commits_local = names.local_name("commit"),
            properties = names.commit_property_table(),
            snapshots = names.snapshot_table(),
            snapshots_local = names.local_name("snapshot"),
            gid_pk = global_id::PK,
            local_id = global_id::LOCAL_ID,
            fragment = global_id::FRAGMENT,
            type_name = global_id::TYPE_NAME,
            owner_fk = global_id::OWNER_ID_FK,
            commit_pk = commit::PK,
            author = commit::AUTHOR,
            date = commit::DATE,
            commit_id = commit::ID,
            prop_commit_fk = commit_property::COMMIT_FK,
            prop_name = commit_property::NAME,
            prop_value = commit_property::VALUE,
            snapshot_pk = snapshot::PK,
            snapshot_type = snapshot::TYPE,
            version = snapshot::VERSION,
            state = snapshot::STATE,
            changed = snapshot::CHANGED,
            managed_type = snapshot::MANAGED_TYPE,
            snapshot_gid_fk = snapshot::GLOBAL_ID_FK,
            snapshot_commit_fk = snapshot::COMMIT_FK,
        ))?;

        Ok(())
    }

    /// Append the snapshots written by one commit.
    ///
    /// All snapshots must carry the same commit metadata. Identity rows are
    /// shared between commits; the write is atomic.
    ///
    /// # Errors
    ///
    /// Returns error if the snapshots span several commits, a version does
    /// not advance past the stored one, or the insert fails.
    pub fn persist(&mut self, snapshots: &[CdoSnapshot]) -> Result<(), StoreError> {
        let Some(first) = snapshots.first() else {
            return Ok(());
        };
        let metadata = &first.commit;
        if snapshots.iter().any(|s| &s.commit != metadata) {
            return Err(StoreError::MixedCommits);
        }
        metadata.id.validate()?;

        let names = self.assembler.names().clone();
        let tx = self.conn.transaction()?;
        let commit_pk = insert_commit(&tx, &names, metadata)?;

        for snapshot in snapshots {
            let gid_pk = global_id_pk(&tx, &names, &snapshot.global_id)?;

            let latest: Option<i64> = tx.query_row(
                &format!(
                    "SELECT MAX({version}) FROM {snapshots} WHERE {gid_fk} = ?1",
                    version = snapshot::VERSION,
                    snapshots = names.snapshot_table(),
                    gid_fk = snapshot::GLOBAL_ID_FK,
                ),
                [gid_pk],
                |row| row.get(0),
            )?;
            let latest = latest.map_or(0, |v| u64::try_from(v).unwrap_or(0));
            if snapshot.version <= latest {
                return Err(StoreError::VersionConflict {
                    global_id: snapshot.global_id.to_string(),
                    latest,
                    attempted: snapshot.version,
                });
            }

            let state = serde_json::to_string(&snapshot.state)?;
            let changed = serde_json::to_string(&snapshot.changed_properties)?;

            tx.execute(
                &format!(
                    r"
                    INSERT INTO {snapshots} ({snapshot_type}, {version}, {state_col}, {changed_col},
                        {managed_type}, {gid_fk}, {commit_fk})
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    ",
                    snapshots = names.snapshot_table(),
                    snapshot_type = snapshot::TYPE,
                    version = snapshot::VERSION,
                    state_col = snapshot::STATE,
                    changed_col = snapshot::CHANGED,
                    managed_type = snapshot::MANAGED_TYPE,
                    gid_fk = snapshot::GLOBAL_ID_FK,
                    commit_fk = snapshot::COMMIT_FK,
                ),
                (
                    snapshot.snapshot_type.as_str(),
                    to_i64(snapshot.version)?,
                    state,
                    changed,
                    snapshot.managed_type.as_str(),
                    gid_pk,
                    commit_pk,
                ),
            )?;
        }

        tx.commit()?;

        tracing::debug!(
            commit_id = %metadata.id,
            author = %metadata.author,
            snapshots = snapshots.len(),
            "Persisted commit"
        );
        Ok(())
    }

    /// Find snapshots matching `filter` and `params`, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if the query cannot be assembled, execution fails, or
    /// a stored row cannot be decoded.
    pub fn find_snapshots(
        &self,
        filter: &BaseFilter,
        params: &QueryParams,
    ) -> Result<Vec<CdoSnapshot>, StoreError> {
        let query = self.assembler.assemble(filter, params)?;
        let rows = self.execute(&query)?;

        let mut properties: HashMap<i64, BTreeMap<String, String>> = HashMap::new();
        let mut snapshots = Vec::with_capacity(rows.len());
        for row in rows {
            if !properties.contains_key(&row.commit_pk) {
                let loaded = self.commit_properties(row.commit_pk)?;
                properties.insert(row.commit_pk, loaded);
            }
            let commit_properties = properties.get(&row.commit_pk).cloned().unwrap_or_default();

            let snapshot_pk = row.snapshot_pk;
            let snapshot = row
                .into_snapshot(commit_properties)
                .map_err(|source| StoreError::CorruptRow {
                    snapshot_pk,
                    source,
                })?;
            snapshots.push(snapshot);
        }

        tracing::debug!(
            filter = %filter,
            found = snapshots.len(),
            "Found snapshots"
        );
        Ok(snapshots)
    }

    /// Load the properties of one commit.
    fn commit_properties(&self, commit_pk: i64) -> SqliteResult<BTreeMap<String, String>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {name}, {value} FROM {properties} WHERE {commit_fk} = ?1",
            name = commit_property::NAME,
            value = commit_property::VALUE,
            properties = self.assembler.names().commit_property_table(),
            commit_fk = commit_property::COMMIT_FK,
        ))?;

        let properties = stmt
            .query_map([commit_pk], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<SqliteResult<BTreeMap<String, String>>>()?;

        Ok(properties)
    }
}

impl SnapshotQueryExecutor for SqliteSnapshotStore {
    type Error = rusqlite::Error;

    fn execute(&self, query: &SnapshotQuery) -> SqliteResult<Vec<SnapshotRow>> {
        let values: Vec<(&str, SqliteValue)> = query
            .params
            .iter()
            .map(|(name, value)| (name.as_str(), to_sqlite_value(value)))
            .collect();
        let named: Vec<(&str, &dyn ToSql)> = values
            .iter()
            .map(|(name, value)| (*name, value as &dyn ToSql))
            .collect();

        let mut stmt = self.conn.prepare(&query.sql)?;
        let rows = stmt
            .query_map(named.as_slice(), read_row)?
            .collect::<SqliteResult<Vec<SnapshotRow>>>()?;

        Ok(rows)
    }
}

fn read_row(row: &Row<'_>) -> SqliteResult<SnapshotRow> {
    Ok(SnapshotRow {
        snapshot_pk: row.get(snapshot::PK)?,
        state: row.get(snapshot::STATE)?,
        snapshot_type: row.get(snapshot::TYPE)?,
        version: row.get(snapshot::VERSION)?,
        changed_properties: row.get(snapshot::CHANGED)?,
        managed_type: row.get(snapshot::MANAGED_TYPE)?,
        commit_pk: row.get(commit::PK)?,
        author: row.get(commit::AUTHOR)?,
        commit_date_ms: row.get(commit::DATE)?,
        commit_id: row.get(commit::ID)?,
        type_name: row.get(global_id::TYPE_NAME)?,
        local_id: row.get(global_id::LOCAL_ID)?,
        fragment: row.get(global_id::FRAGMENT)?,
        owner_type_name: row.get(OWNER_TYPE_NAME)?,
        owner_local_id: row.get(OWNER_LOCAL_ID)?,
        owner_fragment: row.get(OWNER_FRAGMENT)?,
    })
}

fn insert_commit(
    conn: &Connection,
    names: &SchemaNames,
    metadata: &CommitMetadata,
) -> SqliteResult<i64> {
    conn.execute(
        &format!(
            "INSERT INTO {commits} ({author}, {date}, {id}) VALUES (?1, ?2, ?3)",
            commits = names.commit_table(),
            author = commit::AUTHOR,
            date = commit::DATE,
            id = commit::ID,
        ),
        (
            metadata.author.as_str(),
            metadata.commit_date.timestamp_millis(),
            metadata.id.value_as_number(),
        ),
    )?;
    let commit_pk = conn.last_insert_rowid();

    let mut stmt = conn.prepare(&format!(
        "INSERT INTO {properties} ({commit_fk}, {name}, {value}) VALUES (?1, ?2, ?3)",
        properties = names.commit_property_table(),
        commit_fk = commit_property::COMMIT_FK,
        name = commit_property::NAME,
        value = commit_property::VALUE,
    ))?;
    for (name, value) in &metadata.properties {
        stmt.execute((commit_pk, name.as_str(), value.as_str()))?;
    }

    Ok(commit_pk)
}

/// Find or insert the identity row of `id`, owner first.
fn global_id_pk(conn: &Connection, names: &SchemaNames, id: &GlobalId) -> SqliteResult<i64> {
    let owner_pk = match id.owner() {
        Some(owner) => Some(global_id_pk(conn, names, owner)?),
        None => None,
    };

    let table = names.global_id_table();
    let existing: Option<i64> = conn
        .query_row(
            &format!(
                r"
                SELECT {pk} FROM {table}
                WHERE {type_name} = ?1 AND {local_id} IS ?2 AND {fragment} IS ?3 AND {owner_fk} IS ?4
                ",
                pk = global_id::PK,
                type_name = global_id::TYPE_NAME,
                local_id = global_id::LOCAL_ID,
                fragment = global_id::FRAGMENT,
                owner_fk = global_id::OWNER_ID_FK,
            ),
            (
                id.type_name.as_str(),
                id.local_id.as_deref(),
                id.fragment.as_deref(),
                owner_pk,
            ),
            |row| row.get(0),
        )
        .optional()?;
    if let Some(pk) = existing {
        return Ok(pk);
    }

    conn.execute(
        &format!(
            "INSERT INTO {table} ({type_name}, {local_id}, {fragment}, {owner_fk}) VALUES (?1, ?2, ?3, ?4)",
            type_name = global_id::TYPE_NAME,
            local_id = global_id::LOCAL_ID,
            fragment = global_id::FRAGMENT,
            owner_fk = global_id::OWNER_ID_FK,
        ),
        (
            id.type_name.as_str(),
            id.local_id.as_deref(),
            id.fragment.as_deref(),
            owner_pk,
        ),
    )?;

    Ok(conn.last_insert_rowid())
}

/// Schema that has to be attached before the tables can be created.
fn attachable_schema(names: &SchemaNames) -> Option<&str> {
    names
        .schema()
        .filter(|schema| !matches!(*schema, "main" | "temp"))
}

fn to_sqlite_value(value: &SqlValue) -> SqliteValue {
    match value {
        SqlValue::Null => SqliteValue::Null,
        SqlValue::Integer(v) => SqliteValue::Integer(*v),
        SqlValue::Real(v) => SqliteValue::Real(*v),
        SqlValue::Text(v) => SqliteValue::Text(v.clone()),
    }
}

fn to_i64(value: u64) -> SqliteResult<i64> {
    i64::try_from(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

/// Snapshot store failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Statement execution failed
    #[error("execution failure: {0}")]
    Execution(#[from] rusqlite::Error),

    /// The query could not be assembled
    #[error(transparent)]
    Query(#[from] QueryError),

    /// A stored row could not be decoded
    #[error("corrupt snapshot row {snapshot_pk}: {source}")]
    CorruptRow {
        /// Offending snapshot row
        snapshot_pk: i64,
        /// Decoding failure
        #[source]
        source: RowError,
    },

    /// State or changed properties could not be encoded
    #[error("encoding failure: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Commit id cannot be stored without losing precision
    #[error(transparent)]
    CommitId(#[from] CommitIdError),

    /// Snapshots passed to one persist call belong to different commits
    #[error("snapshots of one persist call must share a commit")]
    MixedCommits,

    /// Version does not advance past the stored one
    #[error("version conflict for {global_id}: latest {latest}, attempted {attempted}")]
    VersionConflict {
        /// Object identity
        global_id: String,
        /// Latest stored version
        latest: u64,
        /// Rejected version
        attempted: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use snapq_core::{CommitId, SnapshotType};

    fn store() -> SqliteSnapshotStore {
        SqliteSnapshotStore::in_memory(SnapshotQueryAssembler::new(SchemaNames::default()))
            .unwrap()
    }

    fn commit(major: u64) -> CommitMetadata {
        CommitMetadata::new(
            CommitId::major(major),
            "kate",
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        )
        .with_property("dept", "IT")
    }

    fn person(version: u64, commit: CommitMetadata) -> CdoSnapshot {
        let mut state = serde_json::Map::new();
        state.insert("name".to_string(), json!("bob"));
        CdoSnapshot {
            global_id: GlobalId::instance("Person", "bob"),
            managed_type: "Person".to_string(),
            state,
            version,
            snapshot_type: if version == 1 {
                SnapshotType::Initial
            } else {
                SnapshotType::Update
            },
            changed_properties: vec!["name".to_string()],
            commit,
        }
    }

    #[test]
    fn sqlite_store_basic_operations() {
        let mut store = store();
        store.persist(&[person(1, commit(1))]).unwrap();
        store.persist(&[person(2, commit(2))]).unwrap();

        let filter = BaseFilter::instance(GlobalId::instance("Person", "bob"), false);
        let found = store
            .find_snapshots(&filter, &QueryParams::default())
            .unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(found[0], person(2, commit(2)));
        assert_eq!(found[1], person(1, commit(1)));
    }

    #[test]
    fn identity_rows_are_shared() {
        let mut store = store();
        store.persist(&[person(1, commit(1))]).unwrap();
        store.persist(&[person(2, commit(2))]).unwrap();

        let count: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM snapq_global_id", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn stale_version_is_rejected_atomically() {
        let mut store = store();
        store.persist(&[person(1, commit(1))]).unwrap();

        let err = store.persist(&[person(1, commit(2))]).unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionConflict {
                latest: 1,
                attempted: 1,
                ..
            }
        ));

        let commits: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM snapq_commit", [], |row| row.get(0))
            .unwrap();
        assert_eq!(commits, 1);
    }

    #[test]
    fn mixed_commits_are_rejected() {
        let mut store = store();
        let err = store
            .persist(&[person(1, commit(1)), person(2, commit(2))])
            .unwrap_err();
        assert!(matches!(err, StoreError::MixedCommits));
    }

    #[test]
    fn oversized_commit_id_is_rejected() {
        let mut store = store();
        let mut metadata = commit(1);
        metadata.id = CommitId::major(1 << 53);

        let err = store.persist(&[person(1, metadata)]).unwrap_err();
        assert!(matches!(
            err,
            StoreError::CommitId(CommitIdError::MajorOutOfRange(_))
        ));
    }

    #[test]
    fn attached_schema_holds_the_tables() {
        let names = SchemaNames::new(Some("audit"), "jv_").unwrap();
        let mut store =
            SqliteSnapshotStore::in_memory(SnapshotQueryAssembler::new(names)).unwrap();
        store.persist(&[person(1, commit(1))]).unwrap();

        let found = store
            .find_snapshots(
                &BaseFilter::managed_types(["Person"], false).unwrap(),
                &QueryParams::default(),
            )
            .unwrap();
        assert_eq!(found.len(), 1);
    }
}
