use crate::{
    error::MemtreeError,
    properties::{NewNode, NodeId, NodePatch, NodeRecord, ViewScope},
    store::TreeStore,
};
use sqlx::{
    error::BoxDynError,
    migrate::{MigrateDatabase, Migration as SqlxMigration, MigrationSource, Migrator},
    sqlite::{Sqlite, SqliteConnectOptions, SqliteConnection},
    ConnectOptions, Row,
};
use sqlx::{migrate::MigrationType, Pool, QueryBuilder};
use std::{future::Future, path::PathBuf, pin::Pin, result::Result, str::FromStr};

pub const MEMTREE_DB: &str = "memtree.db";

/// <https://www.sqlite.org/limits.html#max_variable_number>
pub const SQLITE_LIMIT_VARIABLE_NUMBER: usize = 32766;

const SELECT_ITEMS: &str = "SELECT m.id, m.parent_id, m.memory_key, m.name, m.description, \
     m.code_snippet, m.memory_image, m.rich_text, m.starred, m.is_list, \
     (SELECT COUNT(*) FROM memory_items c WHERE c.parent_id = m.id) AS child_count \
     FROM memory_items m";

type MigrationFuture =
    Pin<Box<dyn Future<Output = Result<Vec<SqlxMigration>, BoxDynError>> + Send + 'static>>;

/// A [TreeStore] over a SQLite `memory_items` table.
#[derive(Debug, Clone)]
pub struct DbConnection(pub Pool<Sqlite>);

impl DbConnection {
    pub async fn open(db_path: PathBuf) -> Result<DbConnection, MemtreeError> {
        Ok(DbConnection(db_init(db_path).await?))
    }

    async fn fetch_records(
        &self,
        mut qb: QueryBuilder<'_, Sqlite>,
        context: &str,
    ) -> Result<Vec<NodeRecord>, MemtreeError> {
        let query = qb.build_query_as::<NodeRecord>();
        let records = query.fetch_all(&self.0).await.map_err(|e| {
            tracing::error!("[DbConnection.{}] SQL error\n\terror: {}", context, e);
            e
        })?;
        Ok(records)
    }

    async fn insert_in(
        conn: &mut SqliteConnection,
        fields: NewNode,
    ) -> Result<NodeRecord, MemtreeError> {
        let result = sqlx::query(
            "INSERT INTO memory_items \
             (parent_id, memory_key, name, description, code_snippet, memory_image, rich_text, starred, is_list) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(fields.parent_id.map(i64::from))
        .bind(fields.order_key)
        .bind(fields.name.clone())
        .bind(fields.description.clone())
        .bind(fields.code_snippet.clone())
        .bind(fields.memory_image.clone())
        .bind(fields.rich_text.clone())
        .bind(fields.starred)
        .bind(fields.is_list_marker)
        .execute(&mut *conn)
        .await?;
        Ok(fields.into_record(NodeId(result.last_insert_rowid())))
    }
}

impl TreeStore for DbConnection {
    #[tracing::instrument(skip(self))]
    async fn fetch_roots(&self, scope: ViewScope) -> Result<Vec<NodeRecord>, MemtreeError> {
        let mut qb = QueryBuilder::<Sqlite>::new(SELECT_ITEMS);
        match scope {
            ViewScope::All => {
                qb.push(" WHERE m.parent_id IS NULL");
            }
            ViewScope::Starred => {
                qb.push(" WHERE m.parent_id IS NULL AND m.starred = 1");
            }
            ViewScope::Subtree(id) => {
                qb.push(" WHERE m.id = ").push_bind(id.0);
            }
        }
        self.fetch_records(qb, "fetch_roots").await
    }

    async fn fetch_children(&self, parent: NodeId) -> Result<Vec<NodeRecord>, MemtreeError> {
        let mut qb = QueryBuilder::<Sqlite>::new(SELECT_ITEMS);
        qb.push(" WHERE m.parent_id = ").push_bind(parent.0);
        self.fetch_records(qb, "fetch_children").await
    }

    /// One recursive query walking parent links upward. The depth bound stops a corrupt
    /// parent cycle from looping forever.
    async fn fetch_ancestor_chain(&self, id: NodeId) -> Result<Vec<NodeRecord>, MemtreeError> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "WITH RECURSIVE chain(id, depth) AS ( \
               SELECT id, 0 FROM memory_items WHERE id = ",
        );
        qb.push_bind(id.0);
        qb.push(
            " UNION ALL \
               SELECT p.parent_id, chain.depth + 1 FROM memory_items p \
               JOIN chain ON p.id = chain.id \
               WHERE p.parent_id IS NOT NULL AND chain.depth < 10000 \
             ) \
             SELECT m.id, m.parent_id, m.memory_key, m.name, m.description, \
               m.code_snippet, m.memory_image, m.rich_text, m.starred, m.is_list, \
               (SELECT COUNT(*) FROM memory_items c WHERE c.parent_id = m.id) AS child_count \
             FROM chain JOIN memory_items m ON m.id = chain.id \
             ORDER BY chain.depth DESC",
        );
        self.fetch_records(qb, "fetch_ancestor_chain").await
    }

    async fn fetch_node(&self, id: NodeId) -> Result<Option<NodeRecord>, MemtreeError> {
        let mut qb = QueryBuilder::<Sqlite>::new(SELECT_ITEMS);
        qb.push(" WHERE m.id = ").push_bind(id.0);
        Ok(self.fetch_records(qb, "fetch_node").await?.into_iter().next())
    }

    async fn insert_node(&self, fields: NewNode) -> Result<NodeRecord, MemtreeError> {
        let mut conn = self.0.acquire().await?;
        let record = Self::insert_in(&mut conn, fields).await?;
        tracing::info!("[DbConnection.insert_node] inserted {}", record.id);
        Ok(record)
    }

    async fn insert_many(&self, fields: Vec<NewNode>) -> Result<Vec<NodeRecord>, MemtreeError> {
        let mut tx = self.0.begin().await?;
        let mut inserted = Vec::with_capacity(fields.len());
        for new_node in fields {
            inserted.push(Self::insert_in(&mut *tx, new_node).await?);
        }
        tx.commit().await?;
        tracing::info!("[DbConnection.insert_many] inserted {} rows", inserted.len());
        Ok(inserted)
    }

    async fn update_fields(&self, id: NodeId, patch: &NodePatch) -> Result<(), MemtreeError> {
        if patch.is_empty() {
            return Ok(());
        }
        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE memory_items SET ");
        {
            let mut set = qb.separated(", ");
            if let Some(key) = patch.order_key {
                set.push("memory_key = ").push_bind_unseparated(key);
            }
            if let Some(name) = &patch.name {
                set.push("name = ").push_bind_unseparated(name.clone());
            }
            if let Some(description) = &patch.description {
                set.push("description = ")
                    .push_bind_unseparated(description.clone());
            }
            if let Some(code_snippet) = &patch.code_snippet {
                set.push("code_snippet = ")
                    .push_bind_unseparated(code_snippet.clone());
            }
            if let Some(memory_image) = &patch.memory_image {
                set.push("memory_image = ")
                    .push_bind_unseparated(memory_image.clone());
            }
            if let Some(rich_text) = &patch.rich_text {
                set.push("rich_text = ").push_bind_unseparated(rich_text.clone());
            }
            if let Some(starred) = patch.starred {
                set.push("starred = ").push_bind_unseparated(starred);
            }
            if let Some(is_list) = patch.is_list_marker {
                set.push("is_list = ").push_bind_unseparated(is_list);
            }
        }
        qb.push(" WHERE id = ").push_bind(id.0);
        let result = qb.build().execute(&self.0).await?;
        if result.rows_affected() == 0 {
            return Err(MemtreeError::NotFound(format!("memory item {id}")));
        }
        tracing::debug!("[DbConnection.update_fields] updated {}", id);
        Ok(())
    }

    async fn update_parent(
        &self,
        ids: &[NodeId],
        new_parent: Option<NodeId>,
    ) -> Result<(), MemtreeError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut tx = self.0.begin().await?;
        for chunk in ids.chunks(SQLITE_LIMIT_VARIABLE_NUMBER - 1) {
            let mut qb = QueryBuilder::<Sqlite>::new("UPDATE memory_items SET parent_id = ");
            qb.push_bind(new_parent.map(i64::from));
            qb.push(" WHERE id IN (");
            {
                let mut list = qb.separated(", ");
                for id in chunk {
                    list.push_bind(id.0);
                }
            }
            qb.push(")");
            let result = qb.build().execute(&mut *tx).await?;
            if result.rows_affected() as usize != chunk.len() {
                return Err(MemtreeError::NotFound(format!(
                    "only {} of {} memory items exist",
                    result.rows_affected(),
                    chunk.len()
                )));
            }
        }
        tx.commit().await?;
        tracing::info!(
            "[DbConnection.update_parent] moved {} item(s) under {:?}",
            ids.len(),
            new_parent
        );
        Ok(())
    }

    async fn delete_node(&self, id: NodeId) -> Result<(), MemtreeError> {
        sqlx::query("DELETE FROM memory_items WHERE id = ?")
            .bind(id.0)
            .execute(&self.0)
            .await?;
        Ok(())
    }

    /// Deletes in one transaction. Ids must be ordered children first so every statement
    /// leaves the parent links consistent.
    async fn delete_nodes(&self, ids: &[NodeId]) -> Result<(), MemtreeError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut tx = self.0.begin().await?;
        for chunk in ids.chunks(SQLITE_LIMIT_VARIABLE_NUMBER) {
            let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM memory_items WHERE id IN (");
            {
                let mut list = qb.separated(", ");
                for id in chunk {
                    list.push_bind(id.0);
                }
            }
            qb.push(")");
            qb.build().execute(&mut *tx).await.map_err(|e| {
                tracing::error!("[DbConnection.delete_nodes] batch delete failed: {}", e);
                e
            })?;
        }
        tx.commit().await?;
        tracing::info!("[DbConnection.delete_nodes] deleted {} rows", ids.len());
        Ok(())
    }

    async fn count_direct_children(&self, id: NodeId) -> Result<u32, MemtreeError> {
        let row = sqlx::query("SELECT COUNT(*) FROM memory_items WHERE parent_id = ?")
            .bind(id.0)
            .fetch_one(&self.0)
            .await?;
        Ok(row.get::<i64, usize>(0).max(0) as u32)
    }

    async fn next_order_key(&self, parent: Option<NodeId>) -> Result<i64, MemtreeError> {
        let row = sqlx::query("SELECT MAX(memory_key) FROM memory_items WHERE parent_id IS ?")
            .bind(parent.map(i64::from))
            .fetch_one(&self.0)
            .await?;
        Ok(row
            .get::<Option<i64>, usize>(0)
            .map(|key| key + 1)
            .unwrap_or(0))
    }

    async fn search(&self, text: &str, limit: usize) -> Result<Vec<NodeRecord>, MemtreeError> {
        let escaped = text
            .trim()
            .to_lowercase()
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let pattern = format!("%{escaped}%");
        let mut qb = QueryBuilder::<Sqlite>::new(SELECT_ITEMS);
        qb.push(" WHERE LOWER(m.name) LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR LOWER(m.description) LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR LOWER(m.code_snippet) LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\' ORDER BY m.id LIMIT ")
            .push_bind(limit as i64);
        self.fetch_records(qb, "search").await
    }
}

/// A migration definition.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
    pub kind: MigrationType,
}

#[derive(Debug, Clone)]
struct MigrationList(Vec<Migration>);

impl MigrationSource<'static> for MigrationList {
    fn resolve(self) -> MigrationFuture {
        Box::pin(async move {
            let mut migrations = Vec::new();
            for migration in self.0 {
                if matches!(migration.kind, MigrationType::ReversibleUp) {
                    migrations.push(SqlxMigration::new(
                        migration.version,
                        migration.description.into(),
                        migration.kind,
                        migration.sql.into(),
                        false,
                    ));
                }
            }
            Ok(migrations)
        })
    }
}

fn migrations() -> MigrationList {
    MigrationList(vec![
        Migration {
            version: 1,
            description: "create_memory_items",
            sql: "\
            CREATE TABLE memory_items ( \
                id INTEGER PRIMARY KEY AUTOINCREMENT, \
                parent_id INTEGER REFERENCES memory_items(id), \
                memory_key INTEGER NOT NULL DEFAULT 0, \
                name TEXT NOT NULL DEFAULT '', \
                description TEXT NOT NULL DEFAULT '', \
                code_snippet TEXT NOT NULL DEFAULT '', \
                memory_image TEXT NOT NULL DEFAULT '', \
                rich_text TEXT NOT NULL DEFAULT '', \
                starred BOOLEAN NOT NULL DEFAULT 0, \
                is_list BOOLEAN NOT NULL DEFAULT 0); \
            CREATE INDEX memory_items_parent ON memory_items(parent_id, memory_key);",
            kind: MigrationType::ReversibleUp,
        },
        Migration {
            version: 2,
            description: "index_starred_roots",
            sql: "CREATE INDEX memory_items_starred_roots ON memory_items(starred) \
                  WHERE parent_id IS NULL;",
            kind: MigrationType::ReversibleUp,
        },
    ])
}

pub async fn db_init(db_path: PathBuf) -> Result<Pool<Sqlite>, MemtreeError> {
    let fqdb = format!("sqlite:{}", db_path.display());
    tracing::debug!("[db_init] opening memory tree db: {:?}", fqdb);
    if !Sqlite::database_exists(&fqdb).await.unwrap_or(false) {
        Sqlite::create_database(&fqdb).await?;
    }
    let options = SqliteConnectOptions::from_str(&fqdb)?
        .read_only(false)
        .foreign_keys(true)
        .disable_statement_logging()
        .create_if_missing(true);

    let pool = sqlx::pool::PoolOptions::<Sqlite>::new()
        .connect_with(options)
        .await?;

    let migrator = Migrator::new(migrations()).await?;
    migrator.run(&pool).await?;

    let count_res = sqlx::query("SELECT COUNT(*) as item_count FROM memory_items;")
        .fetch_one(&pool)
        .await?;
    tracing::info!(
        "DB Connection initialized.\n \
         \tStored memory items:\t{:?}",
        count_res.get::<i64, usize>(0)
    );

    Ok(pool)
}
