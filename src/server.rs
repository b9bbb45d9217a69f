//! Storage-backend-agnostic query abstraction for fragment inserts
//!
//! A worker opens one connection, selects a database, compiles one
//! parameterized batch statement and executes it once per batch, re-binding
//! the positional arguments between executions. Failures are reported and
//! never retried here.

use crate::error::{CubeError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Storage backend variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerBackend {
    /// In-process relational-batch store
    Memory,
    /// MySQL-compatible relational server
    Mysql,
    /// PostgreSQL relational server
    Postgres,
}

impl ServerBackend {
    /// Parse a backend from a connection URL scheme
    pub fn from_url(url: &str) -> Result<Self> {
        if let Some(scheme_end) = url.find("://") {
            let scheme = &url[..scheme_end];
            match scheme {
                "mem" => Ok(ServerBackend::Memory),
                "mysql" => Ok(ServerBackend::Mysql),
                "postgres" => Ok(ServerBackend::Postgres),
                _ => Err(CubeError::Configuration(format!(
                    "Unknown scheme: {}",
                    scheme
                ))),
            }
        } else {
            Ok(ServerBackend::Memory)
        }
    }
}

/// A typed positional argument bound into a compiled statement
#[derive(Debug, Clone, PartialEq)]
pub enum QueryArg {
    Int64(i64),
    Double(f64),
    FixedBlob(Bytes),
    VarBlob(Bytes),
    Null,
}

/// Handle to a compiled statement held by a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryHandle(u64);

/// One storage connection owned by a single worker
///
/// `prepare` compiles a statement with `repeat_count` permitted executions
/// and `arg_count` positional arguments; each `execute` re-binds the full
/// argument vector, which is how the import engine streams batches without
/// re-compiling per batch.
#[async_trait]
pub trait IoServer: Send + Sync {
    /// Establish the connection
    async fn open(&mut self) -> Result<()>;

    /// Select the working database
    async fn select_database(&mut self, name: &str) -> Result<()>;

    /// Compile a parameterized batch statement
    async fn prepare(
        &mut self,
        statement: &str,
        repeat_count: usize,
        arg_count: usize,
    ) -> Result<QueryHandle>;

    /// Execute a compiled statement with freshly bound arguments
    async fn execute(&mut self, handle: QueryHandle, args: &[QueryArg]) -> Result<()>;

    /// Release a compiled statement
    async fn release(&mut self, handle: QueryHandle) -> Result<()>;

    /// Tear the connection down
    async fn close(&mut self) -> Result<()>;

    /// Get the backend type
    fn backend(&self) -> ServerBackend;
}

type TableRows = Vec<(i64, Bytes)>;

/// Shared row store behind [`MemoryIoServer`] connections
///
/// Cloning shares the underlying store, so a test can keep one clone while
/// connections move into worker tasks.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    databases: Arc<Mutex<HashMap<String, HashMap<String, TableRows>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows inserted into one table, in insertion order
    pub fn rows(&self, database: &str, table: &str) -> TableRows {
        self.databases
            .lock()
            .get(database)
            .and_then(|db| db.get(table))
            .cloned()
            .unwrap_or_default()
    }

    /// Names of tables present in one database
    pub fn tables(&self, database: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .databases
            .lock()
            .get(database)
            .map(|db| db.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

struct PreparedStatement {
    table: String,
    arg_count: usize,
    remaining: usize,
}

/// In-process relational-batch backend
///
/// Understands exactly the multi-insert statement shape the import engine
/// produces; arguments arrive as `(key, blob)` pairs.
pub struct MemoryIoServer {
    store: MemoryStore,
    connected: bool,
    database: Option<String>,
    prepared: HashMap<u64, PreparedStatement>,
    next_handle: u64,
}

impl MemoryIoServer {
    /// Create a connection over a fresh private store
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    /// Create a connection over a shared store
    pub fn with_store(store: MemoryStore) -> Self {
        Self {
            store,
            connected: false,
            database: None,
            prepared: HashMap::new(),
            next_handle: 0,
        }
    }

    fn require_open(&self) -> Result<&str> {
        if !self.connected {
            return Err(CubeError::Backend("connection is not open".to_string()));
        }
        self.database
            .as_deref()
            .ok_or_else(|| CubeError::Backend("no database selected".to_string()))
    }
}

impl Default for MemoryIoServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Pull the target table out of a multi-insert statement
fn insert_target(statement: &str) -> Result<String> {
    let mut words = statement.split_whitespace();
    loop {
        match words.next() {
            Some(word) if word.eq_ignore_ascii_case("INTO") => {
                return words
                    .next()
                    .map(|t| t.trim_end_matches('(').to_string())
                    .ok_or_else(|| {
                        CubeError::Backend(format!("no table in statement: {:?}", statement))
                    });
            }
            Some(_) => {}
            None => {
                return Err(CubeError::Backend(format!(
                    "unsupported statement: {:?}",
                    statement
                )))
            }
        }
    }
}

#[async_trait]
impl IoServer for MemoryIoServer {
    async fn open(&mut self) -> Result<()> {
        if self.connected {
            return Err(CubeError::Backend("connection already open".to_string()));
        }
        self.connected = true;
        Ok(())
    }

    async fn select_database(&mut self, name: &str) -> Result<()> {
        if !self.connected {
            return Err(CubeError::Backend("connection is not open".to_string()));
        }
        self.store
            .databases
            .lock()
            .entry(name.to_string())
            .or_default();
        self.database = Some(name.to_string());
        Ok(())
    }

    async fn prepare(
        &mut self,
        statement: &str,
        repeat_count: usize,
        arg_count: usize,
    ) -> Result<QueryHandle> {
        self.require_open()?;
        if repeat_count == 0 || arg_count == 0 || arg_count % 2 != 0 {
            return Err(CubeError::Backend(format!(
                "invalid batch shape: {} executions of {} arguments",
                repeat_count, arg_count
            )));
        }
        let table = insert_target(statement)?;
        let handle = QueryHandle(self.next_handle);
        self.next_handle += 1;
        self.prepared.insert(
            handle.0,
            PreparedStatement {
                table,
                arg_count,
                remaining: repeat_count,
            },
        );
        Ok(handle)
    }

    async fn execute(&mut self, handle: QueryHandle, args: &[QueryArg]) -> Result<()> {
        let database = self.require_open()?.to_string();
        let prepared = self
            .prepared
            .get_mut(&handle.0)
            .ok_or_else(|| CubeError::Backend("unknown statement handle".to_string()))?;
        if prepared.remaining == 0 {
            return Err(CubeError::Backend(
                "statement repeat count exhausted".to_string(),
            ));
        }
        if args.len() != prepared.arg_count {
            return Err(CubeError::Backend(format!(
                "bound {} arguments, statement expects {}",
                args.len(),
                prepared.arg_count
            )));
        }

        let mut rows: TableRows = Vec::with_capacity(args.len() / 2);
        for pair in args.chunks_exact(2) {
            match (&pair[0], &pair[1]) {
                (QueryArg::Int64(key), QueryArg::FixedBlob(blob))
                | (QueryArg::Int64(key), QueryArg::VarBlob(blob)) => {
                    rows.push((*key, blob.clone()));
                }
                other => {
                    return Err(CubeError::Backend(format!(
                        "expected (key, blob) pair, got {:?}",
                        other
                    )))
                }
            }
        }

        prepared.remaining -= 1;
        let table = prepared.table.clone();
        self.store
            .databases
            .lock()
            .entry(database)
            .or_default()
            .entry(table)
            .or_default()
            .extend(rows);
        Ok(())
    }

    async fn release(&mut self, handle: QueryHandle) -> Result<()> {
        self.prepared
            .remove(&handle.0)
            .map(|_| ())
            .ok_or_else(|| CubeError::Backend("unknown statement handle".to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.prepared.clear();
        self.database = None;
        self.connected = false;
        Ok(())
    }

    fn backend(&self) -> ServerBackend {
        ServerBackend::Memory
    }
}

/// Parse a connection URL and create the matching server connection
///
/// Only the in-process backend ships with this crate. External relational
/// servers are reached by implementing [`IoServer`] in the application with
/// the driver of choice.
pub fn create_io_server(url: &str) -> Result<Box<dyn IoServer>> {
    let backend = ServerBackend::from_url(url)?;

    match backend {
        ServerBackend::Memory => Ok(Box::new(MemoryIoServer::new())),
        ServerBackend::Mysql | ServerBackend::Postgres => Err(CubeError::Configuration(format!(
            "Backend {:?} is not bundled with cubefrag. \
            Consuming applications should implement the IoServer trait \
            over their relational driver.",
            backend
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_connection(store: &MemoryStore) -> MemoryIoServer {
        let mut server = MemoryIoServer::with_store(store.clone());
        server.open().await.unwrap();
        server.select_database("ophdb").await.unwrap();
        server
    }

    #[tokio::test]
    async fn test_batch_insert_round_trip() {
        let store = MemoryStore::new();
        let mut server = open_connection(&store).await;

        let handle = server
            .prepare("INSERT INTO fact_tos_1 (id_dim, measure) VALUES (?,?),(?,?)", 2, 4)
            .await
            .unwrap();
        for batch in 0..2i64 {
            let args = vec![
                QueryArg::Int64(batch * 2 + 1),
                QueryArg::FixedBlob(Bytes::from(vec![batch as u8; 4])),
                QueryArg::Int64(batch * 2 + 2),
                QueryArg::FixedBlob(Bytes::from(vec![batch as u8 + 10; 4])),
            ];
            server.execute(handle, &args).await.unwrap();
        }
        server.release(handle).await.unwrap();
        server.close().await.unwrap();

        let rows = store.rows("ophdb", "fact_tos_1");
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].0, 1);
        assert_eq!(rows[3].0, 4);
        assert_eq!(&rows[2].1[..], &[1u8; 4]);
    }

    #[tokio::test]
    async fn test_repeat_count_is_enforced() {
        let store = MemoryStore::new();
        let mut server = open_connection(&store).await;
        let handle = server
            .prepare("INSERT INTO fact_tos_1 (id_dim, measure) VALUES (?,?)", 1, 2)
            .await
            .unwrap();
        let args = vec![QueryArg::Int64(1), QueryArg::VarBlob(Bytes::from_static(b"x"))];
        server.execute(handle, &args).await.unwrap();
        assert!(server.execute(handle, &args).await.is_err());
    }

    #[tokio::test]
    async fn test_arity_is_enforced() {
        let store = MemoryStore::new();
        let mut server = open_connection(&store).await;
        let handle = server
            .prepare("INSERT INTO fact_tos_1 (id_dim, measure) VALUES (?,?),(?,?)", 1, 4)
            .await
            .unwrap();
        let args = vec![QueryArg::Int64(1), QueryArg::VarBlob(Bytes::from_static(b"x"))];
        assert!(server.execute(handle, &args).await.is_err());
    }

    #[tokio::test]
    async fn test_prepare_requires_database() {
        let mut server = MemoryIoServer::new();
        assert!(server.select_database("ophdb").await.is_err());
        server.open().await.unwrap();
        assert!(server
            .prepare("INSERT INTO t (id_dim, measure) VALUES (?,?)", 1, 2)
            .await
            .is_err());
    }

    #[test]
    fn test_backend_from_url() {
        assert_eq!(
            ServerBackend::from_url("mem://local").unwrap(),
            ServerBackend::Memory
        );
        assert_eq!(
            ServerBackend::from_url("mysql://host:3306").unwrap(),
            ServerBackend::Mysql
        );
        assert!(ServerBackend::from_url("oracle://host").is_err());
    }

    #[test]
    fn test_factory_rejects_external_backends() {
        assert!(create_io_server("mem://local").is_ok());
        assert!(create_io_server("mysql://host:3306").is_err());
    }

    #[test]
    fn test_insert_target_extraction() {
        assert_eq!(
            insert_target("INSERT INTO fact_tos_2 (id_dim, measure) VALUES (?,?)").unwrap(),
            "fact_tos_2"
        );
        assert!(insert_target("DELETE FROM fact_tos_2").is_err());
    }
}
