//! NornicDB: an embedded property-graph database core with a durable WAL,
//! schema/constraint management, buffered serializable transactions, an
//! HNSW vector index over node embeddings, and temporal access-pattern
//! tracking.
//!
//! # Examples
//!
//! ```
//! use nornicdb::{Config, GraphStore};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let store = GraphStore::open(dir.path(), Config::fast()).unwrap();
//!
//! let mut txn = store.begin();
//! let id = txn.create_node(vec!["Person".into()], vec![], None).unwrap();
//! txn.commit().unwrap();
//!
//! assert!(store.storage().get_node(&id).is_ok());
//! ```

pub mod config;
pub mod error;
pub mod graph_store;
pub mod health;
pub mod hnsw;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod schema;
pub mod serialization;
pub mod storage;
pub mod temporal;
pub mod txn;
pub mod vector_backend;
pub mod wal;

pub use config::{Config, SyncMode};
pub use error::{NornicError, Result};
pub use graph_store::{GraphStore, IntegrityOptions, IntegrityReport, Sequence};
pub use health::{Check, HealthCheck, HealthStatus};
pub use hnsw::{CancellationToken, HnswIndex};
pub use metrics::{PerformanceMetrics, PerformanceMetricsSnapshot};
pub use model::{Direction, Edge, EdgeId, Node, NodeId, PropertyMap, PropertyValue};
pub use schema::{SchemaManager, VectorIndexDef, VectorSimilarity};
pub use storage::events::{CommitEvent, EventSink};
pub use storage::{PendingOp, StorageCore};
pub use temporal::{AccessTrend, TemporalEngine};
pub use txn::{Transaction, TransactionManager, TxState};
