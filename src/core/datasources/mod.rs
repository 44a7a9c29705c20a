pub mod introspector;
pub mod jobs;
pub mod locks;
pub mod pg_store;
pub mod scheduler;
pub mod service;
pub mod state_machine;
pub mod store;
pub mod sync_engine;
pub mod tester;

pub use introspector::{SchemaIntrospector, SchemaResult, SchemaSnapshot};
pub use jobs::JobManager;
pub use pg_store::PgDataSourceStore;
pub use scheduler::SyncScheduler;
pub use service::{DataSourceService, SyncTicket};
pub use store::{DataSourceStore, MemoryDataSourceStore};
pub use sync_engine::{RetryPolicy, SyncEngine, SyncReport};
pub use tester::{TestOutcome, TestResult};
