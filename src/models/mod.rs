pub mod connection_config;
pub mod data_source;
pub mod submission;
pub mod sync_log;

pub use connection_config::*;
pub use data_source::*;
pub use submission::*;
pub use sync_log::*;
