pub mod base;
pub mod common;
pub mod csv_file;
pub mod factory;
pub mod google_sheets;
pub mod mongo;
pub mod mysql;
pub mod postgres;
pub mod rest;
pub mod s3;

pub use base::*;
pub use common::ConnectorError;
pub use factory::*;
