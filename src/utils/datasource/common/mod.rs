pub mod error_handling;
pub mod identifiers;

pub use error_handling::*;
pub use identifiers::*;
