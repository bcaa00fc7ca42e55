pub mod error;
pub mod paths;
pub mod protocol;
