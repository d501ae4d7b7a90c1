pub mod domain;
pub mod error;
pub mod pack_format;
pub mod protocol;
