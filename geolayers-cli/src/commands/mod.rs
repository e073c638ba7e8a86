//! CLI command implementations.

pub mod convert;
pub mod inspect;
pub mod scan;
