//! npm tarball utilities

pub mod extract;

pub use extract::extract_entry;
