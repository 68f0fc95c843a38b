//! Leaf services: file discovery and naming, source-folder backups, and the
//! external catalog client.

pub mod backup;
pub mod catalog;
pub mod naming;
