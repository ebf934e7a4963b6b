//! Driving adapters: CSV command files and their replay against the lifecycle manager.

pub mod csv;
pub mod replay;
