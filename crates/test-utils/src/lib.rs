//! Shared test support for the partflow workspace.

pub mod db;
