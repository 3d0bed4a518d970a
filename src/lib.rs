pub mod batch;
pub mod classify;
pub mod config;
pub mod db;
pub mod dedup;
pub mod edit;
pub mod error;
pub mod model;
pub mod reconcile;
pub mod schedule;
pub mod slots;
pub mod sources;
