//! Infrastructure layer: configuration, database, job queue, audit pipeline
//! and repositories.

pub mod audit;
pub mod clients;
pub mod config;
pub mod db;
pub mod jobs;
pub mod repository;
pub mod users;

pub use repository::RepositoryError;
