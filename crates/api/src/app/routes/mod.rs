pub mod auth;
pub mod clients;
pub mod logs;
pub mod queues;
pub mod system;
