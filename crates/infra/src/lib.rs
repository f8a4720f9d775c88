//! Infrastructure layer: job, response and user stores, background runner, config.

pub mod config;
pub mod db;
pub mod jobs;
pub mod responses;
pub mod users;
