pub mod app;
pub mod archive;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod global;
pub mod notify;
pub mod pipeline;
pub mod queue;
pub mod reconcile;
pub mod storage;
pub mod sweeper;
pub mod transcription;
