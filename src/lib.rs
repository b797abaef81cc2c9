pub mod api;
pub mod app;
pub mod artifacts;
pub mod cli;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod global;
pub mod model;
pub mod notifications;
pub mod summarizer;
pub mod upstream;
