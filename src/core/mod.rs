pub mod alerts;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod formatter;
pub mod models;
pub mod normalizer;
pub mod predictor;
pub mod publisher;
pub mod rate;
pub mod state;
pub mod window;
