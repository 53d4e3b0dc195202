pub mod backpressure;
pub mod buffer;
pub mod config;
pub mod error;
pub mod generator;
pub mod latency;
pub mod pipeline;
pub mod scheduler;
pub mod source;
pub mod stats;
pub mod store;
pub mod stress;
pub mod tui;
pub mod types;
pub mod window;
