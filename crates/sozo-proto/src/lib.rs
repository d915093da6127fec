pub mod config;
pub mod error;
pub mod model;
pub mod platform;
pub mod protocol;
pub mod state;
pub mod station;
