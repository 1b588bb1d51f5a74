//! Goggles Core Library
//!
//! Configuration shared by the Whisky Goggles client crates.

pub mod config;

pub use config::{AppConfig, CacheConfig, LoaderSettings, LogSettings};
