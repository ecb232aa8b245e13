//! Data-synchronization core of the pharmacy portal.
//!
//! [`DataStore`] keeps the medicine registry, shift calendar, announcements
//! board and employee directory in an in-memory cache mirrored to disk, and
//! keeps that cache in step with one of three backends: local only, a shared
//! REST server, or a spreadsheet script endpoint.

pub mod cache;
pub mod config;
pub mod error;
pub mod mapping;
pub mod mirror;
pub mod mode;
pub mod model;
pub mod sample_data;
pub mod storage;
pub mod store;
pub mod transport;

pub use config::Config;
pub use error::SyncError;
pub use mode::StorageMode;
pub use model::{Record, Table};
pub use store::{DataStore, StorageEvent};
