pub mod augment;
pub mod balance;
pub mod config;
pub mod data;
pub mod error;
pub mod metric;
pub mod model;
pub mod ops;
pub mod schedule;
pub mod task;
pub mod train;

pub use error::{Error, Result};
