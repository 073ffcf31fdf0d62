pub mod adapter;
pub mod client;

pub use adapter::{DatabaseAdapter, IrisAdapter};
pub use client::{IrisClient, Row};
