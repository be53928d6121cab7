//! Forwards batches of time-series samples to the Treasure Data bulk-import API.
//!
//! Each call to [`Client::write`] encodes a batch of [`Sample`]s as MessagePack rows, gzip-compresses them, mints a
//! fresh idempotency token, and submits the payload through the `import_with_id` endpoint. Clients are created through
//! [`Client::bootstrap`], which validates configuration and verifies that the destination table exists before any
//! writes are accepted.
#![deny(missing_docs)]

pub mod client;
pub use self::client::{Client, ClientError, WriteError};

pub mod compression;

pub mod config;
pub use self::config::TreasureDataConfiguration;

pub mod encoder;

mod sample;
pub use self::sample::{Sample, METRIC_NAME_LABEL};

pub mod unique_id;

#[cfg(test)]
mod test_util;
