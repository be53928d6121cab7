//! Treasure Data client.

use std::{io, sync::Arc};

use bytes::Bytes;
use snafu::{ResultExt as _, Snafu};
use tracing::{debug, dispatcher, Dispatch};

use crate::{
    compression::{compress, empty_payload, MSGPACK_GZ_FORMAT},
    config::ConfigurationError,
    encoder::{encode_rows, EncodeError},
    unique_id::UniqueIdGenerator,
    Sample, TreasureDataConfiguration,
};

mod transport;
pub use self::transport::{ApiErrorKind, ImportClient, ImportError, ImportResult};

const CLIENT_NAME: &str = "TreasureData";

/// Error type for bootstrapping a client.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ClientError {
    /// The configuration is incomplete or invalid.
    #[snafu(display("Invalid Treasure Data configuration: {}", source))]
    Configuration {
        /// Error source.
        source: ConfigurationError,
    },

    /// The destination database or table does not exist.
    #[snafu(display("Destination table '{}.{}' does not exist.", database, table))]
    DestinationNotFound {
        /// Database name.
        database: String,

        /// Table name.
        table: String,
    },

    /// The destination could not be verified.
    #[snafu(display("Failed to verify destination table '{}.{}': {}", database, table, source))]
    Bootstrap {
        /// Database name.
        database: String,

        /// Table name.
        table: String,

        /// Error source.
        source: ImportError,
    },

    /// The empty probe payload could not be built.
    #[snafu(display("Failed to build empty import payload."))]
    EmptyPayload {
        /// Error source.
        source: io::Error,
    },
}

/// Error type for writing samples.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum WriteError {
    /// The samples could not be encoded as rows.
    #[snafu(display("Failed to encode samples: {}", source))]
    Encoding {
        /// Error source.
        source: EncodeError,
    },

    /// The encoded rows could not be compressed.
    #[snafu(display("Failed to compress payload."))]
    Compression {
        /// Error source.
        source: io::Error,
    },

    /// The import request failed.
    #[snafu(display("Failed to import payload '{}': {}", unique_id, source))]
    Import {
        /// Unique ID the payload was submitted under.
        unique_id: String,

        /// Error source.
        source: ImportError,
    },
}

impl WriteError {
    /// Returns `true` if resubmitting the same [`Submission`] may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Import { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

/// An encoded, compressed batch of samples, ready to be imported.
///
/// A submission carries the unique ID it will be imported under, so submitting it again after a failure cannot import
/// the same rows twice.
#[derive(Clone, Debug)]
pub struct Submission {
    unique_id: String,
    payload: Bytes,
    num_samples: usize,
}

impl Submission {
    /// Returns the unique ID of this submission.
    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    /// Returns the compressed payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Returns the number of samples in the payload.
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }
}

/// Writes batches of samples into a Treasure Data table.
///
/// A `Client` is cheap to clone, and clones share the same connection pool and identifier generator. Every write is a
/// single import request: failures are returned to the caller, and nothing is retried internally.
///
/// Log events are sent to the [`Dispatch`] given at bootstrap, rather than the global default. When none is given,
/// events are discarded.
#[derive(Clone)]
pub struct Client {
    database: Arc<str>,
    table: Arc<str>,
    transport: ImportClient,
    id_generator: Arc<UniqueIdGenerator>,
    logger: Dispatch,
}

impl Client {
    /// Creates a new `Client` for the configured destination table.
    ///
    /// The configuration is validated, and then an empty payload is imported into the destination table under a
    /// throwaway unique ID. This confirms that the API key is accepted and that the table exists, without adding any
    /// rows.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, an error is returned without sending any request. If the service reports that
    /// the database or table does not exist, `ClientError::DestinationNotFound` is returned. Any other failure of the
    /// probe request is returned as `ClientError::Bootstrap`.
    pub async fn bootstrap(config: TreasureDataConfiguration, logger: Option<Dispatch>) -> Result<Self, ClientError> {
        Self::bootstrap_with_id_generator(config, logger, UniqueIdGenerator::from_entropy()).await
    }

    /// Creates a new `Client` that draws unique IDs from the given generator.
    ///
    /// Otherwise identical to [`bootstrap`][Self::bootstrap].
    ///
    /// # Errors
    ///
    /// See [`bootstrap`][Self::bootstrap].
    pub async fn bootstrap_with_id_generator(
        config: TreasureDataConfiguration, logger: Option<Dispatch>, id_generator: UniqueIdGenerator,
    ) -> Result<Self, ClientError> {
        config.validate().context(Configuration)?;
        let base_uri = config.base_uri().context(Configuration)?;

        let database = config.database();
        let table = config.table();
        let transport = ImportClient::new(base_uri, config.api_key()).context(Bootstrap { database, table })?;

        let client = Self {
            database: database.into(),
            table: table.into(),
            transport,
            id_generator: Arc::new(id_generator),
            logger: logger.unwrap_or_else(Dispatch::none),
        };
        client.check_destination().await?;

        Ok(client)
    }

    async fn check_destination(&self) -> Result<(), ClientError> {
        let payload = empty_payload().await.context(EmptyPayload)?;
        let unique_id = self.id_generator.generate();

        match self
            .transport
            .import(&self.database, &self.table, MSGPACK_GZ_FORMAT, payload.into(), &unique_id)
            .await
        {
            Ok(_) => {
                self.log(|| {
                    debug!(
                        database = %self.database,
                        table = %self.table,
                        endpoint = %self.transport.base_uri(),
                        "Verified destination table."
                    )
                });
                Ok(())
            }
            Err(e) if e.api_error_kind() == Some(ApiErrorKind::NotFound) => DestinationNotFound {
                database: &*self.database,
                table: &*self.table,
            }
            .fail(),
            Err(e) => Err(e).context(Bootstrap {
                database: &*self.database,
                table: &*self.table,
            }),
        }
    }

    /// Returns the name of this client.
    pub fn name(&self) -> &'static str {
        CLIENT_NAME
    }

    /// Returns the destination database.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Returns the destination table.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Writes the given samples to the destination table.
    ///
    /// This is [`prepare`][Self::prepare] followed by [`submit`][Self::submit]. Callers that want to retry failed
    /// writes should use those directly, so that a retry reuses the unique ID of the original attempt.
    ///
    /// # Errors
    ///
    /// If the samples cannot be encoded or compressed, or the import request fails, an error is returned.
    pub async fn write(&self, samples: &[Sample]) -> Result<ImportResult, WriteError> {
        let submission = self.prepare(samples).await?;
        self.submit(&submission).await
    }

    /// Encodes and compresses the given samples, and assigns the result a fresh unique ID.
    ///
    /// # Errors
    ///
    /// If the samples cannot be encoded or compressed, an error is returned.
    pub async fn prepare(&self, samples: &[Sample]) -> Result<Submission, WriteError> {
        let mut buffer = Vec::new();
        let num_samples = encode_rows(samples, &mut buffer).context(Encoding)?;
        let payload = compress(&buffer).await.context(Compression)?;

        Ok(Submission {
            unique_id: self.id_generator.generate(),
            payload: payload.into(),
            num_samples,
        })
    }

    /// Imports a prepared submission.
    ///
    /// # Errors
    ///
    /// If the import request fails, an error is returned.
    pub async fn submit(&self, submission: &Submission) -> Result<ImportResult, WriteError> {
        let result = self
            .transport
            .import(&self.database, &self.table, MSGPACK_GZ_FORMAT, submission.payload.clone(), &submission.unique_id)
            .await
            .context(Import {
                unique_id: &submission.unique_id,
            })?;

        self.log(|| {
            debug!(
                num_samples = submission.num_samples,
                payload_size = submission.payload.len(),
                unique_id = %submission.unique_id,
                "Imported samples."
            )
        });

        Ok(result)
    }

    fn log<F>(&self, f: F)
    where
        F: FnOnce(),
    {
        dispatcher::with_default(&self.logger, f)
    }
}
