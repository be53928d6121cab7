use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;

/// Imports time-series samples into a Treasure Data table.
///
/// Configuration is read from an optional YAML file, then from `TD_*` environment variables, then from the `--td.*`
/// flags, with later sources taking precedence.
#[derive(Clone, Debug, Parser)]
#[command(about)]
pub struct Cli {
    /// Path to a YAML configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Treasure Data API key.
    #[arg(long = "td.apikey")]
    pub api_key: Option<String>,

    /// Database containing the destination table.
    #[arg(long = "td.db")]
    pub database: Option<String>,

    /// Destination table.
    #[arg(long = "td.table")]
    pub table: Option<String>,

    /// Host to send import requests to.
    #[arg(long = "td.endpoint")]
    pub endpoint: Option<String>,

    /// Port to send import requests to.
    #[arg(long = "td.port")]
    pub port: Option<u16>,

    /// Whether or not to use TLS. Pass `false` for plain HTTP endpoints.
    #[arg(long = "td.use-ssl")]
    pub use_ssl: Option<bool>,

    /// File to read samples from, one JSON object per line. Use `-` to read from standard input.
    #[arg(long, default_value = "-")]
    pub input: String,

    /// Maximum number of samples imported per request.
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    pub batch_size: u64,
}

/// Configuration values set on the command line.
///
/// Unset flags are skipped, so they never shadow values from the file or the environment.
#[derive(Serialize)]
pub struct FlagOverrides {
    #[serde(rename = "apikey", skip_serializing_if = "Option::is_none")]
    api_key: Option<String>,

    #[serde(rename = "db", skip_serializing_if = "Option::is_none")]
    database: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    table: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    use_ssl: Option<bool>,
}

impl Cli {
    pub fn overrides(&self) -> FlagOverrides {
        FlagOverrides {
            api_key: self.api_key.clone(),
            database: self.database.clone(),
            table: self.table.clone(),
            endpoint: self.endpoint.clone(),
            port: self.port,
            use_ssl: self.use_ssl,
        }
    }
}
