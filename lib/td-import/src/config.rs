//! Configuration.

use std::{collections::BTreeMap, fmt, path::Path};

use figment::{
    error::Kind,
    providers::{Env, Format as _, Serialized, Yaml},
    Figment,
};
use http::{uri::Scheme, Uri};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use snafu::{ResultExt as _, Snafu};
use tracing::debug;

/// Default endpoint for bulk imports.
pub const DEFAULT_IMPORT_ENDPOINT: &str = "api-import.treasuredata.com";

/// Keys whose environment values are taken verbatim.
///
/// Other environment values are parsed, so `TD_PORT=8080` becomes a number. Parsing `TD_DB=12345` the same way would
/// reject it as a database name, and parsing `TD_APIKEY=0123` would drop its leading zero.
const VERBATIM_ENV_KEYS: &[&str] = &["apikey", "db", "table", "endpoint"];

const fn default_use_ssl() -> bool {
    true
}

/// A configuration error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ConfigurationError {
    /// Environment variable prefix was empty.
    #[snafu(display("Environment variable prefix must not be empty."))]
    EmptyPrefix,

    /// A configuration file that was required does not exist.
    #[snafu(display("Configuration file '{}' does not exist.", path))]
    MissingFile {
        /// Path to the configuration file.
        path: String,
    },

    /// A required field was missing or empty.
    #[snafu(display("Missing required configuration field '{}'.", field))]
    MissingField {
        /// Name of the missing field.
        field: &'static str,
    },

    /// The endpoint and port do not form a valid URI authority.
    #[snafu(display("Invalid import endpoint '{}'.", endpoint))]
    InvalidEndpoint {
        /// Endpoint, including the port.
        endpoint: String,

        /// Error source.
        source: http::Error,
    },

    /// A field's value had an unexpected data type.
    #[snafu(display(
        "Expected value for field '{}' to be '{}', got '{}' instead.",
        field,
        expected_ty,
        actual_ty
    ))]
    InvalidField {
        /// Period-separated path to the field.
        field: String,

        /// Expected data type.
        expected_ty: String,

        /// Actual data type.
        actual_ty: String,
    },

    /// Configuration could not be loaded.
    #[snafu(display("Failed to load configuration: {}", source))]
    Load {
        /// Error source.
        source: Box<figment::Error>,
    },
}

impl From<figment::Error> for ConfigurationError {
    fn from(e: figment::Error) -> Self {
        match e.kind {
            Kind::InvalidType(actual_ty, expected_ty) => Self::InvalidField {
                field: e.path.join("."),
                expected_ty,
                actual_ty: actual_ty.to_string(),
            },
            _ => Self::Load { source: Box::new(e) },
        }
    }
}

/// Destination and credentials for importing into Treasure Data.
///
/// Field names match the `td.*` command-line flags: `apikey`, `db`, and `table` (so `TD_APIKEY`, `TD_DB`, and
/// `TD_TABLE` when loaded from the environment with a `TD` prefix).
///
/// Required fields default to empty, so that loading never fails on their absence. They are checked by
/// [`validate`][Self::validate] when a client is bootstrapped.
#[derive(Clone, Deserialize)]
pub struct TreasureDataConfiguration {
    /// API key used to authenticate import requests.
    #[serde(default, rename = "apikey")]
    api_key: String,

    /// Database containing the destination table.
    #[serde(default, rename = "db")]
    database: String,

    /// Destination table.
    #[serde(default)]
    table: String,

    /// Host to send import requests to.
    ///
    /// Defaults to `api-import.treasuredata.com`.
    #[serde(default)]
    endpoint: Option<String>,

    /// Port to send import requests to.
    ///
    /// Defaults to 443 when TLS is enabled, and 80 otherwise.
    #[serde(default)]
    port: Option<u16>,

    /// Whether or not to use TLS.
    ///
    /// Defaults to `true`.
    #[serde(default = "default_use_ssl")]
    use_ssl: bool,
}

impl TreasureDataConfiguration {
    /// Creates a new `TreasureDataConfiguration` for the given API key and destination table.
    pub fn new<K, D, T>(api_key: K, database: D, table: T) -> Self
    where
        K: Into<String>,
        D: Into<String>,
        T: Into<String>,
    {
        Self {
            api_key: api_key.into(),
            database: database.into(),
            table: table.into(),
            endpoint: None,
            port: None,
            use_ssl: default_use_ssl(),
        }
    }

    /// Sets the host to send import requests to.
    pub fn with_endpoint<E>(mut self, endpoint: E) -> Self
    where
        E: Into<String>,
    {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the port to send import requests to.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets whether or not to use TLS.
    pub fn with_ssl(mut self, use_ssl: bool) -> Self {
        self.use_ssl = use_ssl;
        self
    }

    /// Returns the API key.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Returns the database name.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Returns the table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// If the API key, database, or table is empty, or if the endpoint and port do not form a valid URI, an error is
    /// returned.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.api_key.is_empty() {
            return MissingField { field: "td.apikey" }.fail();
        }
        if self.database.is_empty() {
            return MissingField { field: "td.db" }.fail();
        }
        if self.table.is_empty() {
            return MissingField { field: "td.table" }.fail();
        }

        self.base_uri().map(|_| ())
    }

    /// Returns the base URI that import requests are sent to.
    ///
    /// # Errors
    ///
    /// If the endpoint and port do not form a valid URI, an error is returned.
    pub fn base_uri(&self) -> Result<Uri, ConfigurationError> {
        let (scheme, default_port) = if self.use_ssl {
            (Scheme::HTTPS, 443)
        } else {
            (Scheme::HTTP, 80)
        };
        let host = self.endpoint.as_deref().unwrap_or(DEFAULT_IMPORT_ENDPOINT);
        let endpoint = format!("{}:{}", host, self.port.unwrap_or(default_port));

        Uri::builder()
            .scheme(scheme)
            .authority(endpoint.as_str())
            .path_and_query("/")
            .build()
            .context(InvalidEndpoint { endpoint: &endpoint })
    }
}

impl fmt::Debug for TreasureDataConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreasureDataConfiguration")
            .field("api_key", &"<redacted>")
            .field("database", &self.database)
            .field("table", &self.table)
            .field("endpoint", &self.endpoint)
            .field("port", &self.port)
            .field("use_ssl", &self.use_ssl)
            .finish()
    }
}

/// A configuration loader that can pull from various sources.
///
/// Sources added later take precedence over sources added earlier. A typical setup loads an optional YAML file, then
/// environment variables, then explicit overrides such as command-line flags.
#[derive(Default)]
pub struct ConfigurationLoader {
    figment: Figment,
}

impl ConfigurationLoader {
    /// Loads the given YAML configuration file.
    ///
    /// # Errors
    ///
    /// If the file does not exist, an error is returned. Parse errors are reported when the configuration is extracted.
    pub fn from_yaml<P>(mut self, path: P) -> Result<Self, ConfigurationError>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        if !path.is_file() {
            return MissingFile {
                path: path.display().to_string(),
            }
            .fail();
        }

        self.figment = self.figment.merge(Yaml::file(path));
        Ok(self)
    }

    /// Loads the given YAML configuration file if it exists.
    pub fn try_from_yaml<P>(self, path: P) -> Self
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        if !path.is_file() {
            debug!(file_path = %path.display(), "Configuration file does not exist. Ignoring.");
            return self;
        }

        Self {
            figment: self.figment.merge(Yaml::file(path)),
        }
    }

    /// Loads configuration from environment variables.
    ///
    /// The prefix given will have an underscore appended to it if it does not already end with one. For example, with a
    /// prefix of `TD`, the variable `TD_APIKEY` sets the field `apikey`.
    ///
    /// The values of `apikey`, `db`, `table`, and `endpoint` are always read as strings. All other values are parsed,
    /// so that numbers and booleans can be set from the environment.
    ///
    /// # Errors
    ///
    /// If the prefix is empty, an error is returned.
    pub fn from_environment(mut self, prefix: &'static str) -> Result<Self, ConfigurationError> {
        if prefix.is_empty() {
            return Err(ConfigurationError::EmptyPrefix);
        }

        let prefix = if prefix.ends_with('_') {
            prefix.to_string()
        } else {
            format!("{}_", prefix)
        };

        let env = Env::prefixed(&prefix);
        let verbatim = env
            .clone()
            .only(VERBATIM_ENV_KEYS)
            .iter()
            .map(|(key, value)| (key.as_str().to_ascii_lowercase(), value))
            .collect::<BTreeMap<_, _>>();

        self.figment = self
            .figment
            .merge(env.ignore(VERBATIM_ENV_KEYS))
            .merge(Serialized::defaults(verbatim));
        Ok(self)
    }

    /// Adds explicit overrides, such as values from command-line flags.
    ///
    /// Fields of `overrides` that serialize to nothing (for example, `None` values skipped during serialization) leave
    /// the existing value untouched.
    pub fn with_overrides<T>(self, overrides: T) -> Self
    where
        T: Serialize,
    {
        Self {
            figment: self.figment.merge(Serialized::defaults(overrides)),
        }
    }

    /// Extracts a typed value from the loaded configuration.
    ///
    /// # Errors
    ///
    /// If any source could not be read or parsed, or a value does not match the expected type, an error is returned.
    pub fn into_typed<T>(self) -> Result<T, ConfigurationError>
    where
        T: DeserializeOwned,
    {
        self.figment.extract().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[derive(Serialize)]
    struct Overrides {
        #[serde(skip_serializing_if = "Option::is_none")]
        table: Option<String>,
    }

    #[test]
    fn validate_names_missing_field() {
        let cases = [
            (TreasureDataConfiguration::new("", "db", "table"), "td.apikey"),
            (TreasureDataConfiguration::new("key", "", "table"), "td.db"),
            (TreasureDataConfiguration::new("key", "db", ""), "td.table"),
        ];

        for (config, expected) in cases {
            match config.validate() {
                Err(ConfigurationError::MissingField { field }) => assert_eq!(field, expected),
                other => panic!("expected missing field '{}', got {:?}", expected, other),
            }
        }

        assert!(TreasureDataConfiguration::new("key", "db", "table").validate().is_ok());
    }

    #[test]
    fn base_uri_defaults() {
        let config = TreasureDataConfiguration::new("key", "db", "table");
        assert_eq!(config.base_uri().unwrap().to_string(), "https://api-import.treasuredata.com:443/");

        let config = config.with_ssl(false);
        assert_eq!(config.base_uri().unwrap().to_string(), "http://api-import.treasuredata.com:80/");
    }

    #[test]
    fn base_uri_overrides() {
        let config = TreasureDataConfiguration::new("key", "db", "table")
            .with_endpoint("127.0.0.1")
            .with_port(8080)
            .with_ssl(false);
        assert_eq!(config.base_uri().unwrap().to_string(), "http://127.0.0.1:8080/");
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        let config = TreasureDataConfiguration::new("key", "db", "table").with_endpoint("http://bad host");
        assert!(matches!(config.validate(), Err(ConfigurationError::InvalidEndpoint { .. })));
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = TreasureDataConfiguration::new("super-secret", "db", "table");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn loader_layers_sources() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "td.yaml",
                "apikey: file-key\ndb: file_db\ntable: file_table\nendpoint: localhost\nuse_ssl: false\n",
            )?;
            jail.set_env("TD_DB", "env_db");

            let config = ConfigurationLoader::default()
                .from_yaml("td.yaml")
                .unwrap()
                .from_environment("TD")
                .unwrap()
                .with_overrides(Overrides {
                    table: Some("flag_table".to_string()),
                })
                .into_typed::<TreasureDataConfiguration>()
                .unwrap();

            assert_eq!(config.api_key(), "file-key");
            assert_eq!(config.database(), "env_db");
            assert_eq!(config.table(), "flag_table");
            assert_eq!(config.base_uri().unwrap().to_string(), "http://localhost:80/");
            Ok(())
        });
    }

    #[test]
    fn loader_skipped_overrides_keep_existing_values() {
        Jail::expect_with(|jail| {
            jail.set_env("TD_APIKEY", "env/key");
            jail.set_env("TD_TABLE", "env_table");

            let config = ConfigurationLoader::default()
                .from_environment("TD_")
                .unwrap()
                .with_overrides(Overrides { table: None })
                .into_typed::<TreasureDataConfiguration>()
                .unwrap();

            assert_eq!(config.api_key(), "env/key");
            assert_eq!(config.table(), "env_table");
            assert!(matches!(
                config.validate(),
                Err(ConfigurationError::MissingField { field: "td.db" })
            ));
            Ok(())
        });
    }

    #[test]
    fn loader_reads_string_fields_verbatim_from_environment() {
        Jail::expect_with(|jail| {
            jail.set_env("TD_APIKEY", "0123456789");
            jail.set_env("TD_DB", "12345");
            jail.set_env("TD_TABLE", "2024");
            jail.set_env("TD_PORT", "8080");
            jail.set_env("TD_USE_SSL", "false");

            let config = ConfigurationLoader::default()
                .from_environment("TD")
                .unwrap()
                .into_typed::<TreasureDataConfiguration>()
                .unwrap();

            assert_eq!(config.api_key(), "0123456789");
            assert_eq!(config.database(), "12345");
            assert_eq!(config.table(), "2024");
            assert_eq!(config.base_uri().unwrap().to_string(), "http://api-import.treasuredata.com:8080/");
            Ok(())
        });
    }

    #[test]
    fn loader_environment_overrides_file_for_verbatim_fields() {
        Jail::expect_with(|jail| {
            jail.create_file("td.yaml", "apikey: file-key\ndb: file_db\ntable: file_table\n")?;
            jail.set_env("TD_TABLE", "007");

            let config = ConfigurationLoader::default()
                .from_yaml("td.yaml")
                .unwrap()
                .from_environment("TD")
                .unwrap()
                .into_typed::<TreasureDataConfiguration>()
                .unwrap();

            assert_eq!(config.database(), "file_db");
            assert_eq!(config.table(), "007");
            Ok(())
        });
    }

    #[test]
    fn loader_rejects_invalid_port() {
        Jail::expect_with(|jail| {
            jail.set_env("TD_PORT", "not-a-port");

            let result = ConfigurationLoader::default()
                .from_environment("TD")
                .unwrap()
                .into_typed::<TreasureDataConfiguration>();

            assert!(matches!(result, Err(ConfigurationError::InvalidField { .. })));
            Ok(())
        });
    }

    #[test]
    fn loader_requires_existing_file() {
        let result = ConfigurationLoader::default().from_yaml("/nonexistent/td.yaml");
        assert!(matches!(result, Err(ConfigurationError::MissingFile { .. })));

        let loader = ConfigurationLoader::default().try_from_yaml("/nonexistent/td.yaml");
        let config = loader.into_typed::<TreasureDataConfiguration>().unwrap();
        assert!(config.api_key().is_empty());
    }

    #[test]
    fn empty_prefix_is_rejected() {
        assert!(matches!(
            ConfigurationLoader::default().from_environment(""),
            Err(ConfigurationError::EmptyPrefix)
        ));
    }
}
