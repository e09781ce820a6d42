use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("{var}: invalid value {value:?}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

/// Process settings, read once in `main` and passed down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    /// Login name that acts as an admin.
    pub admin_user: String,
    pub max_connections: usize,
    /// Journal appends between compactions.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "venuebook".into(),
            admin_user: "venuebook".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Config::default();
        Ok(Self {
            bind: lookup("VENUEBOOK_BIND").unwrap_or(d.bind),
            port: parsed(&lookup, "VENUEBOOK_PORT")?.unwrap_or(d.port),
            data_dir: lookup("VENUEBOOK_DATA_DIR").map_or(d.data_dir, PathBuf::from),
            password: lookup("VENUEBOOK_PASSWORD").unwrap_or(d.password),
            admin_user: lookup("VENUEBOOK_ADMIN_USER").unwrap_or(d.admin_user),
            max_connections: parsed(&lookup, "VENUEBOOK_MAX_CONNECTIONS")?
                .unwrap_or(d.max_connections),
            compact_threshold: parsed(&lookup, "VENUEBOOK_COMPACT_THRESHOLD")?
                .unwrap_or(d.compact_threshold),
            metrics_port: parsed(&lookup, "VENUEBOOK_METRICS_PORT")?,
            tls_cert: lookup("VENUEBOOK_TLS_CERT"),
            tls_key: lookup("VENUEBOOK_TLS_KEY"),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("venuebook.journal")
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError { var, value }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.listen_addr(), "0.0.0.0:5433");
        assert_eq!(config.journal_path(), PathBuf::from("./data/venuebook.journal"));
    }

    #[test]
    fn overrides() {
        let config = Config::from_lookup(lookup(&[
            ("VENUEBOOK_PORT", "6543"),
            ("VENUEBOOK_DATA_DIR", "/var/lib/venuebook"),
            ("VENUEBOOK_ADMIN_USER", "ops"),
            ("VENUEBOOK_MAX_CONNECTIONS", " 16 "),
            ("VENUEBOOK_METRICS_PORT", "9090"),
        ]))
        .unwrap();
        assert_eq!(config.port, 6543);
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/venuebook"));
        assert_eq!(config.admin_user, "ops");
        assert_eq!(config.max_connections, 16);
        assert_eq!(config.metrics_port, Some(9090));
        assert_eq!(config.compact_threshold, 1000);
    }

    #[test]
    fn bad_number_names_the_variable() {
        let err = Config::from_lookup(lookup(&[("VENUEBOOK_PORT", "lots")])).unwrap_err();
        assert_eq!(err.var, "VENUEBOOK_PORT");
        assert_eq!(err.to_string(), "VENUEBOOK_PORT: invalid value \"lots\"");
    }
}
