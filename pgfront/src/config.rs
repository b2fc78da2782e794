//! Server configuration.
use std::{borrow::Cow, env::var, fmt};

use crate::common::ByteStr;

/// Largest frame length accepted by default, one byte short of 1 GiB.
pub const DEFAULT_MAX_MESSAGE_LEN: u32 = (1 << 30) - 1;

/// Front end server config.
#[derive(Clone, Debug)]
pub struct Config {
    pub(crate) host: ByteStr,
    pub(crate) port: u16,
    pub(crate) max_message_len: u32,
    pub(crate) server_version: ByteStr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: ByteStr::from_static("127.0.0.1"),
            port: 5432,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            server_version: ByteStr::from_static("16.0"),
        }
    }
}

impl Config {
    /// Retrieve configuration from environment variable.
    ///
    /// It reads:
    /// - `PGFRONT_HOST`
    /// - `PGFRONT_PORT`
    /// - `PGFRONT_MAX_MESSAGE_LEN`
    /// - `PGFRONT_SERVER_VERSION`
    ///
    /// Additionally, it also read `PGFRONT_LISTEN` in `host:port` form to provide missing
    /// host and port before fallback to default value.
    pub fn from_env() -> Config {
        let listen = var("PGFRONT_LISTEN").ok().and_then(|e|Config::parse(&e).ok());
        let def = Config::default();

        let host = match (var("PGFRONT_HOST"),listen.as_ref()) {
            (Ok(ok),_) => ok.into(),
            (Err(_),Some(e)) => e.host.clone(),
            (Err(_),None) => def.host,
        };

        let port = match (var("PGFRONT_PORT"),listen.as_ref()) {
            (Ok(ok),_) => ok.parse().unwrap_or(def.port),
            (Err(_),Some(e)) => e.port,
            (Err(_),None) => def.port,
        };

        let max_message_len = var("PGFRONT_MAX_MESSAGE_LEN")
            .ok()
            .and_then(|e|e.parse().ok())
            .unwrap_or(def.max_message_len);

        let server_version = var("PGFRONT_SERVER_VERSION")
            .map(ByteStr::from)
            .unwrap_or(def.server_version);

        Self { host, port, max_message_len, server_version }
    }

    /// Parse listen address in `host:port` form.
    ///
    /// IPv6 host must be enclosed in brackets, `[::1]:5432`.
    pub fn parse(addr: &str) -> Result<Config, ParseError> {
        Self::parse_inner(ByteStr::copy_from_str(addr))
    }

    fn parse_inner(addr: ByteStr) -> Result<Self, ParseError> {
        let read = addr.as_str();

        let (host, port) = match read.strip_prefix('[') {
            Some(rest) => {
                let Some((host, rest)) = rest.split_once(']') else {
                    return Err(ParseError { reason: "unclosed bracket in host".into() })
                };
                let Some(port) = rest.strip_prefix(':') else {
                    return Err(ParseError { reason: "port missing".into() })
                };
                (host, port)
            }
            None => {
                let Some(pair) = read.rsplit_once(':') else {
                    return Err(ParseError { reason: "port missing".into() })
                };
                pair
            }
        };

        if host.is_empty() {
            return Err(ParseError { reason: "host missing".into() })
        }

        let Ok(port) = port.parse() else {
            return Err(ParseError { reason: "invalid port".into() })
        };

        Ok(Self { host: addr.slice_ref(host), port, ..Default::default() })
    }

    /// Set listen host.
    pub fn host(mut self, host: impl Into<ByteStr>) -> Self {
        self.host = host.into();
        self
    }

    /// Set listen port, `0` picks any free port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the largest accepted frame length.
    pub fn max_message_len(mut self, len: u32) -> Self {
        self.max_message_len = len;
        self
    }

    /// Set the `server_version` reported to clients.
    pub fn server_version(mut self, version: impl Into<ByteStr>) -> Self {
        self.server_version = version.into();
        self
    }

    pub(crate) fn listen_addr(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }
}

impl std::str::FromStr for Config {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Error when parsing listen address.
pub struct ParseError {
    pub(crate) reason: Cow<'static,str>,
}

impl std::error::Error for ParseError { }

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            return f.write_str(&self.reason)
        }
        write!(f, "failed to parse listen address: {}", self.reason)
    }
}

impl fmt::Debug for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_addr() {
        let config = Config::parse("0.0.0.0:6543").unwrap();
        assert_eq!(config.listen_addr(), ("0.0.0.0", 6543));
        assert_eq!(config.max_message_len, DEFAULT_MAX_MESSAGE_LEN);

        let config: Config = "[::1]:5433".parse().unwrap();
        assert_eq!(config.listen_addr(), ("::1", 5433));

        let config: Config = "localhost:0".parse().unwrap();
        assert_eq!(config.listen_addr(), ("localhost", 0));
    }

    #[test]
    fn parse_addr_error() {
        let err = Config::parse("localhost").unwrap_err();
        assert_eq!(format!("{err:#}"), "port missing");

        let err = Config::parse("localhost:port").unwrap_err();
        assert_eq!(err.to_string(), "failed to parse listen address: invalid port");

        assert!(Config::parse(":5432").is_err());
        assert!(Config::parse("[::1:5432").is_err());
    }

    #[test]
    fn builder() {
        let config = Config::default().host("0.0.0.0").port(0).server_version("15.4");
        assert_eq!(config.listen_addr(), ("0.0.0.0", 0));
        assert_eq!(config.server_version, "15.4");
    }
}
