use std::collections::HashSet;

use redlock_common::error::{RedlockError, Result};
use url::Url;

/// Connection descriptor for one lock server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    url: Url,
}

impl ServerDescriptor {
    /// Accepts `redis://[:password@]host[:port][/db]`, `rediss://...` or a
    /// bare `host:port`.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        let target = if value.contains("://") {
            value.to_string()
        } else {
            format!("redis://{value}")
        };

        let url = Url::parse(&target)
            .map_err(|err| RedlockError::Config(format!("invalid server address {value}: {err}")))?;
        if !matches!(url.scheme(), "redis" | "rediss") {
            return Err(RedlockError::Config(format!(
                "unsupported scheme {} in {value}",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(RedlockError::Config(format!("missing host in {value}")));
        }

        Ok(Self { url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// `host:port` without credentials, for logs.
    pub fn endpoint(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        let port = self.url.port().unwrap_or(6379);
        format!("{host}:{port}")
    }
}

/// The ordered set of lock servers a coordinator is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSetConfig {
    pub servers: Vec<ServerDescriptor>,
}

impl ServerSetConfig {
    /// Parses a comma separated server list. Blank entries are skipped and
    /// duplicates collapse onto their first occurrence.
    pub fn parse_list(list: &str) -> Result<Self> {
        let mut entries = list
            .split(',')
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();
        dedupe_preserve_order(&mut entries);

        let servers = entries
            .iter()
            .map(|entry| ServerDescriptor::parse(entry))
            .collect::<Result<Vec<_>>>()?;

        if servers.is_empty() {
            return Err(RedlockError::Config(
                "at least one lock server is required".to_string(),
            ));
        }

        Ok(Self { servers })
    }
}

fn dedupe_preserve_order(values: &mut Vec<String>) {
    let mut seen = HashSet::new();
    values.retain(|item| seen.insert(item.clone()));
}
