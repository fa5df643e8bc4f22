use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrlError {
    #[error("Empty store URL")]
    Empty,
    #[error("Missing endpoint in URL: {0}")]
    MissingEndpoint(String),
    #[error("Credentials must not be embedded in URL: {0}")]
    EmbeddedCredentials(String),
}

/// A store URL split into scheme, endpoint and key.
///
/// `az://container/dir/file.bin` yields scheme `az`, endpoint `container` and
/// key `/dir/file.bin`. Plain paths and `file://` URLs use scheme `file` with
/// an empty endpoint and the absolute path as key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreUrl {
    pub scheme: String,
    pub endpoint: String,
    pub key: String,
}

impl StoreUrl {
    pub fn parse(s: &str) -> Result<Self, UrlError> {
        Self::parse_relative_to(s, &std::env::current_dir().unwrap_or_default())
    }

    /// Parse, resolving relative local paths against `cwd`.
    pub fn parse_relative_to(s: &str, cwd: &Path) -> Result<Self, UrlError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(UrlError::Empty);
        }

        let (scheme, rest) = match s.split_once("://") {
            Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
            None => ("file".to_string(), s),
        };

        if scheme == "file" {
            let path = cwd.join(rest);
            return Ok(Self {
                scheme,
                endpoint: String::new(),
                key: with_leading_separator(&path.to_string_lossy()),
            });
        }

        let (endpoint, key) = match rest.split_once('/') {
            Some((endpoint, key)) => (endpoint, key),
            None => (rest, ""),
        };
        if endpoint.is_empty() {
            return Err(UrlError::MissingEndpoint(s.to_string()));
        }
        if endpoint.contains('@') {
            return Err(UrlError::EmbeddedCredentials(s.to_string()));
        }

        Ok(Self {
            scheme,
            endpoint: endpoint.to_string(),
            key: with_leading_separator(key),
        })
    }
}

impl std::fmt::Display for StoreUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.endpoint, self.key)
    }
}

fn with_leading_separator(key: &str) -> String {
    if key.starts_with('/') {
        key.to_string()
    } else {
        format!("/{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_object_store_url() {
        let url = StoreUrl::parse("az://models/v1/weights.bin").unwrap();
        assert_eq!(url.scheme, "az");
        assert_eq!(url.endpoint, "models");
        assert_eq!(url.key, "/v1/weights.bin");
        assert_eq!(url.to_string(), "az://models/v1/weights.bin");
    }

    #[test]
    fn test_parse_container_only() {
        let url = StoreUrl::parse("AZ://models").unwrap();
        assert_eq!(url.scheme, "az");
        assert_eq!(url.endpoint, "models");
        assert_eq!(url.key, "/");
    }

    #[test]
    fn test_parse_local_paths() {
        let cwd = Path::new("/work");
        let url = StoreUrl::parse_relative_to("data/a.csv", cwd).unwrap();
        assert_eq!(url.scheme, "file");
        assert_eq!(url.endpoint, "");
        assert_eq!(url.key, "/work/data/a.csv");

        let url = StoreUrl::parse_relative_to("file:///tmp/a.csv", cwd).unwrap();
        assert_eq!(url.key, "/tmp/a.csv");

        let url = StoreUrl::parse_relative_to("/tmp/a.csv", cwd).unwrap();
        assert_eq!(url.key, "/tmp/a.csv");
    }

    #[test]
    fn test_parse_rejects_bad_urls() {
        assert_eq!(StoreUrl::parse(""), Err(UrlError::Empty));
        assert!(matches!(
            StoreUrl::parse("az:///key"),
            Err(UrlError::MissingEndpoint(_))
        ));
        assert!(matches!(
            StoreUrl::parse("az://user:pw@container/key"),
            Err(UrlError::EmbeddedCredentials(_))
        ));
    }
}
