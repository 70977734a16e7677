//! Origin resolution
//!
//! Turns an origin descriptor string into a structured target. Resolution is
//! purely syntactic: no network or filesystem access happens here.

use std::path::PathBuf;
use thiserror::Error;
use url::Url;

/// Error returned when an origin descriptor is not a well-formed URL
#[derive(Debug, Error)]
#[error("invalid origin URL '{descriptor}': {source}")]
pub struct InvalidOriginError {
    descriptor: String,
    #[source]
    source: url::ParseError,
}

/// A resolved forwarding target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// An HTTP(S) upstream, used verbatim as the base URL
    Network(Url),
    /// A local unix domain socket path (`unix://<path>` descriptors)
    UnixSocket(PathBuf),
}

impl Origin {
    /// Resolve an origin descriptor.
    ///
    /// A `unix` scheme yields the URL's path component as a filesystem path;
    /// any other scheme yields the URL itself.
    pub fn resolve(descriptor: &str) -> Result<Self, InvalidOriginError> {
        let url = Url::parse(descriptor).map_err(|source| InvalidOriginError {
            descriptor: descriptor.to_string(),
            source,
        })?;

        if url.scheme() == "unix" {
            Ok(Origin::UnixSocket(PathBuf::from(url.path())))
        } else {
            Ok(Origin::Network(url))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_unix_descriptor_resolves_to_socket_path() {
        let origin = Origin::resolve("unix:///tmp/app.sock").unwrap();
        assert_eq!(origin, Origin::UnixSocket(PathBuf::from("/tmp/app.sock")));
    }

    #[test]
    fn test_http_descriptor_resolves_to_network() {
        let origin = Origin::resolve("http://localhost:9000").unwrap();
        match origin {
            Origin::Network(url) => {
                assert_eq!(url.scheme(), "http");
                assert_eq!(url.host_str(), Some("localhost"));
                assert_eq!(url.port(), Some(9000));
            }
            other => panic!("expected network origin, got {:?}", other),
        }
    }

    #[test]
    fn test_https_descriptor_keeps_base_path() {
        let origin = Origin::resolve("https://internal.example.com/api").unwrap();
        match origin {
            Origin::Network(url) => {
                assert_eq!(url.scheme(), "https");
                assert_eq!(url.path(), "/api");
            }
            other => panic!("expected network origin, got {:?}", other),
        }
    }

    #[test]
    fn test_unix_socket_path_in_deeper_directory() {
        let origin = Origin::resolve("unix:///var/run/web/app.sock").unwrap();
        assert_eq!(
            origin,
            Origin::UnixSocket(Path::new("/var/run/web/app.sock").to_path_buf())
        );
    }

    #[test]
    fn test_malformed_descriptor_is_rejected() {
        assert!(Origin::resolve("not a url").is_err());
        assert!(Origin::resolve("").is_err());
    }
}
