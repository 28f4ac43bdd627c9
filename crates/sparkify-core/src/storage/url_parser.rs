//! URL parsing for storage backends.
//!
//! Maps the URL forms accepted in config (`s3a://bucket/key`, `gs://…`,
//! `abfss://…`, absolute local paths, …) onto a backend configuration.

use object_store::path::Path;
use regex::{Captures, Regex};
use snafu::prelude::*;
use std::sync::LazyLock;

use crate::error::{InvalidUrlSnafu, StorageError};

use super::{AzureConfig, GcsConfig, LocalConfig, S3Config};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    S3,
    Gcs,
    Azure,
    Local,
}

/// Patterns in match order; the first hit decides the backend.
static PATTERNS: LazyLock<Vec<(Backend, Regex)>> = LazyLock::new(|| {
    [
        (
            Backend::S3,
            r"^[sS]3[aAnN]?::(?P<protocol>https?)://(?P<endpoint>[^:/]+):(?P<port>\d+)/(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.*))?$",
        ),
        (
            Backend::S3,
            r"^https://s3\.(?P<region>[\w\-]+)\.amazonaws\.com/(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.*))?$",
        ),
        (
            Backend::S3,
            r"^https://(?P<bucket>[a-z0-9\-\.]+)\.s3\.(?P<region>[\w\-]+)\.amazonaws\.com(/(?P<key>.*))?$",
        ),
        (
            Backend::S3,
            r"^[sS]3[aAnN]?://(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.*))?$",
        ),
        (
            Backend::Gcs,
            r"^https://storage\.googleapis\.com/(?P<bucket>[a-z0-9\-_\.]+)(/(?P<key>.*))?$",
        ),
        (
            Backend::Gcs,
            r"^[gG][sS]://(?P<bucket>[a-z0-9\-_\.]+)(/(?P<key>.*))?$",
        ),
        (
            Backend::Azure,
            r"^abfss?://(?P<container>[a-z0-9\-]+)@(?P<account>[a-z0-9]+)\.dfs\.core\.windows\.net(/(?P<key>.*))?$",
        ),
        (
            Backend::Azure,
            r"^https://(?P<account>[a-z0-9]+)\.(blob|dfs)\.core\.windows\.net/(?P<container>[a-z0-9\-]+)(/(?P<key>.*))?$",
        ),
        (Backend::Local, r"^file://(?P<path>/.*)$"),
        (Backend::Local, r"^file:(?P<path>/.*)$"),
        (Backend::Local, r"^(?P<path>/.*)$"),
    ]
    .into_iter()
    .map(|(backend, pattern)| {
        (
            backend,
            Regex::new(pattern).expect("static storage URL pattern is valid"),
        )
    })
    .collect()
});

/// Backend configuration parsed from a storage URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    S3(S3Config),
    Gcs(GcsConfig),
    Azure(AzureConfig),
    Local(LocalConfig),
}

impl BackendConfig {
    /// Parse a URL into a backend configuration.
    pub fn parse_url(url: &str) -> Result<Self, StorageError> {
        let (backend, caps) = PATTERNS
            .iter()
            .find_map(|(backend, re)| re.captures(url).map(|caps| (*backend, caps)))
            .context(InvalidUrlSnafu { url })?;

        let group = |name: &str| caps.name(name).map(|m| m.as_str().to_string());
        let key = key_from(&caps);

        Ok(match backend {
            Backend::S3 => {
                let endpoint = group("endpoint").map(|host| {
                    let protocol = group("protocol").unwrap_or_else(|| "https".to_string());
                    let port = group("port").unwrap_or_else(|| "443".to_string());
                    format!("{protocol}://{host}:{port}")
                });
                BackendConfig::S3(S3Config {
                    endpoint,
                    region: group("region"),
                    bucket: group("bucket").unwrap_or_default(),
                    key,
                })
            }
            Backend::Gcs => BackendConfig::Gcs(GcsConfig {
                bucket: group("bucket").unwrap_or_default(),
                key,
            }),
            Backend::Azure => BackendConfig::Azure(AzureConfig {
                account: group("account").unwrap_or_default(),
                container: group("container").unwrap_or_default(),
                key,
            }),
            Backend::Local => {
                let path = group("path").unwrap_or_default();
                let trimmed = path.trim_end_matches('/');
                BackendConfig::Local(LocalConfig {
                    path: if trimmed.is_empty() {
                        "/".to_string()
                    } else {
                        trimmed.to_string()
                    },
                })
            }
        })
    }

    /// Object key prefix below the bucket/container root, if any.
    pub fn key(&self) -> Option<&Path> {
        match self {
            BackendConfig::S3(c) => c.key.as_ref(),
            BackendConfig::Gcs(c) => c.key.as_ref(),
            BackendConfig::Azure(c) => c.key.as_ref(),
            BackendConfig::Local(_) => None,
        }
    }
}

/// Trailing slashes and an empty key both mean "bucket root".
fn key_from(caps: &Captures) -> Option<Path> {
    caps.name("key")
        .map(|m| m.as_str().trim_matches('/'))
        .filter(|k| !k.is_empty())
        .map(Path::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_s3a_with_trailing_slash() {
        let config = BackendConfig::parse_url("s3a://udacity-dend/").unwrap();
        assert_eq!(
            config,
            BackendConfig::S3(S3Config {
                endpoint: None,
                region: None,
                bucket: "udacity-dend".to_string(),
                key: None,
            })
        );
    }

    #[test]
    fn test_parse_s3_with_key() {
        let config = BackendConfig::parse_url("s3://bucket/lake/output").unwrap();
        assert_eq!(config.key().map(|k| k.as_ref()), Some("lake/output"));
    }

    #[test]
    fn test_parse_s3_path_style_region() {
        match BackendConfig::parse_url("https://s3.us-west-2.amazonaws.com/bucket/k").unwrap() {
            BackendConfig::S3(c) => {
                assert_eq!(c.region.as_deref(), Some("us-west-2"));
                assert_eq!(c.bucket, "bucket");
            }
            other => panic!("expected S3, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_s3_custom_endpoint() {
        match BackendConfig::parse_url("s3::http://localhost:9000/bucket/data").unwrap() {
            BackendConfig::S3(c) => {
                assert_eq!(c.endpoint.as_deref(), Some("http://localhost:9000"));
                assert_eq!(c.bucket, "bucket");
                assert_eq!(c.key.as_ref().map(|k| k.as_ref()), Some("data"));
            }
            other => panic!("expected S3, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_gcs() {
        match BackendConfig::parse_url("gs://my_bucket/prefix").unwrap() {
            BackendConfig::Gcs(c) => assert_eq!(c.bucket, "my_bucket"),
            other => panic!("expected GCS, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_abfss() {
        match BackendConfig::parse_url("abfss://lake@account1.dfs.core.windows.net/out").unwrap() {
            BackendConfig::Azure(c) => {
                assert_eq!(c.account, "account1");
                assert_eq!(c.container, "lake");
            }
            other => panic!("expected Azure, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_local_forms() {
        for url in ["/tmp/lake/", "file:///tmp/lake", "file:/tmp/lake"] {
            assert_eq!(
                BackendConfig::parse_url(url).unwrap(),
                BackendConfig::Local(LocalConfig {
                    path: "/tmp/lake".to_string()
                }),
                "failed for {url}"
            );
        }
    }

    #[test]
    fn test_parse_invalid() {
        let err = BackendConfig::parse_url("relative/path").unwrap_err();
        assert!(matches!(err, StorageError::InvalidUrl { .. }));
    }
}
