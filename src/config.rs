//! Mount specification parsing.

use std::path::PathBuf;

/// Errors produced while parsing a bucket URL.
#[derive(Debug, thiserror::Error)]
pub enum MountSpecError {
    #[error("unsupported scheme {scheme:?}, expected \"s3\"")]
    UnsupportedScheme { scheme: String },

    #[error("missing scheme, expected a URL like s3://bucket/prefix")]
    MissingScheme,

    #[error("missing bucket name in {url:?}")]
    MissingBucket { url: String },
}

/// A parsed `s3://bucket[/prefix]` mount target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub bucket: String,
    /// Key prefix within the bucket. Either empty or delimiter-terminated.
    pub prefix: String,
}

impl MountSpec {
    pub fn parse(url: &str) -> Result<Self, MountSpecError> {
        let Some((scheme, rest)) = url.split_once("://") else {
            return Err(MountSpecError::MissingScheme);
        };
        if scheme != "s3" {
            return Err(MountSpecError::UnsupportedScheme {
                scheme: scheme.to_owned(),
            });
        }

        let (bucket, prefix) = match rest.split_once('/') {
            Some((bucket, prefix)) => (bucket, prefix.trim_matches('/')),
            None => (rest, ""),
        };
        if bucket.is_empty() {
            return Err(MountSpecError::MissingBucket {
                url: url.to_owned(),
            });
        }

        let mut prefix = prefix.to_owned();
        if !prefix.is_empty() {
            prefix.push('/');
        }

        Ok(Self {
            bucket: bucket.to_owned(),
            prefix,
        })
    }

    /// Local mirror directory for this mount, namespaced per bucket and
    /// prefix so two mounts never share state.
    #[must_use]
    pub fn mirror_root(&self) -> PathBuf {
        let mut root = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
        root.push("bucket-fs");
        root.push(&self.bucket);
        for segment in self.prefix.split('/').filter(|s| !s.is_empty()) {
            root.push(segment);
        }
        root
    }
}
