//! S3-compatible implementation of [`ObjectStore`] on top of `aws-sdk-s3`.

use std::time::SystemTime;

use aws_sdk_s3::Client;
use tracing::{debug, instrument};

use crate::store::{Listing, ObjectBody, ObjectStore, RemoteObject, StoreError};

/// Object store backed by an S3 (or S3-compatible, e.g. MinIO) bucket.
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    #[must_use]
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build a store from the ambient AWS configuration (environment,
    /// profile, instance metadata). `endpoint` overrides the endpoint URL
    /// for non-AWS deployments.
    pub async fn from_env(bucket: impl Into<String>, endpoint: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(url) = endpoint {
            loader = loader.endpoint_url(url);
        }
        let conf = loader.load().await;
        Self::new(Client::new(&conf), bucket)
    }
}

#[async_trait::async_trait]
impl ObjectStore for S3Store {
    #[instrument(name = "S3Store::list", skip(self))]
    async fn list(&self, prefix: &str, delimiter: &str) -> Result<Listing, StoreError> {
        let mut listing = Listing::default();
        let mut continuation: Option<String> = None;

        // ListObjectsV2 caps each page at 1000 keys; follow continuation
        // tokens so large directories are not silently truncated.
        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .delimiter(delimiter);
            if let Some(token) = continuation.take() {
                req = req.continuation_token(token);
            }

            let resp = req.send().await.map_err(StoreError::transport)?;

            for common in resp.common_prefixes() {
                if let Some(p) = common.prefix() {
                    listing.common_prefixes.push(p.to_owned());
                }
            }
            for obj in resp.contents() {
                let Some(key) = obj.key() else { continue };
                listing.objects.push(RemoteObject {
                    key: key.to_owned(),
                    size: obj.size().and_then(|s| u64::try_from(s).ok()).unwrap_or(0),
                    last_modified: obj
                        .last_modified()
                        .and_then(|dt| SystemTime::try_from(*dt).ok()),
                });
            }

            match resp.next_continuation_token() {
                Some(token) => continuation = Some(token.to_owned()),
                None => break,
            }
        }

        debug!(
            prefixes = listing.common_prefixes.len(),
            objects = listing.objects.len(),
            "listing complete"
        );
        Ok(listing)
    }

    #[instrument(name = "S3Store::get", skip(self))]
    async fn get(&self, key: &str) -> Result<ObjectBody, StoreError> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match e.as_service_error() {
                Some(svc) if svc.is_no_such_key() => StoreError::NotFound,
                _ => StoreError::transport(e),
            })?;

        let stream = futures::stream::try_unfold(resp.body, |mut body| async move {
            match body.try_next().await {
                Ok(Some(chunk)) => Ok(Some((chunk, body))),
                Ok(None) => Ok(None),
                Err(e) => Err(StoreError::transport(e)),
            }
        });

        Ok(Box::pin(stream))
    }
}
