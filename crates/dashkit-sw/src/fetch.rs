//! Network access seam.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::request::{FetchRequest, FetchResponse};

/// Performs network requests on behalf of the router.
///
/// `Err` means the request was rejected before a response arrived (offline,
/// DNS, connection refused). HTTP error statuses are `Ok` responses.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse>;
}

#[async_trait]
impl<F: Fetcher + ?Sized> Fetcher for Arc<F> {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        (**self).fetch(request).await
    }
}
