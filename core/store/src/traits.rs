// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;

use crate::{ObjectId, StoreError};

/// Collection of documents of one type, keyed by [`ObjectId`].
#[async_trait]
pub trait DocumentStore<T>: Send + Sync
where
    T: Clone + Send + Sync + 'static,
{
    /// Stores a new document and returns its freshly allocated id.
    async fn insert(&self, document: T) -> Result<ObjectId, StoreError>;

    async fn find_by_id(&self, id: &ObjectId) -> Result<Option<T>, StoreError>;

    /// Replaces the document stored under `id`. Returns the number of
    /// matched documents, 0 or 1.
    async fn replace_by_id(&self, id: &ObjectId, document: T) -> Result<u64, StoreError>;

    /// Returns the number of deleted documents, 0 or 1.
    async fn delete_by_id(&self, id: &ObjectId) -> Result<u64, StoreError>;

    /// Documents in id order, skipping `offset` of them, at most `limit`
    /// when set.
    async fn list(
        &self,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<(ObjectId, T)>, StoreError>;
}
