// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::trace;

use crate::{DocumentStore, ObjectId, StoreError};

/// In-process [`DocumentStore`] over an ordered map.
#[derive(Debug)]
pub struct MemoryStore<T> {
    documents: RwLock<BTreeMap<ObjectId, T>>,
    max_documents: Option<usize>,
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self {
            documents: RwLock::new(BTreeMap::new()),
            max_documents: None,
        }
    }
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the number of stored documents; inserts beyond it fail with
    /// [`StoreError::Backend`].
    pub fn with_max_documents(self, max_documents: usize) -> Self {
        Self {
            max_documents: Some(max_documents),
            ..self
        }
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }
}

#[async_trait]
impl<T> DocumentStore<T> for MemoryStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn insert(&self, document: T) -> Result<ObjectId, StoreError> {
        let mut documents = self.documents.write();
        if let Some(max) = self.max_documents {
            if documents.len() >= max {
                return Err(StoreError::Backend(format!(
                    "store is full ({max} documents)"
                )));
            }
        }

        let mut id = ObjectId::new();
        while documents.contains_key(&id) {
            id = ObjectId::new();
        }
        documents.insert(id, document);
        trace!(%id, "document inserted");
        Ok(id)
    }

    async fn find_by_id(&self, id: &ObjectId) -> Result<Option<T>, StoreError> {
        Ok(self.documents.read().get(id).cloned())
    }

    async fn replace_by_id(&self, id: &ObjectId, document: T) -> Result<u64, StoreError> {
        match self.documents.write().get_mut(id) {
            Some(slot) => {
                *slot = document;
                trace!(%id, "document replaced");
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_by_id(&self, id: &ObjectId) -> Result<u64, StoreError> {
        let deleted = self.documents.write().remove(id).is_some();
        if deleted {
            trace!(%id, "document deleted");
        }
        Ok(u64::from(deleted))
    }

    async fn list(
        &self,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<(ObjectId, T)>, StoreError> {
        let documents = self.documents.read();
        let page = documents
            .iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .map(|(id, document)| (*id, document.clone()))
            .collect();
        Ok(page)
    }
}
