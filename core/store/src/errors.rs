// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("invalid object id '{id}': {reason}")]
    InvalidId { id: String, reason: String },
    #[error("store backend failure: {0}")]
    Backend(String),
}
