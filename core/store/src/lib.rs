// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

pub mod errors;
mod memory;
mod object_id;
mod traits;

pub use errors::StoreError;
pub use memory::MemoryStore;
pub use object_id::ObjectId;
pub use traits::DocumentStore;
