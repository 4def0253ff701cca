// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConversationStoreError {
    #[error("conversation not found: {0}")]
    NotFound(String),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("serialization failure: {0}")]
    SerializationFailure(String),
}

pub type Result<T> = std::result::Result<T, ConversationStoreError>;
