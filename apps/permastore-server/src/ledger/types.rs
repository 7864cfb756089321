//! Wire and domain types for the remote ledger

use base64::Engine;
use serde::{Deserialize, Serialize};

use super::BASE64_URL;
use crate::units::{natural_size, winston_to_ar};

// ============================================================================
// Tags
// ============================================================================

/// A name/value pair attached to a package manifest or a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A tag as it travels in a transaction header (base64url fields)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedTag {
    pub name: String,
    pub value: String,
}

impl EncodedTag {
    pub fn encode(tag: &Tag) -> Self {
        Self {
            name: BASE64_URL.encode(tag.name.as_bytes()),
            value: BASE64_URL.encode(tag.value.as_bytes()),
        }
    }

    /// Decode the raw bytes of the name and value.
    pub fn raw(&self) -> Result<(Vec<u8>, Vec<u8>), base64::DecodeError> {
        Ok((BASE64_URL.decode(&self.name)?, BASE64_URL.decode(&self.value)?))
    }

    /// Decode into a readable tag; undecodable or non-UTF-8 bytes are replaced lossily.
    pub fn decode_lossy(&self) -> Tag {
        let decode = |field: &str| match BASE64_URL.decode(field) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => field.to_string(),
        };
        Tag {
            name: decode(&self.name),
            value: decode(&self.value),
        }
    }
}

// ============================================================================
// Transaction Header
// ============================================================================

/// Format-2 transaction header as accepted by `POST /tx`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionHeader {
    pub format: u8,
    pub id: String,
    pub last_tx: String,
    pub owner: String,
    pub tags: Vec<EncodedTag>,
    pub target: String,
    pub quantity: String,
    #[serde(default)]
    pub data: String,
    pub data_size: String,
    pub data_root: String,
    pub reward: String,
    pub signature: String,
}

/// One chunk of transaction data, as accepted by `POST /chunk`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub data_root: String,
    pub data_size: String,
    pub data_path: String,
    /// Index of the last byte of this chunk within the transaction data
    pub offset: String,
    pub chunk: String,
}

// ============================================================================
// Status
// ============================================================================

/// Confirmation state of a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Accepted but not yet mined
    Pending,
    /// Included in a block
    Confirmed {
        block_height: u64,
        block_indep_hash: String,
        number_of_confirmations: u64,
    },
    /// Unknown to the store
    NotFound,
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Confirmed {
                number_of_confirmations,
                ..
            } => write!(f, "confirmed ({} confirmations)", number_of_confirmations),
            Self::NotFound => write!(f, "not found"),
        }
    }
}

// ============================================================================
// Search
// ============================================================================

/// Transaction search criteria
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchQuery {
    Owner(String),
    Tag { name: String, value: String },
}

/// Maximum number of ids returned by one search
pub const SEARCH_LIMIT: usize = 100;

// ============================================================================
// Metadata
// ============================================================================

/// Readable view of a transaction header
#[derive(Debug, Clone, Serialize)]
pub struct TransactionMetadata {
    pub format: u8,
    pub id: String,
    pub last_tx: String,
    pub owner: String,
    pub target: String,
    pub quantity: String,
    pub data_root: String,
    pub data_size_bytes: String,
    pub data_size_natural_size: String,
    pub reward_winston: String,
    pub reward_ar: Option<f64>,
    pub tags: Vec<Tag>,
    pub signature: String,
}

impl From<TransactionHeader> for TransactionMetadata {
    fn from(header: TransactionHeader) -> Self {
        let data_size_natural_size = header
            .data_size
            .parse::<u64>()
            .map(natural_size)
            .unwrap_or_else(|_| header.data_size.clone());
        let reward_ar = winston_to_ar(&header.reward).ok();
        let tags = header.tags.iter().map(EncodedTag::decode_lossy).collect();

        Self {
            format: header.format,
            id: header.id,
            last_tx: header.last_tx,
            owner: header.owner,
            target: header.target,
            quantity: header.quantity,
            data_root: header.data_root,
            data_size_bytes: header.data_size,
            data_size_natural_size,
            reward_winston: header.reward,
            reward_ar,
            tags,
            signature: header.signature,
        }
    }
}
