//! Transaction headers
//!
//! A transaction binds the owner's public key, the data size and data root
//! of an archive, the transport tags, the reward and the anchor, and is
//! signed over the deep hash of those fields before anything is transmitted.

use base64::Engine;
use sha2::{Digest, Sha256};

use super::deep_hash::{deep_hash, DeepHashItem, DEEP_HASH_SIZE};
use super::merkle::ChunkLayout;
use super::types::{ChunkPayload, EncodedTag, Tag, TransactionHeader};
use super::uploader::UploadError;
use super::BASE64_URL;
use crate::identity::Identity;

/// Header format produced by this client
pub const TRANSACTION_FORMAT: u8 = 2;

/// A signed transaction together with its chunk layout
#[derive(Debug, Clone)]
pub struct Transaction {
    header: TransactionHeader,
    layout: ChunkLayout,
}

impl Transaction {
    /// Build and sign a data transaction.
    pub fn sign(
        identity: &Identity,
        layout: ChunkLayout,
        anchor: &str,
        reward: &str,
        tags: &[Tag],
    ) -> Result<Self, UploadError> {
        let mut header = TransactionHeader {
            format: TRANSACTION_FORMAT,
            id: String::new(),
            last_tx: anchor.to_string(),
            owner: BASE64_URL.encode(identity.owner()),
            tags: tags.iter().map(EncodedTag::encode).collect(),
            target: String::new(),
            quantity: "0".to_string(),
            data: String::new(),
            data_size: layout.data_size.to_string(),
            data_root: BASE64_URL.encode(layout.data_root),
            reward: reward.to_string(),
            signature: String::new(),
        };

        let message = signature_message(&header)
            .map_err(|e| UploadError::InvalidHeader(e.to_string()))?;
        let signature = identity.sign(&message)?;

        header.id = BASE64_URL.encode(Sha256::digest(&signature));
        header.signature = BASE64_URL.encode(&signature);

        Ok(Self { header, layout })
    }

    /// Transaction id: base64url(SHA-256(signature))
    pub fn id(&self) -> &str {
        &self.header.id
    }

    pub fn header(&self) -> &TransactionHeader {
        &self.header
    }

    pub fn layout(&self) -> &ChunkLayout {
        &self.layout
    }

    /// Number of chunks to transmit
    pub fn chunk_count(&self) -> usize {
        self.layout.chunks.len()
    }

    /// Wrap the bytes of chunk `index` with its proof for transmission.
    pub fn chunk_payload(&self, index: usize, data: &[u8]) -> Option<ChunkPayload> {
        let proof = self.layout.proofs.get(index)?;
        Some(ChunkPayload {
            data_root: self.header.data_root.clone(),
            data_size: self.header.data_size.clone(),
            data_path: BASE64_URL.encode(&proof.proof),
            offset: proof.offset.to_string(),
            chunk: BASE64_URL.encode(data),
        })
    }
}

/// Deep hash of the signed fields of a format-2 header.
pub fn signature_message(
    header: &TransactionHeader,
) -> Result<[u8; DEEP_HASH_SIZE], base64::DecodeError> {
    let tags = header
        .tags
        .iter()
        .map(|tag| {
            let (name, value) = tag.raw()?;
            Ok(DeepHashItem::List(vec![
                DeepHashItem::Blob(name),
                DeepHashItem::Blob(value),
            ]))
        })
        .collect::<Result<Vec<_>, base64::DecodeError>>()?;

    let item = DeepHashItem::List(vec![
        DeepHashItem::blob(header.format.to_string()),
        DeepHashItem::Blob(BASE64_URL.decode(&header.owner)?),
        DeepHashItem::Blob(BASE64_URL.decode(&header.target)?),
        DeepHashItem::blob(header.quantity.as_bytes()),
        DeepHashItem::blob(header.reward.as_bytes()),
        DeepHashItem::Blob(BASE64_URL.decode(&header.last_tx)?),
        DeepHashItem::List(tags),
        DeepHashItem::blob(header.data_size.as_bytes()),
        DeepHashItem::Blob(BASE64_URL.decode(&header.data_root)?),
    ]);

    Ok(deep_hash(&item))
}
