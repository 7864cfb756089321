//! In-memory ledger for tests
//!
//! Behaves like a strict gateway: headers must carry a valid signature and
//! id, chunks are reassembled by offset, duplicates are rejected, and the
//! reassembled data must reproduce the signed data root and proofs.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use base64::Engine;
use parking_lot::Mutex;
use rsa::pss::{Signature, VerifyingKey};
use rsa::signature::Verifier;
use rsa::{BigUint, RsaPublicKey};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use super::client::{LedgerClient, LedgerError};
use super::merkle::ChunkLayout;
use super::transaction::signature_message;
use super::types::{
    ChunkPayload, EncodedTag, SearchQuery, Tag, TransactionHeader, TransactionStatus,
};
use super::BASE64_URL;

const DEFAULT_BALANCE: &str = "1000000000000";

struct PendingData {
    size: u64,
    /// offset -> (chunk bytes, data path)
    chunks: BTreeMap<u64, (Vec<u8>, Vec<u8>)>,
}

#[derive(Default)]
struct State {
    balances: HashMap<String, String>,
    headers: HashMap<String, TransactionHeader>,
    /// data_root -> chunks received so far
    pending: HashMap<String, PendingData>,
    /// data_root -> complete data
    complete: HashMap<String, Vec<u8>>,
    chunks_received: usize,
    fail_chunks_after: Option<usize>,
    offline: bool,
    status_unavailable: bool,
}

/// A ledger held in memory
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<State>,
}

fn rejected(reason: impl Into<String>) -> LedgerError {
    LedgerError::Status {
        status: 400,
        body: reason.into(),
    }
}

fn unavailable() -> LedgerError {
    LedgerError::Status {
        status: 503,
        body: "gateway unavailable".to_string(),
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_balance(&self, address: &str, winston: &str) {
        self.state
            .lock()
            .balances
            .insert(address.to_string(), winston.to_string());
    }

    /// Reject every chunk after the first `n`.
    pub fn fail_chunks_after(&self, n: usize) {
        self.state.lock().fail_chunks_after = Some(n);
    }

    /// Fail every request as an unreachable gateway would.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Fail status queries only.
    pub fn set_status_unavailable(&self, unavailable: bool) {
        self.state.lock().status_unavailable = unavailable;
    }

    pub fn chunks_received(&self) -> usize {
        self.state.lock().chunks_received
    }

    pub fn transactions_posted(&self) -> usize {
        self.state.lock().headers.len()
    }

    /// Complete data of a transaction, once every chunk has arrived.
    pub fn data(&self, id: &str) -> Option<Vec<u8>> {
        let state = self.state.lock();
        let header = state.headers.get(id)?;
        state.complete.get(&header.data_root).cloned()
    }

    /// Store bytes directly under a fresh id, bypassing signing.
    pub fn insert_data(&self, data: &[u8], tags: &[Tag]) -> String {
        let layout = ChunkLayout::from_bytes(data);
        let mut state = self.state.lock();

        let mut hasher = Sha256::new();
        hasher.update(data);
        hasher.update(state.headers.len().to_be_bytes());
        let id = BASE64_URL.encode(hasher.finalize());

        let header = TransactionHeader {
            format: 2,
            id: id.clone(),
            last_tx: String::new(),
            owner: String::new(),
            tags: tags.iter().map(EncodedTag::encode).collect(),
            target: String::new(),
            quantity: "0".to_string(),
            data: String::new(),
            data_size: data.len().to_string(),
            data_root: BASE64_URL.encode(layout.data_root),
            reward: "0".to_string(),
            signature: String::new(),
        };

        state.complete.insert(header.data_root.clone(), data.to_vec());
        state.headers.insert(id.clone(), header);
        id
    }

    fn check_online(&self) -> Result<(), LedgerError> {
        if self.state.lock().offline {
            return Err(unavailable());
        }
        Ok(())
    }
}

fn verify_header(header: &TransactionHeader) -> Result<(), LedgerError> {
    let decode = |field: &str| BASE64_URL.decode(field).map_err(|e| rejected(e.to_string()));

    let owner = decode(&header.owner)?;
    let signature = decode(&header.signature)?;

    if BASE64_URL.encode(Sha256::digest(&signature)) != header.id {
        return Err(rejected("id does not match signature"));
    }

    let key = RsaPublicKey::new(BigUint::from_bytes_be(&owner), BigUint::from(65537u32))
        .map_err(|e| rejected(e.to_string()))?;
    let signature =
        Signature::try_from(signature.as_slice()).map_err(|e| rejected(e.to_string()))?;
    let message = signature_message(header).map_err(|e| rejected(e.to_string()))?;

    VerifyingKey::<Sha256>::new(key)
        .verify(&message, &signature)
        .map_err(|_| rejected("invalid signature"))
}

fn owner_address(header: &TransactionHeader) -> Option<String> {
    let owner = BASE64_URL.decode(&header.owner).ok()?;
    Some(BASE64_URL.encode(Sha256::digest(owner)))
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn price(&self, size: u64) -> Result<String, LedgerError> {
        self.check_online()?;
        Ok((size * 1000 + 1000).to_string())
    }

    async fn balance(&self, address: &str) -> Result<String, LedgerError> {
        self.check_online()?;
        let state = self.state.lock();
        Ok(state
            .balances
            .get(address)
            .cloned()
            .unwrap_or_else(|| DEFAULT_BALANCE.to_string()))
    }

    async fn last_transaction(&self, address: &str) -> Result<String, LedgerError> {
        self.check_online()?;
        let state = self.state.lock();
        Ok(state
            .headers
            .values()
            .find(|h| owner_address(h).as_deref() == Some(address))
            .map(|h| h.id.clone())
            .unwrap_or_default())
    }

    async fn transaction_anchor(&self) -> Result<String, LedgerError> {
        self.check_online()?;
        Ok(BASE64_URL.encode([7u8; 32]))
    }

    async fn transaction_status(&self, id: &str) -> Result<TransactionStatus, LedgerError> {
        self.check_online()?;
        let state = self.state.lock();
        if state.status_unavailable {
            return Err(unavailable());
        }
        let Some(header) = state.headers.get(id) else {
            return Ok(TransactionStatus::NotFound);
        };
        if state.complete.contains_key(&header.data_root) {
            Ok(TransactionStatus::Confirmed {
                block_height: 1,
                block_indep_hash: "memory".to_string(),
                number_of_confirmations: 1,
            })
        } else {
            Ok(TransactionStatus::Pending)
        }
    }

    async fn transaction(&self, id: &str) -> Result<TransactionHeader, LedgerError> {
        self.check_online()?;
        self.state
            .lock()
            .headers
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))
    }

    async fn download(
        &self,
        id: &str,
        out: &mut tokio::fs::File,
        limit: u64,
    ) -> Result<u64, LedgerError> {
        self.check_online()?;
        let data = self
            .data(id)
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;
        if data.len() as u64 > limit {
            return Err(LedgerError::TooLarge { limit });
        }
        out.write_all(&data).await?;
        out.flush().await?;
        Ok(data.len() as u64)
    }

    async fn post_transaction(&self, header: &TransactionHeader) -> Result<(), LedgerError> {
        self.check_online()?;
        verify_header(header)?;

        let size: u64 = header
            .data_size
            .parse()
            .map_err(|_| rejected("invalid data_size"))?;

        let mut state = self.state.lock();
        if size == 0 {
            state.complete.insert(header.data_root.clone(), Vec::new());
        } else if !state.complete.contains_key(&header.data_root) {
            state.pending.insert(
                header.data_root.clone(),
                PendingData {
                    size,
                    chunks: BTreeMap::new(),
                },
            );
        }
        state.headers.insert(header.id.clone(), header.clone());
        Ok(())
    }

    async fn post_chunk(&self, chunk: &ChunkPayload) -> Result<(), LedgerError> {
        self.check_online()?;
        let mut state = self.state.lock();

        if let Some(limit) = state.fail_chunks_after {
            if state.chunks_received >= limit {
                return Err(unavailable());
            }
        }

        let offset: u64 = chunk.offset.parse().map_err(|_| rejected("invalid offset"))?;
        let bytes = BASE64_URL
            .decode(&chunk.chunk)
            .map_err(|e| rejected(e.to_string()))?;
        let data_path = BASE64_URL
            .decode(&chunk.data_path)
            .map_err(|e| rejected(e.to_string()))?;

        let pending = state
            .pending
            .get_mut(&chunk.data_root)
            .ok_or_else(|| rejected("unknown data root"))?;
        if pending.chunks.contains_key(&offset) {
            return Err(rejected("duplicate chunk"));
        }
        pending.chunks.insert(offset, (bytes, data_path));

        let received: u64 = pending.chunks.values().map(|(c, _)| c.len() as u64).sum();
        let size = pending.size;
        state.chunks_received += 1;

        if received < size {
            return Ok(());
        }

        let pending = state
            .pending
            .remove(&chunk.data_root)
            .ok_or_else(|| rejected("unknown data root"))?;
        let mut data = Vec::with_capacity(size as usize);
        let mut paths = Vec::with_capacity(pending.chunks.len());
        for (offset, (bytes, path)) in pending.chunks {
            data.extend_from_slice(&bytes);
            paths.push((offset, path));
        }
        let layout = ChunkLayout::from_bytes(&data);

        if BASE64_URL.encode(layout.data_root) != chunk.data_root {
            return Err(rejected("data does not match data root"));
        }
        let proofs: Vec<(u64, Vec<u8>)> = layout
            .proofs
            .into_iter()
            .map(|p| (p.offset, p.proof))
            .collect();
        if proofs != paths {
            return Err(rejected("invalid chunk proof"));
        }

        state.complete.insert(chunk.data_root.clone(), data);
        Ok(())
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<String>, LedgerError> {
        self.check_online()?;
        let state = self.state.lock();
        let mut ids: Vec<String> = state
            .headers
            .values()
            .filter(|header| match query {
                SearchQuery::Owner(address) => owner_address(header).as_deref() == Some(address),
                SearchQuery::Tag { name, value } => header
                    .tags
                    .iter()
                    .map(EncodedTag::decode_lossy)
                    .any(|t| &t.name == name && &t.value == value),
            })
            .map(|header| header.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}
