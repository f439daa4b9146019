//! Shared-memory spill for oversized batches
//!
//! Batches travel inline while small. Once the encoded payload reaches
//! [`INLINE_LIMIT`] the sender writes it to an anonymous memory-backed
//! file behind a magic/version/length header, seals the mapping read-only
//! and ships the handle instead; the inline list is left empty. A message
//! carrying both an inline payload and a handle is malformed.

use std::fmt;
use std::io::Write;

use memmap2::{Mmap, MmapOptions};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::status::VehicleError;

/// Encoded payloads of this size or larger are spilled to shared memory.
pub const INLINE_LIMIT: usize = 4096;

const SHM_MAGIC: u64 = 0x5648_414C_5041_594C; // "VHALPAYL"
const SHM_VERSION: u32 = 1;
const HEADER_SIZE: usize = 24;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("shared memory I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("payload codec: {0}")]
    Codec(#[from] bincode::Error),

    #[error("inline payload and shared memory handle are mutually exclusive")]
    AmbiguousPayload,

    #[error("shared memory region malformed: {0}")]
    Malformed(&'static str),
}

impl From<PayloadError> for VehicleError {
    fn from(error: PayloadError) -> Self {
        VehicleError::InvalidArg(error.to_string())
    }
}

/// A sealed, read-only shared-memory region holding one encoded payload.
pub struct SharedPayload {
    map: Mmap,
}

impl SharedPayload {
    /// Write `bytes` behind a header into a fresh anonymous file and seal
    /// the mapping read-only.
    fn create(bytes: &[u8]) -> Result<Self, PayloadError> {
        let mut file = tempfile::tempfile()?;
        file.write_all(&SHM_MAGIC.to_le_bytes())?;
        file.write_all(&SHM_VERSION.to_le_bytes())?;
        file.write_all(&[0u8; 4])?;
        file.write_all(&(bytes.len() as u64).to_le_bytes())?;
        file.write_all(bytes)?;
        file.flush()?;

        let map = unsafe { MmapOptions::new().map(&file)? };
        let payload = SharedPayload { map };
        // Validate our own header once so every later read can trust it.
        payload.bytes()?;
        Ok(payload)
    }

    /// The encoded payload behind the header. Validates magic, version
    /// and the declared length against the mapped size.
    pub fn bytes(&self) -> Result<&[u8], PayloadError> {
        let map = &self.map[..];
        if map.len() < HEADER_SIZE {
            return Err(PayloadError::Malformed("region smaller than header"));
        }
        let magic = u64::from_le_bytes(map[0..8].try_into().unwrap());
        if magic != SHM_MAGIC {
            return Err(PayloadError::Malformed("bad magic"));
        }
        let version = u32::from_le_bytes(map[8..12].try_into().unwrap());
        if version != SHM_VERSION {
            return Err(PayloadError::Malformed("unsupported version"));
        }
        let len = u64::from_le_bytes(map[16..24].try_into().unwrap()) as usize;
        if HEADER_SIZE + len != map.len() {
            return Err(PayloadError::Malformed("declared length mismatch"));
        }
        Ok(&map[HEADER_SIZE..])
    }

    pub fn len(&self) -> usize {
        self.map.len().saturating_sub(HEADER_SIZE)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for SharedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedPayload")
            .field("len", &self.len())
            .finish()
    }
}

/// A batch of payloads that spills to shared memory above the inline
/// limit. `payloads` and `shared_memory` are mutually exclusive.
pub struct Batch<T> {
    pub payloads: Vec<T>,
    pub shared_memory: Option<SharedPayload>,
}

impl<T> Default for Batch<T> {
    fn default() -> Self {
        Batch {
            payloads: Vec::new(),
            shared_memory: None,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Batch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("payloads", &self.payloads)
            .field("shared_memory", &self.shared_memory)
            .finish()
    }
}

impl<T> Batch<T> {
    /// A batch that stays inline regardless of size.
    pub fn inline(payloads: Vec<T>) -> Self {
        Batch {
            payloads,
            shared_memory: None,
        }
    }

    /// Whether the payload travels via shared memory.
    pub fn is_spilled(&self) -> bool {
        self.shared_memory.is_some()
    }
}

impl<T: Serialize + DeserializeOwned> Batch<T> {
    /// Encode `payloads`; spill to a sealed region when the encoding
    /// reaches the inline limit, otherwise keep the batch inline.
    pub fn from_payloads(payloads: Vec<T>) -> Result<Self, PayloadError> {
        let encoded = bincode::serialize(&payloads)?;
        if encoded.len() < INLINE_LIMIT {
            return Ok(Batch::inline(payloads));
        }
        Ok(Batch {
            payloads: Vec::new(),
            shared_memory: Some(SharedPayload::create(&encoded)?),
        })
    }

    /// Recover the payload list, decoding the shared region when one is
    /// present. Fails if the sender set both representations.
    pub fn into_payloads(self) -> Result<Vec<T>, PayloadError> {
        let Some(shared) = self.shared_memory else {
            return Ok(self.payloads);
        };
        if !self.payloads.is_empty() {
            return Err(PayloadError::AmbiguousPayload);
        }
        Ok(bincode::deserialize(shared.bytes()?)?)
    }
}
