//! Request signing.
//!
//! When a session holds an auth ticket and a crypto backend is enabled,
//! every call carries an encrypted signature binding the request batch to
//! the ticket, the current location and fresh session entropy. The
//! concrete cipher is pluggable behind [`SignatureCrypto`]; a disabled
//! backend skips signing entirely, which is a valid protocol state.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes256;
use chrono::{DateTime, Utc};
use rand::RngCore;

use crate::error::Error;
use crate::location::Location;
use crate::protocol::{
    self, AuthTicket, PlatformRequest, PlatformRequestType, Request,
    SendEncryptedSignatureRequest, Signature,
};

/// Static seed for the request and location integrity hashes.
pub const HASH_SEED: u64 = 0x1B84_5238;

/// Pluggable signature cipher.
pub trait SignatureCrypto: Send + Sync {
    /// Fresh initialization vector for one encryption.
    fn create_iv(&self) -> Vec<u8>;

    /// Encrypts a serialized signature. Failures surface as formatting
    /// errors and abort the call before any network I/O.
    fn encrypt(&self, plaintext: &[u8], iv: &[u8]) -> Result<Vec<u8>, Error>;

    /// Whether signing is active. A disabled backend means no platform
    /// request is attached to outgoing envelopes.
    fn enabled(&self) -> bool;
}

/// Backend that disables signing.
pub struct NullCrypto;

impl SignatureCrypto for NullCrypto {
    fn create_iv(&self) -> Vec<u8> {
        vec![0u8; 32]
    }

    fn encrypt(&self, _plaintext: &[u8], _iv: &[u8]) -> Result<Vec<u8>, Error> {
        Err(Error::Formatting)
    }

    fn enabled(&self) -> bool {
        false
    }
}

/// AES-256 counter-mode signature cipher with a random 16-byte IV.
pub struct AesCtrCrypto {
    key: [u8; 32],
}

impl AesCtrCrypto {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }
}

impl SignatureCrypto for AesCtrCrypto {
    fn create_iv(&self) -> Vec<u8> {
        let mut iv = vec![0u8; 16];
        rand::thread_rng().fill_bytes(&mut iv);
        iv
    }

    fn encrypt(&self, plaintext: &[u8], iv: &[u8]) -> Result<Vec<u8>, Error> {
        let iv: [u8; 16] = iv.try_into().map_err(|_| Error::Formatting)?;
        let cipher = Aes256::new(GenericArray::from_slice(&self.key));

        let mut out = Vec::with_capacity(plaintext.len());
        let mut counter = u128::from_be_bytes(iv);
        for chunk in plaintext.chunks(16) {
            let mut block = GenericArray::clone_from_slice(&counter.to_be_bytes());
            cipher.encrypt_block(&mut block);
            out.extend(chunk.iter().zip(block.iter()).map(|(p, k)| p ^ k));
            counter = counter.wrapping_add(1);
        }
        Ok(out)
    }

    fn enabled(&self) -> bool {
        true
    }
}

/// Produces the signed platform request attached to authenticated calls.
pub struct SigningPipeline {
    seed: u64,
    crypto: Box<dyn SignatureCrypto>,
}

impl SigningPipeline {
    pub fn new(crypto: Box<dyn SignatureCrypto>) -> Self {
        Self::with_seed(crypto, HASH_SEED)
    }

    /// Constructor with an explicit seed so tests can vary it.
    pub fn with_seed(crypto: Box<dyn SignatureCrypto>, seed: u64) -> Self {
        Self { seed, crypto }
    }

    pub fn enabled(&self) -> bool {
        self.crypto.enabled()
    }

    /// 64-bit integrity hash for one request: the seed is folded over the
    /// serialized ticket first, then the serialized request. The order
    /// binds the hash to both the session and the payload.
    pub fn request_hash(&self, ticket: &[u8], request: &[u8]) -> u64 {
        let folded = xxhash_rust::xxh64::xxh64(ticket, self.seed);
        xxhash_rust::xxh64::xxh64(request, folded)
    }

    /// Location hash folded over the ticket, then the raw location bytes.
    pub fn location_hash1(&self, ticket: &[u8], location: &Location) -> u32 {
        let folded = xxhash_rust::xxh32::xxh32(ticket, self.seed as u32);
        xxhash_rust::xxh32::xxh32(&location.get_bytes(), folded)
    }

    /// Ticket-independent location hash; the server cross-checks it
    /// against the ticket-bound one.
    pub fn location_hash2(&self, location: &Location) -> u32 {
        xxhash_rust::xxh32::xxh32(&location.get_bytes(), self.seed as u32)
    }

    /// Assembles, serializes and encrypts the signature for one call.
    pub fn sign(
        &self,
        ticket: &AuthTicket,
        location: &Location,
        requests: &[Request],
        started: DateTime<Utc>,
    ) -> Result<PlatformRequest, Error> {
        let ticket_bytes = protocol::encode(ticket)?;

        let mut request_hash = Vec::with_capacity(requests.len());
        for request in requests {
            let request_bytes = protocol::encode(request)?;
            request_hash.push(self.request_hash(&ticket_bytes, &request_bytes));
        }

        let mut session_hash = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut session_hash);

        let now = Utc::now().timestamp_millis() as u64;
        let since_start = now.saturating_sub(started.timestamp_millis() as u64);

        let signature = Signature {
            request_hash,
            location_hash1: self.location_hash1(&ticket_bytes, location),
            location_hash2: self.location_hash2(location),
            session_hash,
            timestamp_ms: now,
            timestamp_since_start_ms: since_start,
        };

        let plaintext = protocol::encode(&signature)?;
        let iv = self.crypto.create_iv();
        let encrypted_signature = self.crypto.encrypt(&plaintext, &iv)?;

        let request_message = protocol::encode(&SendEncryptedSignatureRequest {
            encrypted_signature,
        })?;

        Ok(PlatformRequest {
            request_type: PlatformRequestType::SendEncryptedSignature,
            request_message,
        })
    }
}
