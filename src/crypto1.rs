//! Crypto1 cipher-engine seam.
//!
//! The Crypto1 stream cipher itself (LFSR feedback, filter function, PRNG
//! successor arithmetic) lives outside this crate. The [`Crypto1`] trait is
//! the shape the rest of the engine needs from it: one shared keystream
//! state per session, advanced by every encrypt/decrypt call in order.

use crate::dump::Key;
use crate::transceiver::ParityFrame;

/// One Crypto1 session's cipher state.
///
/// The state is shared between the authentication handshake and every
/// following read/write in the session, so calls must happen in wire order.
/// Implementations are responsible for the framing of encrypted traffic:
/// [`Crypto1::encrypt`] is fed a plaintext frame *without* CRC-A and must
/// append and encrypt the CRC along with the payload.
pub trait Crypto1: std::fmt::Debug {
    /// Drop all session state.
    fn reset(&mut self);

    /// Seed the LFSR from the key and the UID for a fresh session.
    fn load_key(&mut self, key: &Key, uid: u32);

    /// Produce the 8-byte encrypted reader-nonce + reader-response frame for
    /// the authentication handshake, with cipher-predicted parity bits. For
    /// a nested authentication (`nested`), `card_nonce` is the encrypted
    /// nonce as received and the existing keystream is folded in.
    fn encrypt_reader_nonce(
        &mut self,
        key: &Key,
        uid: u32,
        card_nonce: u32,
        reader_nonce: u32,
        nested: bool,
    ) -> ParityFrame;

    /// Encrypt a plaintext frame (CRC-A appended by the implementation),
    /// predicting each bit's parity from the keystream.
    fn encrypt(&mut self, plain: &[u8]) -> ParityFrame;

    /// Decrypt received bytes, advancing the keystream.
    fn decrypt(&mut self, cipher: &[u8]) -> Vec<u8>;
}

/// Source of reader nonces for the authentication handshake.
///
/// Kept out of the crate so hosts decide where entropy comes from; tests
/// supply fixed values.
pub trait NonceSource {
    fn reader_nonce(&mut self) -> u32;
}

impl<F: FnMut() -> u32> NonceSource for F {
    fn reader_nonce(&mut self) -> u32 {
        self()
    }
}
