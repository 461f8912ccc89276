//! Mifare Classic authentication session.
//!
//! One call, one authentication round. The handshake is the standard
//! three-pass Crypto1 exchange: auth command, card nonce, encrypted reader
//! nonce + reader response, card acknowledgement. The cipher state left
//! behind in the [`Crypto1`] engine is what encrypts every following
//! read/write of the session.
//!
//! A quirk worth knowing: the card accepts or rejects the handshake
//! silently. A wrong key means no reply to the reader response, so a timeout
//! on that final read is reported as [`Error::Auth`], not a timeout.

use byteorder::{BigEndian, ByteOrder};
use tracing::{debug, trace_span};

use crate::crypto1::{Crypto1, NonceSource};
use crate::dump::{Key, KeyType};
use crate::errors::{Error, Result};
use crate::transceiver::{LinkError, Transceiver, MAX_FWT};

/// Everything one authentication round produced, for diagnostics. Built
/// fresh per [`authenticate`] call and never retained by the engine, so
/// there's at most one live session's material in existence per card tap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub block: u8,
    pub key_type: KeyType,
    pub key: Key,
    /// Card nonce as received (encrypted for nested rounds).
    pub card_nonce: u32,
    pub reader_nonce: u32,
    /// The encrypted reader-response half of the frame we sent.
    pub reader_response: [u8; 4],
    /// The card's 4-byte acknowledgement. Not validated; receiving exactly
    /// four bytes is what constitutes acceptance at this layer.
    pub card_ack: [u8; 4],
}

/// Runs one authentication round for `block` and leaves the cipher engine
/// holding the resulting session state.
///
/// `nested` selects encrypted framing for the auth command, for
/// authenticating to a further block while a session is already live. The
/// link is halted before any transceiver error is returned, so the card is
/// left in a known state.
#[allow(clippy::too_many_arguments)]
pub fn authenticate<T, C, N>(
    trx: &mut T,
    cipher: &mut C,
    nonces: &mut N,
    uid: u32,
    block: u8,
    key: Key,
    key_type: KeyType,
    nested: bool,
) -> Result<AuthContext>
where
    T: Transceiver,
    C: Crypto1,
    N: NonceSource,
{
    let span = trace_span!("authenticate", block, ?key_type, nested);
    let _enter = span.enter();

    let cmd = [key_type.into(), block];
    let nt_bytes = if nested {
        let frame = cipher.encrypt(&cmd);
        match trx.send_custom_parity_frame(&frame, MAX_FWT) {
            Ok(rx) => rx.data,
            Err(err) => return Err(halt_with(trx, err.into())),
        }
    } else {
        cipher.reset();
        match trx.send_standard_frame(&cmd, MAX_FWT) {
            Ok(rx) => rx,
            Err(err) => return Err(halt_with(trx, err.into())),
        }
    };
    if nt_bytes.len() != 4 {
        debug!(len = nt_bytes.len(), "short card nonce");
        return Err(halt_with(trx, Error::Protocol));
    }
    let card_nonce = BigEndian::read_u32(&nt_bytes);

    cipher.load_key(&key, uid);
    let reader_nonce = nonces.reader_nonce();
    let frame = cipher.encrypt_reader_nonce(&key, uid, card_nonce, reader_nonce, nested);
    debug_assert_eq!(frame.data.len(), 8);
    let mut reader_response = [0; 4];
    reader_response.copy_from_slice(&frame.data[4..8]);

    let ack = match trx.send_custom_parity_frame(&frame, MAX_FWT) {
        Ok(rx) => rx.data,
        // Silence here means the key was wrong.
        Err(LinkError::Timeout) => return Err(halt_with(trx, Error::Auth)),
        Err(err) => return Err(halt_with(trx, err.into())),
    };
    let card_ack: [u8; 4] = match ack.as_slice().try_into() {
        Ok(ack) => ack,
        Err(_) => {
            debug!(len = ack.len(), "bad ack length, treating as refusal");
            return Err(halt_with(trx, Error::Auth));
        }
    };

    Ok(AuthContext {
        block,
        key_type,
        key,
        card_nonce,
        reader_nonce,
        reader_response,
        card_ack,
    })
}

fn halt_with<T: Transceiver>(trx: &mut T, err: Error) -> Error {
    if let Err(halt_err) = trx.halt() {
        debug!(%halt_err, "halt after failed auth also failed");
    }
    err
}
