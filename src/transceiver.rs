//! ISO 14443-3A transceiver seam.
//!
//! The physical radio lives outside this crate; everything here talks to it
//! through the [`Transceiver`] trait. The two frame shapes mirror what the
//! link layer actually distinguishes: standard frames (reader hardware
//! computes parity and CRC-A) and custom-parity frames, where every bit's
//! parity is supplied by the caller. Crypto1 traffic needs the latter,
//! because the parity bits of an encrypted frame are themselves encrypted
//! and can't be derived from the ciphertext.

/// Maximum frame-wait-time, in carrier cycles. Every exchange is bounded by
/// this; exceeding it surfaces as [`LinkError::Timeout`].
pub const MAX_FWT: u32 = 200_000;

/// Errors reported by the link layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// No card in the field.
    #[error("no card in the field")]
    NotPresent,

    /// No response within the frame-wait-time.
    #[error("no response within the frame-wait-time")]
    Timeout,

    /// CRC mismatch on a received frame. Carries the bytes as received:
    /// some backdoor replies are sent without a valid CRC-A and still need
    /// inspecting.
    #[error("CRC mismatch on received frame")]
    Crc(Vec<u8>),

    /// Parity error on a received frame.
    #[error("parity error on received frame")]
    Parity,

    /// Malformed, truncated or otherwise unexpected frame.
    #[error("malformed frame")]
    Framing,
}

/// A frame with one explicit parity bit per data byte.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParityFrame {
    pub data: Vec<u8>,
    /// One parity bit per byte of `data`.
    pub parity: Vec<bool>,
}

impl ParityFrame {
    /// A plaintext frame with standard ISO 14443-A odd parity.
    pub fn plain(data: &[u8]) -> Self {
        let parity = data.iter().map(|b| b.count_ones() % 2 == 0).collect();
        Self {
            data: data.to_vec(),
            parity,
        }
    }
}

/// Bit-level frame exchange with a card in the field.
///
/// Implementations own card activation: after [`Transceiver::halt`], the next
/// exchange is expected to re-select the card transparently.
pub trait Transceiver {
    /// Transmit `tx` with standard parity and CRC-A appended by the link
    /// layer, then receive one frame. The CRC of the response is checked and
    /// stripped, except for nonce/ACK-sized replies (4 bytes or fewer),
    /// which carry no CRC and are passed through raw.
    fn send_standard_frame(&mut self, tx: &[u8], fwt: u32) -> Result<Vec<u8>, LinkError>;

    /// Transmit `tx` with each bit's parity taken from the frame, then
    /// receive one frame along with its parity bits. No CRC handling on
    /// either side.
    fn send_custom_parity_frame(&mut self, tx: &ParityFrame, fwt: u32)
        -> Result<ParityFrame, LinkError>;

    /// HALT the card, ending any authenticated session.
    fn halt(&mut self) -> Result<(), LinkError>;
}
