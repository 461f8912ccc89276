//! Card fingerprint detection.
//!
//! Gen2/CUID clone chips answer the backdoor read-ATS command with a
//! family-specific byte string. That string is the only reliable way to tell
//! a writable clone from a genuine card without attempting a privileged
//! write, so detection is a single bounded exchange compared against a fixed
//! table. Several families answer this particular command without a valid
//! CRC-A; a CRC error here is benign and the payload is still matched.

use tracing::{debug, trace_span};

use crate::transceiver::{LinkError, Transceiver, MAX_FWT};

/// Backdoor read-ATS command: RATS opcode plus the frame-size parameter the
/// clone firmwares expect.
const READ_ATS: [u8; 2] = [0xE0, 0x80];

/// Known ATS prefixes of the supported clone families.
pub const ATS_FINGERPRINTS: [&[u8]; 3] = [
    &[0x09, 0x78, 0x00, 0x91, 0x02, 0xDA, 0xBC, 0x19, 0x10, 0xF0, 0x05],
    &[0x0A, 0x78, 0x00, 0x81, 0x02, 0xDB, 0xA0, 0xC1, 0x19, 0x40, 0x2A, 0xB5],
    &[0x06, 0x75, 0x77, 0x81, 0x02, 0x80],
];

/// Outcome of a detection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// The ATS matches a known clone family.
    Match,
    /// The card answered, but with an unknown ATS.
    NoMatch,
    /// The card answered garbage.
    ProtocolError,
    /// The card never answered.
    Timeout,
    /// No card in the field.
    NotPresent,
}

/// Fingerprints the card in the field. Non-mutating and safe to call before
/// any session starts.
pub fn detect<T: Transceiver>(trx: &mut T) -> Detection {
    let span = trace_span!("detect");
    let _enter = span.enter();

    match trx.send_standard_frame(&READ_ATS, MAX_FWT) {
        Ok(rx) => match_ats(&rx),
        // Expected for some families; the payload is still meaningful.
        Err(LinkError::Crc(rx)) => match_ats(&rx),
        Err(LinkError::Timeout) => Detection::Timeout,
        Err(LinkError::NotPresent) => Detection::NotPresent,
        Err(err) => {
            debug!(%err, "read-ATS failed");
            Detection::ProtocolError
        }
    }
}

fn match_ats(rx: &[u8]) -> Detection {
    debug!(ats = %hex::encode_upper(rx), "got ATS");
    if ATS_FINGERPRINTS.iter().any(|f| rx.starts_with(f)) {
        Detection::Match
    } else {
        Detection::NoMatch
    }
}

/// Table lookup alone, for offline use against a previously captured ATS.
pub fn match_ats_bytes(ats: &[u8]) -> bool {
    ATS_FINGERPRINTS.iter().any(|f| ats.starts_with(f))
}
