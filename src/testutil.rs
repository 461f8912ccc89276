//! Shared test fixtures: a scripted card, an identity cipher, and dump
//! builders. Only compiled for tests.

use std::collections::HashSet;

use byteorder::{BigEndian, ByteOrder};

use crate::crypto1::{Crypto1, NonceSource};
use crate::dump::{is_sector_trailer, trailer_of_sector, DumpKind, Key, KeyType, MfClassicDump};
use crate::poller::{Control, PollerHost, PollerMode};
use crate::transceiver::{LinkError, ParityFrame, Transceiver};

/// A scripted Mifare Classic clone. Commands are recognized by shape and
/// answered from the struct's knobs; everything sent is recorded.
#[derive(Debug)]
pub struct MockCard {
    /// Reply to the backdoor read-ATS command.
    pub ats: Vec<u8>,
    /// Deliver the ATS as a CRC error instead of a clean frame.
    pub ats_crc_error: bool,
    /// Never answer the read-ATS command.
    pub ats_timeout: bool,
    /// No card in the field at all.
    pub absent: bool,
    /// Swallow the reader response, as a card with a different key would.
    pub silent_after_nonce: bool,
    /// Blocks whose auth command gets no nonce back.
    pub auth_timeout_blocks: HashSet<u8>,
    /// The card leaves the field once this many frames have been exchanged.
    pub vanish_after_frames: Option<usize>,

    /// Every frame payload sent, in order.
    pub sent: Vec<Vec<u8>>,
    /// Total frames exchanged (halts not included).
    pub frames: usize,
    /// How many of those were custom-parity frames.
    pub custom_frames: usize,
    /// HALTs received.
    pub halts: usize,
    /// Completed two-stage writes: block number and the 16 bytes.
    pub writes: Vec<(u8, [u8; 16])>,

    pending_write: Option<u8>,
}

impl MockCard {
    /// The nonce this card always deals.
    pub const CARD_NONCE: u32 = 0x01234567;

    pub fn new() -> Self {
        Self {
            ats: crate::detect::ATS_FINGERPRINTS[0].to_vec(),
            ats_crc_error: false,
            ats_timeout: false,
            absent: false,
            silent_after_nonce: false,
            auth_timeout_blocks: HashSet::new(),
            vanish_after_frames: None,
            sent: Vec::new(),
            frames: 0,
            custom_frames: 0,
            halts: 0,
            writes: Vec::new(),
            pending_write: None,
        }
    }

    fn gone(&self) -> bool {
        self.absent
            || self
                .vanish_after_frames
                .map(|n| self.frames >= n)
                .unwrap_or(false)
    }

    fn nonce_bytes(&self) -> Vec<u8> {
        let mut nt = [0; 4];
        BigEndian::write_u32(&mut nt, Self::CARD_NONCE);
        nt.to_vec()
    }
}

impl Transceiver for MockCard {
    fn send_standard_frame(&mut self, tx: &[u8], _fwt: u32) -> Result<Vec<u8>, LinkError> {
        if self.gone() {
            return Err(LinkError::NotPresent);
        }
        self.frames += 1;
        self.sent.push(tx.to_vec());

        match tx {
            [0xE0, 0x80] => {
                if self.ats_timeout {
                    Err(LinkError::Timeout)
                } else if self.ats_crc_error {
                    Err(LinkError::Crc(self.ats.clone()))
                } else {
                    Ok(self.ats.clone())
                }
            }
            [cmd, block] if cmd & 0xFE == 0x60 => {
                if self.auth_timeout_blocks.contains(block) {
                    Err(LinkError::Timeout)
                } else {
                    Ok(self.nonce_bytes())
                }
            }
            _ => Err(LinkError::Framing),
        }
    }

    fn send_custom_parity_frame(
        &mut self,
        tx: &ParityFrame,
        _fwt: u32,
    ) -> Result<ParityFrame, LinkError> {
        if self.gone() {
            return Err(LinkError::NotPresent);
        }
        self.frames += 1;
        self.custom_frames += 1;
        self.sent.push(tx.data.clone());

        match tx.data.as_slice() {
            // Nested auth command inside an encrypted session.
            [cmd, block] if cmd & 0xFE == 0x60 => {
                if self.auth_timeout_blocks.contains(block) {
                    Err(LinkError::Timeout)
                } else {
                    Ok(ParityFrame::plain(&self.nonce_bytes()))
                }
            }
            [0xA0, block] => {
                self.pending_write = Some(*block);
                Ok(ParityFrame::plain(&[0x0A]))
            }
            // The 8-byte reader nonce + response.
            data if data.len() == 8 => {
                if self.silent_after_nonce {
                    Err(LinkError::Timeout)
                } else {
                    Ok(ParityFrame::plain(&[0, 0, 0, 0]))
                }
            }
            // The 16 data bytes of a write in progress.
            data if data.len() == 16 => match self.pending_write.take() {
                Some(block) => {
                    let mut content = [0; 16];
                    content.copy_from_slice(data);
                    self.writes.push((block, content));
                    Ok(ParityFrame::plain(&[0x0A]))
                }
                None => Err(LinkError::Framing),
            },
            _ => Err(LinkError::Framing),
        }
    }

    fn halt(&mut self) -> Result<(), LinkError> {
        self.halts += 1;
        self.pending_write = None;
        Ok(())
    }
}

/// An identity cipher. Encrypt and decrypt pass bytes through unchanged
/// with plain parity, so tests can assert the exact plaintext that hit the
/// wire. No CRC is appended either; [`MockCard`] doesn't check one.
#[derive(Debug, Default)]
pub struct NullCipher;

impl Crypto1 for NullCipher {
    fn reset(&mut self) {}

    fn load_key(&mut self, _key: &Key, _uid: u32) {}

    fn encrypt_reader_nonce(
        &mut self,
        _key: &Key,
        _uid: u32,
        _card_nonce: u32,
        reader_nonce: u32,
        _nested: bool,
    ) -> ParityFrame {
        let mut data = [0; 8];
        BigEndian::write_u32(&mut data[0..4], reader_nonce);
        BigEndian::write_u32(&mut data[4..8], reader_nonce.wrapping_add(1));
        ParityFrame::plain(&data)
    }

    fn encrypt(&mut self, plain: &[u8]) -> ParityFrame {
        ParityFrame::plain(plain)
    }

    fn decrypt(&mut self, cipher: &[u8]) -> Vec<u8> {
        cipher.to_vec()
    }
}

/// A nonce source that always deals the same value.
#[derive(Debug, Clone, Copy)]
pub struct FixedNonces(pub u32);

impl NonceSource for FixedNonces {
    fn reader_nonce(&mut self) -> u32 {
        self.0
    }
}

pub fn fixed_nonces(nonce: u32) -> FixedNonces {
    FixedNonces(nonce)
}

/// A host that answers every planner request from canned data and records
/// the outcome.
#[derive(Debug)]
pub struct ScriptHost {
    pub mode: PollerMode,
    pub source: Option<MfClassicDump>,
    pub target: Option<MfClassicDump>,
    /// `Some(true)` after success, `Some(false)` after failure.
    pub outcome: Option<bool>,
    /// Answer the mode request with `None`, stopping the session.
    pub stop_at_mode: bool,
    pub detections: usize,
}

impl ScriptHost {
    pub fn wipe(target: MfClassicDump) -> Self {
        Self {
            mode: PollerMode::Wipe,
            source: None,
            target: Some(target),
            outcome: None,
            stop_at_mode: false,
            detections: 0,
        }
    }

    pub fn write(source: MfClassicDump, target: MfClassicDump) -> Self {
        Self {
            mode: PollerMode::Write,
            source: Some(source),
            ..Self::wipe(target)
        }
    }
}

impl PollerHost for ScriptHost {
    fn card_detected(&mut self) -> Control {
        self.detections += 1;
        Control::Continue
    }

    fn request_mode(&mut self) -> Option<PollerMode> {
        if self.stop_at_mode {
            None
        } else {
            Some(self.mode)
        }
    }

    fn request_source_data(&mut self) -> Option<MfClassicDump> {
        self.source.clone()
    }

    fn request_target_data(&mut self) -> Option<MfClassicDump> {
        self.target.clone()
    }

    fn success(&mut self) -> Control {
        self.outcome = Some(true);
        Control::Stop
    }

    fn failed(&mut self) -> Control {
        self.outcome = Some(false);
        Control::Stop
    }
}

/// A fully captured, fully keyed 1K card with factory-default access
/// conditions: trailers hold `FF 07 80 69`, keys are `A0..A5`/`B0..B5`, data
/// blocks carry a per-block fill pattern.
pub fn unlocked_1k() -> MfClassicDump {
    let uid = vec![0xDE, 0xAD, 0xBE, 0xEF];
    let mut dump = MfClassicDump::new(DumpKind::Classic1k, uid, [0x04, 0x00], 0x08);

    let mut block0 = [0u8; 16];
    block0[0..4].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
    block0[4] = 0xDE ^ 0xAD ^ 0xBE ^ 0xEF; // BCC
    block0[5] = 0x08; // SAK
    block0[6..8].copy_from_slice(&[0x04, 0x00]); // ATQA
    dump.set_block(0, block0);

    let key_a = Key([0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5]);
    let key_b = Key([0xB0, 0xB1, 0xB2, 0xB3, 0xB4, 0xB5]);
    let mut trailer = [0u8; 16];
    trailer[0..6].copy_from_slice(&key_a.0);
    trailer[6..10].copy_from_slice(&crate::DEFAULT_ACCESS_BYTES);
    trailer[10..16].copy_from_slice(&key_b.0);

    for block in 1..dump.kind().total_blocks() {
        if is_sector_trailer(block) {
            dump.set_block(block, trailer);
        } else {
            dump.set_block(block, [block as u8; 16]);
        }
    }
    for sector in 0..dump.kind().total_sectors() {
        dump.set_key(sector, KeyType::A, key_a);
        dump.set_key(sector, KeyType::B, key_b);
    }
    debug_assert!(dump.block(trailer_of_sector(0)).unwrap().captured);
    dump
}

/// The same dump with a different UID.
pub fn with_uid(dump: MfClassicDump, uid: Vec<u8>) -> MfClassicDump {
    let mut out = MfClassicDump::new(dump.kind(), uid, dump.atqa(), dump.sak());
    for block in 0..dump.kind().total_blocks() {
        if let Some(b) = dump.block(block) {
            if b.captured {
                out.set_block(block, b.data);
            }
        }
    }
    for sector in 0..dump.kind().total_sectors() {
        for key_type in [KeyType::A, KeyType::B] {
            if let Some(key) = dump.key(sector, key_type) {
                out.set_key(sector, key_type, key);
            }
        }
    }
    out
}

/// The same dump with one sector key forgotten.
pub fn forget_key(mut dump: MfClassicDump, sector: u8, key_type: KeyType) -> MfClassicDump {
    dump.clear_key(sector, key_type);
    dump
}
