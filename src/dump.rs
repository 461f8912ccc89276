//! In-memory Mifare Classic dump model.
//!
//! A dump is the unit of exchange with the rest of the tool: the card-reading
//! subsystem produces one, the host hands it to the write planner, and the
//! problem classifier inspects it radio-free. Blocks carry a "captured" flag
//! so partially-read cards are representable; sector keys are tracked
//! separately from block contents, since key recovery can succeed for a
//! sector whose trailer was never actually read.

use byteorder::{BigEndian, ByteOrder};
use nom::bytes::complete::take;
use nom::multi::count;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;
use std::str::FromStr;

use crate::errors::{Error, Result};

pub const BLOCK_SIZE: usize = 16;
pub const KEY_SIZE: usize = 6;

/// Which of a sector's two keys to authenticate with. The discriminants are
/// the Mifare Classic authentication opcodes, so a key type converts
/// directly into the command byte on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum KeyType {
    A = 0x60,
    B = 0x61,
}

/// A 6-byte sector key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Key(pub [u8; KEY_SIZE]);

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self)
    }
}

impl FromStr for Key {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|_| Error::Dump("key is not valid hex"))?;
        let bytes: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| Error::Dump("key must be 6 bytes"))?;
        Ok(Self(bytes))
    }
}

/// Card layouts the clone families support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpKind {
    Classic1k,
    Classic4k,
}

impl DumpKind {
    pub fn total_blocks(self) -> u16 {
        match self {
            Self::Classic1k => 64,
            Self::Classic4k => 256,
        }
    }

    pub fn total_sectors(self) -> u8 {
        match self {
            Self::Classic1k => 16,
            Self::Classic4k => 40,
        }
    }
}

/// One 16-byte block, plus whether the dump actually holds its contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub data: [u8; BLOCK_SIZE],
    pub captured: bool,
}

impl Block {
    pub fn uncaptured() -> Self {
        Self {
            data: [0; BLOCK_SIZE],
            captured: false,
        }
    }

    pub fn captured(data: [u8; BLOCK_SIZE]) -> Self {
        Self {
            data,
            captured: true,
        }
    }
}

/// Sector number covering a block. Sectors 0-31 hold 4 blocks, 32-39 (4K
/// cards only) hold 16.
pub fn sector_of_block(block: u16) -> u8 {
    if block < 128 {
        (block / 4) as u8
    } else {
        (32 + (block - 128) / 16) as u8
    }
}

/// Whether a block is its sector's trailer (the last block of the sector).
pub fn is_sector_trailer(block: u16) -> bool {
    if block < 128 {
        block % 4 == 3
    } else {
        block % 16 == 15
    }
}

/// The trailer block number of a sector.
pub fn trailer_of_sector(sector: u8) -> u16 {
    if sector < 32 {
        sector as u16 * 4 + 3
    } else {
        128 + (sector as u16 - 32) * 16 + 15
    }
}

/// Which of the four access-condition slots governs a block. Large sectors
/// share each data slot between five consecutive blocks.
pub fn access_slot(block: u16) -> u8 {
    if block < 128 {
        (block % 4) as u8
    } else {
        ((block % 16) / 5) as u8
    }
}

/// Keys known for one sector, from capture or key recovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectorKeys {
    pub a: Option<Key>,
    pub b: Option<Key>,
}

/// A captured Mifare Classic card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MfClassicDump {
    kind: DumpKind,
    uid: Vec<u8>,
    atqa: [u8; 2],
    sak: u8,
    blocks: Vec<Block>,
    keys: Vec<SectorKeys>,
}

impl MfClassicDump {
    /// An empty dump: no blocks captured, no keys known.
    pub fn new(kind: DumpKind, uid: Vec<u8>, atqa: [u8; 2], sak: u8) -> Self {
        debug_assert!(uid.len() == 4 || uid.len() == 7);
        Self {
            kind,
            uid,
            atqa,
            sak,
            blocks: vec![Block::uncaptured(); kind.total_blocks() as usize],
            keys: vec![SectorKeys::default(); kind.total_sectors() as usize],
        }
    }

    pub fn kind(&self) -> DumpKind {
        self.kind
    }

    pub fn uid(&self) -> &[u8] {
        &self.uid
    }

    pub fn atqa(&self) -> [u8; 2] {
        self.atqa
    }

    pub fn sak(&self) -> u8 {
        self.sak
    }

    /// The UID word fed to the cipher. For 7-byte UIDs this is the second
    /// cascade level, the four bytes the card actually mixes into Crypto1.
    pub fn uid_word(&self) -> u32 {
        BigEndian::read_u32(&self.uid[self.uid.len() - 4..])
    }

    pub fn block(&self, block: u16) -> Option<&Block> {
        self.blocks.get(block as usize)
    }

    /// Stores block contents and marks the block captured.
    pub fn set_block(&mut self, block: u16, data: [u8; BLOCK_SIZE]) {
        if let Some(b) = self.blocks.get_mut(block as usize) {
            *b = Block::captured(data);
        }
    }

    pub fn clear_block(&mut self, block: u16) {
        if let Some(b) = self.blocks.get_mut(block as usize) {
            *b = Block::uncaptured();
        }
    }

    pub fn key(&self, sector: u8, key_type: KeyType) -> Option<Key> {
        let keys = self.keys.get(sector as usize)?;
        match key_type {
            KeyType::A => keys.a,
            KeyType::B => keys.b,
        }
    }

    pub fn set_key(&mut self, sector: u8, key_type: KeyType, key: Key) {
        if let Some(keys) = self.keys.get_mut(sector as usize) {
            match key_type {
                KeyType::A => keys.a = Some(key),
                KeyType::B => keys.b = Some(key),
            }
        }
    }

    pub fn clear_key(&mut self, sector: u8, key_type: KeyType) {
        if let Some(keys) = self.keys.get_mut(sector as usize) {
            match key_type {
                KeyType::A => keys.a = None,
                KeyType::B => keys.b = None,
            }
        }
    }

    /// Whether either key is known for the sector.
    pub fn has_any_key(&self, sector: u8) -> bool {
        self.key(sector, KeyType::A).is_some() || self.key(sector, KeyType::B).is_some()
    }

    /// The sector's three raw access-condition bytes, if its trailer was
    /// captured. Writability can't be evaluated without them.
    pub fn access_bytes(&self, sector: u8) -> Option<[u8; 3]> {
        let trailer = self.block(trailer_of_sector(sector))?;
        if !trailer.captured {
            return None;
        }
        Some([trailer.data[6], trailer.data[7], trailer.data[8]])
    }

    /// A copy of this dump with the sector's access bytes reset to the
    /// factory-default unlocked pattern. Applied after a successful
    /// access-condition reset write, so later policy checks see the new
    /// state without re-reading the card.
    pub fn with_default_access(&self, sector: u8) -> Self {
        let mut dump = self.clone();
        let trailer = trailer_of_sector(sector) as usize;
        if let Some(b) = dump.blocks.get_mut(trailer) {
            if b.captured {
                b.data[6..10].copy_from_slice(&crate::DEFAULT_ACCESS_BYTES);
            }
        }
        dump
    }
}

fn parse_block(input: &[u8]) -> nom::IResult<&[u8], Block> {
    let (input, data) = take(BLOCK_SIZE)(input)?;
    let mut block = [0; BLOCK_SIZE];
    block.copy_from_slice(data);
    Ok((input, Block::captured(block)))
}

/// Parses a raw binary dump image (1024 bytes = 1K, 4096 = 4K) into a fully
/// captured dump. UID, BCC, SAK and ATQA are lifted from the manufacturer
/// block assuming a 4-byte UID, the raw-image convention; keys are taken
/// from every trailer and marked known.
pub fn parse(data: &[u8]) -> Result<MfClassicDump> {
    let kind = match data.len() {
        1024 => DumpKind::Classic1k,
        4096 => DumpKind::Classic4k,
        _ => return Err(Error::Dump("image must be exactly 1024 or 4096 bytes")),
    };

    let (_, blocks) = count(parse_block, kind.total_blocks() as usize)(data)?;

    let block0 = &blocks[0].data;
    let mut dump = MfClassicDump::new(
        kind,
        block0[0..4].to_vec(),
        [block0[6], block0[7]],
        block0[5],
    );
    dump.blocks = blocks;
    for sector in 0..kind.total_sectors() {
        let trailer = dump.blocks[trailer_of_sector(sector) as usize].data;
        let mut key_a = [0; KEY_SIZE];
        let mut key_b = [0; KEY_SIZE];
        key_a.copy_from_slice(&trailer[0..6]);
        key_b.copy_from_slice(&trailer[10..16]);
        dump.set_key(sector, KeyType::A, Key(key_a));
        dump.set_key(sector, KeyType::B, Key(key_b));
    }
    Ok(dump)
}
