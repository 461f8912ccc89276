//! An engine for rewriting Gen2/CUID-family Mifare Classic clone cards.
//!
//! These clone chips accept ordinary authenticated writes to every block,
//! including the manufacturer block, which genuine cards keep read-only.
//! This crate detects them by their backdoor ATS fingerprint ([`detect`]),
//! models captured cards ([`dump`]), evaluates the access-condition rules
//! that decide whether a block can be rewritten ([`access`], [`problems`]),
//! and drives complete wipe/write sweeps ([`poller`]).
//!
//! The radio, the Crypto1 cipher math and the entropy source stay outside
//! the crate, behind the [`transceiver::Transceiver`], [`crypto1::Crypto1`]
//! and [`crypto1::NonceSource`] seams.

pub mod access;
pub mod auth;
pub mod crypto1;
pub mod detect;
pub mod dump;
pub mod errors;
pub mod poller;
pub mod problems;
pub mod transceiver;

#[cfg(test)]
pub(crate) mod testutil;

pub use errors::{Error, Result};

pub use dump::{Key, KeyType, MfClassicDump};

/// Factory-default manufacturer block written by a wipe, minus the UID
/// fields: a generic UID, BCC, SAK and ATQA for a 1K card.
pub const DEFAULT_BLOCK_0: [u8; dump::BLOCK_SIZE] = [
    0x00, 0x01, 0x02, 0x03, 0x00, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Factory-default data block.
pub const DEFAULT_EMPTY_BLOCK: [u8; dump::BLOCK_SIZE] = [0; dump::BLOCK_SIZE];

/// Factory-default sector trailer: transport keys around the default access
/// bytes.
pub const DEFAULT_SECTOR_TRAILER: [u8; dump::BLOCK_SIZE] = [
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x07, 0x80, 0x69, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
];

/// Factory-default access bytes plus the general-purpose byte: every block
/// writable with either key.
pub const DEFAULT_ACCESS_BYTES: [u8; 4] = [0xFF, 0x07, 0x80, 0x69];
