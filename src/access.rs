//! Access Policy Engine.
//!
//! Decodes sector access conditions and answers every "may we write this?"
//! question the planner has. Everything here is pure: the only inputs are a
//! dump and a block number, so the same answers are available radio-free to
//! the problem classifier.
//!
//! The permission matrices are committed constants reproducing the Mifare
//! Classic access tables (MF1S50 section 8.7), not inferred logic. Access
//! bits are a 3-bit code per slot, stored redundantly across three trailer
//! bytes: bytes 7/8 hold the bits proper, byte 6 and the low nibble of
//! byte 7 hold their complements.

use bitflags::bitflags;

use crate::dump::{
    access_slot, is_sector_trailer, sector_of_block, KeyType, MfClassicDump,
};
use crate::problems::WriteProblem;

bitflags! {
    /// The key types an operation is permitted under.
    pub struct Permit: u8 {
        const KEY_A = 0b01;
        const KEY_B = 0b10;
    }
}

impl Permit {
    fn allows(self, key_type: KeyType) -> bool {
        match key_type {
            KeyType::A => self.contains(Self::KEY_A),
            KeyType::B => self.contains(Self::KEY_B),
        }
    }
}

const A: Permit = Permit::KEY_A;
const B: Permit = Permit::KEY_B;
const AB: Permit = Permit::from_bits_truncate(0b11);
const NONE: Permit = Permit::empty();

/// Data-block permissions for one access code.
#[derive(Debug, Clone, Copy)]
pub struct DataAccess {
    pub read: Permit,
    pub write: Permit,
    pub increment: Permit,
    pub decrement: Permit,
}

/// Trailer permissions for one access code. Key A is never readable.
#[derive(Debug, Clone, Copy)]
pub struct TrailerAccess {
    pub key_a_write: Permit,
    pub ac_read: Permit,
    pub ac_write: Permit,
    pub key_b_read: Permit,
    pub key_b_write: Permit,
}

/// Data-block access matrix, indexed by the C1 C2 C3 code.
#[rustfmt::skip]
pub const DATA_ACCESS: [DataAccess; 8] = [
    /* 000 */ DataAccess { read: AB,   write: AB,   increment: AB,   decrement: AB },
    /* 001 */ DataAccess { read: AB,   write: NONE, increment: NONE, decrement: AB },
    /* 010 */ DataAccess { read: AB,   write: NONE, increment: NONE, decrement: NONE },
    /* 011 */ DataAccess { read: B,    write: B,    increment: NONE, decrement: NONE },
    /* 100 */ DataAccess { read: AB,   write: B,    increment: NONE, decrement: NONE },
    /* 101 */ DataAccess { read: B,    write: NONE, increment: NONE, decrement: NONE },
    /* 110 */ DataAccess { read: AB,   write: B,    increment: B,    decrement: AB },
    /* 111 */ DataAccess { read: NONE, write: NONE, increment: NONE, decrement: NONE },
];

/// Sector-trailer access matrix, indexed by the C1 C2 C3 code.
#[rustfmt::skip]
pub const TRAILER_ACCESS: [TrailerAccess; 8] = [
    /* 000 */ TrailerAccess { key_a_write: A,    ac_read: A,  ac_write: NONE, key_b_read: A,    key_b_write: A },
    /* 001 */ TrailerAccess { key_a_write: A,    ac_read: A,  ac_write: A,    key_b_read: A,    key_b_write: A },
    /* 010 */ TrailerAccess { key_a_write: NONE, ac_read: A,  ac_write: NONE, key_b_read: A,    key_b_write: NONE },
    /* 011 */ TrailerAccess { key_a_write: B,    ac_read: AB, ac_write: B,    key_b_read: NONE, key_b_write: B },
    /* 100 */ TrailerAccess { key_a_write: B,    ac_read: AB, ac_write: NONE, key_b_read: NONE, key_b_write: B },
    /* 101 */ TrailerAccess { key_a_write: NONE, ac_read: AB, ac_write: B,    key_b_read: NONE, key_b_write: NONE },
    /* 110 */ TrailerAccess { key_a_write: NONE, ac_read: AB, ac_write: NONE, key_b_read: NONE, key_b_write: NONE },
    /* 111 */ TrailerAccess { key_a_write: NONE, ac_read: AB, ac_write: NONE, key_b_read: NONE, key_b_write: NONE },
];

/// Extracts a slot's 3-bit access code from the raw AC bytes.
pub fn access_code(ac: [u8; 3], slot: u8) -> u8 {
    let c1 = (ac[1] >> (4 + slot)) & 1;
    let c2 = (ac[2] >> slot) & 1;
    let c3 = (ac[2] >> (4 + slot)) & 1;
    c1 << 2 | c2 << 1 | c3
}

/// Whether a slot's complement bits agree with its access code. Cards with
/// inconsistent AC bytes lock up on write, so a failed check is treated as
/// locked by the policy functions.
pub fn access_code_consistent(ac: [u8; 3], slot: u8) -> bool {
    let nc1 = (ac[0] >> slot) & 1;
    let nc2 = (ac[0] >> (4 + slot)) & 1;
    let nc3 = (ac[1] >> slot) & 1;
    let code = access_code(ac, slot);
    let (c1, c2, c3) = (code >> 2 & 1, code >> 1 & 1, code & 1);
    nc1 == c1 ^ 1 && nc2 == c2 ^ 1 && nc3 == c3 ^ 1
}

fn code_for_block(dump: &MfClassicDump, block: u16) -> Option<u8> {
    let ac = dump.access_bytes(sector_of_block(block))?;
    let slot = access_slot(block);
    if !access_code_consistent(ac, slot) {
        return None;
    }
    Some(access_code(ac, slot))
}

fn held_key_types(dump: &MfClassicDump, sector: u8) -> impl Iterator<Item = KeyType> + '_ {
    [KeyType::A, KeyType::B]
        .into_iter()
        .filter(move |&t| dump.key(sector, t).is_some())
}

/// Whether a whole-trailer rewrite (key A, AC field, key B) is permitted
/// under the given key type.
fn trailer_writable_with(access: &TrailerAccess, key_type: KeyType) -> bool {
    access.key_a_write.allows(key_type)
        && access.ac_write.allows(key_type)
        && access.key_b_write.allows(key_type)
}

fn block_writable_with(dump: &MfClassicDump, block: u16, key_type: KeyType) -> bool {
    let Some(code) = code_for_block(dump, block) else {
        return false;
    };
    if is_sector_trailer(block) {
        trailer_writable_with(&TRAILER_ACCESS[code as usize], key_type)
    } else {
        if block == 0 && dump.uid().len() == 7 {
            // The 7-byte-UID write protocol is a different backdoor family;
            // the manufacturer block stays off limits.
            return false;
        }
        DATA_ACCESS[code as usize].write.allows(key_type)
    }
}

/// Whether the block can be written under at least one key type we hold.
/// For trailers this means rewriting key A, the AC field and key B in one
/// go; block 0 is treated as an ordinary data block on 4-byte-UID clones
/// and is never writable on 7-byte-UID cards.
pub fn can_write_block(dump: &MfClassicDump, block: u16) -> bool {
    let sector = sector_of_block(block);
    held_key_types(dump, sector).any(|t| block_writable_with(dump, block, t))
}

/// Whether the sector's access conditions can be rewritten to the factory
/// default: the trailer must be captured and some held key type must be
/// allowed to write the AC field.
pub fn can_reset_access_conditions(dump: &MfClassicDump, block: u16) -> bool {
    let sector = sector_of_block(block);
    let trailer = crate::dump::trailer_of_sector(sector);
    let Some(code) = code_for_block(dump, trailer) else {
        return false;
    };
    let access = &TRAILER_ACCESS[code as usize];
    held_key_types(dump, sector).any(|t| access.ac_write.allows(t))
}

/// Whether the block would be writable once the sector's access conditions
/// are reset: factory-default codes are 000 for data slots and 001 for the
/// trailer slot. Block 0 of a 7-byte-UID card stays unwritable no matter
/// what the access bytes say.
fn writable_after_reset(dump: &MfClassicDump, block: u16) -> bool {
    if block == 0 && dump.uid().len() == 7 {
        return false;
    }
    let sector = sector_of_block(block);
    if is_sector_trailer(block) {
        held_key_types(dump, sector).any(|t| trailer_writable_with(&TRAILER_ACCESS[0b001], t))
    } else {
        held_key_types(dump, sector).any(|t| DATA_ACCESS[0b000].write.allows(t))
    }
}

/// Whether resetting the sector's access conditions is both permitted and
/// actually frees this block for writing. This is the question the planner
/// and the classifiers ask; a reset that can't unlock the block is never
/// worth a trailer write.
pub fn reset_makes_writable(dump: &MfClassicDump, block: u16) -> bool {
    can_reset_access_conditions(dump, block) && writable_after_reset(dump, block)
}

/// The key type to authenticate with for writing this block: key A when it
/// both is held and permits the write, otherwise key B, otherwise nothing.
pub fn get_key_type_to_write(dump: &MfClassicDump, block: u16) -> Option<KeyType> {
    let sector = sector_of_block(block);
    held_key_types(dump, sector).find(|&t| block_writable_with(dump, block, t))
}

/// The key type to authenticate with for resetting the sector's access
/// conditions, preferring key A.
pub fn get_key_type_to_reset(dump: &MfClassicDump, block: u16) -> Option<KeyType> {
    let sector = sector_of_block(block);
    let trailer = crate::dump::trailer_of_sector(sector);
    let code = code_for_block(dump, trailer)?;
    let access = &TRAILER_ACCESS[code as usize];
    held_key_types(dump, sector).find(|&t| access.ac_write.allows(t))
}

/// Obstacles to writing one data block of the target.
pub fn classify_data_block_problems(dump: &MfClassicDump, block: u16) -> WriteProblem {
    let mut problems = WriteProblem::empty();
    let sector = sector_of_block(block);
    if !dump.has_any_key(sector) {
        problems |= WriteProblem::MISSING_TARGET_KEYS;
    }
    if !can_write_block(dump, block) && !reset_makes_writable(dump, block) {
        problems |= WriteProblem::LOCKED_ACCESS_BITS;
    }
    problems
}

/// Obstacles to writing one sector trailer of the target. The three
/// sub-fields are judged individually: a trailer is locked if any of key A,
/// the AC field or key B can neither be written nor freed by an AC reset.
pub fn classify_sector_trailer_problems(dump: &MfClassicDump, block: u16) -> WriteProblem {
    let mut problems = WriteProblem::empty();
    let sector = sector_of_block(block);
    if !dump.has_any_key(sector) {
        problems |= WriteProblem::MISSING_TARGET_KEYS;
    }

    let resettable = reset_makes_writable(dump, block);
    let locked = match code_for_block(dump, block) {
        Some(code) => {
            let access = &TRAILER_ACCESS[code as usize];
            [access.key_a_write, access.ac_write, access.key_b_write]
                .into_iter()
                .any(|field| !held_key_types(dump, sector).any(|t| field.allows(t)))
        }
        // Uncaptured or inconsistent trailer: nothing can be evaluated.
        None => true,
    };
    if locked && !resettable {
        problems |= WriteProblem::LOCKED_ACCESS_BITS;
    }
    problems
}
