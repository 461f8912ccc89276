//! The write planner.
//!
//! A cooperative state machine driven by the transceiver's ready events:
//! [`WritePlanner::on_ready`] is called exactly once per event, performs one
//! state's worth of work synchronously (at most one block's exchanges), and
//! returns control to the adapter. The host is called back synchronously for
//! mode and data requests and for the terminal outcome.
//!
//! Sweeps are best-effort: a block that can't be written is logged and
//! skipped, and the sweep always advances. The one exception is the card
//! leaving the field, which aborts to [`PollerState::Fail`] — there's no
//! point sweeping an empty field. This is a deliberate policy choice; see
//! DESIGN.md.

use tap::TapFallible;
use tracing::{debug, trace_span, warn};

use crate::access;
use crate::auth;
use crate::crypto1::{Crypto1, NonceSource};
use crate::dump::{
    is_sector_trailer, sector_of_block, trailer_of_sector, Key, KeyType, MfClassicDump,
    BLOCK_SIZE,
};
use crate::errors::{Error, Result};
use crate::problems;
use crate::transceiver::{ParityFrame, Transceiver, MAX_FWT};
use crate::{DEFAULT_ACCESS_BYTES, DEFAULT_BLOCK_0, DEFAULT_EMPTY_BLOCK, DEFAULT_SECTOR_TRAILER};

/// Mifare Classic write command.
const WRITE_BLOCK_CMD: u8 = 0xA0;

/// The 4-bit acknowledgement a card sends for an accepted write stage.
const ACK: u8 = 0x0A;

/// What the operator asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerMode {
    /// Restore every block to the factory-default pattern.
    Wipe,
    /// Copy a captured source dump onto the card block by block.
    Write,
}

/// Planner states. Idle is initial; Success and Fail both loop back to Idle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PollerState {
    #[default]
    Idle,
    RequestMode,
    RequestSourceData,
    RequestTargetData,
    Wipe,
    Write,
    Success,
    Fail,
}

/// Returned from host callbacks and [`WritePlanner::on_ready`]: whether the
/// adapter should keep delivering ready events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Stop,
}

/// The host side of a session. Called synchronously from within
/// [`WritePlanner::on_ready`]; the planner blocks until each call returns.
pub trait PollerHost {
    /// A writable clone was detected and a session is starting.
    fn card_detected(&mut self) -> Control {
        Control::Continue
    }

    /// Pick wipe or write. `None` stops the session.
    fn request_mode(&mut self) -> Option<PollerMode>;

    /// Supply the dump to copy from (write mode only). `None` stops.
    fn request_source_data(&mut self) -> Option<MfClassicDump>;

    /// Supply the dump describing the card's current keys and access
    /// conditions. `None` stops.
    fn request_target_data(&mut self) -> Option<MfClassicDump>;

    /// The sweep covered every block.
    fn success(&mut self) -> Control {
        Control::Stop
    }

    /// The sweep was aborted.
    fn failed(&mut self) -> Control {
        Control::Stop
    }
}

/// Per-operation scratch state, destroyed on return to Idle.
#[derive(Debug, Clone, Copy, Default)]
struct WriteContext {
    current_block: u16,
    halt_before_write: bool,
}

/// Drives a wipe or write of one card. Owns the transceiver and cipher
/// engine for the lifetime of the session; no other planner may share them.
#[derive(Debug)]
pub struct WritePlanner<T, C, N> {
    trx: T,
    cipher: C,
    nonces: N,
    state: PollerState,
    mode: Option<PollerMode>,
    source: Option<MfClassicDump>,
    target: Option<MfClassicDump>,
    ctx: WriteContext,
}

impl<T, C, N> WritePlanner<T, C, N>
where
    T: Transceiver,
    C: Crypto1,
    N: NonceSource,
{
    pub fn new(trx: T, cipher: C, nonces: N) -> Self {
        Self {
            trx,
            cipher,
            nonces,
            state: PollerState::Idle,
            mode: None,
            source: None,
            target: None,
            ctx: WriteContext::default(),
        }
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    pub fn transceiver_mut(&mut self) -> &mut T {
        &mut self.trx
    }

    pub fn into_transceiver(self) -> T {
        self.trx
    }

    /// Handles one transceiver ready event. Every state transition completes
    /// within this call; there is no internal suspension point.
    pub fn on_ready(&mut self, host: &mut dyn PollerHost) -> Control {
        let span = trace_span!("on_ready", state = ?self.state);
        let _enter = span.enter();

        match self.state {
            PollerState::Idle => self.on_idle(host),
            PollerState::RequestMode => self.on_request_mode(host),
            PollerState::RequestSourceData => self.on_request_source_data(host),
            PollerState::RequestTargetData => self.on_request_target_data(host),
            PollerState::Wipe => self.on_sweep(PollerMode::Wipe),
            PollerState::Write => self.on_sweep(PollerMode::Write),
            PollerState::Success => self.on_finished(host, true),
            PollerState::Fail => self.on_finished(host, false),
        }
    }

    fn on_idle(&mut self, host: &mut dyn PollerHost) -> Control {
        self.ctx = WriteContext::default();
        match host.card_detected() {
            Control::Continue => {
                self.state = PollerState::RequestMode;
                Control::Continue
            }
            Control::Stop => {
                self.reset();
                Control::Stop
            }
        }
    }

    fn on_request_mode(&mut self, host: &mut dyn PollerHost) -> Control {
        match host.request_mode() {
            Some(PollerMode::Wipe) => {
                self.mode = Some(PollerMode::Wipe);
                self.state = PollerState::RequestTargetData;
                Control::Continue
            }
            Some(PollerMode::Write) => {
                self.mode = Some(PollerMode::Write);
                self.state = PollerState::RequestSourceData;
                Control::Continue
            }
            None => {
                self.reset();
                Control::Stop
            }
        }
    }

    fn on_request_source_data(&mut self, host: &mut dyn PollerHost) -> Control {
        match host.request_source_data() {
            Some(dump) => {
                self.source = Some(dump);
                self.state = PollerState::RequestTargetData;
                Control::Continue
            }
            None => {
                self.reset();
                Control::Stop
            }
        }
    }

    fn on_request_target_data(&mut self, host: &mut dyn PollerHost) -> Control {
        let Some(dump) = host.request_target_data() else {
            self.reset();
            return Control::Stop;
        };
        self.target = Some(dump);
        self.state = match self.mode {
            Some(PollerMode::Wipe) => PollerState::Wipe,
            Some(PollerMode::Write) => match self.source_layout_ok() {
                true => PollerState::Write,
                false => PollerState::Fail,
            },
            None => PollerState::Fail,
        };
        Control::Continue
    }

    fn source_layout_ok(&self) -> bool {
        let (Some(source), Some(target)) = (self.source.as_ref(), self.target.as_ref()) else {
            warn!("write mode without a source dump");
            return false;
        };
        let problems = problems::check_source_layout(source.kind(), target.kind());
        if !problems.is_empty() {
            warn!(?problems, "source layout can't fill the target");
            return false;
        }
        true
    }

    /// One block per ready event, for both sweeps. A failed block is logged
    /// and skipped; only a missing card aborts.
    fn on_sweep(&mut self, mode: PollerMode) -> Control {
        let Some(target) = self.target.as_ref() else {
            self.state = PollerState::Fail;
            return Control::Continue;
        };
        let total = target.kind().total_blocks();
        let block = self.ctx.current_block;
        if block >= total {
            self.state = PollerState::Success;
            return Control::Continue;
        }

        let content = match mode {
            PollerMode::Wipe => Some(wipe_template(block)),
            PollerMode::Write => match self.source.as_ref().and_then(|s| s.block(block)) {
                Some(b) if b.captured => Some(b.data),
                // Never captured: not an error, just nothing to write.
                _ => {
                    debug!(block, "source block uncaptured, skipping");
                    None
                }
            },
        };

        if let Some(content) = content {
            match self.process_block(block, &content) {
                Ok(()) => {}
                Err(Error::NotPresent) => {
                    warn!(block, "card left the field, aborting");
                    self.state = PollerState::Fail;
                    return Control::Continue;
                }
                Err(err) => {
                    warn!(block, %err, "block failed, continuing sweep");
                }
            }
        }

        self.ctx.current_block += 1;
        Control::Continue
    }

    fn on_finished(&mut self, host: &mut dyn PollerHost, success: bool) -> Control {
        let control = if success { host.success() } else { host.failed() };
        self.reset();
        control
    }

    fn reset(&mut self) {
        self.state = PollerState::Idle;
        self.mode = None;
        self.source = None;
        self.target = None;
        self.ctx = WriteContext::default();
    }

    /// The per-block write procedure shared by both sweeps: skip if the
    /// content is already on the card, free the sector's access conditions
    /// if needed and possible, authenticate, write, halt.
    fn process_block(&mut self, block: u16, content: &[u8; BLOCK_SIZE]) -> Result<()> {
        let Some(target) = self.target.as_ref() else {
            return Err(Error::Protocol);
        };
        if let Some(b) = target.block(block) {
            if b.captured && &b.data == content {
                debug!(block, "content already present, skipping");
                return Ok(());
            }
        }

        if self.ctx.halt_before_write {
            let _ = self
                .trx
                .halt()
                .tap_err(|err| debug!(%err, "deferred halt failed"));
            self.ctx.halt_before_write = false;
        }

        let can_write = access::can_write_block(target, block);
        // Only bother resetting if that actually frees the block.
        let reset_helps = access::reset_makes_writable(target, block);
        if !can_write {
            if reset_helps {
                self.reset_access_conditions(block)?;
            } else {
                warn!(block, "access bits locked and unresettable, skipping");
                return Ok(());
            }
        }

        let Some(target) = self.target.as_ref() else {
            return Err(Error::Protocol);
        };
        let Some(key_type) = access::get_key_type_to_write(target, block) else {
            warn!(block, "no usable key for writing, skipping");
            return Ok(());
        };
        let sector = sector_of_block(block);
        let Some(key) = target.key(sector, key_type) else {
            warn!(block, ?key_type, "resolved key type has no key, skipping");
            return Ok(());
        };
        let uid = target.uid_word();

        let result = self.transfer_block(uid, block, key, key_type, content);
        // Halt regardless of outcome, so the next block starts from a known
        // link state.
        if let Err(err) = self.trx.halt() {
            debug!(%err, "halt after write failed");
            self.ctx.halt_before_write = true;
        }
        result
    }

    /// Authenticate and push one block: write command, then the 16 data
    /// bytes, each stage encrypted with cipher-predicted parity and
    /// acknowledged by the card.
    fn transfer_block(
        &mut self,
        uid: u32,
        block: u16,
        key: Key,
        key_type: KeyType,
        content: &[u8; BLOCK_SIZE],
    ) -> Result<()> {
        auth::authenticate(
            &mut self.trx,
            &mut self.cipher,
            &mut self.nonces,
            uid,
            block as u8,
            key,
            key_type,
            false,
        )?;

        let cmd = self.cipher.encrypt(&[WRITE_BLOCK_CMD, block as u8]);
        let rx = self.trx.send_custom_parity_frame(&cmd, MAX_FWT)?;
        self.expect_ack(&rx)?;

        let data = self.cipher.encrypt(content);
        let rx = self.trx.send_custom_parity_frame(&data, MAX_FWT)?;
        self.expect_ack(&rx)?;

        debug!(block, "block written");
        Ok(())
    }

    fn expect_ack(&mut self, rx: &ParityFrame) -> Result<()> {
        let plain = self.cipher.decrypt(&rx.data);
        match plain.first() {
            Some(b) if b & 0x0F == ACK => Ok(()),
            _ => {
                debug!(rx = %hex::encode_upper(&rx.data), "card NAKed the write");
                Err(Error::Protocol)
            }
        }
    }

    /// Writes the covering trailer back with its original keys and the
    /// factory-default access bytes, then applies the same change to the
    /// in-memory target so later policy checks see the unlocked state.
    fn reset_access_conditions(&mut self, block: u16) -> Result<()> {
        let Some(target) = self.target.as_ref() else {
            return Err(Error::Protocol);
        };
        let sector = sector_of_block(block);
        let trailer = trailer_of_sector(sector);
        let Some(key_type) = access::get_key_type_to_reset(target, block) else {
            return Err(Error::Protocol);
        };
        let Some(key) = target.key(sector, key_type) else {
            return Err(Error::Protocol);
        };
        // Unknown keys get the factory default; the card's key changes
        // either way once this trailer lands.
        let key_a = target.key(sector, KeyType::A).unwrap_or(Key([0xFF; 6]));
        let key_b = target.key(sector, KeyType::B).unwrap_or(Key([0xFF; 6]));
        let uid = target.uid_word();

        let mut content = [0u8; BLOCK_SIZE];
        content[0..6].copy_from_slice(&key_a.0);
        content[6..10].copy_from_slice(&DEFAULT_ACCESS_BYTES);
        content[10..16].copy_from_slice(&key_b.0);

        debug!(sector, ?key_type, "resetting access conditions");
        self.transfer_block(uid, trailer, key, key_type, &content)?;
        let _ = self
            .trx
            .halt()
            .tap_err(|err| debug!(%err, "halt after reset failed"));

        if let Some(target) = self.target.take() {
            let mut updated = target.with_default_access(sector);
            updated.set_key(sector, KeyType::A, key_a);
            updated.set_key(sector, KeyType::B, key_b);
            self.target = Some(updated);
        }
        Ok(())
    }
}

fn wipe_template(block: u16) -> [u8; BLOCK_SIZE] {
    if block == 0 {
        DEFAULT_BLOCK_0
    } else if is_sector_trailer(block) {
        DEFAULT_SECTOR_TRAILER
    } else {
        DEFAULT_EMPTY_BLOCK
    }
}
