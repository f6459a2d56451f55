//! Per-connection session state.
//!
//! A session couples a character to a transport: an inbound line queue the
//! reader task appends to at any time, an outbound queue the tick loop
//! fills and flushes, and the active mode driving interpretation of input.
//! Everything except the inbound queue and the `closed` flag is touched
//! only from the tick task.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::area::RoomRef;
use crate::character::Character;
use crate::mode::Mode;

pub const PERM_PLAY: u32 = 0x01;
pub const PERM_BUILD: u32 = 0x02;
pub const PERM_ADMIN: u32 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl SessionId {
    pub fn random() -> Self {
        let mut b = [0u8; 8];
        getrandom::getrandom(&mut b).expect("getrandom");
        Self(u64::from_be_bytes(b))
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08x}", self.0 as u32 ^ (self.0 >> 32) as u32)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Channels {
    pub chat: bool,
}

impl Default for Channels {
    fn default() -> Self {
        Self { chat: true }
    }
}

/// Handed from the accept worker to the tick task through the registry.
pub struct NewSession {
    pub id: SessionId,
    pub inbound: Arc<Mutex<VecDeque<String>>>,
    pub closed: Arc<AtomicBool>,
    pub tx: Option<mpsc::UnboundedSender<Bytes>>,
}

/// The only structure shared between the accept worker and the tick task.
/// The lock is held just long enough to push or drain; newly accepted
/// sessions become visible at the top of the next session phase.
pub type SessionRegistry = Arc<Mutex<Vec<NewSession>>>;

pub struct Session {
    pub id: SessionId,
    pub ch: Character,
    pub location: RoomRef,
    pub perms: u32,
    pub channels: Channels,
    pub mode: Mode,
    /// One level deep by contract: entering a nested mode saves here,
    /// leaving restores.
    pub last_mode: Option<Mode>,
    pub quitting: bool,
    /// Transport failed; treated as an implicit quit with no farewell.
    pub dead: bool,
    /// Shared with the reader task, which may append at any time.
    pub inbound: Arc<Mutex<VecDeque<String>>>,
    /// Lines snapshotted for this tick.
    pub work: VecDeque<String>,
    pub outbound: Vec<String>,
    pub tx: Option<mpsc::UnboundedSender<Bytes>>,
    /// Set by the reader task on EOF or read error.
    pub closed: Arc<AtomicBool>,
    pub row_id: Option<emberstore::RowId>,
}

impl Session {
    pub fn new(
        id: SessionId,
        start: RoomRef,
        inbound: Arc<Mutex<VecDeque<String>>>,
        closed: Arc<AtomicBool>,
        tx: Option<mpsc::UnboundedSender<Bytes>>,
    ) -> Self {
        Self {
            id,
            ch: Character::new(""),
            location: start,
            perms: 0,
            channels: Channels::default(),
            mode: Mode::login(),
            last_mode: None,
            quitting: false,
            dead: false,
            inbound,
            work: VecDeque::new(),
            outbound: Vec::new(),
            tx,
            closed,
            row_id: None,
        }
    }

    pub fn push_line(&mut self, text: impl Into<String>) {
        self.outbound.push(text.into());
    }

    /// Snapshot queued input for this tick. Lines arriving later wait for
    /// the next tick.
    pub fn intake(&mut self) {
        let mut q = self.inbound.lock().unwrap_or_else(|e| e.into_inner());
        self.work.extend(q.drain(..));
    }

    pub fn transport_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Past login/creation, i.e. has a backing row to save into.
    pub fn persistable(&self) -> bool {
        self.row_id.is_some()
    }

    pub fn in_play(&self) -> bool {
        matches!(self.mode, Mode::Normal | Mode::Build | Mode::Battle)
    }

    pub fn is_admin(&self) -> bool {
        self.perms & PERM_ADMIN != 0
    }
}
