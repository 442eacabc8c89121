//! Session lifecycle and stale-completion guard
//!
//! A session moves through `Uninitialized -> Loading -> Ready`, re-enters
//! `Loading` on a full reload, and ends in the terminal `Destroyed` state.
//!
//! Every async boundary captures a [`Ticket`] before awaiting and checks it
//! with [`Lifecycle::is_current`] before mutating anything. A ticket goes stale
//! when the session is destroyed or a newer load cycle starts.
//!
//! ```rust,no_run
//! use taxonomy_tagger::lifecycle::Lifecycle;
//!
//! # async fn fetch() {}
//! # async fn example() {
//! let lifecycle = Lifecycle::new();
//! let ticket = lifecycle.ticket();
//! fetch().await;
//! if !lifecycle.is_current(ticket) {
//!     return; // discard
//! }
//! # }
//! ```

use crate::error::{TaggerError, TaggerResult};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Loading,
    Ready,
    Destroyed,
}

/// Load-cycle generation captured before an async call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    generation: u64,
}

impl Ticket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

pub struct Lifecycle {
    state: RwLock<SessionState>,
    generation: AtomicU64,
    token: CancellationToken,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(SessionState::Uninitialized),
            generation: AtomicU64::new(0),
            token: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    pub fn is_destroyed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token cancelled on teardown; background listeners select on it.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn ticket(&self) -> Ticket {
        Ticket {
            generation: self.generation.load(Ordering::Acquire),
        }
    }

    /// True while the session is alive and no newer load cycle has started.
    pub fn is_current(&self, ticket: Ticket) -> bool {
        !self.is_destroyed() && self.generation.load(Ordering::Acquire) == ticket.generation
    }

    /// Start a new load cycle. Tickets issued before this call go stale.
    pub fn begin_load(&self) -> TaggerResult<Ticket> {
        let mut state = self.state.write();
        if *state == SessionState::Destroyed {
            return Err(TaggerError::Destroyed);
        }
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *state = SessionState::Loading;
        debug!(generation, "load cycle started");
        Ok(Ticket { generation })
    }

    /// Finish the load cycle identified by `ticket`.
    pub fn mark_ready(&self, ticket: Ticket) -> TaggerResult<()> {
        let mut state = self.state.write();
        if *state == SessionState::Destroyed {
            return Err(TaggerError::Destroyed);
        }
        if self.generation.load(Ordering::Acquire) != ticket.generation {
            return Err(TaggerError::Stale);
        }
        *state = SessionState::Ready;
        Ok(())
    }

    /// Enter the terminal state. Returns false when already destroyed.
    pub fn destroy(&self) -> bool {
        let mut state = self.state.write();
        if *state == SessionState::Destroyed {
            return false;
        }
        *state = SessionState::Destroyed;
        self.token.cancel();
        true
    }

    /// Error for operations that need a live session.
    pub fn ensure_alive(&self) -> TaggerResult<()> {
        if self.is_destroyed() {
            Err(TaggerError::Destroyed)
        } else {
            Ok(())
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
