//! Readiness state machine for the peer data channel.
//!
//! Game payloads must never be handed to a data channel that is not open.
//! [`ChannelGate`] owns the channel's lifecycle state together with the
//! outbound queue, so a send either transmits, queues, or is handed back to
//! the caller. There is no path where a payload is accepted and then lost
//! without the caller being told.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of a peer data channel.
///
/// `Connecting -> Open -> Closed`, or `Connecting -> Closed`. `Closed` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

/// How a send should behave while the channel is still connecting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Delivery {
    /// Hold the payload and transmit it when the channel opens.
    #[default]
    Queue,
    /// Refuse the payload unless the channel is already open.
    Immediate,
}

/// Result of a successful [`ChannelGate::submit`].
#[derive(Debug, PartialEq, Eq)]
pub enum Submission<T> {
    /// The channel is open; transmit this now.
    Transmit(T),
    /// Held in the pending queue at the given position (0-based).
    Queued(usize),
}

#[derive(Debug, PartialEq, Eq)]
pub enum GateError<T> {
    /// The channel cannot take the payload. The payload is handed back.
    NotReady { state: ChannelState, item: T },
    /// The requested transition is not allowed from the current state.
    InvalidTransition {
        from: ChannelState,
        to: ChannelState,
    },
}

impl<T> GateError<T> {
    /// Recover the rejected payload, if any.
    pub fn into_item(self) -> Option<T> {
        match self {
            Self::NotReady { item, .. } => Some(item),
            Self::InvalidTransition { .. } => None,
        }
    }
}

impl<T> fmt::Display for GateError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady { state, .. } => write!(f, "channel not ready (state: {state:?})"),
            Self::InvalidTransition { from, to } => {
                write!(f, "invalid channel transition: {from:?} -> {to:?}")
            },
        }
    }
}

impl<T: fmt::Debug> std::error::Error for GateError<T> {}

/// Channel state plus the FIFO queue of payloads waiting for `Open`.
#[derive(Debug)]
pub struct ChannelGate<T> {
    state: ChannelState,
    pending: VecDeque<T>,
}

impl<T> Default for ChannelGate<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ChannelGate<T> {
    pub fn new() -> Self {
        Self {
            state: ChannelState::Connecting,
            pending: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Offer a payload to the channel.
    pub fn submit(&mut self, item: T, delivery: Delivery) -> Result<Submission<T>, GateError<T>> {
        match (self.state, delivery) {
            (ChannelState::Open, _) => Ok(Submission::Transmit(item)),
            (ChannelState::Connecting, Delivery::Queue) => {
                self.pending.push_back(item);
                Ok(Submission::Queued(self.pending.len() - 1))
            },
            (state, _) => Err(GateError::NotReady { state, item }),
        }
    }

    /// Transition to `Open`, returning every queued payload in enqueue order.
    ///
    /// The transition happens once: calling this on an already open gate
    /// returns an empty batch. Opening a closed gate is rejected.
    pub fn open(&mut self) -> Result<Vec<T>, GateError<T>> {
        match self.state {
            ChannelState::Connecting => {
                self.state = ChannelState::Open;
                Ok(self.pending.drain(..).collect())
            },
            ChannelState::Open => Ok(Vec::new()),
            ChannelState::Closed => Err(GateError::InvalidTransition {
                from: ChannelState::Closed,
                to: ChannelState::Open,
            }),
        }
    }

    /// Transition to `Closed`, returning the payloads that were discarded.
    pub fn close(&mut self) -> Vec<T> {
        self.state = ChannelState::Closed;
        if !self.pending.is_empty() {
            tracing::debug!(discarded = self.pending.len(), "Channel closed with queued payloads");
        }
        self.pending.drain(..).collect()
    }
}
