// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
//! Notifications from the mixing thread.
//!
//! The mixing callback never blocks on the sink. Events that do not fit in the channel
//! are dropped.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::debug;

/// Capacity of the event channel created by the engine.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MixerEvent {
    /// The voice stopped playing its source, either on request or because it ran out.
    VoiceFinished { voice: usize },
    /// A panic was caught inside the mixing callback.
    Fault { voice: Option<usize>, message: String },
    /// A source failed to read while being mixed. The voice treated it as end of stream.
    SourceFault { voice: usize, message: String },
}

/// The sending half of the event channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: Sender<MixerEvent>,
}

impl EventSink {
    /// Creates a bounded channel, returning the sink and its receiver.
    pub fn bounded(capacity: usize) -> (EventSink, Receiver<MixerEvent>) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        (EventSink { sender }, receiver)
    }

    /// Sends without blocking. Failures are swallowed.
    pub fn send(&self, event: MixerEvent) {
        match self.sender.try_send(event) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(event)) => debug!(?event, "Event channel full, dropping"),
        }
    }
}
