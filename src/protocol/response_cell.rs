// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Request/response correlation for message-bus drivers.
//!
//! A requester arms the cell and waits with a timeout; the inbound message
//! handler resolves whatever request is pending. Each arm call gets a new
//! sequence number so a late timeout cannot clear a newer request.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::TransportError;

type Reply<T> = oneshot::Sender<Result<T, TransportError>>;

#[derive(Debug)]
struct Pending<T> {
    seq: u64,
    reply: Option<Reply<T>>,
}

/// Holds at most one pending request.
#[derive(Debug)]
pub(crate) struct ResponseCell<T> {
    pending: Mutex<Pending<T>>,
}

impl<T> Default for ResponseCell<T> {
    fn default() -> Self {
        Self {
            pending: Mutex::new(Pending { seq: 0, reply: None }),
        }
    }
}

impl<T> ResponseCell<T> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a new pending request, replacing any previous one.
    pub(crate) fn arm(&self) -> Waiter<T> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock();
        pending.seq = pending.seq.wrapping_add(1);
        pending.reply = Some(tx);
        Waiter { seq: pending.seq, rx }
    }

    /// Completes the pending request.
    ///
    /// Returns false if no request was pending.
    pub(crate) fn resolve(&self, result: Result<T, TransportError>) -> bool {
        let reply = self.pending.lock().reply.take();
        match reply {
            Some(reply) => {
                // The requester may have timed out already
                let _ = reply.send(result);
                true
            }
            None => false,
        }
    }

    /// Returns true while a request is pending.
    pub(crate) fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .reply
            .as_ref()
            .is_some_and(|reply| !reply.is_closed())
    }

    /// Drops the pending request if it is still the one numbered `seq`.
    pub(crate) fn clear(&self, seq: u64) {
        let mut pending = self.pending.lock();
        if pending.seq == seq {
            pending.reply = None;
        }
    }
}

/// The receiving half of an armed request.
#[derive(Debug)]
pub(crate) struct Waiter<T> {
    seq: u64,
    rx: oneshot::Receiver<Result<T, TransportError>>,
}

impl<T> Waiter<T> {
    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    /// Waits for the response.
    pub(crate) async fn wait(self, timeout: Duration) -> Result<T, TransportError> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::ChannelClosed(
                "pending request was replaced".to_string(),
            )),
            Err(_) => Err(TransportError::Timeout(
                u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        }
    }
}
