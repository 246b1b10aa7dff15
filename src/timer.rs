// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cancellable delayed callbacks.
//!
//! A [`TimerSlot`] holds at most one pending callback. Arming the slot
//! cancels whatever was pending, so a slot never fires twice for two
//! overlapping arm calls.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use powerhub_lib::timer::TimerSlot;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let slot = TimerSlot::new();
//! slot.arm(Duration::from_secs(30), async {
//!     println!("auto-off");
//! });
//! assert!(slot.is_armed());
//! slot.cancel();
//! assert!(!slot.is_armed());
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// A slot holding at most one pending delayed callback.
#[derive(Debug, Default)]
pub struct TimerSlot {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerSlot {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `callback` to run after `delay`, cancelling any pending one.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm<F>(&self, delay: Duration, callback: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback.await;
        });
        if let Some(previous) = self.handle.lock().replace(task) {
            previous.abort();
        }
    }

    /// Cancels the pending callback, if any.
    ///
    /// Returns true if a callback was still pending.
    pub fn cancel(&self) -> bool {
        match self.handle.lock().take() {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                pending
            }
            None => false,
        }
    }

    /// Returns true if a callback is scheduled and has not completed.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}
