// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Events consumed from the host.

use serde::Deserialize;

use crate::host::HardwareState;

/// Events reported by the host that power devices react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// The supervised hardware entered its shutdown condition.
    Shutdown,
    /// The supervised hardware connection finished startup in the given state.
    Started(HardwareState),
    /// The job queue changed.
    JobQueueChanged(JobQueueEvent),
}

/// A job queue change notification.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct JobQueueEvent {
    /// The queue action, e.g. `jobs_added` or `jobs_removed`.
    pub action: String,
    /// The queue after the change.
    #[serde(default)]
    pub updated_queue: Vec<QueuedJob>,
}

impl JobQueueEvent {
    /// Action name reported when jobs were enqueued.
    pub const JOBS_ADDED: &'static str = "jobs_added";

    /// Creates a `jobs_added` event for the given file names.
    #[must_use]
    pub fn jobs_added<I, S>(filenames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            action: Self::JOBS_ADDED.to_string(),
            updated_queue: filenames
                .into_iter()
                .map(|filename| QueuedJob {
                    filename: Some(filename.into()),
                })
                .collect(),
        }
    }

    /// Returns true if jobs were added to the queue.
    #[must_use]
    pub fn is_jobs_added(&self) -> bool {
        self.action == Self::JOBS_ADDED
    }

    /// Returns the display name of the first queued job.
    #[must_use]
    pub fn first_job_name(&self) -> &str {
        self.updated_queue
            .first()
            .and_then(|job| job.filename.as_deref())
            .unwrap_or("unknown")
    }
}

/// An entry of the job queue.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct QueuedJob {
    /// The queued file name.
    #[serde(default)]
    pub filename: Option<String>,
}
