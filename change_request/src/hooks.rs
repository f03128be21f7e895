// SPDX-License-Identifier: MIT OR Apache-2.0
//! Fire-and-forget seams to the platform around the engine.
//!
//! Both sinks are best-effort: a failure is logged and swallowed, never
//! surfaced as the caller-visible outcome of the operation that fired it.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Events handed to the notification dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notification {
    RequestOpened {
        request_id: String,
        folder_id: String,
        committer_id: String,
    },
    SoftBypassMerge {
        request_id: String,
        merged_by: String,
        reason: String,
    },
}

pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: &Notification) -> std::result::Result<(), String>;
}

/// Downstream sync, told which folder's materialized secrets changed.
pub trait SyncTrigger: Send + Sync {
    fn schedule(&self, folder_id: &str) -> std::result::Result<(), String>;
}

/// Default sink that drops every event.
pub struct NoopNotifier;

impl NotificationSink for NoopNotifier {
    fn notify(&self, _event: &Notification) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// Default trigger that schedules nothing.
pub struct NoopSync;

impl SyncTrigger for NoopSync {
    fn schedule(&self, _folder_id: &str) -> std::result::Result<(), String> {
        Ok(())
    }
}

pub(crate) fn dispatch(sink: &dyn NotificationSink, event: &Notification) {
    if let Err(e) = sink.notify(event) {
        warn!(error = %e, "notification dispatch failed");
    }
}

pub(crate) fn trigger_sync(sync: &dyn SyncTrigger, folder_id: &str) {
    if let Err(e) = sync.schedule(folder_id) {
        warn!(folder_id, error = %e, "downstream sync trigger failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    impl NotificationSink for Failing {
        fn notify(&self, _event: &Notification) -> std::result::Result<(), String> {
            Err("smtp down".into())
        }
    }

    impl SyncTrigger for Failing {
        fn schedule(&self, _folder_id: &str) -> std::result::Result<(), String> {
            Err("queue full".into())
        }
    }

    #[test]
    fn test_dispatch_swallows_failures() {
        dispatch(
            &Failing,
            &Notification::RequestOpened {
                request_id: "r".into(),
                folder_id: "f".into(),
                committer_id: "alice".into(),
            },
        );
        trigger_sync(&Failing, "f");
    }
}
