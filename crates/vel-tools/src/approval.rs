// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: MIT
//! Approval gate for confirmation-required tools.
//!
//! The agent loop is the single producer (it files a request and suspends on
//! the returned receiver); a UI or test driver is the single consumer (it
//! answers via [`ApprovalManager::respond`]).  Requests are served FIFO by
//! arrival.  Dropping the manager — or calling
//! [`cancel_all`][ApprovalManager::cancel_all] on session teardown — resolves
//! every outstanding request as [`ApprovalDecision::Cancelled`], which the
//! loop turns into a cancelled run instead of blocking forever.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::tool::ToolCall;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Denied,
    Cancelled,
}

/// An approval request waiting for an answer.
#[derive(Debug, Clone)]
pub struct PendingApproval {
    pub call_id: String,
    pub tool_name: String,
    pub args: Value,
}

#[derive(Default)]
struct Inner {
    /// FIFO arrival order of unanswered requests.
    queue: VecDeque<PendingApproval>,
    /// Responder halves keyed by tool-call id.
    waiters: HashMap<String, oneshot::Sender<ApprovalDecision>>,
}

#[derive(Default)]
pub struct ApprovalManager {
    inner: Mutex<Inner>,
}

impl ApprovalManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// File an approval request for `call` and return the receiver the agent
    /// loop suspends on.  A dropped sender reads as `Cancelled` on the
    /// receiving side.
    pub fn request(&self, call: &ToolCall) -> oneshot::Receiver<ApprovalDecision> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock().expect("ApprovalManager lock poisoned");
        debug!(call_id = %call.id, tool = %call.name, "approval requested");
        inner.queue.push_back(PendingApproval {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            args: call.args.clone(),
        });
        inner.waiters.insert(call.id.clone(), tx);
        rx
    }

    /// Answer the request for `call_id`.  Returns `false` when no such
    /// request is pending (already answered or never filed).
    pub fn respond(&self, call_id: &str, approved: bool) -> bool {
        let mut inner = self.inner.lock().expect("ApprovalManager lock poisoned");
        let Some(tx) = inner.waiters.remove(call_id) else {
            return false;
        };
        inner.queue.retain(|p| p.call_id != call_id);
        let decision = if approved {
            ApprovalDecision::Approved
        } else {
            ApprovalDecision::Denied
        };
        tx.send(decision).is_ok()
    }

    /// Answer the oldest pending request whose tool matches `tool_name`.
    pub fn respond_by_tool_name(&self, tool_name: &str, approved: bool) -> bool {
        let call_id = {
            let inner = self.inner.lock().expect("ApprovalManager lock poisoned");
            inner
                .queue
                .iter()
                .find(|p| p.tool_name == tool_name)
                .map(|p| p.call_id.clone())
        };
        match call_id {
            Some(id) => self.respond(&id, approved),
            None => false,
        }
    }

    /// Resolve every outstanding request as cancelled.  Used on session
    /// termination so the agent loop is never left suspended.
    pub fn cancel_all(&self) {
        let mut inner = self.inner.lock().expect("ApprovalManager lock poisoned");
        inner.queue.clear();
        for (_, tx) in inner.waiters.drain() {
            let _ = tx.send(ApprovalDecision::Cancelled);
        }
    }

    pub fn has_pending(&self) -> bool {
        !self
            .inner
            .lock()
            .expect("ApprovalManager lock poisoned")
            .queue
            .is_empty()
    }

    /// The oldest unanswered request, if any.
    pub fn next_pending(&self) -> Option<PendingApproval> {
        self.inner
            .lock()
            .expect("ApprovalManager lock poisoned")
            .queue
            .front()
            .cloned()
    }

    pub fn pending_count(&self) -> usize {
        self.inner
            .lock()
            .expect("ApprovalManager lock poisoned")
            .queue
            .len()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall { id: id.into(), name: name.into(), args: json!({}) }
    }

    #[tokio::test]
    async fn approve_resolves_receiver() {
        let mgr = ApprovalManager::new();
        let rx = mgr.request(&call("c1", "execute"));
        assert!(mgr.respond("c1", true));
        assert_eq!(rx.await.unwrap(), ApprovalDecision::Approved);
        assert!(!mgr.has_pending());
    }

    #[tokio::test]
    async fn deny_resolves_receiver() {
        let mgr = ApprovalManager::new();
        let rx = mgr.request(&call("c1", "execute"));
        assert!(mgr.respond("c1", false));
        assert_eq!(rx.await.unwrap(), ApprovalDecision::Denied);
    }

    #[tokio::test]
    async fn respond_unknown_id_returns_false() {
        let mgr = ApprovalManager::new();
        assert!(!mgr.respond("ghost", true));
    }

    #[tokio::test]
    async fn respond_twice_is_at_most_once() {
        let mgr = ApprovalManager::new();
        let _rx = mgr.request(&call("c1", "execute"));
        assert!(mgr.respond("c1", true));
        assert!(!mgr.respond("c1", false), "second answer must be rejected");
    }

    #[tokio::test]
    async fn fifo_order_observed() {
        let mgr = ApprovalManager::new();
        let _r1 = mgr.request(&call("c1", "a"));
        let _r2 = mgr.request(&call("c2", "b"));
        assert_eq!(mgr.pending_count(), 2);
        assert_eq!(mgr.next_pending().unwrap().call_id, "c1");
        mgr.respond("c1", true);
        assert_eq!(mgr.next_pending().unwrap().call_id, "c2");
    }

    #[tokio::test]
    async fn respond_by_tool_name_picks_oldest_match() {
        let mgr = ApprovalManager::new();
        let r1 = mgr.request(&call("c1", "execute"));
        let _r2 = mgr.request(&call("c2", "execute"));
        assert!(mgr.respond_by_tool_name("execute", true));
        assert_eq!(r1.await.unwrap(), ApprovalDecision::Approved);
        assert_eq!(mgr.next_pending().unwrap().call_id, "c2");
    }

    #[tokio::test]
    async fn cancel_all_resolves_everything_cancelled() {
        let mgr = ApprovalManager::new();
        let r1 = mgr.request(&call("c1", "a"));
        let r2 = mgr.request(&call("c2", "b"));
        mgr.cancel_all();
        assert_eq!(r1.await.unwrap(), ApprovalDecision::Cancelled);
        assert_eq!(r2.await.unwrap(), ApprovalDecision::Cancelled);
        assert_eq!(mgr.pending_count(), 0);
    }

    #[tokio::test]
    async fn dropped_manager_reads_as_error_on_receiver() {
        let rx = {
            let mgr = ApprovalManager::new();
            mgr.request(&call("c1", "a"))
        };
        // Sender dropped with the manager: the loop treats this as Cancelled.
        assert!(rx.await.is_err());
    }
}
