//! Pending-operation bridge.
//!
//! Every fallible transport call is represented as a pending operation
//! resolved through a one-shot channel. The asynchronous surface hands the
//! receiving half to the caller as an [`OperationHandle`]; the synchronous
//! surface is a blocking join on the same handle. The one-shot sender's
//! move semantics make double resolution unrepresentable, and dropping the
//! sender resolves the handle with an engine-stopped error rather than
//! leaving it pending forever.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{Result, SessionError};
use crate::transport::OpToken;

/// Kind of an in-flight session operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Connect,
    End,
    Subscribe,
    Unsubscribe,
    Publish,
}

impl OpKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::End => "end",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Publish => "publish",
        }
    }
}

pub(crate) type OpReply = oneshot::Sender<Result<()>>;

fn engine_stopped() -> SessionError {
    SessionError::Transport("session engine stopped".into())
}

/// Deferred result of an asynchronous session operation.
///
/// Resolves exactly once. Block on it with [`OperationHandle::wait`] (the
/// synchronous surface) or await it from an asynchronous context.
#[derive(Debug)]
pub struct OperationHandle {
    kind: OpKind,
    receiver: oneshot::Receiver<Result<()>>,
}

impl OperationHandle {
    pub(crate) fn new(kind: OpKind) -> (Self, OpReply) {
        let (reply, receiver) = oneshot::channel();
        (Self { kind, receiver }, reply)
    }

    /// A handle that resolved before it was returned.
    pub(crate) fn resolved(kind: OpKind, result: Result<()>) -> Self {
        let (handle, reply) = Self::new(kind);
        let _ = reply.send(result);
        handle
    }

    pub fn kind(&self) -> OpKind {
        self.kind
    }

    /// Block the calling thread until the operation resolves.
    pub fn wait(self) -> Result<()> {
        self.receiver
            .blocking_recv()
            .unwrap_or_else(|_| Err(engine_stopped()))
    }
}

impl Future for OperationHandle {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(engine_stopped())))
    }
}

/// One in-flight operation, owned by the engine until completion.
#[derive(Debug)]
pub(crate) struct PendingOp {
    pub kind: OpKind,
    pub reply: OpReply,
    pub deadline: Instant,
    pub bytes: usize,
}

/// The engine's table of in-flight operations, keyed by transport token.
#[derive(Debug, Default)]
pub(crate) struct PendingOps {
    next_token: OpToken,
    table: HashMap<OpToken, PendingOp>,
}

impl PendingOps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        kind: OpKind,
        reply: OpReply,
        deadline: Instant,
        bytes: usize,
    ) -> OpToken {
        self.next_token += 1;
        let token = self.next_token;
        self.table.insert(
            token,
            PendingOp {
                kind,
                reply,
                deadline,
                bytes,
            },
        );
        token
    }

    /// Remove an operation for completion. Unknown tokens (already
    /// resolved, already expired) return None.
    pub fn take(&mut self, token: OpToken) -> Option<PendingOp> {
        self.table.remove(&token)
    }

    /// Remove every operation whose deadline has passed.
    pub fn take_overdue(&mut self, now: Instant) -> Vec<PendingOp> {
        let overdue: Vec<OpToken> = self
            .table
            .iter()
            .filter(|(_, op)| op.deadline <= now)
            .map(|(token, _)| *token)
            .collect();
        overdue
            .into_iter()
            .filter_map(|token| self.table.remove(&token))
            .collect()
    }

    /// Drain the whole table, typically on teardown.
    pub fn drain(&mut self) -> Vec<PendingOp> {
        self.table.drain().map(|(_, op)| op).collect()
    }

    pub fn earliest_deadline(&self) -> Option<Instant> {
        self.table.values().map(|op| op.deadline).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_handle_observes_single_resolution() {
        let (handle, reply) = OperationHandle::new(OpKind::Publish);
        assert!(reply.send(Ok(())).is_ok());
        assert_eq!(handle.wait(), Ok(()));
    }

    #[test]
    fn test_dropped_reply_resolves_with_engine_stopped() {
        let (handle, reply) = OperationHandle::new(OpKind::Subscribe);
        drop(reply);
        assert!(matches!(handle.wait(), Err(SessionError::Transport(_))));
    }

    #[test]
    fn test_take_is_exactly_once() {
        let mut pending = PendingOps::new();
        let (_, reply) = OperationHandle::new(OpKind::Publish);
        let token = pending.register(OpKind::Publish, reply, far_deadline(), 3);
        assert!(pending.take(token).is_some());
        assert!(pending.take(token).is_none());
    }

    #[test]
    fn test_take_overdue_splits_by_deadline() {
        let mut pending = PendingOps::new();
        let (_, early_reply) = OperationHandle::new(OpKind::Subscribe);
        let (_, late_reply) = OperationHandle::new(OpKind::Publish);
        let now = Instant::now();
        pending.register(OpKind::Subscribe, early_reply, now, 0);
        let late = pending.register(OpKind::Publish, late_reply, far_deadline(), 0);
        let overdue = pending.take_overdue(now);
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].kind, OpKind::Subscribe);
        assert!(pending.take(late).is_some());
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(3600)
    }
}
