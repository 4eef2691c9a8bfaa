//! Requests waiting for a reply.

use crate::error::ClientError;
use bsonwire_protocol::Reply;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::oneshot;

pub(crate) type ReplySender = oneshot::Sender<Result<Reply, ClientError>>;
struct Pending {
    socket: usize,
    tx: ReplySender,
}

/// Maps request ids to the waiter for their reply.
///
/// Every entry is removed exactly once: by its reply, by a failure of the
/// socket it was written to, or by the waiter giving up.
#[derive(Default)]
pub struct PendingTable {
    entries: DashMap<i32, Pending>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, request_id: i32, socket: usize, tx: ReplySender) {
        self.entries.insert(request_id, Pending { socket, tx });
    }

    /// Hands `reply` to the request it answers. Returns false, dropping the
    /// reply, when nothing is waiting for it.
    pub fn complete(&self, reply: Reply) -> bool {
        match self.entries.remove(&reply.response_to) {
            Some((_, pending)) => {
                let _ = pending.tx.send(Ok(reply));
                true
            }
            None => {
                tracing::debug!("dropping reply to unknown request {}", reply.response_to);
                false
            }
        }
    }

    pub fn fail(&self, request_id: i32, err: ClientError) -> bool {
        match self.entries.remove(&request_id) {
            Some((_, pending)) => {
                let _ = pending.tx.send(Err(err));
                true
            }
            None => false,
        }
    }

    /// Fails every request written to `socket`.
    pub fn fail_socket(&self, socket: usize, make_err: impl Fn() -> ClientError) -> usize {
        self.fail_where(|pending| pending.socket == socket, make_err)
    }

    pub fn fail_all(&self, make_err: impl Fn() -> ClientError) -> usize {
        self.fail_where(|_| true, make_err)
    }

    fn fail_where(&self, filter: impl Fn(&Pending) -> bool, make_err: impl Fn() -> ClientError) -> usize {
        let ids: Vec<i32> = self
            .entries
            .iter()
            .filter(|entry| filter(entry.value()))
            .map(|entry| *entry.key())
            .collect();
        ids.into_iter()
            .filter(|id| self.fail(*id, make_err()))
            .count()
    }

    /// Takes the waiter back out, e.g. to requeue a request whose write failed.
    pub(crate) fn take(&self, request_id: i32) -> Option<ReplySender> {
        self.entries.remove(&request_id).map(|(_, pending)| pending.tx)
    }

    pub fn remove(&self, request_id: i32) -> bool {
        self.entries.remove(&request_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Removes a pending entry if the waiting future is dropped before its
/// reply arrives.
pub(crate) struct PendingGuard {
    table: Arc<PendingTable>,
    request_id: i32,
}

impl PendingGuard {
    pub(crate) fn new(table: Arc<PendingTable>, request_id: i32) -> Self {
        Self { table, request_id }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.table.remove(self.request_id);
    }
}
