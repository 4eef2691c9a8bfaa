//! Streaming query results.
//!
//! A [`Cursor`] sends its Query on first use, then pages through the result
//! set with GetMore on the same socket until the server's cursor id drops to
//! zero or the limit is reached. Reaching the limit while the server still
//! holds a cursor sends KillCursors.

use crate::command::run_command;
use crate::connection::{Connection, Dispatch};
use crate::error::ClientError;
use bsonwire_bson::{doc, Document, Long};
use bsonwire_protocol::{GetMore, KillCursors, Namespace, Query, QueryFlags, Reply};
use std::collections::VecDeque;

/// Cursor lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// The query has not been sent.
    Init,
    Open,
    Closed,
}

/// Client-side iterator over a query's results.
#[derive(Debug)]
pub struct Cursor {
    connection: Connection,
    namespace: Namespace,
    selector: Document,
    fields: Option<Document>,
    skip: i32,
    /// 0 means no limit; negative asks for one batch of at most `-limit`.
    limit: i32,
    batch_size: i32,
    sort: Option<Document>,
    hint: Option<Document>,
    snapshot: bool,
    flags: QueryFlags,
    socket: Option<usize>,
    cursor_id: Long,
    items: VecDeque<Document>,
    total_returned: i32,
    query_run: bool,
    state: CursorState,
}

impl Cursor {
    pub fn new(connection: Connection, namespace: Namespace, selector: Document) -> Self {
        Self {
            connection,
            namespace,
            selector,
            fields: None,
            skip: 0,
            limit: 0,
            batch_size: 0,
            sort: None,
            hint: None,
            snapshot: false,
            flags: QueryFlags::new(),
            socket: None,
            cursor_id: Long::ZERO,
            items: VecDeque::new(),
            total_returned: 0,
            query_run: false,
            state: CursorState::Init,
        }
    }

    fn ensure_modifiable(&self) -> Result<(), ClientError> {
        if self.state == CursorState::Closed {
            return Err(ClientError::CursorClosed);
        }
        if self.query_run {
            return Err(ClientError::QueryAlreadyExecuted);
        }
        Ok(())
    }

    pub fn sort(&mut self, sort: Document) -> Result<&mut Self, ClientError> {
        self.ensure_modifiable()?;
        self.sort = Some(sort);
        Ok(self)
    }

    pub fn limit(&mut self, limit: i32) -> Result<&mut Self, ClientError> {
        self.ensure_modifiable()?;
        self.limit = limit;
        Ok(self)
    }

    pub fn skip(&mut self, skip: i32) -> Result<&mut Self, ClientError> {
        self.ensure_modifiable()?;
        self.skip = skip;
        Ok(self)
    }

    pub fn batch_size(&mut self, size: u32) -> Result<&mut Self, ClientError> {
        self.ensure_modifiable()?;
        self.batch_size = i32::try_from(size).unwrap_or(i32::MAX);
        Ok(self)
    }

    /// Restricts returned documents to the given projection.
    pub fn fields(&mut self, fields: Document) -> Result<&mut Self, ClientError> {
        self.ensure_modifiable()?;
        self.fields = Some(fields);
        Ok(self)
    }

    pub fn hint(&mut self, hint: Document) -> Result<&mut Self, ClientError> {
        self.ensure_modifiable()?;
        self.hint = Some(hint);
        Ok(self)
    }

    pub fn snapshot(&mut self, snapshot: bool) -> Result<&mut Self, ClientError> {
        self.ensure_modifiable()?;
        self.snapshot = snapshot;
        Ok(self)
    }

    /// Adds Query flags such as tailable, slaveOk or noCursorTimeout.
    pub fn flags(&mut self, flags: QueryFlags) -> Result<&mut Self, ClientError> {
        self.ensure_modifiable()?;
        self.flags = QueryFlags::from_bits(self.flags.bits() | flags.bits());
        Ok(self)
    }

    /// Keeps the cursor open at the end of a capped collection.
    pub fn tailable(&mut self) -> Result<&mut Self, ClientError> {
        self.flags(QueryFlags::new().with_tailable_cursor().with_await_data())
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == CursorState::Closed
    }

    /// The server-side cursor id; zero when the server holds nothing.
    pub fn cursor_id(&self) -> Long {
        self.cursor_id
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Returns the next document, fetching batches as needed. `None` means
    /// the results are exhausted; the cursor is then closed unless it is
    /// tailable and the server keeps it open.
    pub async fn next_object(&mut self) -> Result<Option<Document>, ClientError> {
        match self.state {
            CursorState::Closed => return Err(ClientError::CursorClosed),
            CursorState::Init => self.execute_query().await?,
            CursorState::Open => {}
        }

        while self.items.is_empty() && self.has_more_on_server() {
            self.get_more().await?;
            if self.flags.is_tailable() {
                break;
            }
        }

        if let Some(doc) = self.items.pop_front() {
            return Ok(Some(doc));
        }

        if self.flags.is_tailable() && !self.cursor_id.is_zero() {
            return Ok(None);
        }
        self.close().await;
        Ok(None)
    }

    /// Collects every remaining document and closes the cursor.
    pub async fn to_array(&mut self) -> Result<Vec<Document>, ClientError> {
        if self.is_closed() {
            return Err(ClientError::CursorClosed);
        }
        let mut documents = Vec::new();
        while let Some(doc) = self.next_object().await? {
            documents.push(doc);
        }
        Ok(documents)
    }

    /// Calls `f` with each remaining document.
    pub async fn each<F>(&mut self, mut f: F) -> Result<(), ClientError>
    where
        F: FnMut(Document),
    {
        if self.is_closed() {
            return Err(ClientError::CursorClosed);
        }
        while let Some(doc) = self.next_object().await? {
            f(doc);
        }
        Ok(())
    }

    /// Counts matching documents with the `count` command. With
    /// `apply_skip_limit` the cursor's skip and limit narrow the count.
    pub async fn count(&self, apply_skip_limit: bool) -> Result<u64, ClientError> {
        let mut command = doc! {
            "count" => self.namespace.collection.as_str(),
            "query" => self.selector.clone(),
        };
        if apply_skip_limit {
            if self.skip != 0 {
                command.insert("skip", self.skip);
            }
            if self.limit != 0 {
                command.insert("limit", self.limit.abs());
            }
        }
        if let Some(fields) = &self.fields {
            command.insert("fields", fields.clone());
        }

        let result = run_command(&self.connection, &self.namespace.db, command, Dispatch::RoundRobin).await?;
        Ok(result.get_f64("n").unwrap_or(0.0).max(0.0) as u64)
    }

    /// Asks the server how it would run this query. Does not touch the
    /// cursor's own state.
    pub async fn explain(&self) -> Result<Document, ClientError> {
        let limit = -self.limit.abs();
        let query = Query::new(self.namespace.clone(), self.query_document(true))
            .with_flags(self.flags)
            .with_skip(self.skip)
            .with_number_to_return(limit);
        let reply = self.connection.request(&query, Dispatch::RoundRobin).await?;
        check_flags(&reply, self.cursor_id)?;
        reply
            .documents
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::server(None, "explain returned no document"))
    }

    /// Releases the server-side cursor and drops buffered documents.
    /// Closing a closed cursor does nothing.
    pub async fn close(&mut self) {
        if self.state == CursorState::Closed {
            return;
        }
        if !self.cursor_id.is_zero() {
            tracing::debug!("Killing cursor {} on {}", self.cursor_id, self.namespace);
            let kill = KillCursors::new(vec![self.cursor_id]);
            if let Err(e) = self.connection.send(&kill, self.dispatch()).await {
                tracing::debug!("KillCursors for {} not sent: {}", self.cursor_id, e);
            }
            self.cursor_id = Long::ZERO;
        }
        self.items.clear();
        self.state = CursorState::Closed;
    }

    fn dispatch(&self) -> Dispatch {
        match self.socket {
            Some(index) => Dispatch::Socket(index),
            None => Dispatch::RoundRobin,
        }
    }

    fn query_document(&self, explain: bool) -> Document {
        if self.sort.is_none() && self.hint.is_none() && !self.snapshot && !explain {
            return self.selector.clone();
        }
        let mut wrapped = doc! { "$query" => self.selector.clone() };
        if let Some(sort) = &self.sort {
            wrapped.insert("$orderby", sort.clone());
        }
        if let Some(hint) = &self.hint {
            wrapped.insert("$hint", hint.clone());
        }
        if explain {
            wrapped.insert("$explain", true);
        }
        if self.snapshot {
            wrapped.insert("$snapshot", true);
        }
        wrapped
    }

    fn limit_reached(&self) -> bool {
        self.limit < 0 || (self.limit > 0 && self.total_returned >= self.limit)
    }

    fn has_more_on_server(&self) -> bool {
        !self.cursor_id.is_zero() && !self.limit_reached()
    }

    /// Batch size for the next Query or GetMore.
    fn number_to_return(&self) -> i32 {
        if self.limit <= 0 {
            return if self.limit < 0 { self.limit } else { self.batch_size };
        }
        let remaining = self.limit - self.total_returned;
        if self.batch_size == 0 {
            remaining
        } else {
            remaining.min(self.batch_size)
        }
    }

    async fn execute_query(&mut self) -> Result<(), ClientError> {
        let socket = self.connection.checkout();
        self.socket = Some(socket);
        self.query_run = true;

        let mut query = Query::new(self.namespace.clone(), self.query_document(false))
            .with_flags(self.flags)
            .with_skip(self.skip)
            .with_number_to_return(self.number_to_return());
        if let Some(fields) = &self.fields {
            query = query.with_return_fields(fields.clone());
        }

        let reply = match self.connection.request(&query, Dispatch::Socket(socket)).await {
            Ok(reply) => reply,
            Err(e) => {
                self.state = CursorState::Closed;
                return Err(e);
            }
        };
        self.state = CursorState::Open;
        self.absorb(reply).await
    }

    async fn get_more(&mut self) -> Result<(), ClientError> {
        let get_more = GetMore::new(self.namespace.clone(), self.number_to_return(), self.cursor_id);
        let reply = self.connection.request(&get_more, self.dispatch()).await?;
        self.absorb(reply).await
    }

    async fn absorb(&mut self, reply: Reply) -> Result<(), ClientError> {
        if let Err(e) = check_flags(&reply, self.cursor_id) {
            self.cursor_id = Long::ZERO;
            self.close().await;
            return Err(e);
        }

        self.cursor_id = reply.cursor_id;
        self.total_returned = self.total_returned.saturating_add(reply.number_returned);
        self.items.extend(reply.documents);

        if self.limit_reached() && !self.cursor_id.is_zero() {
            tracing::debug!(
                "Limit of {} reached with cursor {} still open",
                self.limit,
                self.cursor_id
            );
            let kill = KillCursors::new(vec![self.cursor_id]);
            if let Err(e) = self.connection.send(&kill, self.dispatch()).await {
                tracing::debug!("KillCursors for {} not sent: {}", self.cursor_id, e);
            }
            self.cursor_id = Long::ZERO;
        }
        Ok(())
    }
}

fn check_flags(reply: &Reply, cursor_id: Long) -> Result<(), ClientError> {
    if reply.flags.is_query_failure() {
        return Err(ClientError::server(
            reply.error_code(),
            reply.error_message().unwrap_or("query failure"),
        ));
    }
    if reply.flags.is_cursor_not_found() {
        return Err(ClientError::CursorNotFound(cursor_id.to_i64()));
    }
    Ok(())
}
