//! Commands and write acknowledgement.

use crate::connection::{Connection, Dispatch};
use crate::error::ClientError;
use bsonwire_bson::{doc, Document, Value};
use bsonwire_protocol::{ProtocolError, Query, Reply};

/// Runs `command` against `<db>.$cmd` and returns the server's reply document.
///
/// A reply whose `ok` is not 1 becomes [`ClientError::ServerError`] carrying
/// `errmsg` and `code`.
pub async fn run_command(
    connection: &Connection,
    db: &str,
    command: Document,
    dispatch: Dispatch,
) -> Result<Document, ClientError> {
    let query = Query::command(db, command);
    let reply = connection.request(&query, dispatch).await?;
    reply_document(reply)
}

pub(crate) fn reply_document(reply: Reply) -> Result<Document, ClientError> {
    if reply.flags.is_query_failure() || reply.is_error() {
        return Err(ClientError::server(
            reply.error_code(),
            reply.error_message().unwrap_or("command failed"),
        ));
    }
    reply
        .documents
        .into_iter()
        .next()
        .ok_or_else(|| ProtocolError::InvalidReply("command reply carried no document".into()).into())
}

/// How a write is acknowledged.
///
/// The default sends the write without waiting. An acknowledged concern
/// follows the write with `getlasterror` on the same socket.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteConcern {
    pub acknowledged: bool,
    /// Replicas that must have the write.
    pub w: Option<i32>,
    pub wtimeout_ms: Option<i32>,
    pub fsync: bool,
    pub journal: bool,
}

impl WriteConcern {
    pub fn unacknowledged() -> Self {
        Self::default()
    }

    pub fn acknowledged() -> Self {
        Self {
            acknowledged: true,
            ..Self::default()
        }
    }

    pub fn with_w(mut self, w: i32) -> Self {
        self.acknowledged = true;
        self.w = Some(w);
        self
    }

    pub fn with_wtimeout_ms(mut self, timeout: i32) -> Self {
        self.wtimeout_ms = Some(timeout);
        self
    }

    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.acknowledged |= fsync;
        self.fsync = fsync;
        self
    }

    pub fn with_journal(mut self, journal: bool) -> Self {
        self.acknowledged |= journal;
        self.journal = journal;
        self
    }

    /// The `getlasterror` command to send after the write, if any.
    pub fn get_last_error(&self) -> Option<Document> {
        if !self.acknowledged {
            return None;
        }
        let mut command = doc! { "getlasterror" => 1 };
        if let Some(w) = self.w {
            command.insert("w", w);
        }
        if let Some(timeout) = self.wtimeout_ms {
            command.insert("wtimeout", timeout);
        }
        if self.fsync {
            command.insert("fsync", true);
        }
        if self.journal {
            command.insert("j", true);
        }
        Some(command)
    }
}

/// Turns a non-null `err` in a `getlasterror` reply into an error.
pub(crate) fn check_last_error(result: Document) -> Result<Document, ClientError> {
    match result.get("err") {
        None | Some(Value::Null) => Ok(result),
        Some(err) => {
            let message = err.as_str().map(str::to_string).unwrap_or_else(|| err.to_json().to_string());
            let code = result.get_f64("code").map(|code| code as i32);
            Err(ClientError::server(code, message))
        }
    }
}
