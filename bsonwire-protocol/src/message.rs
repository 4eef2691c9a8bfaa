//! Client-to-server messages.
//!
//! Each message is built as the standard header followed by an opcode
//! specific body. The header's length field is patched after the body has
//! been written, so it always equals the number of bytes produced.

use crate::error::ProtocolError;
use crate::header::{next_request_id, MessageHeader, OpCode, HEADER_SIZE};
use crate::namespace::Namespace;
use crate::reader::BodyReader;
use crate::MAX_MESSAGE_SIZE;
use bsonwire_bson::{serialize_into, BsonError, Document, Long};
use bytes::{BufMut, BytesMut};

/// Query option bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryFlags(u32);

impl QueryFlags {
    pub const TAILABLE_CURSOR: u32 = 1 << 1;
    pub const SLAVE_OK: u32 = 1 << 2;
    pub const OPLOG_REPLAY: u32 = 1 << 3;
    pub const NO_CURSOR_TIMEOUT: u32 = 1 << 4;
    pub const AWAIT_DATA: u32 = 1 << 5;
    pub const EXHAUST: u32 = 1 << 6;
    pub const PARTIAL: u32 = 1 << 7;

    /// Bit 0 is reserved.
    const VALID_MASK: u32 = 0xFE;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn with(mut self, flag: u32) -> Self {
        self.0 |= flag & Self::VALID_MASK;
        self
    }

    pub fn with_tailable_cursor(self) -> Self {
        self.with(Self::TAILABLE_CURSOR)
    }

    pub fn with_slave_ok(self) -> Self {
        self.with(Self::SLAVE_OK)
    }

    pub fn with_no_cursor_timeout(self) -> Self {
        self.with(Self::NO_CURSOR_TIMEOUT)
    }

    pub fn with_await_data(self) -> Self {
        self.with(Self::AWAIT_DATA)
    }

    pub fn contains(&self, flag: u32) -> bool {
        self.0 & flag == flag
    }

    pub fn is_tailable(&self) -> bool {
        self.contains(Self::TAILABLE_CURSOR)
    }

    pub fn is_slave_ok(&self) -> bool {
        self.contains(Self::SLAVE_OK)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Keeps only the defined bits.
    pub fn from_bits(bits: u32) -> Self {
        Self(bits & Self::VALID_MASK)
    }
}

/// A message the client sends.
pub trait WireMessage {
    fn op_code(&self) -> OpCode;

    fn request_id(&self) -> i32;

    /// Writes everything after the header.
    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), ProtocolError>;

    /// Encodes the complete message, header included.
    fn encode(&self) -> Result<BytesMut, ProtocolError> {
        encode_message(self.op_code(), self.request_id(), 0, |buf| {
            self.encode_body(buf)
        })
    }
}

/// Writes a header with a placeholder length, runs `body`, then patches the
/// length to the number of bytes written.
pub(crate) fn encode_message<F>(
    op_code: OpCode,
    request_id: i32,
    response_to: i32,
    body: F,
) -> Result<BytesMut, ProtocolError>
where
    F: FnOnce(&mut BytesMut) -> Result<(), ProtocolError>,
{
    let mut buf = BytesMut::with_capacity(256);
    MessageHeader {
        length: 0,
        request_id,
        response_to,
        op_code,
    }
    .encode(&mut buf);
    body(&mut buf)?;

    let size = buf.len();
    if size > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size,
            max: MAX_MESSAGE_SIZE,
        });
    }
    buf[0..4].copy_from_slice(&(size as i32).to_le_bytes());
    Ok(buf)
}

fn put_cstring(buf: &mut BytesMut, s: &str) -> Result<(), ProtocolError> {
    if s.contains('\0') {
        return Err(BsonError::NullInCString(s.to_string()).into());
    }
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
    Ok(())
}

fn put_namespace(buf: &mut BytesMut, namespace: &Namespace) -> Result<(), ProtocolError> {
    put_cstring(buf, &namespace.to_string())
}

fn put_long(buf: &mut BytesMut, value: Long) {
    buf.put_i32_le(value.low_bits());
    buf.put_i32_le(value.high_bits());
}

/// OP_QUERY.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub request_id: i32,
    pub flags: QueryFlags,
    pub namespace: Namespace,
    pub number_to_skip: i32,
    /// 0 lets the server pick the batch size; a negative value asks for a
    /// single batch of at most `abs(n)` documents with the cursor closed.
    pub number_to_return: i32,
    pub query: Document,
    pub return_fields: Option<Document>,
}

impl Query {
    pub fn new(namespace: Namespace, query: Document) -> Self {
        Self {
            request_id: next_request_id(),
            flags: QueryFlags::new(),
            namespace,
            number_to_skip: 0,
            number_to_return: 0,
            query,
            return_fields: None,
        }
    }

    /// A one-shot command against `<db>.$cmd`.
    pub fn command(db: impl Into<String>, command: Document) -> Self {
        Self::new(Namespace::command(db), command).with_number_to_return(-1)
    }

    pub fn with_flags(mut self, flags: QueryFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_skip(mut self, skip: i32) -> Self {
        self.number_to_skip = skip;
        self
    }

    pub fn with_number_to_return(mut self, n: i32) -> Self {
        self.number_to_return = n;
        self
    }

    pub fn with_return_fields(mut self, fields: Document) -> Self {
        self.return_fields = Some(fields);
        self
    }

    fn decode_body(request_id: i32, body: &mut BodyReader<'_>) -> Result<Self, ProtocolError> {
        let flags = QueryFlags::from_bits(body.u32()?);
        let namespace = Namespace::parse(body.cstring("namespace")?)?;
        let number_to_skip = body.i32()?;
        let number_to_return = body.i32()?;
        let query = body.document()?;
        let return_fields = if body.is_empty() {
            None
        } else {
            Some(body.document()?)
        };
        Ok(Self {
            request_id,
            flags,
            namespace,
            number_to_skip,
            number_to_return,
            query,
            return_fields,
        })
    }
}

impl WireMessage for Query {
    fn op_code(&self) -> OpCode {
        OpCode::Query
    }

    fn request_id(&self) -> i32 {
        self.request_id
    }

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u32_le(self.flags.bits());
        put_namespace(buf, &self.namespace)?;
        buf.put_i32_le(self.number_to_skip);
        buf.put_i32_le(self.number_to_return);
        // Selectors carry `$` operators, so keys are never checked here.
        serialize_into(buf, &self.query, false)?;
        if let Some(fields) = &self.return_fields {
            serialize_into(buf, fields, false)?;
        }
        Ok(())
    }
}

/// OP_GET_MORE.
#[derive(Debug, Clone, PartialEq)]
pub struct GetMore {
    pub request_id: i32,
    pub namespace: Namespace,
    pub number_to_return: i32,
    pub cursor_id: Long,
}

impl GetMore {
    pub fn new(namespace: Namespace, number_to_return: i32, cursor_id: Long) -> Self {
        Self {
            request_id: next_request_id(),
            namespace,
            number_to_return,
            cursor_id,
        }
    }

    fn decode_body(request_id: i32, body: &mut BodyReader<'_>) -> Result<Self, ProtocolError> {
        body.i32()?;
        Ok(Self {
            request_id,
            namespace: Namespace::parse(body.cstring("namespace")?)?,
            number_to_return: body.i32()?,
            cursor_id: body.long()?,
        })
    }
}

impl WireMessage for GetMore {
    fn op_code(&self) -> OpCode {
        OpCode::GetMore
    }

    fn request_id(&self) -> i32 {
        self.request_id
    }

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_i32_le(0);
        put_namespace(buf, &self.namespace)?;
        buf.put_i32_le(self.number_to_return);
        put_long(buf, self.cursor_id);
        Ok(())
    }
}

/// OP_KILL_CURSORS. The server sends no reply.
#[derive(Debug, Clone, PartialEq)]
pub struct KillCursors {
    pub request_id: i32,
    pub cursor_ids: Vec<Long>,
}

impl KillCursors {
    pub fn new(cursor_ids: Vec<Long>) -> Self {
        Self {
            request_id: next_request_id(),
            cursor_ids,
        }
    }

    fn decode_body(request_id: i32, body: &mut BodyReader<'_>) -> Result<Self, ProtocolError> {
        body.i32()?;
        let count = body.i32()?;
        if count < 0 || count as usize * 8 > body.remaining() {
            return Err(ProtocolError::InvalidMessageLength(count as i64));
        }
        let cursor_ids = (0..count).map(|_| body.long()).collect::<Result<_, _>>()?;
        Ok(Self {
            request_id,
            cursor_ids,
        })
    }
}

impl WireMessage for KillCursors {
    fn op_code(&self) -> OpCode {
        OpCode::KillCursors
    }

    fn request_id(&self) -> i32 {
        self.request_id
    }

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_i32_le(0);
        buf.put_i32_le(self.cursor_ids.len() as i32);
        for id in &self.cursor_ids {
            put_long(buf, *id);
        }
        Ok(())
    }
}

/// OP_INSERT. The server sends no reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub request_id: i32,
    pub namespace: Namespace,
    pub documents: Vec<Document>,
    pub continue_on_error: bool,
    /// Reject `$`-prefixed and dotted keys.
    pub check_keys: bool,
}

impl Insert {
    pub const CONTINUE_ON_ERROR: u32 = 1;

    pub fn new(namespace: Namespace, documents: Vec<Document>) -> Self {
        Self {
            request_id: next_request_id(),
            namespace,
            documents,
            continue_on_error: false,
            check_keys: true,
        }
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn with_check_keys(mut self, check_keys: bool) -> Self {
        self.check_keys = check_keys;
        self
    }

    fn decode_body(request_id: i32, body: &mut BodyReader<'_>) -> Result<Self, ProtocolError> {
        let flags = body.u32()?;
        let namespace = Namespace::parse(body.cstring("namespace")?)?;
        let mut documents = Vec::new();
        while !body.is_empty() {
            documents.push(body.document()?);
        }
        Ok(Self {
            request_id,
            namespace,
            documents,
            continue_on_error: flags & Self::CONTINUE_ON_ERROR != 0,
            check_keys: false,
        })
    }
}

impl WireMessage for Insert {
    fn op_code(&self) -> OpCode {
        OpCode::Insert
    }

    fn request_id(&self) -> i32 {
        self.request_id
    }

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        let flags = if self.continue_on_error {
            Self::CONTINUE_ON_ERROR
        } else {
            0
        };
        buf.put_u32_le(flags);
        put_namespace(buf, &self.namespace)?;
        for doc in &self.documents {
            serialize_into(buf, doc, self.check_keys)?;
        }
        Ok(())
    }
}

/// OP_UPDATE. The server sends no reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub request_id: i32,
    pub namespace: Namespace,
    pub selector: Document,
    pub update: Document,
    pub upsert: bool,
    pub multi: bool,
}

impl Update {
    pub const UPSERT: u32 = 1;
    pub const MULTI: u32 = 1 << 1;

    pub fn new(namespace: Namespace, selector: Document, update: Document) -> Self {
        Self {
            request_id: next_request_id(),
            namespace,
            selector,
            update,
            upsert: false,
            multi: false,
        }
    }

    pub fn with_upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }

    pub fn with_multi(mut self, multi: bool) -> Self {
        self.multi = multi;
        self
    }

    pub fn flags(&self) -> u32 {
        let mut flags = 0;
        if self.upsert {
            flags |= Self::UPSERT;
        }
        if self.multi {
            flags |= Self::MULTI;
        }
        flags
    }

    fn decode_body(request_id: i32, body: &mut BodyReader<'_>) -> Result<Self, ProtocolError> {
        body.i32()?;
        let namespace = Namespace::parse(body.cstring("namespace")?)?;
        let flags = body.u32()?;
        Ok(Self {
            request_id,
            namespace,
            selector: body.document()?,
            update: body.document()?,
            upsert: flags & Self::UPSERT != 0,
            multi: flags & Self::MULTI != 0,
        })
    }
}

impl WireMessage for Update {
    fn op_code(&self) -> OpCode {
        OpCode::Update
    }

    fn request_id(&self) -> i32 {
        self.request_id
    }

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_i32_le(0);
        put_namespace(buf, &self.namespace)?;
        buf.put_u32_le(self.flags());
        serialize_into(buf, &self.selector, false)?;
        serialize_into(buf, &self.update, false)?;
        Ok(())
    }
}

/// OP_DELETE. The server sends no reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub request_id: i32,
    pub namespace: Namespace,
    pub selector: Document,
    pub single_remove: bool,
}

impl Delete {
    pub const SINGLE_REMOVE: u32 = 1;

    pub fn new(namespace: Namespace, selector: Document) -> Self {
        Self {
            request_id: next_request_id(),
            namespace,
            selector,
            single_remove: false,
        }
    }

    pub fn with_single_remove(mut self, single_remove: bool) -> Self {
        self.single_remove = single_remove;
        self
    }

    fn decode_body(request_id: i32, body: &mut BodyReader<'_>) -> Result<Self, ProtocolError> {
        body.i32()?;
        let namespace = Namespace::parse(body.cstring("namespace")?)?;
        let flags = body.u32()?;
        Ok(Self {
            request_id,
            namespace,
            selector: body.document()?,
            single_remove: flags & Self::SINGLE_REMOVE != 0,
        })
    }
}

impl WireMessage for Delete {
    fn op_code(&self) -> OpCode {
        OpCode::Delete
    }

    fn request_id(&self) -> i32 {
        self.request_id
    }

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_i32_le(0);
        put_namespace(buf, &self.namespace)?;
        let flags = if self.single_remove {
            Self::SINGLE_REMOVE
        } else {
            0
        };
        buf.put_u32_le(flags);
        serialize_into(buf, &self.selector, false)?;
        Ok(())
    }
}

/// Any client message, as seen by the receiving side.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Query(Query),
    GetMore(GetMore),
    KillCursors(KillCursors),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
}

impl Request {
    /// Decodes one complete message, as produced by
    /// [`MessageBuffer`](crate::codec::MessageBuffer).
    pub fn decode(message: &[u8]) -> Result<Self, ProtocolError> {
        let header = MessageHeader::decode(message)?;
        if header.length as usize != message.len() {
            return Err(ProtocolError::InvalidMessageLength(header.length as i64));
        }
        let mut body = BodyReader::new(&message[HEADER_SIZE..]);
        let id = header.request_id;
        let request = match header.op_code {
            OpCode::Query => Request::Query(Query::decode_body(id, &mut body)?),
            OpCode::GetMore => Request::GetMore(GetMore::decode_body(id, &mut body)?),
            OpCode::KillCursors => Request::KillCursors(KillCursors::decode_body(id, &mut body)?),
            OpCode::Insert => Request::Insert(Insert::decode_body(id, &mut body)?),
            OpCode::Update => Request::Update(Update::decode_body(id, &mut body)?),
            OpCode::Delete => Request::Delete(Delete::decode_body(id, &mut body)?),
            OpCode::Reply => {
                return Err(ProtocolError::UnexpectedOpCode {
                    expected: OpCode::Query,
                    actual: OpCode::Reply,
                })
            }
        };
        Ok(request)
    }

    pub fn request_id(&self) -> i32 {
        match self {
            Request::Query(m) => m.request_id,
            Request::GetMore(m) => m.request_id,
            Request::KillCursors(m) => m.request_id,
            Request::Insert(m) => m.request_id,
            Request::Update(m) => m.request_id,
            Request::Delete(m) => m.request_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bsonwire_bson::{doc, serialize};

    fn header_of(bytes: &[u8]) -> MessageHeader {
        MessageHeader::decode(bytes).unwrap()
    }

    #[test]
    fn test_query_layout() {
        let selector = doc! { "age" => doc! { "$gt" => 21 } };
        let query = Query::new(Namespace::new("app", "users"), selector.clone())
            .with_skip(5)
            .with_number_to_return(10)
            .with_flags(QueryFlags::new().with_slave_ok());
        let bytes = query.encode().unwrap();

        let header = header_of(&bytes);
        assert_eq!(header.length as usize, bytes.len());
        assert_eq!(header.request_id, query.request_id);
        assert_eq!(header.response_to, 0);
        assert_eq!(header.op_code, OpCode::Query);

        let body = &bytes[HEADER_SIZE..];
        assert_eq!(&body[0..4], &QueryFlags::SLAVE_OK.to_le_bytes());
        assert_eq!(&body[4..14], b"app.users\0");
        assert_eq!(&body[14..18], &5i32.to_le_bytes());
        assert_eq!(&body[18..22], &10i32.to_le_bytes());
        assert_eq!(&body[22..], &serialize(&selector, false).unwrap()[..]);
    }

    #[test]
    fn test_command_returns_single_batch() {
        let query = Query::command("admin", doc! { "ismaster" => 1 });
        assert_eq!(query.number_to_return, -1);
        assert_eq!(query.namespace.to_string(), "admin.$cmd");
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = Query::new(Namespace::new("a", "b"), doc! {});
        let b = GetMore::new(Namespace::new("a", "b"), 0, Long::ONE);
        let c = KillCursors::new(vec![]);
        assert!(a.request_id < b.request_id && b.request_id < c.request_id);
    }

    #[test]
    fn test_get_more_layout() {
        let get_more = GetMore::new(Namespace::new("db", "c"), 100, Long::from_bits(7, 1));
        let bytes = get_more.encode().unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 4 + 5 + 4 + 8);
        let body = &bytes[HEADER_SIZE..];
        assert_eq!(&body[0..4], &[0, 0, 0, 0]);
        assert_eq!(&body[4..9], b"db.c\0");
        assert_eq!(&body[13..21], &[7, 0, 0, 0, 1, 0, 0, 0]);
    }

    #[test]
    fn test_kill_cursors_layout() {
        let kill = KillCursors::new(vec![Long::from_i64(1), Long::from_i64(-1)]);
        let bytes = kill.encode().unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 8 + 16);
        assert_eq!(&bytes[HEADER_SIZE + 4..HEADER_SIZE + 8], &2i32.to_le_bytes());
        assert_eq!(&bytes[bytes.len() - 8..], &[0xFF; 8]);
    }

    #[test]
    fn test_update_flags_packed() {
        let update = Update::new(Namespace::new("db", "c"), doc! {}, doc! { "$set" => doc! { "a" => 1 } })
            .with_upsert(true)
            .with_multi(true);
        assert_eq!(update.flags(), 3);
        let bytes = update.encode().unwrap();
        assert_eq!(&bytes[HEADER_SIZE + 9..HEADER_SIZE + 13], &3u32.to_le_bytes());
        assert_eq!(
            Update::new(Namespace::new("d", "c"), doc! {}, doc! {})
                .with_multi(true)
                .flags(),
            2
        );
    }

    #[test]
    fn test_insert_checks_keys() {
        let insert = Insert::new(Namespace::new("db", "c"), vec![doc! { "$bad" => 1 }]);
        assert!(matches!(insert.encode(), Err(ProtocolError::Bson(_))));
        let insert = insert.with_check_keys(false);
        assert!(insert.encode().is_ok());
    }

    #[test]
    fn test_decode_roundtrip() {
        let messages = vec![
            Request::Query(
                Query::new(Namespace::new("db", "c"), doc! { "x" => 1 })
                    .with_return_fields(doc! { "x" => 1 }),
            ),
            Request::GetMore(GetMore::new(Namespace::new("db", "c"), 2, Long::from_i64(99))),
            Request::KillCursors(KillCursors::new(vec![Long::from_i64(99)])),
            Request::Insert(
                Insert::new(Namespace::new("db", "c"), vec![doc! { "a" => 1 }, doc! { "a" => 2 }])
                    .with_continue_on_error(true)
                    .with_check_keys(false),
            ),
            Request::Update(Update::new(Namespace::new("db", "c"), doc! {}, doc! { "a" => 3 }).with_upsert(true)),
            Request::Delete(Delete::new(Namespace::new("db", "c"), doc! { "a" => 1 }).with_single_remove(true)),
        ];
        for message in messages {
            let bytes = match &message {
                Request::Query(m) => m.encode(),
                Request::GetMore(m) => m.encode(),
                Request::KillCursors(m) => m.encode(),
                Request::Insert(m) => m.encode(),
                Request::Update(m) => m.encode(),
                Request::Delete(m) => m.encode(),
            }
            .unwrap();
            assert_eq!(Request::decode(&bytes).unwrap(), message);
        }
    }

    #[test]
    fn test_decode_rejects_length_mismatch() {
        let mut bytes = KillCursors::new(vec![]).encode().unwrap();
        bytes.put_u8(0);
        assert!(matches!(
            Request::decode(&bytes),
            Err(ProtocolError::InvalidMessageLength(_))
        ));
    }
}
