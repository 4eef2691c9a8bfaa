//! High-level client API.

use crate::command::{check_last_error, run_command, WriteConcern};
use crate::config::{ClientOptions, Credentials};
use crate::connection::{Connection, Dispatch};
use crate::cursor::Cursor;
use crate::error::ClientError;
use crate::topology::Topology;
use bsonwire_bson::{doc, Document, ObjectId};
use bsonwire_protocol::{Delete, Insert, Namespace, QueryFlags, Update, WireMessage};
use std::sync::Arc;

/// High-level client over a single server or a replica set.
#[derive(Debug, Clone)]
pub struct Client {
    topology: Arc<Topology>,
    options: ClientOptions,
}

impl Client {
    /// Connects, discovers the topology, and authenticates if the options
    /// carry credentials.
    pub async fn connect(options: ClientOptions) -> Result<Self, ClientError> {
        let topology = Topology::connect(&options).await?;
        let client = Self {
            topology: Arc::new(topology),
            options,
        };

        if let Some(credentials) = client.options.credentials.clone() {
            let db = credentials
                .source
                .clone()
                .or_else(|| client.options.database.clone())
                .unwrap_or_else(|| "admin".to_string());
            if let Err(e) = client.authenticate_with(&db, credentials).await {
                client.close().await;
                return Err(e);
            }
        }
        Ok(client)
    }

    /// Connects using a `mongodb://` connection string.
    pub async fn with_uri(uri: &str) -> Result<Self, ClientError> {
        Self::connect(ClientOptions::parse_uri(uri)?).await
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// The configured default database, or `test`.
    pub fn default_database(&self) -> &str {
        self.options.database.as_deref().unwrap_or("test")
    }

    /// Runs a command on the primary.
    pub async fn command(&self, db: &str, command: Document) -> Result<Document, ClientError> {
        let connection = self.topology.primary()?;
        run_command(&connection, db, command, Dispatch::RoundRobin).await
    }

    pub async fn is_master(&self) -> Result<Document, ClientError> {
        self.command("admin", doc! { "ismaster" => 1 }).await
    }

    /// Authenticates every data-bearing server against `db`.
    pub async fn authenticate(&self, db: &str, username: &str, password: &str) -> Result<(), ClientError> {
        let credentials = Credentials {
            username: username.to_string(),
            password: password.to_string(),
            source: Some(db.to_string()),
        };
        self.authenticate_with(db, credentials).await
    }

    async fn authenticate_with(&self, db: &str, credentials: Credentials) -> Result<(), ClientError> {
        for connection in self.topology.data_connections() {
            connection.authenticate(db, credentials.clone()).await?;
        }
        Ok(())
    }

    /// Starts a query. Nothing is sent until the cursor is read.
    pub fn find(&self, namespace: Namespace, selector: Document) -> Result<Cursor, ClientError> {
        let connection = self.topology.read_connection()?;
        let mut cursor = Cursor::new(connection, namespace, selector);
        if self.options.read_secondary {
            cursor.flags(QueryFlags::new().with_slave_ok())?;
        }
        Ok(cursor)
    }

    /// The first matching document, if any.
    pub async fn find_one(&self, namespace: Namespace, selector: Document) -> Result<Option<Document>, ClientError> {
        let mut cursor = self.find(namespace, selector)?;
        cursor.limit(-1)?;
        let first = cursor.next_object().await?;
        cursor.close().await;
        Ok(first)
    }

    /// Inserts documents, giving each one without `_id` a fresh ObjectId.
    ///
    /// Returns the `getlasterror` reply when the write concern asks for one.
    pub async fn insert(
        &self,
        namespace: Namespace,
        mut documents: Vec<Document>,
        concern: &WriteConcern,
    ) -> Result<Option<Document>, ClientError> {
        for document in &mut documents {
            if !document.contains_key("_id") {
                document.insert("_id", ObjectId::new());
            }
        }
        let db = namespace.db.clone();
        self.write(&db, &Insert::new(namespace, documents), concern).await
    }

    /// Updates the first document matching `selector`, or all of them with
    /// `multi`.
    pub async fn update(
        &self,
        namespace: Namespace,
        selector: Document,
        update: Document,
        concern: &WriteConcern,
    ) -> Result<Option<Document>, ClientError> {
        let db = namespace.db.clone();
        self.write(&db, &Update::new(namespace, selector, update), concern)
            .await
    }

    /// Sends a prepared update, for upserts and multi updates.
    pub async fn update_with(&self, update: &Update, concern: &WriteConcern) -> Result<Option<Document>, ClientError> {
        self.write(&update.namespace.db, update, concern).await
    }

    /// Removes matching documents; `single` stops after the first.
    pub async fn remove(
        &self,
        namespace: Namespace,
        selector: Document,
        single: bool,
        concern: &WriteConcern,
    ) -> Result<Option<Document>, ClientError> {
        let db = namespace.db.clone();
        let delete = Delete::new(namespace, selector).with_single_remove(single);
        self.write(&db, &delete, concern).await
    }

    /// Sends a write to the primary. An acknowledged concern pins a socket
    /// so `getlasterror` follows the write on the same connection.
    async fn write<M: WireMessage>(
        &self,
        db: &str,
        message: &M,
        concern: &WriteConcern,
    ) -> Result<Option<Document>, ClientError> {
        let connection: Connection = self.topology.primary()?;
        let Some(get_last_error) = concern.get_last_error() else {
            connection.send(message, Dispatch::RoundRobin).await?;
            return Ok(None);
        };

        let socket = Dispatch::Socket(connection.checkout());
        connection.send(message, socket).await?;
        let result = run_command(&connection, db, get_last_error, socket).await?;
        check_last_error(result).map(Some)
    }

    /// Re-reads every member's role.
    pub async fn refresh(&self) -> Result<(), ClientError> {
        self.topology.refresh().await
    }

    pub async fn close(&self) {
        self.topology.close().await;
    }
}
