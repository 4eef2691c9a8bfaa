//! Server discovery and selection.
//!
//! A single server is used for everything. For a replica set every seed is
//! asked `isMaster`; peers it lists are connected once, without following
//! their own peer lists.

use crate::command::run_command;
use crate::config::{ClientOptions, ServerAddress};
use crate::connection::{Connection, Dispatch};
use crate::error::ClientError;
use bsonwire_bson::{doc, Document};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

/// What a server reported about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerRole {
    Primary,
    Secondary,
    Arbiter,
    /// Recovering, startup, hidden or unreachable on refresh.
    Other,
}

impl ServerRole {
    fn from_is_master(reply: &Document) -> Self {
        if reply.get_bool("ismaster") == Some(true) {
            ServerRole::Primary
        } else if reply.get_bool("secondary") == Some(true) {
            ServerRole::Secondary
        } else if reply.get_bool("arbiterOnly") == Some(true) {
            ServerRole::Arbiter
        } else {
            ServerRole::Other
        }
    }
}

#[derive(Debug, Clone)]
struct ServerNode {
    address: ServerAddress,
    role: ServerRole,
    connection: Connection,
}

/// The servers a client talks to and which of them takes writes.
#[derive(Debug)]
pub struct Topology {
    replica_set: bool,
    read_secondary: bool,
    nodes: RwLock<Vec<ServerNode>>,
    next_secondary: AtomicUsize,
}

impl Topology {
    /// Connects to the configured hosts and classifies them.
    pub async fn connect(options: &ClientOptions) -> Result<Self, ClientError> {
        options.validate()?;
        if options.is_replica_set() {
            Self::connect_replica_set(options).await
        } else {
            Self::connect_single(options).await
        }
    }

    async fn connect_single(options: &ClientOptions) -> Result<Self, ClientError> {
        let address = options.hosts[0].clone();
        let connection = Connection::connect(address.clone(), options.clone()).await?;
        let reply = match is_master(&connection).await {
            Ok(reply) => reply,
            Err(e) => {
                connection.close().await;
                return Err(e);
            }
        };
        let role = ServerRole::from_is_master(&reply);
        tracing::debug!("Connected to {} as {:?}", address, role);

        Ok(Self {
            replica_set: false,
            read_secondary: options.read_secondary,
            nodes: RwLock::new(vec![ServerNode {
                address,
                role,
                connection,
            }]),
            next_secondary: AtomicUsize::new(0),
        })
    }

    async fn connect_replica_set(options: &ClientOptions) -> Result<Self, ClientError> {
        let mut known: Vec<ServerAddress> = options.hosts.clone();
        let mut nodes = Vec::new();
        let mut discovered = Vec::new();
        let mut last_error = None;

        for seed in &options.hosts {
            match inspect_node(seed, options).await {
                Ok((node, peers)) => {
                    for peer in peers {
                        if !known.contains(&peer) {
                            known.push(peer.clone());
                            discovered.push(peer);
                        }
                    }
                    nodes.extend(node);
                }
                Err(e) => {
                    tracing::warn!("Seed {} unreachable: {}", seed, e);
                    last_error = Some(e);
                }
            }
        }

        for peer in &discovered {
            tracing::debug!("Connecting to discovered member {}", peer);
            match inspect_node(peer, options).await {
                Ok((node, _)) => nodes.extend(node),
                Err(e) => {
                    tracing::warn!("Member {} unreachable: {}", peer, e);
                    last_error = Some(e);
                }
            }
        }

        if nodes.is_empty() {
            return Err(last_error.unwrap_or(ClientError::NoMasterAvailable));
        }

        let has_primary = nodes.iter().any(|n: &ServerNode| n.role == ServerRole::Primary);
        let has_secondary = nodes.iter().any(|n: &ServerNode| n.role == ServerRole::Secondary);
        if !has_primary && !(options.read_secondary && has_secondary) {
            for node in &nodes {
                node.connection.close().await;
            }
            return Err(ClientError::NoMasterAvailable);
        }

        tracing::info!(
            "Replica set {} connected with {} member(s)",
            options.replica_set.as_deref().unwrap_or("<unnamed>"),
            nodes.len()
        );
        Ok(Self {
            replica_set: true,
            read_secondary: options.read_secondary,
            nodes: RwLock::new(nodes),
            next_secondary: AtomicUsize::new(0),
        })
    }

    pub fn is_replica_set(&self) -> bool {
        self.replica_set
    }

    /// The connection that takes writes and commands.
    pub fn primary(&self) -> Result<Connection, ClientError> {
        let nodes = self.nodes.read();
        if !self.replica_set {
            return nodes
                .first()
                .map(|node| node.connection.clone())
                .ok_or(ClientError::NoMasterAvailable);
        }
        nodes
            .iter()
            .find(|node| node.role == ServerRole::Primary)
            .map(|node| node.connection.clone())
            .ok_or(ClientError::NoMasterAvailable)
    }

    /// The connection queries go to: a secondary in rotation when secondary
    /// reads are on and one exists, otherwise the primary.
    pub fn read_connection(&self) -> Result<Connection, ClientError> {
        if self.read_secondary {
            let nodes = self.nodes.read();
            let secondaries: Vec<&ServerNode> = nodes
                .iter()
                .filter(|node| node.role == ServerRole::Secondary)
                .collect();
            if !secondaries.is_empty() {
                let pick = self.next_secondary.fetch_add(1, Ordering::Relaxed) % secondaries.len();
                return Ok(secondaries[pick].connection.clone());
            }
        }
        self.primary()
    }

    /// Every connection that stores data, for per-server setup such as auth.
    pub fn data_connections(&self) -> Vec<Connection> {
        self.nodes
            .read()
            .iter()
            .filter(|node| node.role != ServerRole::Arbiter)
            .map(|node| node.connection.clone())
            .collect()
    }

    /// Address and role of each known server.
    pub fn members(&self) -> Vec<(ServerAddress, ServerRole)> {
        self.nodes
            .read()
            .iter()
            .map(|node| (node.address.clone(), node.role))
            .collect()
    }

    /// Asks every known server `isMaster` again, e.g. after a failover.
    pub async fn refresh(&self) -> Result<(), ClientError> {
        let snapshot: Vec<ServerNode> = self.nodes.read().clone();
        let mut roles = Vec::with_capacity(snapshot.len());
        for node in &snapshot {
            let role = match is_master(&node.connection).await {
                Ok(reply) => ServerRole::from_is_master(&reply),
                Err(e) => {
                    tracing::warn!("Refresh of {} failed: {}", node.address, e);
                    ServerRole::Other
                }
            };
            roles.push((node.address.clone(), role));
        }

        let mut nodes = self.nodes.write();
        for (address, role) in roles {
            if let Some(node) = nodes.iter_mut().find(|node| node.address == address) {
                if node.role != role {
                    tracing::info!("{} is now {:?} (was {:?})", address, role, node.role);
                }
                node.role = role;
            }
        }

        if self.replica_set
            && !self.read_secondary
            && !nodes.iter().any(|node| node.role == ServerRole::Primary)
        {
            return Err(ClientError::NoMasterAvailable);
        }
        Ok(())
    }

    pub async fn close(&self) {
        let snapshot: Vec<ServerNode> = self.nodes.read().clone();
        for node in snapshot {
            node.connection.close().await;
        }
    }
}

async fn is_master(connection: &Connection) -> Result<Document, ClientError> {
    run_command(connection, "admin", doc! { "ismaster" => 1 }, Dispatch::RoundRobin).await
}

/// Connects to one member and reads its `isMaster` reply. Returns no node
/// when the member belongs to a different set, plus the peers it lists.
async fn inspect_node(
    address: &ServerAddress,
    options: &ClientOptions,
) -> Result<(Option<ServerNode>, Vec<ServerAddress>), ClientError> {
    let connection = Connection::connect(address.clone(), options.clone()).await?;
    let reply = match is_master(&connection).await {
        Ok(reply) => reply,
        Err(e) => {
            connection.close().await;
            return Err(e);
        }
    };

    if let Some(expected) = options.replica_set.as_deref() {
        let reported = reply.get_str("setName");
        if reported != Some(expected) {
            tracing::warn!(
                "Skipping {}: replica set {:?} does not match {}",
                address,
                reported,
                expected
            );
            connection.close().await;
            return Ok((None, Vec::new()));
        }
    }

    let role = ServerRole::from_is_master(&reply);
    tracing::debug!("{} reports {:?}", address, role);

    let mut peers = Vec::new();
    for field in ["hosts", "passives", "arbiters"] {
        for host in reply.get_array(field).unwrap_or_default() {
            match host.as_str().map(ServerAddress::parse) {
                Some(Ok(peer)) => peers.push(peer),
                _ => tracing::warn!("Ignoring bad member {:?} in {} of {}", host, field, address),
            }
        }
    }

    Ok((
        Some(ServerNode {
            address: address.clone(),
            role,
            connection,
        }),
        peers,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bsonwire_bson::Value;

    #[test]
    fn test_role_classification() {
        assert_eq!(
            ServerRole::from_is_master(&doc! { "ismaster" => true, "secondary" => false }),
            ServerRole::Primary
        );
        assert_eq!(
            ServerRole::from_is_master(&doc! { "ismaster" => false, "secondary" => true }),
            ServerRole::Secondary
        );
        assert_eq!(
            ServerRole::from_is_master(&doc! { "ismaster" => false, "arbiterOnly" => true }),
            ServerRole::Arbiter
        );
        assert_eq!(
            ServerRole::from_is_master(&doc! { "ismaster" => false }),
            ServerRole::Other
        );
    }

    #[test]
    fn test_member_list_values() {
        let reply = doc! { "hosts" => vec![Value::from("a:27017"), Value::from(7)] };
        let hosts = reply.get_array("hosts").unwrap();
        assert_eq!(hosts[0].as_str().map(ServerAddress::parse).unwrap().unwrap().host, "a");
        assert!(hosts[1].as_str().is_none());
    }
}
