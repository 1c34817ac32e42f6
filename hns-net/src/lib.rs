//! Peer transport (spec.md §4.D): TCP connections authenticated and
//! encrypted with the Brontide handshake, framed with [`framing`], carrying
//! gossiped blocks and transactions instead of libp2p/gossipsub.

pub mod framing;
pub mod handshake;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use hns_chain::Transaction;
use hns_miner::Block;
use parking_lot::Mutex;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use framing::{decode_header, decode_payload, encode_message, HEADER_SIZE};
use handshake::{BrontideKeys, Initiator, Responder};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub listen_addr: String,
    pub seed_nodes: Vec<String>,
}

/// A gossiped payload. Wire-encoded with `serde_json`, matching the rest of
/// this workspace's on-disk/over-the-wire JSON convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireMessage {
    Block(Block),
    Tx(Transaction),
}

#[async_trait]
pub trait NetworkService: Send + Sync {
    async fn start(&self) -> Result<()>;
    async fn broadcast_block(&self, block: Block) -> Result<()>;
    async fn broadcast_tx(&self, tx: Transaction) -> Result<()>;
    fn local_public_key(&self) -> PublicKey;
    /// Subscribes to messages received from any connected peer.
    fn subscribe(&self) -> broadcast::Receiver<WireMessage>;
}

struct Peer {
    outbound: mpsc::UnboundedSender<WireMessage>,
}

pub struct BrontideNetwork {
    config: NetworkConfig,
    local_secret: SecretKey,
    local_public: PublicKey,
    peers: Arc<Mutex<HashMap<PublicKey, Peer>>>,
    inbound: broadcast::Sender<WireMessage>,
}

impl BrontideNetwork {
    pub fn new(config: NetworkConfig) -> Self {
        let secp = Secp256k1::new();
        let local_secret = SecretKey::new(&mut rand::thread_rng());
        let local_public = PublicKey::from_secret_key(&secp, &local_secret);
        let (inbound, _) = broadcast::channel(1024);
        BrontideNetwork {
            config,
            local_secret,
            local_public,
            peers: Arc::new(Mutex::new(HashMap::new())),
            inbound,
        }
    }

    async fn run_listener(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        info!("listening on {}", self.config.listen_addr);
        let local_secret = self.local_secret;
        let peers = self.peers.clone();
        let inbound = self.inbound.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        debug!("inbound connection from {addr}");
                        let peers = peers.clone();
                        let inbound = inbound.clone();
                        tokio::spawn(async move {
                            if let Err(err) = accept_peer(stream, local_secret, peers, inbound).await {
                                warn!("inbound peer handshake failed: {err}");
                            }
                        });
                    }
                    Err(err) => warn!("accept failed: {err}"),
                }
            }
        });
        Ok(())
    }

    async fn dial_seeds(&self) -> Result<()> {
        for seed in &self.config.seed_nodes {
            let Some((addr, remote_static)) = parse_seed(seed) else {
                warn!("skipping malformed seed node {seed}");
                continue;
            };
            let local_secret = self.local_secret;
            let peers = self.peers.clone();
            let inbound = self.inbound.clone();
            tokio::spawn(async move {
                match TcpStream::connect(&addr).await {
                    Ok(stream) => {
                        if let Err(err) =
                            connect_peer(stream, local_secret, remote_static, peers, inbound).await
                        {
                            warn!("outbound peer handshake to {addr} failed: {err}");
                        }
                    }
                    Err(err) => warn!("could not connect to seed {addr}: {err}"),
                }
            });
        }
        Ok(())
    }

    async fn broadcast(&self, message: WireMessage) -> Result<()> {
        for peer in self.peers.lock().values() {
            let _ = peer.outbound.send(message.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl NetworkService for BrontideNetwork {
    async fn start(&self) -> Result<()> {
        self.run_listener().await?;
        self.dial_seeds().await?;
        Ok(())
    }

    async fn broadcast_block(&self, block: Block) -> Result<()> {
        self.broadcast(WireMessage::Block(block)).await
    }

    async fn broadcast_tx(&self, tx: Transaction) -> Result<()> {
        self.broadcast(WireMessage::Tx(tx)).await
    }

    fn local_public_key(&self) -> PublicKey {
        self.local_public
    }

    fn subscribe(&self) -> broadcast::Receiver<WireMessage> {
        self.inbound.subscribe()
    }
}

/// `host:port/033...` — a TCP address and the peer's expected static key,
/// the same shape hsd's seed node identifiers take.
fn parse_seed(seed: &str) -> Option<(String, PublicKey)> {
    let (addr, key_hex) = seed.rsplit_once('/')?;
    let key_bytes = hex::decode(key_hex).ok()?;
    let remote_static = PublicKey::from_slice(&key_bytes).ok()?;
    Some((addr.to_string(), remote_static))
}

async fn connect_peer(
    mut stream: TcpStream,
    local_secret: SecretKey,
    remote_static: PublicKey,
    peers: Arc<Mutex<HashMap<PublicKey, Peer>>>,
    inbound: broadcast::Sender<WireMessage>,
) -> Result<()> {
    let mut initiator = Initiator::new(local_secret, remote_static);

    let act1 = initiator.act_one();
    stream.write_all(&act1).await?;

    let mut act2 = [0u8; handshake::ACT_TWO_SIZE];
    stream.read_exact(&mut act2).await?;
    initiator
        .recv_act_two(&act2)
        .map_err(|e| anyhow!("act two rejected: {e}"))?;

    let (act3, keys) = initiator
        .act_three()
        .map_err(|e| anyhow!("act three failed: {e}"))?;
    stream.write_all(&act3).await?;

    run_session(stream, keys, remote_static, peers, inbound).await
}

async fn accept_peer(
    mut stream: TcpStream,
    local_secret: SecretKey,
    peers: Arc<Mutex<HashMap<PublicKey, Peer>>>,
    inbound: broadcast::Sender<WireMessage>,
) -> Result<()> {
    let mut responder = Responder::new(local_secret);

    let mut act1 = [0u8; handshake::ACT_ONE_SIZE];
    stream.read_exact(&mut act1).await?;
    responder
        .recv_act_one(&act1)
        .map_err(|e| anyhow!("act one rejected: {e}"))?;

    let act2 = responder
        .act_two()
        .map_err(|e| anyhow!("act two failed: {e}"))?;
    stream.write_all(&act2).await?;

    let mut act3 = [0u8; handshake::ACT_THREE_SIZE];
    stream.read_exact(&mut act3).await?;
    let (remote_static, keys) = responder
        .recv_act_three(&act3)
        .map_err(|e| anyhow!("act three rejected: {e}"))?;

    run_session(stream, keys, remote_static, peers, inbound).await
}

/// Drives one peer connection once the handshake is complete: pumps
/// outbound gossip from this peer's queue onto the wire and decodes
/// inbound frames, republishing them on `inbound`.
async fn run_session(
    mut stream: TcpStream,
    keys: BrontideKeys,
    remote_static: PublicKey,
    peers: Arc<Mutex<HashMap<PublicKey, Peer>>>,
    inbound: broadcast::Sender<WireMessage>,
) -> Result<()> {
    let BrontideKeys { mut send, mut recv } = keys;
    let (tx, mut rx) = mpsc::unbounded_channel();
    peers.lock().insert(remote_static, Peer { outbound: tx });
    info!("peer session established with {remote_static}");

    let result = loop {
        let mut header = [0u8; HEADER_SIZE];
        tokio::select! {
            outgoing = rx.recv() => {
                let Some(message) = outgoing else { break Ok(()) };
                let payload = match serde_json::to_vec(&message) {
                    Ok(p) => p,
                    Err(err) => break Err(anyhow!("encode failed: {err}")),
                };
                let wire = match encode_message(&mut send, &payload) {
                    Ok(w) => w,
                    Err(err) => break Err(anyhow!("frame too large: {err}")),
                };
                if let Err(err) = stream.write_all(&wire).await {
                    break Err(err.into());
                }
            }
            read_result = stream.read_exact(&mut header) => {
                if read_result.is_err() {
                    break Ok(());
                }
                let size = match decode_header(&mut recv, &header) {
                    Ok(s) => s,
                    Err(err) => break Err(anyhow!("bad frame header: {err}")),
                };
                let mut body = vec![0u8; size + 16];
                if let Err(err) = stream.read_exact(&mut body).await {
                    break Err(err.into());
                }
                let payload = match decode_payload(&mut recv, size, &body) {
                    Ok(p) => p,
                    Err(err) => break Err(anyhow!("bad frame payload: {err}")),
                };
                match serde_json::from_slice::<WireMessage>(&payload) {
                    Ok(message) => { let _ = inbound.send(message); }
                    Err(err) => warn!("dropping undecodable message from {remote_static}: {err}"),
                }
            }
        }
    };

    peers.lock().remove(&remote_static);
    info!("peer session with {remote_static} closed");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use hns_chain::{BlockHeader, Hash};
    use std::time::Duration;

    fn sample_block() -> Block {
        Block {
            header: BlockHeader {
                version: 0,
                prev_block: Hash::ZERO,
                merkle_root: Hash::ZERO,
                witness_root: Hash::ZERO,
                tree_root: Hash::ZERO,
                reserved_root: Hash::ZERO,
                time: 1,
                bits: 0x207f_ffff,
                extra_nonce: [0u8; 20],
                solution: vec![],
            },
            txs: vec![],
        }
    }

    #[tokio::test]
    async fn two_nodes_exchange_a_gossiped_block_over_loopback() {
        let bound = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr_a = bound.local_addr().unwrap();
        drop(bound);

        let node_a = BrontideNetwork::new(NetworkConfig {
            listen_addr: addr_a.to_string(),
            seed_nodes: vec![],
        });
        node_a.run_listener().await.unwrap();

        let seed = format!("{addr_a}/{}", hex::encode(node_a.local_public_key().serialize()));
        let node_b = BrontideNetwork::new(NetworkConfig {
            listen_addr: "127.0.0.1:0".into(),
            seed_nodes: vec![seed],
        });
        let mut inbound_a = node_a.subscribe();
        node_b.dial_seeds().await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        node_b.broadcast_block(sample_block()).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), inbound_a.recv())
            .await
            .expect("message arrived before timeout")
            .unwrap();
        match received {
            WireMessage::Block(block) => assert_eq!(block.header.bits, 0x207f_ffff),
            WireMessage::Tx(_) => panic!("expected a block"),
        }
    }
}
