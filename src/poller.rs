//! Periodic remote-head polling.
//!
//! One task per peer set. Each cycle sleeps, asks the peers for their current
//! block and, when it differs from the last one seen, fetches its recall block
//! and reports both to the node. Validation is left to the receiver.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::blockchain::Block;
use crate::crypto::Hash;
use crate::error::WeaveResult;

/// Addresses of the peers a poller watches.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PeerSet(pub Vec<String>);

impl fmt::Display for PeerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(","))
    }
}

/// Network access used by the poller. Implementations own retries and peer
/// failover; an error simply skips the current cycle.
pub trait PeerClient {
    fn fetch_current_block(&self, peers: &PeerSet)
        -> impl Future<Output = WeaveResult<Block>> + Send;

    fn fetch_block(
        &self,
        peers: &PeerSet,
        hash: &Hash,
    ) -> impl Future<Output = WeaveResult<Block>> + Send;
}

/// A newly observed remote head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUpdate {
    pub peers: PeerSet,
    pub height: u64,
    pub block: Block,
    /// `None` for genesis or a head without a hash list.
    pub recall_block: Option<Block>,
}

pub struct Poller<P> {
    client: P,
    peers: PeerSet,
    interval: Duration,
    last_seen: Option<Hash>,
    updates: mpsc::UnboundedSender<RemoteUpdate>,
}

/// Stops a spawned poller.
pub struct PollerHandle {
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<()>,
}

impl PollerHandle {
    pub async fn shutdown(self) {
        if self.shutdown.send(true).is_err() {
            return;
        }
        if let Err(err) = self.worker.await {
            debug!(?err, "poller task exited with error");
        }
    }
}

impl<P> Poller<P>
where
    P: PeerClient + Send + Sync + 'static,
{
    pub fn new(
        client: P,
        peers: PeerSet,
        interval: Duration,
        updates: mpsc::UnboundedSender<RemoteUpdate>,
    ) -> Self {
        Self {
            client,
            peers,
            interval,
            last_seen: None,
            updates,
        }
    }

    /// Seeds the head the first comparison is made against. Without it the
    /// first fetched head is always reported.
    pub fn with_last_seen(mut self, hash: Hash) -> Self {
        self.last_seen = Some(hash);
        self
    }

    pub fn spawn(self) -> PollerHandle {
        let (shutdown, mut rx) = watch::channel(false);
        let worker = tokio::spawn(async move {
            let mut poller = self;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(poller.interval) => {
                        if !poller.poll_once().await {
                            break;
                        }
                    }
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(peers = %poller.peers, "poller stopped");
        });
        PollerHandle { shutdown, worker }
    }

    /// Runs one cycle. Returns `false` once nobody is listening for updates.
    pub async fn poll_once(&mut self) -> bool {
        let block = match self.client.fetch_current_block(&self.peers).await {
            Ok(block) => block,
            Err(err) => {
                warn!(peers = %self.peers, error = %err, "failed to fetch remote head");
                return true;
            }
        };
        let hash = match block.sealed_hash() {
            Ok(hash) => hash,
            Err(err) => {
                warn!(peers = %self.peers, error = %err, "remote head is unsealed");
                return true;
            }
        };
        if self.last_seen == Some(hash) {
            debug!(peers = %self.peers, height = block.height, "remote head unchanged");
            return true;
        }

        let recall_block = match self.fetch_recall(&block).await {
            Ok(recall) => recall,
            Err(err) => {
                warn!(
                    peers = %self.peers,
                    height = block.height,
                    error = %err,
                    "failed to fetch recall block"
                );
                return true;
            }
        };

        info!(
            peers = %self.peers,
            height = block.height,
            hash = %hash.short(),
            "observed new remote head"
        );
        self.last_seen = Some(hash);
        let update = RemoteUpdate {
            peers: self.peers.clone(),
            height: block.height,
            block,
            recall_block,
        };
        if self.updates.send(update).is_err() {
            debug!(peers = %self.peers, "update receiver dropped");
            return false;
        }
        true
    }

    async fn fetch_recall(&self, block: &Block) -> WeaveResult<Option<Block>> {
        match block.recall_hash()? {
            Some(hash) => Ok(Some(self.client.fetch_block(&self.peers, &hash).await?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use crate::blockchain::ChainElement;
    use crate::codec::BincodeCodec;
    use crate::config::WeaveConfig;
    use crate::error::WeaveError;
    use crate::mining::{FixedDifficulty, FixedNonce};
    use crate::storage::MemoryStore;
    use crate::weave::{BlockTemplate, Weave, WeaveEngine};

    #[derive(Clone, Default)]
    struct FakePeers {
        head: Arc<Mutex<Option<Block>>>,
        blocks: Arc<Mutex<HashMap<Hash, Block>>>,
        head_fetches: Arc<Mutex<u32>>,
    }

    impl FakePeers {
        fn publish(&self, weave: &Weave) {
            let mut blocks = self.blocks.lock().unwrap();
            for element in weave.elements() {
                if let ChainElement::Materialized(block) = element {
                    blocks.insert(block.indep_hash.unwrap(), block.clone());
                }
            }
            if let Some(ChainElement::Materialized(head)) = weave.head() {
                *self.head.lock().unwrap() = Some(head.clone());
            }
        }
    }

    impl PeerClient for FakePeers {
        async fn fetch_current_block(&self, _peers: &PeerSet) -> WeaveResult<Block> {
            *self.head_fetches.lock().unwrap() += 1;
            let head = self.head.lock().unwrap().clone();
            head.ok_or_else(|| WeaveError::BlockNotFound(Hash::default()))
        }

        async fn fetch_block(&self, _peers: &PeerSet, hash: &Hash) -> WeaveResult<Block> {
            let block = self.blocks.lock().unwrap().get(hash).cloned();
            block.ok_or(WeaveError::BlockNotFound(*hash))
        }
    }

    async fn chain(blocks: usize) -> Weave {
        let engine = WeaveEngine::new(
            MemoryStore::new(),
            BincodeCodec,
            FixedNonce(vec![1]),
            FixedDifficulty,
        );
        let mut weave = engine.init(&WeaveConfig::default()).unwrap();
        for _ in 0..blocks {
            weave = engine
                .append(&weave, &[], BlockTemplate::default())
                .await
                .unwrap();
        }
        weave
    }

    fn poller(
        peers: FakePeers,
    ) -> (Poller<FakePeers>, mpsc::UnboundedReceiver<RemoteUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let poller = Poller::new(
            peers,
            PeerSet(vec!["127.0.0.1:1984".into()]),
            Duration::from_millis(10),
            tx,
        );
        (poller, rx)
    }

    #[tokio::test]
    async fn test_reports_new_head_with_recall_block() {
        let peers = FakePeers::default();
        let weave = chain(3).await;
        peers.publish(&weave);
        let (mut poller, mut rx) = poller(peers);

        assert!(poller.poll_once().await);
        let update = rx.try_recv().unwrap();
        assert_eq!(update.height, 3);
        let recall = update.recall_block.unwrap();
        assert_eq!(recall.height, update.block.recall_index().unwrap());
        assert_eq!(update.peers.to_string(), "127.0.0.1:1984");
    }

    #[tokio::test]
    async fn test_unchanged_head_is_not_reported_twice() {
        let peers = FakePeers::default();
        peers.publish(&chain(2).await);
        let (mut poller, mut rx) = poller(peers);

        assert!(poller.poll_once().await);
        assert!(poller.poll_once().await);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_seeded_baseline_suppresses_first_report() {
        let peers = FakePeers::default();
        let weave = chain(1).await;
        peers.publish(&weave);
        let head = weave.head().unwrap().indep_hash().unwrap();
        let (poller, mut rx) = poller(peers);
        let mut poller = poller.with_last_seen(head);

        assert!(poller.poll_once().await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_genesis_head_has_no_recall_block() {
        let peers = FakePeers::default();
        peers.publish(&chain(0).await);
        let (mut poller, mut rx) = poller(peers);

        assert!(poller.poll_once().await);
        let update = rx.try_recv().unwrap();
        assert_eq!(update.height, 0);
        assert_eq!(update.recall_block, None);
    }

    #[tokio::test]
    async fn test_fetch_failure_skips_cycle() {
        let peers = FakePeers::default();
        let (mut poller, mut rx) = poller(peers);
        assert!(poller.poll_once().await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_truncated_hash_list_is_not_reported() {
        let peers = FakePeers::default();
        let weave = chain(3).await;
        peers.publish(&weave);
        let mut head = peers.head.lock().unwrap().clone().unwrap();
        head.hash_list.as_mut().unwrap().truncate(1);
        *peers.head.lock().unwrap() = Some(head);
        let (mut poller, mut rx) = poller(peers);

        assert!(poller.poll_once().await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stops_when_receiver_dropped() {
        let peers = FakePeers::default();
        peers.publish(&chain(1).await);
        let (mut poller, rx) = poller(peers);
        drop(rx);
        assert!(!poller.poll_once().await);
    }

    #[tokio::test]
    async fn test_spawned_poller_follows_remote_head() {
        let peers = FakePeers::default();
        let first = chain(1).await;
        peers.publish(&first);
        let (poller, mut rx) = poller(peers.clone());
        let handle = poller.spawn();

        let update = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update.height, 1);

        let second = chain(2).await;
        peers.publish(&second);
        let update = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update.height, 2);

        handle.shutdown().await;
        let fetches = *peers.head_fetches.lock().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*peers.head_fetches.lock().unwrap(), fetches);
    }
}
