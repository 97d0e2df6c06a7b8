//! Broker node.
//!
//! A broker holds two partition tables:
//!
//! - **ownership**: which publisher hosts which artists. Taken from the first
//!   registration it receives and never replaced.
//! - **responsibility**: which broker answers for which artists. Computed by
//!   hashing the ownership artists onto the broker ring; also first-write-wins.
//!
//! Lookups and chunk requests are proxied to the owning publisher and its
//! reply is passed back unchanged. The metadata leader forwards the first
//! ownership table it stores to every other broker, so all brokers end up
//! with the same two tables no matter which one a publisher registered with.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinSet;

use encore_core::ring::HashRing;
use encore_core::{
    ArtistName, ChunkRequest, NodeInfo, PartitionTable, Request, Response, BOOTSTRAP_QUERY,
};

use crate::error::HandlerError;
use crate::rpc::RpcClient;
use crate::service::RequestHandler;

#[derive(Debug, Default)]
struct Tables {
    ownership: Option<PartitionTable>,
    responsibility: Option<PartitionTable>,
}

pub struct BrokerService {
    node: NodeInfo,
    brokers: Vec<NodeInfo>,
    is_metadata_leader: bool,
    ring: HashRing,
    /// Held only while reading or writing tables, never across a call.
    tables: Mutex<Tables>,
    /// Client for the broker to publisher hop. Bounded per call.
    proxy: RpcClient,
    /// Client for leader fanout. Bounded per call, so an unresponsive peer
    /// cannot hold up the registration reply.
    peers: RpcClient,
}

impl BrokerService {
    /// A non-leader broker with default ring and timeouts.
    pub fn new(node: NodeInfo, brokers: Vec<NodeInfo>) -> Self {
        let bounded = RpcClient::default().with_call_timeout(Duration::from_secs(10));
        Self {
            node,
            brokers,
            is_metadata_leader: false,
            ring: HashRing::default(),
            tables: Mutex::new(Tables::default()),
            proxy: bounded.clone(),
            peers: bounded,
        }
    }

    pub fn with_metadata_leader(mut self, is_metadata_leader: bool) -> Self {
        self.is_metadata_leader = is_metadata_leader;
        self
    }

    pub fn with_ring(mut self, ring: HashRing) -> Self {
        self.ring = ring;
        self
    }

    /// `call` bounds every outbound exchange: the proxy hop and each
    /// fanout call alike.
    pub fn with_timeouts(mut self, connect: Duration, call: Duration) -> Self {
        self.proxy = RpcClient::new(connect).with_call_timeout(call);
        self.peers = self.proxy.clone();
        self
    }

    pub async fn ownership(&self) -> Option<PartitionTable> {
        self.tables.lock().await.ownership.clone()
    }

    pub async fn responsibility(&self) -> Option<PartitionTable> {
        self.tables.lock().await.responsibility.clone()
    }

    /// Accept a publisher ownership table (or the leader's forward of one).
    ///
    /// Always replies with the responsibility table computed from *this*
    /// request, even when an earlier table is already stored.
    pub async fn process_registration(
        &self,
        table: PartitionTable,
    ) -> Result<Response, HandlerError> {
        let computed = self.ring.partition(&self.brokers, &table.artists());

        let forward = {
            let mut tables = self.tables.lock().await;

            if tables
                .responsibility
                .as_ref()
                .map_or(true, PartitionTable::is_empty)
            {
                tracing::info!(node = %self.node, brokers = computed.len(), "responsibility table stored");
                tables.responsibility = Some(computed.clone());
            }

            if tables.ownership.is_none() {
                tracing::info!(node = %self.node, publishers = table.len(), "ownership table stored");
                tables.ownership = Some(table.clone());
                self.is_metadata_leader.then_some(table)
            } else {
                None
            }
        };

        if let Some(ownership) = forward {
            self.fan_out(&ownership).await;
        }

        Ok(Response::Partition(computed))
    }

    /// Send the ownership table to every other broker at once and wait for
    /// all of them. Replies are ignored and failures are not retried; each
    /// call is bounded by the peer client's call timeout.
    async fn fan_out(&self, ownership: &PartitionTable) {
        let request = Arc::new(Request::Register(ownership.clone()));
        let mut calls = JoinSet::new();
        for peer in self.brokers.iter().filter(|b| **b != self.node).cloned() {
            let (client, request) = (self.peers.clone(), request.clone());
            calls.spawn(async move {
                let result = client.call(&peer, &request).await;
                (peer, result)
            });
        }

        while let Some(joined) = calls.join_next().await {
            match joined {
                Ok((peer, Ok(_))) => tracing::debug!(peer = %peer, "ownership forwarded"),
                Ok((peer, Err(e))) => {
                    tracing::warn!(peer = %peer, error = %e, "ownership fanout failed")
                }
                Err(e) => tracing::error!(error = %e, "fanout task failed"),
            }
        }
    }

    async fn owner_of(&self, artist: &ArtistName) -> Result<NodeInfo, HandlerError> {
        let tables = self.tables.lock().await;
        let ownership = tables.ownership.as_ref().ok_or(HandlerError::NotReady)?;
        ownership
            .owner_of(artist.as_str())
            .map(|(node, _)| node.clone())
            .ok_or_else(|| HandlerError::LookupMiss(artist.to_string()))
    }

    pub async fn process_artist_lookup(
        &self,
        artist: ArtistName,
    ) -> Result<Response, HandlerError> {
        let publisher = self.owner_of(&artist).await?;
        tracing::debug!(%artist, publisher = %publisher, "proxying song list request");
        Ok(self
            .proxy
            .call(&publisher, &Request::LookupArtist(artist))
            .await?)
    }

    pub async fn process_chunk_request(
        &self,
        request: ChunkRequest,
    ) -> Result<Response, HandlerError> {
        let publisher = self.owner_of(&request.song.artist).await?;
        tracing::trace!(song = %request.song.title, part = request.part, publisher = %publisher, "proxying chunk");
        Ok(self
            .proxy
            .call(&publisher, &Request::FetchChunk(request))
            .await?)
    }

    pub async fn process_bootstrap(&self, query: &str) -> Result<Response, HandlerError> {
        if query != BOOTSTRAP_QUERY {
            tracing::debug!(query, "ignoring unknown bootstrap query");
            return Ok(Response::Empty);
        }
        let tables = self.tables.lock().await;
        tables
            .responsibility
            .clone()
            .map(Response::Partition)
            .ok_or(HandlerError::NotReady)
    }
}

impl RequestHandler for BrokerService {
    fn role(&self) -> &'static str {
        "broker"
    }

    async fn handle(&self, request: Request) -> Response {
        let result = match request {
            Request::Register(table) => self.process_registration(table).await,
            Request::LookupArtist(artist) => self.process_artist_lookup(artist).await,
            Request::FetchChunk(req) => self.process_chunk_request(req).await,
            Request::Bootstrap(query) => self.process_bootstrap(&query).await,
        };

        result.unwrap_or_else(|e| {
            match &e {
                HandlerError::Proxy(_) => tracing::warn!(node = %self.node, error = %e, "answering empty"),
                _ => tracing::debug!(node = %self.node, error = %e, "answering empty"),
            }
            Response::Empty
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{read_frame, write_frame};
    use encore_core::SongInfo;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    fn roster(ports: &[u16]) -> Vec<NodeInfo> {
        ports
            .iter()
            .enumerate()
            .map(|(i, p)| NodeInfo::new("127.0.0.1", *p, i as u32))
            .collect()
    }

    fn ownership(publisher_port: u16, artists: &[&str]) -> PartitionTable {
        let mut table = PartitionTable::new();
        table.insert(
            NodeInfo::new("127.0.0.1", publisher_port, 0),
            artists.iter().map(|a| ArtistName::from(*a)).collect(),
        );
        table
    }

    fn song(artist: &str) -> SongInfo {
        SongInfo {
            title: "t".into(),
            artist: artist.into(),
            album: String::new(),
            genre: String::new(),
            path: "x.mp3".into(),
            total_chunks: 1,
        }
    }

    /// A port with nothing listening on it.
    async fn dead_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn broker(brokers: Vec<NodeInfo>, leader: bool) -> BrokerService {
        BrokerService::new(brokers[0].clone(), brokers)
            .with_metadata_leader(leader)
            .with_timeouts(Duration::from_millis(300), Duration::from_millis(500))
    }

    /// Accepts one connection, answers the register call, and hands back the
    /// request it got.
    fn answering_peer(listener: TcpListener) -> tokio::task::JoinHandle<Request> {
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request: Request = read_frame(&mut socket, "leader").await.unwrap();
            write_frame(&mut socket, "leader", &Response::Empty).await.unwrap();
            request
        })
    }

    #[tokio::test]
    async fn first_registration_wins() {
        let b = broker(roster(&[1, 2, 3]), false);

        let first = ownership(7000, &["Artist1", "Artist2"]);
        let second = ownership(7001, &["Other"]);

        let Response::Partition(reply1) = b.handle(Request::Register(first.clone())).await else {
            panic!("expected partition");
        };
        let Response::Partition(reply2) = b.handle(Request::Register(second)).await else {
            panic!("expected partition");
        };

        assert_eq!(b.ownership().await, Some(first));
        assert_eq!(b.responsibility().await, Some(reply1.clone()));
        assert_ne!(reply1, reply2);
        assert_eq!(reply2.artists(), vec![ArtistName::from("Other")]);
    }

    #[tokio::test]
    async fn bootstrap_answers_only_the_literal_once_ready() {
        let b = broker(roster(&[1, 2, 3]), false);
        assert_eq!(b.handle(Request::Bootstrap(BOOTSTRAP_QUERY.into())).await, Response::Empty);

        b.handle(Request::Register(ownership(7000, &["Artist1"]))).await;

        let Response::Partition(table) = b.handle(Request::Bootstrap(BOOTSTRAP_QUERY.into())).await
        else {
            panic!("expected partition");
        };
        assert_eq!(table.len(), 3);
        assert_eq!(b.handle(Request::Bootstrap("show me the money".into())).await, Response::Empty);
    }

    #[tokio::test]
    async fn lookups_before_registration_or_for_unknown_artists_are_empty() {
        let b = broker(roster(&[1, 2, 3]), false);
        assert!(matches!(
            b.process_artist_lookup("Artist1".into()).await,
            Err(HandlerError::NotReady)
        ));

        b.handle(Request::Register(ownership(7000, &["Artist1"]))).await;
        assert!(matches!(
            b.process_artist_lookup("artist1".into()).await,
            Err(HandlerError::LookupMiss(_))
        ));
        assert_eq!(
            b.handle(Request::LookupArtist("Nobody".into())).await,
            Response::Empty
        );
    }

    #[tokio::test]
    async fn unreachable_publisher_is_empty() {
        let b = broker(roster(&[1, 2, 3]), false);
        let port = dead_port().await;
        b.handle(Request::Register(ownership(port, &["Artist1"]))).await;

        assert!(matches!(
            b.process_chunk_request(ChunkRequest { song: song("Artist1"), part: 0 }).await,
            Err(HandlerError::Proxy(_))
        ));
        assert_eq!(
            b.handle(Request::LookupArtist("Artist1".into())).await,
            Response::Empty
        );
    }

    #[tokio::test]
    async fn leader_forwards_ownership_to_peers() {
        let peer = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peer_port = peer.local_addr().unwrap().port();
        let brokers = roster(&[dead_port().await, peer_port]);
        let leader = broker(brokers, true);
        let received = answering_peer(peer);

        let table = ownership(7000, &["Artist1"]);
        leader.handle(Request::Register(table.clone())).await;

        assert_eq!(received.await.unwrap(), Request::Register(table));
    }

    #[tokio::test]
    async fn non_leader_never_forwards() {
        let peer = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peer_port = peer.local_addr().unwrap().port();
        let b = broker(roster(&[dead_port().await, peer_port]), false);

        b.handle(Request::Register(ownership(7000, &["Artist1"]))).await;

        let accepted = tokio::time::timeout(Duration::from_millis(200), peer.accept()).await;
        assert!(accepted.is_err());
    }

    #[tokio::test]
    async fn stuck_peer_does_not_hold_up_registration() {
        let stuck = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let good = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let brokers = roster(&[
            dead_port().await,
            stuck.local_addr().unwrap().port(),
            good.local_addr().unwrap().port(),
        ]);
        let leader = broker(brokers, true);

        // Reads nothing and never replies.
        let holder = tokio::spawn(async move {
            let (socket, _) = stuck.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });
        let received = answering_peer(good);

        let table = ownership(7000, &["Artist1"]);
        let reply = tokio::time::timeout(
            Duration::from_secs(3),
            leader.handle(Request::Register(table.clone())),
        )
        .await
        .expect("registration must not wait on a stuck peer");

        assert!(matches!(reply, Response::Partition(_)));
        assert_eq!(received.await.unwrap(), Request::Register(table.clone()));
        assert_eq!(leader.ownership().await, Some(table));
        holder.abort();
    }

    #[tokio::test]
    async fn failing_peer_is_skipped_and_not_retried() {
        let failing = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let live = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let brokers = roster(&[
            dead_port().await,
            failing.local_addr().unwrap().port(),
            live.local_addr().unwrap().port(),
        ]);
        let leader = broker(brokers, true);

        // Hangs up on every connection without answering.
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let dropper = tokio::spawn(async move {
            loop {
                let (socket, _) = failing.accept().await.unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
                drop(socket);
            }
        });
        let received = answering_peer(live);

        let table = ownership(7000, &["Artist1", "Artist2"]);
        let Response::Partition(computed) = leader.handle(Request::Register(table.clone())).await
        else {
            panic!("expected partition");
        };

        assert_eq!(computed.len(), 3);
        assert_eq!(received.await.unwrap(), Request::Register(table));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        dropper.abort();
    }
}
