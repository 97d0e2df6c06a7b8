use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use encore_core::{
    ArtistName, ChunkRequest, NodeInfo, PartitionTable, Request, Response, BOOTSTRAP_QUERY,
};
use encore_services::{RetryError, RpcClient};

use crate::*;

#[tokio::test]
async fn bootstrap_before_registration_is_empty() {
    let cluster = Cluster::start().await.unwrap();

    let reply = RpcClient::default()
        .call(&cluster.broker_nodes[0], &Request::Bootstrap(BOOTSTRAP_QUERY.into()))
        .await
        .unwrap();
    assert_eq!(reply, Response::Empty);

    let mut consumer = cluster.consumer(Some(3));
    assert!(matches!(
        consumer.bootstrap().await,
        Err(RetryError::Exhausted { attempts: 3, .. })
    ));
}

#[tokio::test]
async fn unreachable_publisher_looks_like_a_miss() {
    let cluster = Cluster::start().await.unwrap();

    let mut ownership = PartitionTable::new();
    ownership.insert(
        NodeInfo::new("127.0.0.1", dead_port().await, 0),
        vec![ArtistName::from("Ghost")],
    );
    let rpc = RpcClient::default();
    rpc.call(&cluster.broker_nodes[0], &Request::Register(ownership))
        .await
        .unwrap();

    let unreachable = rpc
        .call(&cluster.broker_nodes[1], &Request::LookupArtist("Ghost".into()))
        .await
        .unwrap();
    let unknown = rpc
        .call(&cluster.broker_nodes[1], &Request::LookupArtist("Nobody".into()))
        .await
        .unwrap();
    assert_eq!(unreachable, Response::Empty);
    assert_eq!(unknown, Response::Empty);

    let mut song = cluster.song("Artist1");
    song.artist = "Ghost".into();
    let chunk = rpc
        .call(
            &cluster.broker_nodes[2],
            &Request::FetchChunk(ChunkRequest { song, part: 0 }),
        )
        .await
        .unwrap();
    assert_eq!(chunk, Response::Empty);

    let consumer = cluster.consumer(Some(2));
    assert!(consumer
        .request_songs(&cluster.broker_nodes[0], &"Ghost".into())
        .await
        .is_err());
}

#[tokio::test]
async fn out_of_range_part_is_missing_not_fatal() {
    let cluster = Cluster::start().await.unwrap();
    cluster.register(0, 0).await.unwrap();

    let mut song = cluster.song("Artist2");
    song.total_chunks = 2;
    let consumer = cluster.consumer(Some(5));
    let download = consumer.download(&cluster.broker_nodes[0], &song).await;

    assert_eq!(download.missing_parts(), vec![1]);
    assert!(download.assemble().is_none());
}

#[tokio::test]
async fn garbage_does_not_take_a_broker_down() {
    let cluster = Cluster::start().await.unwrap();
    cluster.register(0, 0).await.unwrap();

    let target = &cluster.broker_nodes[1];
    let mut raw = TcpStream::connect(target.endpoint()).await.unwrap();
    // Valid version, unknown kind.
    raw.write_all(&[0x01, 0x7f, 0, 0, 0, 0]).await.unwrap();
    drop(raw);

    let mut raw = TcpStream::connect(target.endpoint()).await.unwrap();
    // Declares more payload than the frame limit allows.
    raw.write_all(&[0x01, 0x02, 0xff, 0xff, 0xff, 0xff]).await.unwrap();
    drop(raw);

    let reply = RpcClient::default()
        .call(target, &Request::Bootstrap(BOOTSTRAP_QUERY.into()))
        .await
        .unwrap();
    let Response::Partition(table) = reply else {
        panic!("expected partition, got {reply:?}");
    };
    assert_eq!(table.len(), 3);
}
