use encore_core::{ArtistName, ChunkRequest, PartitionTable, Request, Response};
use encore_services::{assign_artists, split_into_chunks, RpcClient};

use crate::*;

fn names(list: &[&str]) -> Vec<ArtistName> {
    list.iter().map(|a| ArtistName::from(*a)).collect()
}

#[tokio::test]
async fn end_to_end_download() {
    let cluster = Cluster::start().await.unwrap();
    cluster.register(0, 0).await.unwrap();

    // Publisher 0 hosts Artist1, publisher 1 hosts Artist2.
    let ownership = cluster.brokers[0].ownership().await.unwrap();
    assert_eq!(ownership.get(&cluster.publisher_nodes[0]).unwrap(), names(&["Artist1"]).as_slice());
    assert_eq!(ownership.get(&cluster.publisher_nodes[1]).unwrap(), names(&["Artist2"]).as_slice());

    let mut consumer = cluster.consumer(Some(20));
    let table = consumer.bootstrap().await.unwrap().clone();
    assert_eq!(table.len(), 3);
    assert_eq!(consumer.brokers(), cluster.broker_nodes);

    let (broker, artist) = consumer.resolve("Artist1").unwrap();
    let songs = consumer.request_songs(&broker, &artist).await.unwrap();
    assert_eq!(songs.len(), 1);
    assert_eq!(songs[0].title, "Opening");
    assert_eq!(songs[0].total_chunks, 3);

    let download = consumer.download(&broker, &songs[0]).await;
    assert!(download.is_complete());
    assert_eq!(
        download.assemble().unwrap(),
        std::fs::read(&songs[0].path).unwrap()
    );

    let (broker, artist) = consumer.resolve("Artist2").unwrap();
    let songs = consumer.request_songs(&broker, &artist).await.unwrap();
    let chunk = consumer.fetch_chunk(&broker, &songs[0], 0).await.unwrap();
    let file_len = std::fs::metadata(&songs[0].path).unwrap().len() as usize;
    assert_eq!(songs[0].total_chunks, 1);
    assert_eq!(chunk.data.len(), file_len);
}

#[tokio::test]
async fn leader_fanout_converges_all_brokers() {
    let cluster = Cluster::start().await.unwrap();
    cluster.register(0, 0).await.unwrap();

    let ownership = cluster.brokers[0].ownership().await.unwrap();
    let responsibility = cluster.brokers[0].responsibility().await.unwrap();
    for broker in &cluster.brokers[1..] {
        assert_eq!(broker.ownership().await.as_ref(), Some(&ownership));
        assert_eq!(broker.responsibility().await.as_ref(), Some(&responsibility));
    }

    // Every artist is the responsibility of exactly one broker.
    let mut all = responsibility.artists();
    all.sort();
    assert_eq!(all, names(&["Artist1", "Artist2"]));
}

#[tokio::test]
async fn registration_at_a_follower_stays_local() {
    let cluster = Cluster::start().await.unwrap();
    cluster.register(0, 1).await.unwrap();

    assert!(cluster.brokers[1].ownership().await.is_some());
    assert!(cluster.brokers[0].ownership().await.is_none());
    assert!(cluster.brokers[2].ownership().await.is_none());
}

#[tokio::test]
async fn later_registrations_do_not_replace_tables() {
    let cluster = Cluster::start().await.unwrap();
    cluster.register(0, 0).await.unwrap();
    let ownership = cluster.brokers[0].ownership().await.unwrap();
    let responsibility = cluster.brokers[0].responsibility().await.unwrap();

    cluster.register(1, 0).await.unwrap();

    let mut other = PartitionTable::new();
    other.insert(cluster.publisher_nodes[1].clone(), names(&["Somebody"]));
    let reply = RpcClient::default()
        .call(&cluster.broker_nodes[2], &Request::Register(other))
        .await
        .unwrap();
    let Response::Partition(computed) = reply else {
        panic!("expected partition, got {reply:?}");
    };
    assert_eq!(computed.artists(), names(&["Somebody"]));

    for broker in &cluster.brokers {
        assert_eq!(broker.ownership().await.as_ref(), Some(&ownership));
        assert_eq!(broker.responsibility().await.as_ref(), Some(&responsibility));
    }
}

#[tokio::test]
async fn proxied_chunks_match_local_split() {
    let cluster = Cluster::start().await.unwrap();
    cluster.register(0, 0).await.unwrap();

    let rpc = RpcClient::default();
    for artist in ["Artist1", "Artist2"] {
        let song = cluster.song(artist);
        let expected = split_into_chunks(&song, CHUNK_SIZE).unwrap();
        assert_eq!(expected.len() as u32, song.total_chunks);

        for broker in &cluster.broker_nodes {
            for (part, chunk) in expected.iter().enumerate() {
                let reply = rpc
                    .call(
                        broker,
                        &Request::FetchChunk(ChunkRequest {
                            song: song.clone(),
                            part: part as u32,
                        }),
                    )
                    .await
                    .unwrap();
                assert_eq!(reply, Response::Chunk(chunk.clone()));
            }
        }
    }
}

#[tokio::test]
async fn assignment_matches_publisher_registration() {
    let cluster = Cluster::start().await.unwrap();
    let expected = assign_artists(
        &cluster.publisher_nodes,
        &cluster.publishers[0].catalog().artists(),
    );
    cluster.register(0, 0).await.unwrap();
    assert_eq!(cluster.brokers[2].ownership().await, Some(expected));
    assert_eq!(
        cluster.publishers[0].known_brokers().await,
        cluster.broker_nodes
    );
}
