// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process TCP clusters: rendezvous, mesh formation and the semaphore
//! running end to end over real sockets

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use dsem_core::NodeId;
use dsem_daemon::{startup, LifecycleError, Node, NodeConfig, RendezvousError, RendezvousService};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn boot(peers: usize, permits: u32) -> Vec<Node> {
    let service = RendezvousService::bind("127.0.0.1:0".parse().unwrap(), peers)
        .await
        .unwrap();
    let rendezvous = service.local_addr().unwrap();
    let served = tokio::spawn(service.serve());

    let listen: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let starts: Vec<_> = NodeId::all(peers)
        .map(|id| {
            let mut config = NodeConfig::new(id, listen, rendezvous, peers);
            config.permits = permits;
            config.bootstrap_timeout = Duration::from_secs(10);
            tokio::spawn(async move { startup(&config).await })
        })
        .collect();

    let mut nodes = Vec::new();
    for start in starts {
        nodes.push(start.await.unwrap().unwrap());
    }
    served.await.unwrap().unwrap();
    nodes
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn three_nodes_take_turns() {
    const ROUNDS: u64 = 3;
    let peers = 3;
    let nodes = boot(peers, 1).await;
    let inside = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));

    let mut workers = Vec::new();
    for node in &nodes {
        let semaphore = node.semaphore().clone();
        let inside = Arc::clone(&inside);
        let overlaps = Arc::clone(&overlaps);
        workers.push(tokio::spawn(async move {
            for _ in 0..ROUNDS {
                semaphore.acquire().await.unwrap();
                if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
                semaphore.release().await.unwrap();
            }
            semaphore
                .wait_until(|s| s.releases_stabilized >= ROUNDS * peers as u64)
                .await
                .unwrap()
        }));
    }

    let mut finals = Vec::new();
    for worker in workers {
        let status = tokio::time::timeout(Duration::from_secs(20), worker)
            .await
            .expect("cluster did not finish")
            .unwrap();
        finals.push(status);
    }

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    for status in &finals {
        assert_eq!(status.permits, 1);
        assert_eq!(status.acquires_stabilized, ROUNDS * peers as u64);
    }

    for node in nodes {
        node.shutdown().await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn counting_semaphore_over_tcp() {
    let nodes = boot(3, 2).await;
    let first = nodes[0].semaphore().clone();
    let second = nodes[1].semaphore().clone();

    tokio::time::timeout(Duration::from_secs(10), async {
        first.acquire().await.unwrap();
        second.acquire().await.unwrap();
    })
    .await
    .expect("two permits should be granted");

    let third = nodes[2].semaphore().clone();
    let pending = tokio::spawn(async move { third.acquire().await });
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!pending.is_finished());

    first.release().await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), pending)
        .await
        .expect("third node should be granted")
        .unwrap()
        .unwrap();

    for node in nodes {
        node.shutdown().await.unwrap();
    }
}

#[tokio::test]
async fn duplicate_node_id_fails_every_node() {
    let service = RendezvousService::bind("127.0.0.1:0".parse().unwrap(), 2)
        .await
        .unwrap();
    let rendezvous = service.local_addr().unwrap();
    let served = tokio::spawn(service.serve());

    let listen: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let starts: Vec<_> = (0..2)
        .map(|_| {
            let config = NodeConfig::new(NodeId::new(0), listen, rendezvous, 2);
            tokio::spawn(async move { startup(&config).await })
        })
        .collect();

    for start in starts {
        let result = start.await.unwrap();
        assert!(matches!(
            result,
            Err(LifecycleError::Rendezvous(RendezvousError::Rejected { .. }))
        ));
    }
    assert!(served.await.unwrap().is_err());
}
