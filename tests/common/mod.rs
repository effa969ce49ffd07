//! Shared fixtures for the integration suites

#![allow(dead_code)]

use lakecat::{
    BlobBackend, Client, ClientOptions, Config, MemoryIndex, MergeType, SimulatedClock, SnapInfo,
    TsSeq, WriteRequest,
};
use std::sync::Arc;
use std::time::Duration;

/// 2023-11-14T22:13:20Z
pub const START_SECS: u64 = 1_700_000_000;

pub async fn client(name: &str) -> Client {
    Client::builder(ClientOptions::test())
        .config(Config::memory(name))
        .build()
        .await
        .unwrap()
}

/// Client whose index allocates from a simulated clock
pub struct SimulatedFixture {
    pub client: Client,
    pub clock: SimulatedClock,
    pub index: MemoryIndex,
}

pub async fn simulated(name: &str, blobs: Option<Arc<dyn BlobBackend>>) -> SimulatedFixture {
    let clock = SimulatedClock::at_secs(START_SECS);
    let index = MemoryIndex::with_clock(Arc::new(clock.clone()));
    let mut builder = Client::builder(ClientOptions::test())
        .index_backend(Arc::new(index.clone()))
        .clock(Arc::new(clock.clone()))
        .config(Config::memory(name));
    if let Some(blobs) = blobs {
        builder = builder.blob_backend(blobs);
    }
    SimulatedFixture {
        client: builder.build().await.unwrap(),
        clock,
        index,
    }
}

pub async fn write(client: &Client, catalog: &str, path: &str, mt: MergeType, body: &str) -> TsSeq {
    client
        .write(&WriteRequest::new(catalog, path, mt, body.to_string()))
        .await
        .unwrap()
}

/// Poll until `catalog` has `n` snapshots or a second passes
pub async fn wait_for_snapshots(client: &Client, catalog: &str, n: usize) -> Vec<SnapInfo> {
    for _ in 0..100 {
        let snaps = client.snapshots(catalog).await.unwrap();
        if snaps.len() >= n {
            return snaps;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    client.snapshots(catalog).await.unwrap()
}
