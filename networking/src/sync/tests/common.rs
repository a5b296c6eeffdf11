use std::sync::Arc;
use std::time::Duration;

use chain::config::REGTEST_BITS;
use chain::{AcceptAll, ChainTable, HeaderValidator, LocalChain};
use containers::Header;

use crate::server::SyncServer;
use crate::server::memory::{MemoryServer, extend_chain, generate_chain};
use crate::types::ServerEndpoint;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn genesis() -> Header {
    Header {
        version: 1,
        bits: REGTEST_BITS,
        timestamp: 1_231_006_505,
        ..Header::default()
    }
}

/// A genesis header no chain built on `genesis()` agrees with.
pub fn foreign_genesis() -> Header {
    Header {
        nonce: 7,
        ..genesis()
    }
}

/// `genesis()` followed by `length` headers.
pub fn main_chain(length: u64) -> Vec<Header> {
    generate_chain(&genesis(), length)
}

pub fn endpoint(port: u16) -> ServerEndpoint {
    ServerEndpoint::new("localhost", port, port + 2)
}

pub fn table_from(headers: &[Header]) -> Arc<ChainTable> {
    table_with_validator(headers, Arc::new(AcceptAll))
}

pub fn table_with_validator(
    headers: &[Header],
    validator: Arc<dyn HeaderValidator>,
) -> Arc<ChainTable> {
    let mut chain = LocalChain::genesis(headers[0].clone(), validator);
    for header in &headers[1..] {
        chain.save_header(header.clone());
    }
    Arc::new(ChainTable::new([chain]))
}

/// Add a fork branching off `headers[fork_height - 1]` with `length` headers.
pub fn add_fork(table: &ChainTable, headers: &[Header], fork_height: u64, length: u64) -> Vec<Header> {
    let branch = extend_chain(&headers[fork_height as usize - 1], length, 5_000);
    table.insert_fork(0, branch[0].clone()).unwrap();
    for header in &branch[1..] {
        table.extend_any(header).unwrap();
    }
    branch
}

pub async fn connected_server(port: u16, headers: Vec<Header>) -> (Arc<MemoryServer>, SyncServer) {
    let memory = Arc::new(MemoryServer::new(endpoint(port), headers));
    let server = SyncServer::new(memory.clone());
    server.connect(TIMEOUT).await.unwrap();
    (memory, server)
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
