//! Common helpers for chain selection tests

use std::sync::Arc;

use chain::{AcceptAll, ChainTable, LocalChain, config::REGTEST_BITS};
use containers::{Bytes32, Header};

/// Compact target with far more work per header than `REGTEST_BITS`.
pub const HARD_BITS: u32 = 0x1f00_ffff;

pub fn genesis() -> Header {
    Header {
        version: 1,
        bits: REGTEST_BITS,
        ..Header::default()
    }
}

pub fn child_of(parent: &Header, nonce: u32, bits: u32) -> Header {
    Header {
        version: 1,
        prev_block_hash: parent.hash(),
        merkle_root: Bytes32::zero(),
        timestamp: parent.timestamp + 600,
        bits,
        nonce,
        height: parent.height + 1,
    }
}

/// Table holding a main chain of `main_length` easy headers above genesis.
pub fn table_with_main(main_length: u64) -> (ChainTable, Vec<Header>) {
    let table = ChainTable::new([LocalChain::genesis(genesis(), Arc::new(AcceptAll))]);
    let mut headers = vec![genesis()];

    for _ in 0..main_length {
        let next = child_of(headers.last().unwrap(), 0, REGTEST_BITS);
        table.extend_any(&next).unwrap();
        headers.push(next);
    }

    (table, headers)
}

/// Fork off `parent` and extend it with `length` headers of the given bits.
pub fn add_fork(table: &ChainTable, parent: &Header, length: u64, bits: u32) -> u64 {
    let first = child_of(parent, 1_000, bits);
    let fork_height = table.insert_fork(0, first.clone()).unwrap();

    let mut tip = first;
    for nonce in 1..length {
        let next = child_of(&tip, 1_000 + nonce as u32, bits);
        table.extend_any(&next).unwrap();
        tip = next;
    }

    fork_height
}
