use containers::{Bytes32, Header};

/// Compact target used by simulated and regression-test chains.
pub const REGTEST_BITS: u32 = 0x207f_ffff;

/// Well-known mainnet checkpoints as `(height, block hash)`.
pub const MAINNET_CHECKPOINTS: &[(u64, &str)] = &[
    (0, "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"),
    (11_111, "0000000069e244f73d78e8fd29ba2fd2ed618bd6fa2ee92559f542fdb26e7c1d"),
    (33_333, "000000002dd5588a74784eaa7ab0507a18ad16a236e7b1ce69f00d7ddfb5d0a6"),
    (210_000, "000000000000048b95347e83192f69cf0366076336c639f9b7228e9ba171342e"),
];

#[derive(Clone, Debug)]
pub struct ChainConfig {
    pub genesis: Header,
    pub checkpoints: Vec<(u64, Bytes32)>,
    pub check_proof_of_work: bool,
}

impl ChainConfig {
    pub fn mainnet() -> Self {
        let checkpoints = MAINNET_CHECKPOINTS
            .iter()
            .filter_map(|(height, hash)| hash.parse().ok().map(|hash| (*height, hash)))
            .collect();

        ChainConfig {
            genesis: Header::genesis(),
            checkpoints,
            check_proof_of_work: true,
        }
    }

    /// Chain rooted at a synthetic genesis, with no checkpoints and no
    /// proof-of-work requirement.
    pub fn regtest() -> Self {
        ChainConfig {
            genesis: Header {
                version: 1,
                bits: REGTEST_BITS,
                timestamp: 1_296_688_602,
                ..Header::default()
            },
            checkpoints: Vec::new(),
            check_proof_of_work: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mainnet_checkpoints_parse() {
        let config = ChainConfig::mainnet();
        assert_eq!(config.checkpoints.len(), MAINNET_CHECKPOINTS.len());
        assert_eq!(config.checkpoints[0], (0, config.genesis.hash()));
    }

    #[test]
    fn regtest_genesis_is_root() {
        let config = ChainConfig::regtest();
        assert!(config.genesis.prev_block_hash.is_zero());
        assert_eq!(config.genesis.height, 0);
    }
}
