/// Header acceptance rules.
///
/// The synchronizer only checks linkage itself; whether a header is acceptable
/// for its height is delegated to a `HeaderValidator`. Implementations must be
/// deterministic in the header bytes and height.
use std::collections::BTreeMap;

use containers::{Bytes32, Header};
use tracing::debug;

use crate::config::ChainConfig;

pub trait HeaderValidator: Send + Sync {
    fn check_header(&self, header: &Header) -> bool;
}

/// Accepts every header. Linkage is still enforced by the chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl HeaderValidator for AcceptAll {
    fn check_header(&self, _header: &Header) -> bool {
        true
    }
}

/// Checkpoint and difficulty predicate.
///
/// A header is accepted when its compact target decodes, its hash equals the
/// checkpoint registered for its height (if any), and, with proof-of-work
/// checking enabled, its hash does not exceed the target.
#[derive(Debug, Clone, Default)]
pub struct CheckpointValidator {
    checkpoints: BTreeMap<u64, Bytes32>,
    check_proof_of_work: bool,
}

impl CheckpointValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ChainConfig) -> Self {
        Self {
            checkpoints: config.checkpoints.iter().copied().collect(),
            check_proof_of_work: config.check_proof_of_work,
        }
    }

    pub fn with_checkpoint(mut self, height: u64, hash: Bytes32) -> Self {
        self.checkpoints.insert(height, hash);
        self
    }

    pub fn with_proof_of_work(mut self, enabled: bool) -> Self {
        self.check_proof_of_work = enabled;
        self
    }
}

impl HeaderValidator for CheckpointValidator {
    fn check_header(&self, header: &Header) -> bool {
        let Some(target) = header.target().to_target() else {
            debug!(height = header.height, bits = header.bits, "Malformed compact target");
            return false;
        };

        let hash = header.hash();

        if let Some(expected) = self.checkpoints.get(&header.height) {
            if *expected != hash {
                debug!(
                    height = header.height,
                    hash = %hash,
                    expected = %expected,
                    "Header contradicts checkpoint"
                );
                return false;
            }
        }

        if self.check_proof_of_work && hash.to_u256() > target {
            debug!(height = header.height, hash = %hash, "Insufficient proof of work");
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::REGTEST_BITS;

    #[test]
    fn genesis_passes_mainnet_rules() {
        let validator = CheckpointValidator::from_config(&ChainConfig::mainnet());
        assert!(validator.check_header(&Header::genesis()));
    }

    #[test]
    fn tampered_genesis_fails_proof_of_work() {
        let validator = CheckpointValidator::new().with_proof_of_work(true);
        let mut header = Header::genesis();
        header.nonce += 1;
        assert!(!validator.check_header(&header));
    }

    #[test]
    fn checkpoint_mismatch_is_rejected() {
        let validator = CheckpointValidator::new().with_checkpoint(5, Bytes32::zero());
        let header = Header {
            bits: REGTEST_BITS,
            height: 5,
            ..Header::default()
        };
        assert!(!validator.check_header(&header));

        let other_height = Header { height: 6, ..header };
        assert!(validator.check_header(&other_height));
    }

    #[test]
    fn malformed_bits_are_rejected() {
        let validator = CheckpointValidator::new();
        let header = Header {
            bits: 0,
            ..Header::default()
        };
        assert!(!validator.check_header(&header));
        assert!(AcceptAll.check_header(&header));
    }
}
