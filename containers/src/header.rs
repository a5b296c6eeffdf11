use crate::{Bytes32, CompactTarget};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Size of the canonical header serialization.
pub const HEADER_SIZE: usize = 80;

/// Block header as served by the query backends.
///
/// `height` is metadata attached by the backend; it is not part of the
/// serialized form and therefore does not influence the hash.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Header {
    pub version: u32,
    pub prev_block_hash: Bytes32,
    pub merkle_root: Bytes32,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
    pub height: u64,
}

impl Header {
    /// Canonical 80-byte serialization with little-endian integer fields.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(self.prev_block_hash.as_bytes());
        out[36..68].copy_from_slice(self.merkle_root.as_bytes());
        out[68..72].copy_from_slice(&self.timestamp.to_le_bytes());
        out[72..76].copy_from_slice(&self.bits.to_le_bytes());
        out[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }

    /// Parse the canonical serialization. The height is supplied separately.
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE], height: u64) -> Self {
        let u32_at = |offset: usize| {
            u32::from_le_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ])
        };
        let hash_at = |offset: usize| {
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&bytes[offset..offset + 32]);
            Bytes32::from_bytes(hash)
        };

        Header {
            version: u32_at(0),
            prev_block_hash: hash_at(4),
            merkle_root: hash_at(36),
            timestamp: u32_at(68),
            bits: u32_at(72),
            nonce: u32_at(76),
            height,
        }
    }

    /// Double SHA-256 of the canonical serialization.
    pub fn hash(&self) -> Bytes32 {
        let first = Sha256::digest(self.to_bytes());
        let second = Sha256::digest(first);
        let mut out = [0u8; 32];
        out.copy_from_slice(&second);
        Bytes32::from_bytes(out)
    }

    pub fn target(&self) -> CompactTarget {
        CompactTarget(self.bits)
    }

    /// Mainnet genesis header.
    pub fn genesis() -> Self {
        Header {
            version: 1,
            prev_block_hash: Bytes32::zero(),
            merkle_root: Bytes32::from_bytes([
                0x3b, 0xa3, 0xed, 0xfd, 0x7a, 0x7b, 0x12, 0xb2, 0x7a, 0xc7, 0x2c, 0x3e, 0x67,
                0x76, 0x8f, 0x61, 0x7f, 0xc8, 0x1b, 0xc3, 0x88, 0x8a, 0x51, 0x32, 0x3a, 0x9f,
                0xb8, 0xaa, 0x4b, 0x1e, 0x5e, 0x4a,
            ]),
            timestamp: 1_231_006_505,
            bits: 0x1d00ffff,
            nonce: 2_083_236_893,
            height: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_genesis_hash() {
        let expected: Bytes32 = "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
            .parse()
            .unwrap();
        assert_eq!(Header::genesis().hash(), expected);
    }

    #[test]
    fn test_genesis_merkle_root_text() {
        assert_eq!(
            Header::genesis().merkle_root.to_string(),
            "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"
        );
    }

    #[test]
    fn test_height_does_not_affect_hash() {
        let mut header = Header::genesis();
        let hash = header.hash();
        header.height = 42;
        assert_eq!(header.hash(), hash);
    }

    #[test]
    fn test_serialization_layout() {
        let header = Header {
            version: 536870912,
            prev_block_hash: "0000000000000000003627505d1d859d86dbb60d2fabc03d185ff2711b1cd665"
                .parse()
                .unwrap(),
            merkle_root: "153ce6fde6d9e749a87177f3f8fbe81338e5d580f3c1e289a8e53ea9d6ae0ca6"
                .parse()
                .unwrap(),
            timestamp: 1530083119,
            bits: 389508950,
            nonce: 1167100690,
            height: 529438,
        };

        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x00, 0x20]);
        assert_eq!(bytes[4], 0x65);
        assert_eq!(Header::from_bytes(&bytes, 529438), header);
    }

    #[test]
    fn test_serde_json_keeps_height() {
        let header = Header::genesis();
        let json = serde_json::to_string(&header).unwrap();
        let decoded: Header = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, header);
    }
}
