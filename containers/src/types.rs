use ethereum_types::{H256, U256};
use hex::FromHex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 256-bit hash in internal (wire) byte order.
///
/// Text form follows the block explorer convention: the bytes are printed and
/// parsed in reverse order, so the genesis hash reads `000000000019d6...`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Bytes32(pub H256);

impl Bytes32 {
    pub fn zero() -> Self {
        Bytes32(H256::zero())
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Bytes32(H256::from(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_fixed_bytes()
    }

    /// Interpret the hash as a little-endian 256-bit integer.
    pub fn to_u256(&self) -> U256 {
        U256::from_little_endian(self.0.as_bytes())
    }
}

impl FromStr for Bytes32 {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes: [u8; 32] = <[u8; 32]>::from_hex(s)?;
        bytes.reverse();
        Ok(Bytes32(H256::from(bytes)))
    }
}

impl fmt::Display for Bytes32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut bytes = *self.as_bytes();
        bytes.reverse();
        write!(f, "{}", hex::encode(bytes))
    }
}

/// Difficulty target in the compact `bits` encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CompactTarget(pub u32);

impl CompactTarget {
    /// Expand into the full 256-bit target.
    ///
    /// Returns `None` for encodings a valid header never carries: a zero
    /// target, a set sign bit, or a value that does not fit in 256 bits.
    pub fn to_target(self) -> Option<U256> {
        let size = self.0 >> 24;
        let mut word = self.0 & 0x007f_ffff;
        let negative = word != 0 && (self.0 & 0x0080_0000) != 0;
        let overflow = word != 0
            && (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32));

        if negative || overflow {
            return None;
        }

        let target = if size <= 3 {
            word >>= 8 * (3 - size);
            U256::from(word)
        } else {
            U256::from(word) << (8 * (size - 3) as usize)
        };

        if target.is_zero() { None } else { Some(target) }
    }

    /// Expected number of hashes needed to meet this target.
    pub fn work(self) -> U256 {
        match self.to_target() {
            // 2^256 / (target + 1), computed without leaving 256 bits
            Some(target) => (!target / (target + U256::one())) + U256::one(),
            None => U256::zero(),
        }
    }
}
