//! Chain data types: hashes, addresses, currency, transactions, and blocks.
//!
//! Monetary values are [`Currency`], an unsigned 128-bit count of the
//! smallest unit. No floating point is used anywhere in value accounting.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::TransactionError;

/// A 32-byte hash value.
///
/// Used for transaction IDs (BLAKE3), block IDs (double SHA-256), and as the
/// payload of [`Address`]. Serialized as a lowercase hex string.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash. Marks the empty cursor and coinbase input references.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for Hash256 {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An opaque watched identifier that outputs are paid to.
///
/// The ledger never derives addresses; it only compares them against the
/// configured watch set.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
#[serde(transparent)]
pub struct Address(pub Hash256);

impl Address {
    /// The all-zero address. Value sent here is unspendable.
    pub const VOID: Self = Self(Hash256::ZERO);

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Address {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// An amount of value in the smallest indivisible unit.
///
/// Serialized as a decimal string so that values above 2^53 survive JSON
/// round trips unchanged.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Currency(pub u128);

impl Currency {
    pub const ZERO: Self = Self(0);

    pub const fn new(value: u128) -> Self {
        Self(value)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checked addition. Returns `None` on overflow.
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    /// Checked subtraction. Returns `None` on underflow.
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    /// Divide into `parts` equal shares, discarding the remainder.
    pub fn div_floor(self, parts: u128) -> Option<Self> {
        self.0.checked_div(parts).map(Self)
    }

    /// Sum an iterator of amounts. Returns `None` on overflow.
    pub fn checked_sum<I: IntoIterator<Item = Self>>(iter: I) -> Option<Self> {
        iter.into_iter()
            .try_fold(Self::ZERO, |acc, value| acc.checked_add(value))
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Currency {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u128>().map(Self)
    }
}

impl From<u64> for Currency {
    fn from(value: u64) -> Self {
        Self(value as u128)
    }
}

impl Serialize for Currency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Currency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Identifier of a single output: the defining transaction plus the
/// output's position within it.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
pub struct OutputId {
    /// Transaction that created the output.
    pub txid: Hash256,
    /// Index of the output within the transaction.
    pub index: u64,
}

impl OutputId {
    pub fn new(txid: Hash256, index: u64) -> Self {
        Self { txid, index }
    }

    /// The null reference carried by the coinbase input.
    pub fn null() -> Self {
        Self {
            txid: Hash256::ZERO,
            index: u64::MAX,
        }
    }

    /// Check if this is the null reference (coinbase marker).
    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.index == u64::MAX
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

/// A transaction input, consuming a previously created output.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxInput {
    /// The output being spent. Null for the coinbase input.
    pub previous_output: OutputId,
    /// Opaque witness bytes. Signature checking belongs to consensus.
    #[serde(default, with = "hex_bytes")]
    pub witness: Vec<u8>,
}

/// A transaction output paying `value` to `address`.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxOutput {
    pub value: Currency,
    pub address: Address,
}

/// Protocol-level kind of a non-coinbase transaction.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default,
    bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    /// Ordinary peer-to-peer value transfer.
    #[default]
    Standard,
    /// Payout of a resolved storage contract. Its outputs mature after the
    /// payout delay, like the block subsidy.
    ContractPayout,
}

/// Where a wallet-visible transaction came from.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "snake_case")]
pub enum TransactionSource {
    /// The block subsidy paid to the miner.
    MinerPayout,
    /// An ordinary transaction.
    Transaction,
    /// A storage contract payout.
    ContractPayout,
}

impl TransactionSource {
    /// Whether outputs from this source wait out the maturity delay.
    pub fn is_delayed(&self) -> bool {
        matches!(self, Self::MinerPayout | Self::ContractPayout)
    }
}

impl fmt::Display for TransactionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MinerPayout => "miner",
            Self::Transaction => "transaction",
            Self::ContractPayout => "contract",
        };
        f.write_str(s)
    }
}

/// A transaction moving value between addresses.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    /// Protocol version.
    pub version: u64,
    /// Transaction kind.
    #[serde(default)]
    pub tx_type: TxType,
    /// Inputs consuming previous outputs.
    pub inputs: Vec<TxInput>,
    /// New outputs created by this transaction.
    pub outputs: Vec<TxOutput>,
    /// Block height before which this transaction is invalid.
    #[serde(default)]
    pub lock_time: u64,
}

impl Transaction {
    /// Compute the transaction ID (BLAKE3 hash of the canonical encoding).
    pub fn txid(&self) -> Result<Hash256, TransactionError> {
        let encoded = bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| TransactionError::Serialization(e.to_string()))?;
        Ok(Hash256(blake3::hash(&encoded).into()))
    }

    /// Check if this is a coinbase transaction (single input with null reference).
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_null()
    }

    /// Classify a transaction other than the block subsidy.
    ///
    /// Miner payouts are recognized by position, see [`Block::is_subsidy`].
    pub fn source(&self) -> TransactionSource {
        match self.tx_type {
            TxType::Standard => TransactionSource::Transaction,
            TxType::ContractPayout => TransactionSource::ContractPayout,
        }
    }
}

/// Block header.
///
/// The block ID is the double SHA-256 of a fixed little-endian byte layout.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct BlockHeader {
    /// Protocol version.
    pub version: u64,
    /// ID of the parent block. Zero for the first block after genesis.
    pub prev_hash: Hash256,
    /// BLAKE3 commitment over the block's transaction IDs.
    pub tx_root: Hash256,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Proof-of-work nonce.
    pub nonce: u64,
}

impl BlockHeader {
    /// Header size in bytes when serialized for hashing (3 u64 fields + 2 * 32-byte hashes).
    const HASH_SIZE: usize = 3 * 8 + 2 * 32;

    /// Compute the block ID (double SHA-256).
    pub fn hash(&self) -> Hash256 {
        let mut data = Vec::with_capacity(Self::HASH_SIZE);
        data.extend_from_slice(&self.version.to_le_bytes());
        data.extend_from_slice(self.prev_hash.as_bytes());
        data.extend_from_slice(self.tx_root.as_bytes());
        data.extend_from_slice(&self.timestamp.to_le_bytes());
        data.extend_from_slice(&self.nonce.to_le_bytes());
        let first = Sha256::digest(&data);
        Hash256(Sha256::digest(first).into())
    }
}

/// A complete block: header plus transactions.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Block {
    pub header: BlockHeader,
    /// Ordered transactions. The subsidy, when present, comes first.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// The block ID.
    pub fn id(&self) -> Hash256 {
        self.header.hash()
    }

    /// The subsidy transaction, if the block carries one.
    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase())
    }

    /// Whether the transaction at `index` is the block subsidy.
    ///
    /// A coinbase-shaped transaction anywhere but first is not.
    pub fn is_subsidy(&self, index: usize) -> bool {
        index == 0 && self.coinbase().is_some()
    }

    /// Commitment over an ordered list of transactions.
    pub fn compute_tx_root(transactions: &[Transaction]) -> Result<Hash256, TransactionError> {
        let mut hasher = blake3::Hasher::new();
        for tx in transactions {
            hasher.update(tx.txid()?.as_bytes());
        }
        Ok(Hash256(hasher.finalize().into()))
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
