//! # Shared extraction types
//!
//! Value types passed between the range splitter, the stream workers, the
//! block processors and the output sink.
//!
//! - [`BlockRange`] - half-open span of block numbers owned by one worker.
//! - [`FilterExpression`] - include/exclude predicates evaluated by the
//!   Firehose server.
//! - [`RawBlock`] - one streamed block, still packed in its `Any` envelope.
//! - [`Record`] - one extracted row, a flat map of field name to [`Scalar`].
//! - [`Chain`] - supported EOSIO networks and their public Firehose endpoints.

use crate::{Error, ProcessorError, Result};
use core::{fmt, str::FromStr};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Half-open span of block numbers, `[start, end)`.
///
/// The constructor enforces `start <= end`, so a `BlockRange` is never
/// inverted. Ranges are plain values: the splitter creates them and each
/// stream worker owns a copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RangeBounds")]
pub struct BlockRange {
    start: u64,
    end: u64,
}

/// Unchecked wire form of a [`BlockRange`].
#[derive(Deserialize)]
struct RangeBounds {
    start: u64,
    end: u64,
}

impl TryFrom<RangeBounds> for BlockRange {
    type Error = Error;

    fn try_from(bounds: RangeBounds) -> Result<Self> {
        Self::new(bounds.start, bounds.end)
    }
}

impl BlockRange {
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if end < start {
            return Err(Error::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub const fn start(&self) -> u64 {
        self.start
    }

    pub const fn end(&self) -> u64 {
        self.end
    }

    /// Number of blocks in the range.
    pub const fn len(&self) -> u64 {
        self.end - self.start
    }

    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub const fn contains(&self, block_num: u64) -> bool {
        self.start <= block_num && block_num < self.end
    }

    /// Last block of the range, as the inclusive `stop_block_num` the
    /// Firehose protocol expects. `None` for an empty range.
    pub const fn last_block(&self) -> Option<u64> {
        if self.is_empty() {
            None
        } else {
            Some(self.end - 1)
        }
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Include/exclude predicates applied by the Firehose server to every block.
///
/// Expressions are opaque to the engine; they are forwarded verbatim as
/// `include_filter_expr` and `exclude_filter_expr`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterExpression {
    pub include: String,
    pub exclude: String,
}

impl FilterExpression {
    /// Default exclusion: drop every action that the include expression did
    /// not tag.
    pub const DEFAULT_EXCLUDE: &'static str = r#"action == "*""#;

    /// Transfers received by any of `accounts`.
    pub fn for_accounts<S: AsRef<str>>(accounts: &[S]) -> Self {
        let list = accounts
            .iter()
            .map(|account| format!("'{}'", account.as_ref()))
            .collect::<Vec<_>>()
            .join(", ");

        Self {
            include: format!(r#"receiver in [{list}] && action == "transfer""#),
            exclude: Self::DEFAULT_EXCLUDE.to_string(),
        }
    }

    /// Replaces either expression when a non-empty custom one is given.
    pub fn with_custom(mut self, include: Option<&str>, exclude: Option<&str>) -> Self {
        if let Some(include) = include.filter(|expr| !expr.is_empty()) {
            self.include = include.to_string();
        }
        if let Some(exclude) = exclude.filter(|expr| !expr.is_empty()) {
            self.exclude = exclude.to_string();
        }
        self
    }
}

/// One block as delivered by the stream, still packed.
///
/// `block_num` is the engine's position in the sub-range when the block was
/// received. Processors only ever see a shared reference.
#[derive(Clone, Debug, PartialEq)]
pub struct RawBlock {
    block_num: u64,
    payload: prost_types::Any,
}

impl RawBlock {
    pub const fn new(block_num: u64, payload: prost_types::Any) -> Self {
        Self { block_num, payload }
    }

    pub const fn block_num(&self) -> u64 {
        self.block_num
    }

    pub fn type_url(&self) -> &str {
        &self.payload.type_url
    }

    pub const fn payload(&self) -> &prost_types::Any {
        &self.payload
    }

    /// Decodes the payload as `M`, checking the envelope's type URL first
    /// when the server filled it in.
    pub fn decode<M>(&self, type_url: &str) -> core::result::Result<M, ProcessorError>
    where
        M: prost::Message + Default,
    {
        if !self.payload.type_url.is_empty() && self.payload.type_url != type_url {
            return Err(ProcessorError::UnexpectedType {
                expected: type_url.to_string(),
                found: self.payload.type_url.clone(),
            });
        }
        Ok(M::decode(self.payload.value.as_slice())?)
    }
}

/// A single field value of a [`Record`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    UInt(u64),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<u64> for Scalar {
    fn from(value: u64) -> Self {
        Self::UInt(value)
    }
}

impl From<u32> for Scalar {
    fn from(value: u32) -> Self {
        Self::UInt(u64::from(value))
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

/// One extracted row. Serializes as a flat JSON object with sorted keys.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, Scalar>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Scalar>) -> Option<Scalar> {
        self.0.insert(field.into(), value.into())
    }

    pub fn get(&self, field: &str) -> Option<&Scalar> {
        self.0.get(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// EOSIO networks served by the public EOS Nation Firehose endpoints.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Chain {
    #[default]
    Eos,
    Wax,
    Kylin,
    Jungle4,
}

impl Chain {
    pub const ALL: [Chain; 4] = [Chain::Eos, Chain::Wax, Chain::Kylin, Chain::Jungle4];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Chain::Eos => "eos",
            Chain::Wax => "wax",
            Chain::Kylin => "kylin",
            Chain::Jungle4 => "jungle4",
        }
    }

    /// Public Firehose endpoint (`host:port`) for this chain.
    pub fn default_endpoint(&self) -> String {
        format!("{}.firehose.eosnation.io:9000", self.as_str())
    }

    /// Type URL of the blocks streamed for this chain.
    pub const fn block_type_url(&self) -> &'static str {
        crate::proto::EOSIO_BLOCK_TYPE_URL
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Chain::ALL
            .into_iter()
            .find(|chain| chain.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                Error::configuration(format!(
                    "unknown chain `{s}` (expected one of: eos, wax, kylin, jungle4)"
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_range_rejects_inverted_bounds() {
        assert!(matches!(
            BlockRange::new(10, 9),
            Err(Error::InvalidRange { start: 10, end: 9 })
        ));
        let empty = BlockRange::new(7, 7).unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.last_block(), None);
    }

    #[test]
    fn block_range_is_half_open() {
        let range = BlockRange::new(100, 105).unwrap();
        assert_eq!(range.len(), 5);
        assert!(range.contains(100));
        assert!(range.contains(104));
        assert!(!range.contains(105));
        assert_eq!(range.last_block(), Some(104));
        assert_eq!(range.to_string(), "[100, 105)");
    }

    #[test]
    fn deserialized_block_range_is_validated() {
        let range: BlockRange = serde_json::from_str(r#"{"start":5,"end":9}"#).unwrap();
        assert_eq!(range, BlockRange::new(5, 9).unwrap());

        let inverted = serde_json::from_str::<BlockRange>(r#"{"start":10,"end":5}"#);
        let err = inverted.unwrap_err().to_string();
        assert!(err.contains("Invalid block range"), "{err}");
    }

    #[test]
    fn default_filters_target_accounts() {
        let filters = FilterExpression::for_accounts(&["alice", "bob"]);
        assert_eq!(
            filters.include,
            r#"receiver in ['alice', 'bob'] && action == "transfer""#
        );
        assert_eq!(filters.exclude, r#"action == "*""#);
    }

    #[test]
    fn empty_custom_expressions_keep_defaults() {
        let filters = FilterExpression::for_accounts(&["alice"])
            .with_custom(Some(""), Some(r#"action == "onblock""#));
        assert!(filters.include.contains("'alice'"));
        assert_eq!(filters.exclude, r#"action == "onblock""#);
    }

    #[test]
    fn raw_block_rejects_foreign_type_url() {
        let block = RawBlock::new(
            5,
            prost_types::Any {
                type_url: "type.googleapis.com/sf.ethereum.type.v2.Block".into(),
                value: Vec::new(),
            },
        );
        let err = block
            .decode::<crate::proto::codec::Block>(crate::proto::EOSIO_BLOCK_TYPE_URL)
            .unwrap_err();
        assert!(matches!(err, ProcessorError::UnexpectedType { .. }));
    }

    #[test]
    fn record_serializes_flat() {
        let record = Record::new()
            .with("to", "alice")
            .with("block_num", 102_u64)
            .with("timestamp", -1_i64)
            .with("amount", "1.0000");
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"amount":"1.0000","block_num":102,"timestamp":-1,"to":"alice"}"#
        );
        let back: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn chain_parses_case_insensitively() {
        assert_eq!("WAX".parse::<Chain>().unwrap(), Chain::Wax);
        assert_eq!(
            Chain::Jungle4.default_endpoint(),
            "jungle4.firehose.eosnation.io:9000"
        );
        assert!("ethereum".parse::<Chain>().is_err());
    }
}
