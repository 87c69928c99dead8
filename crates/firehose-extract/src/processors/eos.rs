//! Built-in processors for EOSIO blocks (`dfuse.eosio.codec.v1.Block`).
//!
//! When the server applied filtering, only the action traces it flagged as
//! matched are considered; otherwise every action trace of every transaction
//! is.

use chrono::DateTime;
use firehose_extract_core::{
    BlockProcessor, ProcessorError, RawBlock, Record, Records,
    proto::{
        EOSIO_BLOCK_TYPE_URL,
        codec::{ActionTrace, Block},
    },
};
use serde_json::Value;

/// Format of the `date` field, UTC.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Decodes `block`, rejecting a block that announces transaction traces but
/// carries none. That is what a payload whose trace field numbers differ from
/// ours decodes to, since unknown fields are skipped.
fn decode(block: &RawBlock) -> Result<Block, ProcessorError> {
    let decoded: Block = block.decode(EOSIO_BLOCK_TYPE_URL)?;

    let (announced, traces) = if decoded.filtering_applied {
        (
            decoded.filtered_transaction_trace_count,
            &decoded.filtered_transaction_traces,
        )
    } else {
        (
            decoded.unfiltered_transaction_trace_count,
            &decoded.unfiltered_transaction_traces,
        )
    };
    if announced > 0 && traces.is_empty() {
        return Err(ProcessorError::Malformed {
            reason: format!(
                "block #{} announces {announced} transaction traces but none decoded",
                decoded.number
            ),
        });
    }

    Ok(decoded)
}

/// Action traces of `block` that passed the server-side filter, with the
/// block time as fallback for traces that carry none.
fn matched_actions(block: Block) -> impl Iterator<Item = (ActionTrace, Option<prost_types::Timestamp>)> + Send {
    let filtered = block.filtering_applied;
    let block_time = block.header.and_then(|header| header.timestamp);
    let traces = if filtered {
        block.filtered_transaction_traces
    } else {
        block.unfiltered_transaction_traces
    };

    traces
        .into_iter()
        .flat_map(|trace| trace.action_traces)
        .filter(move |action| !filtered || action.filtering_matched)
        .map(move |action| {
            let time = action.block_time.or(block_time);
            (action, time)
        })
}

/// Adds `date` and `timestamp` (Unix seconds) for `time`.
fn with_time(record: Record, time: Option<prost_types::Timestamp>) -> Record {
    let seconds = time.map_or(0, |t| t.seconds);
    let date = DateTime::from_timestamp(seconds, 0)
        .map(|dt| dt.format(DATE_FORMAT).to_string())
        .unwrap_or_default();
    record.with("date", date).with("timestamp", seconds)
}

/// Token transfers: one record per matched `transfer` action.
///
/// Fields: `account` (the receiver), `date`, `timestamp`, `amount`, `token`,
/// `from`, `to`, `block_num`, `transaction_id`, `memo`, `contract`,
/// `action`.
///
/// Transfers whose decoded data lacks `from`, `to` or `quantity` are
/// skipped. Transfers without decoded data are skipped too; undecodable
/// data is an error.
#[derive(Clone, Copy, Debug, Default)]
pub struct Transfers;

impl Transfers {
    pub const NAME: &'static str = "transfers";

    fn record(trace: &ActionTrace, time: Option<prost_types::Timestamp>) -> Result<Option<Record>, ProcessorError> {
        let Some(action) = &trace.action else {
            return Ok(None);
        };
        if action.name != "transfer" || action.json_data.is_empty() {
            return Ok(None);
        }

        let data: Value = serde_json::from_str(&action.json_data).map_err(|e| {
            ProcessorError::Malformed {
                reason: format!(
                    "transfer data in transaction {} is not JSON: {e}",
                    trace.transaction_id
                ),
            }
        })?;

        let field = |name: &str| data.get(name).and_then(Value::as_str);
        let (Some(from), Some(to), Some(quantity)) = (field("from"), field("to"), field("quantity"))
        else {
            return Ok(None);
        };
        let (amount, token) = quantity.split_once(' ').unwrap_or((quantity, ""));

        let record = Record::new()
            .with("account", trace.receiver.as_str())
            .with("amount", amount)
            .with("token", token)
            .with("from", from)
            .with("to", to)
            .with("block_num", trace.block_num)
            .with("transaction_id", trace.transaction_id.as_str())
            .with("memo", field("memo").unwrap_or_default())
            .with("contract", action.account.as_str())
            .with("action", action.name.as_str());

        Ok(Some(with_time(record, time)))
    }
}

impl BlockProcessor for Transfers {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn block_type(&self) -> Option<&str> {
        Some(EOSIO_BLOCK_TYPE_URL)
    }

    fn process<'a>(&'a self, block: &'a RawBlock) -> Result<Records<'a>, ProcessorError> {
        let decoded = decode(block)?;
        Ok(Box::new(
            matched_actions(decoded)
                .filter_map(|(trace, time)| Self::record(&trace, time).transpose()),
        ))
    }
}

/// Every matched action: one record per action trace.
///
/// Fields: `receiver`, `contract`, `action`, `authorization`
/// (`actor@permission`, comma separated), `data` (decoded JSON, as text),
/// `block_num`, `transaction_id`, `execution_index`, `date`, `timestamp`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Actions;

impl Actions {
    pub const NAME: &'static str = "actions";

    fn record(trace: ActionTrace, time: Option<prost_types::Timestamp>) -> Option<Record> {
        let action = trace.action?;
        let authorization = action
            .authorization
            .iter()
            .map(|level| format!("{}@{}", level.actor, level.permission))
            .collect::<Vec<_>>()
            .join(",");

        let record = Record::new()
            .with("receiver", trace.receiver)
            .with("contract", action.account)
            .with("action", action.name)
            .with("authorization", authorization)
            .with("data", action.json_data)
            .with("block_num", trace.block_num)
            .with("transaction_id", trace.transaction_id)
            .with("execution_index", trace.execution_index);

        Some(with_time(record, time))
    }
}

impl BlockProcessor for Actions {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn block_type(&self) -> Option<&str> {
        Some(EOSIO_BLOCK_TYPE_URL)
    }

    fn process<'a>(&'a self, block: &'a RawBlock) -> Result<Records<'a>, ProcessorError> {
        let decoded = decode(block)?;
        Ok(Box::new(
            matched_actions(decoded).filter_map(|(trace, time)| Self::record(trace, time).map(Ok)),
        ))
    }
}

/// Block headers: exactly one record per block.
///
/// Fields: `block_num`, `id`, `producer`, `previous`, `transaction_count`,
/// `filtering_applied`, `date`, `timestamp`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Headers;

impl Headers {
    pub const NAME: &'static str = "headers";
}

impl BlockProcessor for Headers {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn block_type(&self) -> Option<&str> {
        Some(EOSIO_BLOCK_TYPE_URL)
    }

    fn process<'a>(&'a self, block: &'a RawBlock) -> Result<Records<'a>, ProcessorError> {
        let decoded = decode(block)?;
        let header = decoded.header.unwrap_or_default();
        let transaction_count = if decoded.filtering_applied {
            decoded.filtered_transaction_trace_count
        } else {
            decoded.unfiltered_transaction_trace_count
        };

        let record = Record::new()
            .with("block_num", decoded.number)
            .with("id", decoded.id)
            .with("producer", header.producer)
            .with("previous", header.previous)
            .with("transaction_count", transaction_count)
            .with("filtering_applied", decoded.filtering_applied);

        Ok(Box::new(core::iter::once(Ok(with_time(
            record,
            header.timestamp,
        )))))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use firehose_extract_core::{Scalar, proto::codec};
    use prost::Message;

    pub(crate) fn transfer(from: &str, to: &str, quantity: &str, matched: bool) -> codec::ActionTrace {
        codec::ActionTrace {
            receiver: to.to_string(),
            transaction_id: format!("tx-{from}-{to}"),
            block_num: 100,
            filtering_matched: matched,
            action: Some(codec::Action {
                account: "eosio.token".into(),
                name: "transfer".into(),
                authorization: vec![codec::PermissionLevel {
                    actor: from.into(),
                    permission: "active".into(),
                }],
                json_data: serde_json::json!({
                    "from": from,
                    "to": to,
                    "quantity": quantity,
                    "memo": "fund per-block bucket",
                })
                .to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub(crate) fn raw_block(number: u32, actions: Vec<codec::ActionTrace>, filtered: bool) -> RawBlock {
        let traces = vec![codec::TransactionTrace {
            id: "tx".into(),
            block_num: u64::from(number),
            action_traces: actions,
            ..Default::default()
        }];
        let mut block = codec::Block {
            id: format!("{number:08x}"),
            number,
            header: Some(codec::BlockHeader {
                timestamp: Some(prost_types::Timestamp {
                    seconds: 1_665_360_012,
                    nanos: 0,
                }),
                producer: "eosnationftw".into(),
                ..Default::default()
            }),
            filtering_applied: filtered,
            ..Default::default()
        };
        if filtered {
            block.filtered_transaction_trace_count = traces.len() as u32;
            block.filtered_transaction_traces = traces;
        } else {
            block.unfiltered_transaction_trace_count = traces.len() as u32;
            block.unfiltered_transaction_traces = traces;
        }

        RawBlock::new(
            u64::from(number),
            prost_types::Any {
                type_url: EOSIO_BLOCK_TYPE_URL.into(),
                value: block.encode_to_vec(),
            },
        )
    }

    fn collect(processor: &dyn BlockProcessor, block: &RawBlock) -> Vec<Record> {
        processor
            .process(block)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn transfer_record_fields() {
        let block = raw_block(100, vec![transfer("eosio", "eosio.bpay", "40.1309 EOS", true)], true);
        let records = collect(&Transfers, &block);

        assert_eq!(records.len(), 1);
        let record = &records[0];
        let text = |field: &str| match record.get(field) {
            Some(Scalar::Str(s)) => s.clone(),
            other => panic!("{field}: {other:?}"),
        };
        assert_eq!(text("account"), "eosio.bpay");
        assert_eq!(text("amount"), "40.1309");
        assert_eq!(text("token"), "EOS");
        assert_eq!(text("from"), "eosio");
        assert_eq!(text("to"), "eosio.bpay");
        assert_eq!(text("memo"), "fund per-block bucket");
        assert_eq!(text("contract"), "eosio.token");
        assert_eq!(text("action"), "transfer");
        assert_eq!(text("date"), "2022-10-10 00:00:12");
        assert_eq!(record.get("timestamp"), Some(&Scalar::Int(1_665_360_012)));
        assert_eq!(record.get("block_num"), Some(&Scalar::UInt(100)));
    }

    #[test]
    fn filtered_blocks_only_yield_matched_actions() {
        let block = raw_block(
            100,
            vec![
                transfer("alice", "bob", "1.0000 EOS", true),
                transfer("carol", "dave", "2.0000 EOS", false),
            ],
            true,
        );
        let records = collect(&Transfers, &block);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("from"), Some(&Scalar::from("alice")));
    }

    #[test]
    fn unfiltered_blocks_yield_every_action() {
        let block = raw_block(
            100,
            vec![
                transfer("alice", "bob", "1.0000 EOS", false),
                transfer("carol", "dave", "2.0000 EOS", false),
            ],
            false,
        );
        assert_eq!(collect(&Transfers, &block).len(), 2);
        assert_eq!(collect(&Actions, &block).len(), 2);
    }

    #[test]
    fn transfer_without_required_fields_is_skipped() {
        let mut incomplete = transfer("alice", "bob", "1.0000 EOS", true);
        if let Some(action) = incomplete.action.as_mut() {
            action.json_data = r#"{"from":"alice","memo":"no recipient"}"#.into();
        }
        let block = raw_block(100, vec![incomplete], true);
        assert!(collect(&Transfers, &block).is_empty());
    }

    #[test]
    fn undecodable_transfer_data_is_an_error() {
        let mut broken = transfer("alice", "bob", "1.0000 EOS", true);
        if let Some(action) = broken.action.as_mut() {
            action.json_data = "0a1b2c".into();
        }
        let block = raw_block(100, vec![broken], true);

        let result: Result<Vec<_>, _> = Transfers.process(&block).unwrap().collect();
        assert!(matches!(result, Err(ProcessorError::Malformed { .. })));
    }

    #[test]
    fn actions_join_authorization() {
        let block = raw_block(7, vec![transfer("alice", "bob", "1.0000 EOS", true)], true);
        let records = collect(&Actions, &block);
        assert_eq!(records[0].get("authorization"), Some(&Scalar::from("alice@active")));
        assert_eq!(records[0].get("receiver"), Some(&Scalar::from("bob")));
    }

    #[test]
    fn headers_emit_one_record_per_block() {
        let block = raw_block(42, Vec::new(), false);
        let records = collect(&Headers, &block);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("block_num"), Some(&Scalar::UInt(42)));
        assert_eq!(records[0].get("producer"), Some(&Scalar::from("eosnationftw")));
        assert_eq!(records[0].get("transaction_count"), Some(&Scalar::UInt(1)));
    }

    #[test]
    fn announced_traces_that_do_not_decode_are_an_error() {
        let block = codec::Block {
            number: 9,
            filtering_applied: true,
            filtered_transaction_trace_count: 3,
            ..Default::default()
        };
        let block = RawBlock::new(
            9,
            prost_types::Any {
                type_url: EOSIO_BLOCK_TYPE_URL.into(),
                value: block.encode_to_vec(),
            },
        );

        let processors: [&dyn BlockProcessor; 3] = [&Transfers, &Actions, &Headers];
        for processor in processors {
            assert!(matches!(
                processor.process(&block).err(),
                Some(ProcessorError::Malformed { .. })
            ));
        }
    }

    #[test]
    fn empty_blocks_decode() {
        let block = raw_block(3, Vec::new(), true);
        assert!(collect(&Transfers, &block).is_empty());
    }

    mod wire_field_numbers {
        use super::*;
        use prost::encoding::{WireType, encode_key, encode_varint};

        fn varint_field(tag: u32, value: u64) -> Vec<u8> {
            let mut buf = Vec::new();
            encode_key(tag, WireType::Varint, &mut buf);
            encode_varint(value, &mut buf);
            buf
        }

        fn empty_message_field(tag: u32) -> Vec<u8> {
            let mut buf = Vec::new();
            encode_key(tag, WireType::LengthDelimited, &mut buf);
            encode_varint(0, &mut buf);
            buf
        }

        #[test]
        fn block_trace_fields() {
            let unfiltered = codec::Block {
                unfiltered_transaction_traces: vec![codec::TransactionTrace::default()],
                ..Default::default()
            };
            assert_eq!(unfiltered.encode_to_vec(), empty_message_field(21));

            let filtered = codec::Block {
                filtered_transaction_traces: vec![codec::TransactionTrace::default()],
                ..Default::default()
            };
            assert_eq!(filtered.encode_to_vec(), empty_message_field(46));

            let counts = [
                (
                    codec::Block {
                        unfiltered_transaction_trace_count: 2,
                        ..Default::default()
                    },
                    23,
                ),
                (
                    codec::Block {
                        filtered_transaction_trace_count: 2,
                        ..Default::default()
                    },
                    43,
                ),
                (
                    codec::Block {
                        filtering_applied: true,
                        ..Default::default()
                    },
                    40,
                ),
            ];
            for (block, tag) in counts {
                let value = if block.filtering_applied { 1 } else { 2 };
                assert_eq!(block.encode_to_vec(), varint_field(tag, value), "field {tag}");
            }
        }

        #[test]
        fn action_trace_fields() {
            let trace = codec::ActionTrace {
                execution_index: 5,
                ..Default::default()
            };
            assert_eq!(trace.encode_to_vec(), varint_field(19, 5));

            let trace = codec::ActionTrace {
                filtering_matched: true,
                ..Default::default()
            };
            assert_eq!(trace.encode_to_vec(), varint_field(30, 1));

            let mut receiver = Vec::new();
            encode_key(11, WireType::LengthDelimited, &mut receiver);
            encode_varint(5, &mut receiver);
            receiver.extend_from_slice(b"alice");
            let trace = codec::ActionTrace {
                receiver: "alice".into(),
                ..Default::default()
            };
            assert_eq!(trace.encode_to_vec(), receiver);
        }

        #[test]
        fn transaction_trace_fields() {
            let trace = codec::TransactionTrace {
                action_traces: vec![codec::ActionTrace::default()],
                ..Default::default()
            };
            assert_eq!(trace.encode_to_vec(), empty_message_field(9));

            let trace = codec::TransactionTrace {
                index: 3,
                ..Default::default()
            };
            assert_eq!(trace.encode_to_vec(), varint_field(26, 3));
        }
    }

    #[test]
    fn foreign_payload_is_rejected() {
        let block = RawBlock::new(
            1,
            prost_types::Any {
                type_url: "type.googleapis.com/sf.ethereum.type.v2.Block".into(),
                value: Vec::new(),
            },
        );
        assert!(matches!(
            Headers.process(&block).err(),
            Some(ProcessorError::UnexpectedType { .. })
        ));
    }
}
