//! Message envelope codec: a binary map format with string keys and UTF-8
//! bytes values, framed as `[header, body]` with each frame individually
//! run through a pluggable compressor.

use crate::error::{EngineError, EngineResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;

/// The fixed set of string labels a serialized envelope may be keyed by.
pub mod labels {
    pub const TYPE: &str = "Type";
    pub const ID: &str = "Id";
    pub const TIMESTAMP: &str = "Timestamp";
    pub const CORRELATION_ID: &str = "CorrelationId";
    pub const TRADER_ID: &str = "TraderId";
    pub const ACCOUNT_ID: &str = "AccountId";
    pub const STRATEGY_ID: &str = "StrategyId";
    pub const POSITION_ID: &str = "PositionId";
    pub const ORDER_ID: &str = "OrderId";
    pub const ORDER_ID_BROKER: &str = "OrderIdBroker";
    pub const POSITION_ID_BROKER: &str = "PositionIdBroker";
    pub const EXECUTION_ID: &str = "ExecutionId";
    pub const SYMBOL: &str = "Symbol";
    pub const ORDER_SIDE: &str = "OrderSide";
    pub const ORDER_TYPE: &str = "OrderType";
    pub const QUANTITY: &str = "Quantity";
    pub const PRICE: &str = "Price";
    pub const TIME_IN_FORCE: &str = "TimeInForce";
    pub const EXPIRE_TIME: &str = "ExpireTime";
    pub const INIT_ID: &str = "InitId";
    pub const ORDER: &str = "Order";
    pub const ENTRY: &str = "Entry";
    pub const STOP_LOSS: &str = "StopLoss";
    pub const TAKE_PROFIT: &str = "TakeProfit";
    pub const MODIFIED_QUANTITY: &str = "ModifiedQuantity";
    pub const MODIFIED_PRICE: &str = "ModifiedPrice";
    pub const CURRENCY: &str = "Currency";
    pub const CASH_BALANCE: &str = "CashBalance";
    pub const CASH_START_DAY: &str = "CashStartDay";
    pub const CASH_ACTIVITY_DAY: &str = "CashActivityDay";
    pub const MARGIN_USED_LIQUIDATION: &str = "MarginUsedLiquidation";
    pub const MARGIN_USED_MAINTENANCE: &str = "MarginUsedMaintenance";
    pub const MARGIN_RATIO: &str = "MarginRatio";
    pub const MARGIN_CALL_STATUS: &str = "MarginCallStatus";
    pub const SUBMITTED_TIME: &str = "SubmittedTime";
    pub const ACCEPTED_TIME: &str = "AcceptedTime";
    pub const REJECTED_TIME: &str = "RejectedTime";
    pub const REJECTED_REASON: &str = "RejectedReason";
    pub const REJECTED_RESPONSE_TO: &str = "RejectedResponseTo";
    pub const DENIED_REASON: &str = "DeniedReason";
    pub const INVALID_REASON: &str = "InvalidReason";
    pub const WORKING_TIME: &str = "WorkingTime";
    pub const CANCELLED_TIME: &str = "CancelledTime";
    pub const EXPIRED_TIME: &str = "ExpiredTime";
    pub const MODIFIED_TIME: &str = "ModifiedTime";
    pub const FILLED_QUANTITY: &str = "FilledQuantity";
    pub const LEAVES_QUANTITY: &str = "LeavesQuantity";
    pub const AVERAGE_PRICE: &str = "AveragePrice";
    pub const EXECUTION_TIME: &str = "ExecutionTime";
    pub const CLIENT_ID: &str = "ClientId";
    pub const SERVER_ID: &str = "ServerId";
    pub const SESSION_ID: &str = "SessionId";
    pub const AUTHENTICATION: &str = "Authentication";
    pub const QUERY: &str = "Query";
    pub const DATA: &str = "Data";
    pub const DATA_TYPE: &str = "DataType";
    pub const DATA_ENCODING: &str = "DataEncoding";
    pub const MESSAGE: &str = "Message";
    pub const RECEIVED_TYPE: &str = "ReceivedType";
    pub const LOG_LEVEL: &str = "LogLevel";
    pub const LOG_TEXT: &str = "LogText";
    pub const THREAD_ID: &str = "ThreadId";
}

/// A string-keyed map of UTF-8 byte values, the unit of serialization for
/// every envelope. Insertion order is preserved so an encoded map is
/// byte-stable across runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageMap {
    entries: IndexMap<String, Vec<u8>>,
}

impl MessageMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: &str, value: impl Into<Vec<u8>>) {
        self.entries.insert(label.to_string(), value.into());
    }

    pub fn insert_str(&mut self, label: &str, value: &str) {
        self.insert(label, value.as_bytes().to_vec());
    }

    pub fn get(&self, label: &str) -> Option<&[u8]> {
        self.entries.get(label).map(Vec::as_slice)
    }

    /// Fetch a mandatory value as UTF-8, failing with `Serialization` when
    /// the label is absent or the bytes are not valid UTF-8.
    pub fn get_str(&self, label: &str) -> EngineResult<&str> {
        let bytes = self
            .entries
            .get(label)
            .ok_or_else(|| EngineError::Serialization(format!("missing label {label}")))?;
        std::str::from_utf8(bytes)
            .map_err(|_| EngineError::Serialization(format!("label {label} is not valid UTF-8")))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encode as `count:u32` then, per entry, `key_len:u32 key value_len:u32
    /// value`, all integers big-endian.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u32(self.entries.len() as u32);
        for (key, value) in &self.entries {
            buf.put_u32(key.len() as u32);
            buf.put_slice(key.as_bytes());
            buf.put_u32(value.len() as u32);
            buf.put_slice(value);
        }
        buf.to_vec()
    }

    pub fn decode(bytes: &[u8]) -> EngineResult<Self> {
        let mut buf = Bytes::copy_from_slice(bytes);
        if buf.remaining() < 4 {
            return Err(EngineError::Serialization("map header truncated".into()));
        }
        let count = buf.get_u32();
        let mut entries = IndexMap::new();
        for _ in 0..count {
            let key = read_chunk(&mut buf)?;
            let key = String::from_utf8(key)
                .map_err(|_| EngineError::Serialization("map key is not valid UTF-8".into()))?;
            let value = read_chunk(&mut buf)?;
            entries.insert(key, value);
        }
        Ok(Self { entries })
    }
}

fn read_chunk(buf: &mut Bytes) -> EngineResult<Vec<u8>> {
    if buf.remaining() < 4 {
        return Err(EngineError::Serialization("map entry truncated".into()));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(EngineError::Serialization("map entry truncated".into()));
    }
    Ok(buf.copy_to_bytes(len).to_vec())
}

/// Per-frame compression applied to the encoded header and body
/// independently. Implementations must be inverses: `decompress(compress(x))
/// == x` for all x.
pub trait Compressor {
    fn compress(&self, frame: &[u8]) -> Vec<u8>;
    fn decompress(&self, frame: &[u8]) -> EngineResult<Vec<u8>>;
}

/// No-op compressor: frames pass through untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct BypassCompressor;

impl Compressor for BypassCompressor {
    fn compress(&self, frame: &[u8]) -> Vec<u8> {
        frame.to_vec()
    }

    fn decompress(&self, frame: &[u8]) -> EngineResult<Vec<u8>> {
        Ok(frame.to_vec())
    }
}

/// A wire message: a header map (at least `MessageType` and `Type`) plus an
/// opaque serialized body, transported as two individually compressed
/// length-prefixed frames.
#[derive(Debug, Clone, PartialEq)]
pub struct FramedMessage {
    pub header: MessageMap,
    pub body: Vec<u8>,
}

impl FramedMessage {
    pub fn encode(&self, compressor: &dyn Compressor) -> Vec<u8> {
        let header = compressor.compress(&self.header.encode());
        let body = compressor.compress(&self.body);
        let mut buf = BytesMut::with_capacity(8 + header.len() + body.len());
        buf.put_u32(header.len() as u32);
        buf.put_slice(&header);
        buf.put_u32(body.len() as u32);
        buf.put_slice(&body);
        buf.to_vec()
    }

    pub fn decode(bytes: &[u8], compressor: &dyn Compressor) -> EngineResult<Self> {
        let mut buf = Bytes::copy_from_slice(bytes);
        let header = compressor.decompress(&read_chunk(&mut buf)?)?;
        let body = compressor.decompress(&read_chunk(&mut buf)?)?;
        Ok(Self {
            header: MessageMap::decode(&header)?,
            body,
        })
    }
}

/// Render a timestamp in the canonical wire form: ISO-8601 UTC with
/// microsecond precision, `Z`-suffixed.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

pub fn parse_timestamp(s: &str) -> EngineResult<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(s)
        .map_err(|e| EngineError::Serialization(format!("invalid timestamp '{s}': {e}")))?;
    if !s.ends_with('Z') {
        return Err(EngineError::Serialization(format!("timestamp '{s}' must be UTC ('Z')")));
    }
    Ok(parsed.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn message_map_round_trips_preserving_order() {
        let mut map = MessageMap::new();
        map.insert_str(labels::TYPE, "SubmitOrder");
        map.insert_str(labels::ORDER_ID, "O-1");
        map.insert_str(labels::SYMBOL, "EUR/USD");

        let decoded = MessageMap::decode(&map.encode()).unwrap();
        assert_eq!(decoded, map);
        assert_eq!(decoded.get_str(labels::TYPE).unwrap(), "SubmitOrder");
    }

    #[test]
    fn missing_label_is_a_serialization_error() {
        let map = MessageMap::new();
        assert!(matches!(
            map.get_str(labels::ORDER_ID),
            Err(EngineError::Serialization(_))
        ));
    }

    #[test]
    fn truncated_map_is_a_serialization_error() {
        let mut map = MessageMap::new();
        map.insert_str(labels::TYPE, "Connect");
        let encoded = map.encode();
        assert!(MessageMap::decode(&encoded[..encoded.len() - 2]).is_err());
    }

    #[test]
    fn framed_message_round_trips_through_bypass_compressor() {
        let mut header = MessageMap::new();
        header.insert_str(labels::TYPE, "Connect");
        let message = FramedMessage { header, body: b"payload".to_vec() };

        let encoded = message.encode(&BypassCompressor);
        let decoded = FramedMessage::decode(&encoded, &BypassCompressor).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn timestamp_round_trips_at_microsecond_precision() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 30, 23, 59, 59).unwrap()
            + chrono::Duration::microseconds(123_456);
        let formatted = format_timestamp(ts);
        assert_eq!(formatted, "2024-06-30T23:59:59.123456Z");
        assert_eq!(parse_timestamp(&formatted).unwrap(), ts);
    }

    #[test]
    fn non_utc_timestamp_is_rejected() {
        assert!(parse_timestamp("2024-06-30T23:59:59.000000+02:00").is_err());
    }
}
