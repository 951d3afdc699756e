//! Messaging boundary: the wire envelope, the session handshake, the
//! inbound queue a live engine drains, and the bounded send-retry policy.
//!
//! The network transport itself lives outside this crate; everything here is
//! the synchronous shape the core consumes: framed `[header, body]` messages
//! (see [`codec`]), `Connect`/`Connected` and `Disconnect`/`Disconnected`
//! pairs, and a lost-connection alert registered on a [`Clock`].

pub mod codec;

use crate::clock::Clock;
use crate::error::{EngineError, EngineResult};
use crate::identifiers::{ClientId, ServerId, SessionId};
use chrono::{DateTime, Utc};
use codec::{labels, FramedMessage, MessageMap};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::warn;

/// Value of the `MessageType` header label.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MessageType {
    String,
    Request,
    Response,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::String => "String",
            MessageType::Request => "Request",
            MessageType::Response => "Response",
        }
    }

    pub fn from_str(s: &str) -> EngineResult<Self> {
        match s {
            "String" => Ok(MessageType::String),
            "Request" => Ok(MessageType::Request),
            "Response" => Ok(MessageType::Response),
            other => Err(EngineError::Serialization(format!("unknown MessageType '{other}'"))),
        }
    }
}

/// How long after sending `Connect` the lost-connection alert fires.
pub fn connection_timeout() -> chrono::Duration {
    chrono::Duration::seconds(2)
}

/// How many times a send is attempted before giving up with `Transport`.
pub const MAX_SEND_ATTEMPTS: u32 = 3;

/// Client-initiated session open request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub client_id: ClientId,
    pub authentication: String,
    pub id: String,
    pub timestamp: DateTime<Utc>,
}

/// Server reply to [`Connect`]; `correlation_id` echoes the request's `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connected {
    pub message: String,
    pub server_id: ServerId,
    pub session_id: SessionId,
    pub correlation_id: String,
    pub id: String,
    pub timestamp: DateTime<Utc>,
}

/// Client-initiated session close request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    pub client_id: ClientId,
    pub id: String,
    pub timestamp: DateTime<Utc>,
}

/// Server reply to [`Disconnect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnected {
    pub message: String,
    pub server_id: ServerId,
    pub session_id: SessionId,
    pub correlation_id: String,
    pub id: String,
    pub timestamp: DateTime<Utc>,
}

impl Connect {
    pub fn to_map(&self) -> MessageMap {
        let mut map = MessageMap::new();
        map.insert_str(labels::TYPE, "Connect");
        map.insert_str(labels::CLIENT_ID, self.client_id.as_str());
        map.insert_str(labels::AUTHENTICATION, &self.authentication);
        map.insert_str(labels::ID, &self.id);
        map.insert_str(labels::TIMESTAMP, &codec::format_timestamp(self.timestamp));
        map
    }

    pub fn from_map(map: &MessageMap) -> EngineResult<Self> {
        expect_type(map, "Connect")?;
        Ok(Self {
            client_id: ClientId::new(map.get_str(labels::CLIENT_ID)?)?,
            authentication: map.get_str(labels::AUTHENTICATION)?.to_string(),
            id: map.get_str(labels::ID)?.to_string(),
            timestamp: codec::parse_timestamp(map.get_str(labels::TIMESTAMP)?)?,
        })
    }

    /// Register the lost-connection alert: fires at `timestamp + 2s` unless
    /// the caller cancels it when `Connected` arrives.
    pub fn register_timeout_alert(&self, clock: &mut dyn Clock, handler: &str) -> EngineResult<()> {
        clock.set_time_alert(
            &format!("connect-timeout-{}", self.id),
            self.timestamp + connection_timeout(),
            Some(handler),
        )
    }
}

impl Connected {
    pub fn to_map(&self) -> MessageMap {
        let mut map = MessageMap::new();
        map.insert_str(labels::TYPE, "Connected");
        map.insert_str(labels::MESSAGE, &self.message);
        map.insert_str(labels::SERVER_ID, self.server_id.as_str());
        map.insert_str(labels::SESSION_ID, self.session_id.as_str());
        map.insert_str(labels::CORRELATION_ID, &self.correlation_id);
        map.insert_str(labels::ID, &self.id);
        map.insert_str(labels::TIMESTAMP, &codec::format_timestamp(self.timestamp));
        map
    }

    pub fn from_map(map: &MessageMap) -> EngineResult<Self> {
        expect_type(map, "Connected")?;
        Ok(Self {
            message: map.get_str(labels::MESSAGE)?.to_string(),
            server_id: ServerId::new(map.get_str(labels::SERVER_ID)?)?,
            session_id: SessionId::new(map.get_str(labels::SESSION_ID)?)?,
            correlation_id: map.get_str(labels::CORRELATION_ID)?.to_string(),
            id: map.get_str(labels::ID)?.to_string(),
            timestamp: codec::parse_timestamp(map.get_str(labels::TIMESTAMP)?)?,
        })
    }
}

impl Disconnect {
    pub fn to_map(&self) -> MessageMap {
        let mut map = MessageMap::new();
        map.insert_str(labels::TYPE, "Disconnect");
        map.insert_str(labels::CLIENT_ID, self.client_id.as_str());
        map.insert_str(labels::ID, &self.id);
        map.insert_str(labels::TIMESTAMP, &codec::format_timestamp(self.timestamp));
        map
    }

    pub fn from_map(map: &MessageMap) -> EngineResult<Self> {
        expect_type(map, "Disconnect")?;
        Ok(Self {
            client_id: ClientId::new(map.get_str(labels::CLIENT_ID)?)?,
            id: map.get_str(labels::ID)?.to_string(),
            timestamp: codec::parse_timestamp(map.get_str(labels::TIMESTAMP)?)?,
        })
    }
}

impl Disconnected {
    pub fn to_map(&self) -> MessageMap {
        let mut map = MessageMap::new();
        map.insert_str(labels::TYPE, "Disconnected");
        map.insert_str(labels::MESSAGE, &self.message);
        map.insert_str(labels::SERVER_ID, self.server_id.as_str());
        map.insert_str(labels::SESSION_ID, self.session_id.as_str());
        map.insert_str(labels::CORRELATION_ID, &self.correlation_id);
        map.insert_str(labels::ID, &self.id);
        map.insert_str(labels::TIMESTAMP, &codec::format_timestamp(self.timestamp));
        map
    }

    pub fn from_map(map: &MessageMap) -> EngineResult<Self> {
        expect_type(map, "Disconnected")?;
        Ok(Self {
            message: map.get_str(labels::MESSAGE)?.to_string(),
            server_id: ServerId::new(map.get_str(labels::SERVER_ID)?)?,
            session_id: SessionId::new(map.get_str(labels::SESSION_ID)?)?,
            correlation_id: map.get_str(labels::CORRELATION_ID)?.to_string(),
            id: map.get_str(labels::ID)?.to_string(),
            timestamp: codec::parse_timestamp(map.get_str(labels::TIMESTAMP)?)?,
        })
    }
}

fn expect_type(map: &MessageMap, expected: &str) -> EngineResult<()> {
    let actual = map.get_str(labels::TYPE)?;
    if actual != expected {
        return Err(EngineError::Serialization(format!(
            "expected Type {expected}, got {actual}"
        )));
    }
    Ok(())
}

/// In-process queue between the network thread and the engine thread. The
/// socket side pushes deserialized frames; the engine drains on its own
/// thread. Handlers must not block while holding the lock.
#[derive(Debug, Default)]
pub struct MessageQueue {
    inner: Mutex<VecDeque<FramedMessage>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: FramedMessage) {
        self.inner.lock().push_back(message);
    }

    /// Take everything queued so far, in arrival order.
    pub fn drain(&self) -> Vec<FramedMessage> {
        self.inner.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// The send half of an external messaging transport.
pub trait Transport {
    fn send(&mut self, payload: &[u8]) -> EngineResult<()>;
}

/// Send `payload`, retrying up to [`MAX_SEND_ATTEMPTS`] times on `Transport`
/// errors before giving up with the last error. Any other error kind
/// propagates immediately.
pub fn send_with_retry(transport: &mut dyn Transport, payload: &[u8]) -> EngineResult<()> {
    let mut last_error = EngineError::Transport("no send attempted".into());
    for attempt in 1..=MAX_SEND_ATTEMPTS {
        match transport.send(payload) {
            Ok(()) => return Ok(()),
            Err(err @ EngineError::Transport(_)) => {
                warn!(attempt, %err, "transport send failed");
                last_error = err;
            }
            Err(err) => return Err(err),
        }
    }
    Err(last_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::error::EngineError;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap()
    }

    #[test]
    fn connect_round_trips_through_map() {
        let connect = Connect {
            client_id: ClientId::new_unchecked("C-1"),
            authentication: "token".into(),
            id: "M-1".into(),
            timestamp: t0(),
        };
        let decoded = Connect::from_map(&connect.to_map()).unwrap();
        assert_eq!(decoded, connect);
    }

    #[test]
    fn connected_echoes_correlation_id() {
        let connected = Connected {
            message: "session open".into(),
            server_id: ServerId::new_unchecked("SRV-1"),
            session_id: SessionId::new_unchecked("SES-1"),
            correlation_id: "M-1".into(),
            id: "M-2".into(),
            timestamp: t0(),
        };
        let decoded = Connected::from_map(&connected.to_map()).unwrap();
        assert_eq!(decoded.correlation_id, "M-1");
    }

    #[test]
    fn wrong_type_label_is_a_serialization_error() {
        let connect = Connect {
            client_id: ClientId::new_unchecked("C-1"),
            authentication: "token".into(),
            id: "M-1".into(),
            timestamp: t0(),
        };
        assert!(matches!(
            Connected::from_map(&connect.to_map()),
            Err(EngineError::Serialization(_))
        ));
    }

    #[test]
    fn timeout_alert_fires_two_seconds_after_connect() {
        let connect = Connect {
            client_id: ClientId::new_unchecked("C-1"),
            authentication: "token".into(),
            id: "M-1".into(),
            timestamp: t0(),
        };
        let mut clock = TestClock::new(t0());
        connect.register_timeout_alert(&mut clock, "on_connection_timeout").unwrap();

        assert!(clock.advance_time(t0() + chrono::Duration::seconds(1)).is_empty());
        let fired = clock.advance_time(t0() + chrono::Duration::seconds(2));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].name, "connect-timeout-M-1");
        assert_eq!(fired[0].handler, "on_connection_timeout");
    }

    #[test]
    fn queue_drains_in_arrival_order() {
        let queue = MessageQueue::new();
        for id in ["M-1", "M-2"] {
            let mut header = MessageMap::new();
            header.insert_str(labels::ID, id);
            queue.push(FramedMessage { header, body: Vec::new() });
        }
        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].header.get_str(labels::ID).unwrap(), "M-1");
        assert!(queue.is_empty());
    }

    struct FlakyTransport {
        failures_left: u32,
        sends: u32,
    }

    impl Transport for FlakyTransport {
        fn send(&mut self, _payload: &[u8]) -> EngineResult<()> {
            self.sends += 1;
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(EngineError::Transport("connection reset".into()));
            }
            Ok(())
        }
    }

    #[test]
    fn send_retries_then_succeeds() {
        let mut transport = FlakyTransport { failures_left: 2, sends: 0 };
        assert!(send_with_retry(&mut transport, b"frame").is_ok());
        assert_eq!(transport.sends, 3);
    }

    #[test]
    fn send_gives_up_after_three_attempts() {
        let mut transport = FlakyTransport { failures_left: 10, sends: 0 };
        assert!(matches!(
            send_with_retry(&mut transport, b"frame"),
            Err(EngineError::Transport(_))
        ));
        assert_eq!(transport.sends, 3);
    }
}
