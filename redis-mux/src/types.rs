use std::fmt;
use std::str::from_utf8;

use futures_util::future::BoxFuture;

pub use crate::errors::RedisError;

/// Library generic result type.
pub type RedisResult<T> = Result<T, RedisError>;

/// Library generic future type.
pub type RedisFuture<'a, T> = BoxFuture<'a, RedisResult<T>>;

/// Internal low-level redis value enum.
///
/// Values are produced by the transport's decoder. The core only looks into
/// them during the handshake, everything else is handed back to the caller as-is.
#[derive(PartialEq, Clone, Default)]
pub enum Value {
    /// A nil response from the server.
    #[default]
    Nil,
    /// An integer response.  Note that there are a few situations
    /// in which redis actually returns a string for an integer which
    /// is why this library generally treats integers and strings
    /// the same for all numeric responses.
    Int(i64),
    /// An arbitrary binary data, usually represents a binary-safe string.
    BulkString(Vec<u8>),
    /// A response containing an array with more data. This is generally used by redis
    /// to express nested structures.
    Array(Vec<Value>),
    /// A simple string response, without line breaks and not binary safe.
    SimpleString(String),
    /// A status response which represents the string "OK".
    Okay,
    /// Unordered key,value list from the server. Use `as_map_iter` function.
    Map(Vec<(Value, Value)>),
    /// A floating number response from the server.
    Double(f64),
    /// A boolean response from the server.
    Boolean(bool),
}

impl Value {
    /// Returns the value as a string slice, if it is a simple or a valid UTF-8 bulk string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::SimpleString(s) => Some(s.as_str()),
            Value::BulkString(bytes) => from_utf8(bytes).ok(),
            Value::Okay => Some("OK"),
            _ => None,
        }
    }

    /// Returns an iterator of `(&Value, &Value)` if `self` is compatible with a map type.
    ///
    /// RESP2 servers answer map-like commands with a flat array, so arrays of even length
    /// are iterated pairwise.
    pub fn as_map_iter(&self) -> Option<Box<dyn Iterator<Item = (&Value, &Value)> + '_>> {
        match self {
            Value::Map(items) => Some(Box::new(items.iter().map(|(k, v)| (k, v)))),
            Value::Array(items) if items.len() % 2 == 0 => Some(Box::new(
                items.chunks_exact(2).map(|pair| (&pair[0], &pair[1])),
            )),
            _ => None,
        }
    }

    /// Looks up a map entry whose key is the given string.
    pub fn map_get(&self, key: &str) -> Option<&Value> {
        self.as_map_iter()?
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Value::Nil => write!(fmt, "nil"),
            Value::Int(val) => write!(fmt, "int({val:?})"),
            Value::BulkString(ref val) => match from_utf8(val) {
                Ok(x) => write!(fmt, "bulk-string('{x:?}')"),
                Err(_) => write!(fmt, "binary-data({val:?})"),
            },
            Value::Array(ref values) => write!(fmt, "array({values:?})"),
            Value::Okay => write!(fmt, "ok"),
            Value::SimpleString(ref s) => write!(fmt, "simple-string({s:?})"),
            Value::Map(ref values) => write!(fmt, "map({values:?})"),
            Value::Double(ref d) => write!(fmt, "double({d:?})"),
            Value::Boolean(ref b) => write!(fmt, "boolean({b:?})"),
        }
    }
}

/// Enum representing the communication protocol with the server.
///
/// This enum represents the types of data that the server can send to the client,
/// and the capabilities that the client can use.
#[derive(Clone, Eq, PartialEq, Default, Debug, Copy)]
pub enum ProtocolVersion {
    /// <https://github.com/redis/redis-specifications/blob/master/protocol/RESP2.md>
    #[default]
    RESP2,
    /// <https://github.com/redis/redis-specifications/blob/master/protocol/RESP3.md>
    RESP3,
}

impl ProtocolVersion {
    /// Returns true if the protocol can use RESP3 features.
    pub fn supports_resp3(&self) -> bool {
        !matches!(self, ProtocolVersion::RESP2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_arrays_are_read_as_maps() {
        let value = Value::Array(vec![
            Value::BulkString(b"role".to_vec()),
            Value::BulkString(b"master".to_vec()),
            Value::SimpleString("proto".into()),
            Value::Int(3),
        ]);
        assert_eq!(
            value.map_get("role").and_then(Value::as_str),
            Some("master")
        );
        assert_eq!(value.map_get("proto"), Some(&Value::Int(3)));
        assert_eq!(value.map_get("version"), None);
    }

    #[test]
    fn odd_arrays_are_not_maps() {
        let value = Value::Array(vec![Value::Nil]);
        assert!(value.as_map_iter().is_none());
    }
}
