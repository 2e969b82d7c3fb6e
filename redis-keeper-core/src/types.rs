//! Command model shared by the executor and the pipeline

use bytes::Bytes;
use std::fmt;

/// One opaque command argument, carried as the bytes sent on the wire.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CommandArg(Bytes);

impl CommandArg {
    /// Raw bytes of the argument
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume the argument
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl fmt::Debug for CommandArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.0))
    }
}

impl From<Bytes> for CommandArg {
    fn from(b: Bytes) -> Self {
        Self(b)
    }
}

impl From<Vec<u8>> for CommandArg {
    fn from(b: Vec<u8>) -> Self {
        Self(Bytes::from(b))
    }
}

impl From<&[u8]> for CommandArg {
    fn from(b: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(b))
    }
}

impl From<String> for CommandArg {
    fn from(s: String) -> Self {
        Self(Bytes::from(s.into_bytes()))
    }
}

impl From<&String> for CommandArg {
    fn from(s: &String) -> Self {
        Self(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<&str> for CommandArg {
    fn from(s: &str) -> Self {
        Self(Bytes::copy_from_slice(s.as_bytes()))
    }
}

macro_rules! numeric_arg {
    ($($t:ty),*) => {
        $(
            impl From<$t> for CommandArg {
                fn from(n: $t) -> Self {
                    Self(Bytes::from(n.to_string()))
                }
            }
        )*
    };
}

numeric_arg!(i32, i64, u32, u64, usize, f64);

/// Verbs known to leave the store in the same state whether they run once
/// or twice. Anything else, including verbs queued through raw commands, is
/// treated as unsafe to re-send once the store may already have seen it.
const IDEMPOTENT: &[&str] = &[
    "DBSIZE",
    "DEL",
    "ECHO",
    "EXISTS",
    "EXPIRE",
    "EXPIREAT",
    "GET",
    "GETRANGE",
    "HDEL",
    "HEXISTS",
    "HGET",
    "HGETALL",
    "HKEYS",
    "HLEN",
    "HMGET",
    "HMSET",
    "HSCAN",
    "HSET",
    "HVALS",
    "LINDEX",
    "LLEN",
    "LRANGE",
    "LSET",
    "MGET",
    "MSET",
    "PERSIST",
    "PEXPIRE",
    "PEXPIREAT",
    "PING",
    "PSETEX",
    "PTTL",
    "SADD",
    "SCAN",
    "SCARD",
    "SET",
    "SETEX",
    "SETRANGE",
    "SISMEMBER",
    "SMEMBERS",
    "SREM",
    "SSCAN",
    "STRLEN",
    "TTL",
    "TYPE",
    "UNLINK",
    "ZADD",
    "ZCARD",
    "ZRANGE",
    "ZRANK",
    "ZREM",
    "ZSCORE",
];

/// Options that make an otherwise idempotent write conditional on, or
/// dependent on, the state left by an earlier run.
const CONDITIONAL_OPTIONS: &[&str] = &["GET", "GT", "INCR", "LT", "NX", "XX"];

/// A command name plus its ordered arguments. Immutable once built.
#[derive(Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    args: Vec<CommandArg>,
}

impl Command {
    /// Create a command without arguments
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Create a command from a name and its arguments
    pub fn with_args<I, A>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<CommandArg>,
    {
        Self {
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Append an argument
    #[must_use]
    pub fn arg(mut self, arg: impl Into<CommandArg>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Command name (verb)
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Command arguments
    #[must_use]
    pub fn args(&self) -> &[CommandArg] {
        &self.args
    }

    /// Whether sending this command twice has the same effect as sending it once
    #[must_use]
    pub fn is_idempotent(&self) -> bool {
        if !IDEMPOTENT
            .iter()
            .any(|verb| verb.eq_ignore_ascii_case(&self.name))
        {
            return false;
        }
        if self.name.eq_ignore_ascii_case("SET") || self.name.eq_ignore_ascii_case("ZADD") {
            return !self.args.iter().any(|arg| {
                CONDITIONAL_OPTIONS
                    .iter()
                    .any(|option| arg.as_bytes().eq_ignore_ascii_case(option.as_bytes()))
            });
        }
        true
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_tuple(&self.name);
        for arg in &self.args {
            list.field(arg);
        }
        list.finish()
    }
}
