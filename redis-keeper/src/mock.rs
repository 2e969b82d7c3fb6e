//! Scripted in-memory transport for unit tests
//!
//! [`MockConnector`] hands out connections to a shared [`MockStore`] that
//! understands the subset of commands the client helpers emit. Faults can be
//! queued per connection and existing connections can be severed to
//! simulate a dead server.

use crate::client::Client;
use crate::connection::{Connection, ConnectionFactory};
use async_trait::async_trait;
use bytes::Bytes;
use redis_keeper_core::{
    config::ConnectionConfig,
    error::{RedisError, RedisResult},
    types::Command,
    value::RespValue,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::Span;

/// Failure injected into one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    None,
    /// Flush fails before anything reaches the store
    FailFlush,
    /// Flush delivers the batch, then reports a broken pipe
    FailAfterDelivery,
    /// Receive fails once this many replies have been read
    DropAfterReplies(usize),
    /// The first receive never completes; later receives are served normally
    StallFirstReply,
}

enum Stored {
    Str(Bytes),
    List(VecDeque<Bytes>),
    Hash(BTreeMap<Bytes, Bytes>),
    Set(BTreeSet<Bytes>),
}

#[derive(Default)]
struct StoreData {
    entries: HashMap<String, Stored>,
    ttl: HashMap<String, i64>,
}

#[derive(Default)]
pub(crate) struct MockStore {
    data: Mutex<StoreData>,
    log: Mutex<Vec<String>>,
    overrides: Mutex<HashMap<String, RespValue>>,
}

fn text(b: &Bytes) -> String {
    String::from_utf8_lossy(b).into_owned()
}

fn bulk(b: &Bytes) -> RespValue {
    RespValue::BulkString(b.clone())
}

fn ok() -> RespValue {
    RespValue::SimpleString("OK".to_string())
}

fn wrong_type() -> RespValue {
    RespValue::Error(
        "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
    )
}

fn not_integer() -> RespValue {
    RespValue::Error("ERR value is not an integer or out of range".to_string())
}

fn arity(verb: &str) -> RespValue {
    RespValue::Error(format!(
        "ERR wrong number of arguments for '{}' command",
        verb.to_ascii_lowercase()
    ))
}

fn glob_match(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => pattern == key,
    }
}

impl MockStore {
    /// Number of times a verb reached the store
    pub(crate) fn count(&self, verb: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v.eq_ignore_ascii_case(verb))
            .count()
    }

    /// Reply with `reply` whenever `verb` is received
    pub(crate) fn override_reply(&self, verb: &str, reply: RespValue) {
        self.overrides
            .lock()
            .unwrap()
            .insert(verb.to_ascii_uppercase(), reply);
    }

    pub(crate) fn get(&self, key: &str) -> Option<Bytes> {
        match self.data.lock().unwrap().entries.get(key) {
            Some(Stored::Str(v)) => Some(v.clone()),
            _ => None,
        }
    }

    pub(crate) fn set(&self, key: &str, value: &str) {
        self.data
            .lock()
            .unwrap()
            .entries
            .insert(key.to_string(), Stored::Str(Bytes::from(value.to_string())));
    }

    fn apply(&self, command: &Command) -> RespValue {
        let verb = command.name().to_ascii_uppercase();
        self.log.lock().unwrap().push(verb.clone());
        if let Some(reply) = self.overrides.lock().unwrap().get(&verb) {
            return reply.clone();
        }

        let args: Vec<Bytes> = command
            .args()
            .iter()
            .map(|a| Bytes::copy_from_slice(a.as_bytes()))
            .collect();
        let mut data = self.data.lock().unwrap();
        let data = &mut *data;

        let min_args = match verb.as_str() {
            "PING" | "SCAN" => 0,
            "GET" | "DEL" | "EXISTS" | "MGET" | "INCR" | "DECR" | "TTL" | "LPOP" | "RPOP"
            | "LLEN" | "SMEMBERS" | "ECHO" => 1,
            "SET" | "APPEND" | "INCRBY" | "DECRBY" | "EXPIRE" | "HGET" | "HMGET" | "HDEL"
            | "LPUSH" | "RPUSH" | "SADD" | "SREM" | "MSET" => 2,
            "SETEX" | "HSET" | "HMSET" | "LRANGE" => 3,
            _ => {
                return RespValue::Error(format!(
                    "ERR unknown command '{}'",
                    command.name()
                ))
            }
        };
        if args.len() < min_args {
            return arity(&verb);
        }

        match verb.as_str() {
            "PING" => match args.first() {
                Some(msg) => bulk(msg),
                None => RespValue::SimpleString("PONG".to_string()),
            },
            "ECHO" => bulk(&args[0]),
            "SET" => {
                let key = text(&args[0]);
                let mut nx = false;
                let mut ex = None;
                let mut rest = args[2..].iter();
                while let Some(opt) = rest.next() {
                    match text(opt).to_ascii_uppercase().as_str() {
                        "NX" => nx = true,
                        "EX" => match rest.next().and_then(|s| text(s).parse::<i64>().ok()) {
                            Some(secs) => ex = Some(secs),
                            None => return not_integer(),
                        },
                        _ => return RespValue::Error("ERR syntax error".to_string()),
                    }
                }
                if nx && data.entries.contains_key(&key) {
                    return RespValue::Null;
                }
                data.entries.insert(key.clone(), Stored::Str(args[1].clone()));
                match ex {
                    Some(secs) => data.ttl.insert(key, secs),
                    None => data.ttl.remove(&key),
                };
                ok()
            }
            "SETEX" => {
                let key = text(&args[0]);
                let Ok(secs) = text(&args[1]).parse::<i64>() else {
                    return not_integer();
                };
                data.entries.insert(key.clone(), Stored::Str(args[2].clone()));
                data.ttl.insert(key, secs);
                ok()
            }
            "GET" => match data.entries.get(&text(&args[0])) {
                Some(Stored::Str(v)) => bulk(v),
                Some(_) => wrong_type(),
                None => RespValue::Null,
            },
            "DEL" => {
                let mut removed = 0;
                for key in &args {
                    let key = text(key);
                    data.ttl.remove(&key);
                    if data.entries.remove(&key).is_some() {
                        removed += 1;
                    }
                }
                RespValue::Integer(removed)
            }
            "EXISTS" => RespValue::Integer(
                args.iter()
                    .filter(|k| data.entries.contains_key(&text(k)))
                    .count() as i64,
            ),
            "MSET" => {
                if args.len() % 2 != 0 {
                    return arity(&verb);
                }
                for pair in args.chunks(2) {
                    data.entries
                        .insert(text(&pair[0]), Stored::Str(pair[1].clone()));
                }
                ok()
            }
            "MGET" => RespValue::Array(
                args.iter()
                    .map(|k| match data.entries.get(&text(k)) {
                        Some(Stored::Str(v)) => bulk(v),
                        _ => RespValue::Null,
                    })
                    .collect(),
            ),
            "APPEND" => {
                let key = text(&args[0]);
                let current = match data.entries.get(&key) {
                    Some(Stored::Str(v)) => v.to_vec(),
                    Some(_) => return wrong_type(),
                    None => Vec::new(),
                };
                let mut next = current;
                next.extend_from_slice(&args[1]);
                let len = next.len() as i64;
                data.entries.insert(key, Stored::Str(Bytes::from(next)));
                RespValue::Integer(len)
            }
            "INCR" | "DECR" | "INCRBY" | "DECRBY" => {
                let key = text(&args[0]);
                let delta = match verb.as_str() {
                    "INCR" => 1,
                    "DECR" => -1,
                    _ => match text(&args[1]).parse::<i64>() {
                        Ok(n) if verb == "INCRBY" => n,
                        Ok(n) => -n,
                        Err(_) => return not_integer(),
                    },
                };
                let current = match data.entries.get(&key) {
                    Some(Stored::Str(v)) => match text(v).parse::<i64>() {
                        Ok(n) => n,
                        Err(_) => return not_integer(),
                    },
                    Some(_) => return wrong_type(),
                    None => 0,
                };
                let next = current + delta;
                data.entries
                    .insert(key, Stored::Str(Bytes::from(next.to_string())));
                RespValue::Integer(next)
            }
            "EXPIRE" => {
                let key = text(&args[0]);
                let Ok(secs) = text(&args[1]).parse::<i64>() else {
                    return not_integer();
                };
                if data.entries.contains_key(&key) {
                    data.ttl.insert(key, secs);
                    RespValue::Integer(1)
                } else {
                    RespValue::Integer(0)
                }
            }
            "TTL" => {
                let key = text(&args[0]);
                if !data.entries.contains_key(&key) {
                    RespValue::Integer(-2)
                } else {
                    RespValue::Integer(data.ttl.get(&key).copied().unwrap_or(-1))
                }
            }
            "HSET" | "HMSET" => {
                if args.len() % 2 != 1 {
                    return arity(&verb);
                }
                let hash = match data
                    .entries
                    .entry(text(&args[0]))
                    .or_insert_with(|| Stored::Hash(BTreeMap::new()))
                {
                    Stored::Hash(h) => h,
                    _ => return wrong_type(),
                };
                let mut added = 0;
                for pair in args[1..].chunks(2) {
                    if hash.insert(pair[0].clone(), pair[1].clone()).is_none() {
                        added += 1;
                    }
                }
                if verb == "HSET" {
                    RespValue::Integer(added)
                } else {
                    ok()
                }
            }
            "HGET" => match data.entries.get(&text(&args[0])) {
                Some(Stored::Hash(h)) => h.get(&args[1]).map_or(RespValue::Null, bulk),
                Some(_) => wrong_type(),
                None => RespValue::Null,
            },
            "HMGET" => match data.entries.get(&text(&args[0])) {
                Some(Stored::Hash(h)) => RespValue::Array(
                    args[1..]
                        .iter()
                        .map(|f| h.get(f).map_or(RespValue::Null, bulk))
                        .collect(),
                ),
                Some(_) => wrong_type(),
                None => RespValue::Array(vec![RespValue::Null; args.len() - 1]),
            },
            "HDEL" => match data.entries.get_mut(&text(&args[0])) {
                Some(Stored::Hash(h)) => RespValue::Integer(
                    args[1..].iter().filter(|f| h.remove(*f).is_some()).count() as i64,
                ),
                Some(_) => wrong_type(),
                None => RespValue::Integer(0),
            },
            "LPUSH" | "RPUSH" => {
                let list = match data
                    .entries
                    .entry(text(&args[0]))
                    .or_insert_with(|| Stored::List(VecDeque::new()))
                {
                    Stored::List(l) => l,
                    _ => return wrong_type(),
                };
                for value in &args[1..] {
                    if verb == "LPUSH" {
                        list.push_front(value.clone());
                    } else {
                        list.push_back(value.clone());
                    }
                }
                RespValue::Integer(list.len() as i64)
            }
            "LPOP" | "RPOP" => {
                let key = text(&args[0]);
                let (popped, now_empty) = match data.entries.get_mut(&key) {
                    Some(Stored::List(l)) => {
                        let popped = if verb == "LPOP" {
                            l.pop_front()
                        } else {
                            l.pop_back()
                        };
                        (popped, l.is_empty())
                    }
                    Some(_) => return wrong_type(),
                    None => (None, false),
                };
                if now_empty {
                    data.entries.remove(&key);
                }
                popped.as_ref().map_or(RespValue::Null, bulk)
            }
            "LLEN" => match data.entries.get(&text(&args[0])) {
                Some(Stored::List(l)) => RespValue::Integer(l.len() as i64),
                Some(_) => wrong_type(),
                None => RespValue::Integer(0),
            },
            "LRANGE" => {
                let (Ok(start), Ok(stop)) =
                    (text(&args[1]).parse::<i64>(), text(&args[2]).parse::<i64>())
                else {
                    return not_integer();
                };
                match data.entries.get(&text(&args[0])) {
                    Some(Stored::List(l)) => {
                        let len = l.len() as i64;
                        let norm = |i: i64| if i < 0 { (len + i).max(0) } else { i };
                        let (start, stop) = (norm(start), norm(stop).min(len - 1));
                        if start > stop {
                            return RespValue::Array(Vec::new());
                        }
                        RespValue::Array(
                            l.iter()
                                .skip(start as usize)
                                .take((stop - start + 1) as usize)
                                .map(bulk)
                                .collect(),
                        )
                    }
                    Some(_) => wrong_type(),
                    None => RespValue::Array(Vec::new()),
                }
            }
            "SADD" => {
                let set = match data
                    .entries
                    .entry(text(&args[0]))
                    .or_insert_with(|| Stored::Set(BTreeSet::new()))
                {
                    Stored::Set(s) => s,
                    _ => return wrong_type(),
                };
                RespValue::Integer(args[1..].iter().filter(|m| set.insert((*m).clone())).count() as i64)
            }
            "SREM" => match data.entries.get_mut(&text(&args[0])) {
                Some(Stored::Set(s)) => RespValue::Integer(
                    args[1..].iter().filter(|m| s.remove(*m)).count() as i64,
                ),
                Some(_) => wrong_type(),
                None => RespValue::Integer(0),
            },
            "SMEMBERS" => match data.entries.get(&text(&args[0])) {
                Some(Stored::Set(s)) => RespValue::Array(s.iter().map(bulk).collect()),
                Some(_) => wrong_type(),
                None => RespValue::Array(Vec::new()),
            },
            "SCAN" => {
                let mut pattern = "*".to_string();
                let mut opts = args.iter().skip(1);
                while let Some(opt) = opts.next() {
                    let value = opts.next().map(text).unwrap_or_default();
                    if text(opt).eq_ignore_ascii_case("MATCH") {
                        pattern = value;
                    }
                }
                let mut keys: Vec<&String> = data
                    .entries
                    .keys()
                    .filter(|k| glob_match(&pattern, k))
                    .collect();
                keys.sort();
                RespValue::Array(vec![
                    RespValue::BulkString(Bytes::from_static(b"0")),
                    RespValue::Array(
                        keys.into_iter()
                            .map(|k| RespValue::BulkString(Bytes::from(k.clone())))
                            .collect(),
                    ),
                ])
            }
            _ => unreachable!("arity table covers every verb"),
        }
    }
}

pub(crate) struct MockConnector {
    store: Arc<MockStore>,
    connects: AtomicUsize,
    live: Arc<AtomicUsize>,
    faults: Mutex<VecDeque<Fault>>,
    failing_connects: AtomicUsize,
    hang: AtomicBool,
    severed: Mutex<Vec<Arc<AtomicBool>>>,
}

impl MockConnector {
    pub(crate) fn new() -> Self {
        Self {
            store: Arc::new(MockStore::default()),
            connects: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
            faults: Mutex::new(VecDeque::new()),
            failing_connects: AtomicUsize::new(0),
            hang: AtomicBool::new(false),
            severed: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn store(&self) -> &MockStore {
        &self.store
    }

    /// Connections opened so far
    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Connection objects not yet dropped
    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// PING commands that reached the store
    pub(crate) fn pings(&self) -> usize {
        self.store.count("PING")
    }

    /// Apply `fault` to the next connection opened
    pub(crate) fn push_fault(&self, fault: Fault) {
        self.faults.lock().unwrap().push_back(fault);
    }

    pub(crate) fn fail_next_connects(&self, n: usize) {
        self.failing_connects.store(n, Ordering::SeqCst);
    }

    pub(crate) fn set_hang_connects(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    /// Break every connection opened so far; their next flush fails
    pub(crate) fn sever_all(&self) {
        for flag in self.severed.lock().unwrap().iter() {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl ConnectionFactory for MockConnector {
    async fn connect(&self) -> RedisResult<Box<dyn Connection>> {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(RedisError::Connection("connection refused".to_string()));
        }

        self.connects.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        let severed = Arc::new(AtomicBool::new(false));
        self.severed.lock().unwrap().push(severed.clone());
        let fault = self.faults.lock().unwrap().pop_front().unwrap_or(Fault::None);

        Ok(Box::new(MockConnection {
            store: self.store.clone(),
            live: self.live.clone(),
            severed,
            fault,
            pending: Vec::new(),
            replies: VecDeque::new(),
            received: 0,
            open: true,
        }))
    }

    fn endpoint(&self) -> String {
        "mock:6379".to_string()
    }
}

struct MockConnection {
    store: Arc<MockStore>,
    live: Arc<AtomicUsize>,
    severed: Arc<AtomicBool>,
    fault: Fault,
    pending: Vec<Command>,
    replies: VecDeque<RespValue>,
    received: usize,
    open: bool,
}

impl MockConnection {
    fn broken(&mut self, kind: io::ErrorKind) -> RedisError {
        self.open = false;
        self.pending.clear();
        RedisError::Io(io::Error::new(kind, "mock transport failure"))
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn send(&mut self, command: &Command) -> RedisResult<()> {
        if !self.open {
            return Err(RedisError::Connection("Connection is closed".to_string()));
        }
        self.pending.push(command.clone());
        Ok(())
    }

    async fn flush(&mut self) -> RedisResult<()> {
        if !self.open {
            return Err(RedisError::Connection("Connection is closed".to_string()));
        }
        if self.severed.load(Ordering::SeqCst) || self.fault == Fault::FailFlush {
            return Err(self.broken(io::ErrorKind::BrokenPipe));
        }
        for command in std::mem::take(&mut self.pending) {
            let reply = self.store.apply(&command);
            self.replies.push_back(reply);
        }
        if self.fault == Fault::FailAfterDelivery {
            return Err(self.broken(io::ErrorKind::BrokenPipe));
        }
        Ok(())
    }

    async fn receive(&mut self) -> RedisResult<RespValue> {
        if !self.open {
            return Err(RedisError::Connection("Connection is closed".to_string()));
        }
        if self.fault == Fault::StallFirstReply {
            self.fault = Fault::None;
            std::future::pending::<()>().await;
        }
        if let Fault::DropAfterReplies(n) = self.fault {
            if self.received >= n {
                return Err(self.broken(io::ErrorKind::ConnectionReset));
            }
        }
        let reply = self
            .replies
            .pop_front()
            .ok_or_else(|| RedisError::Connection("no reply pending".to_string()))?;
        self.received += 1;
        Ok(reply)
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        self.open = false;
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A client over a fresh mock store
pub(crate) async fn client(config: ConnectionConfig) -> (Client, Arc<MockConnector>) {
    let connector = Arc::new(MockConnector::new());
    let client = Client::new_with(config, connector.clone(), Span::none())
        .await
        .unwrap();
    (client, connector)
}
