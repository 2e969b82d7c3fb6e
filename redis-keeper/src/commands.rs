//! Typed command helpers
//!
//! Thin wrappers over [`Client::execute_command`] that build the argument
//! list and convert the reply. An absent value is reported as
//! [`RedisError::Nil`]; use [`Client::is_nil`] to branch on it.
//!
//! The [`Pipeline`] helpers only queue commands; replies are read from the
//! [`PipelineResult`](crate::pipeline::PipelineResult) of `exec`.

use crate::client::Client;
use crate::pipeline::Pipeline;
use redis_keeper_core::{
    error::{RedisError, RedisResult},
    types::{Command, CommandArg},
    value::RespValue,
};

fn expect_ok(reply: RespValue) -> RedisResult<()> {
    if reply.is_ok() {
        Ok(())
    } else {
        Err(RedisError::NotOk(format!("{reply:?}")))
    }
}

fn with_key<I, A>(name: &str, key: impl Into<CommandArg>, rest: I) -> Command
where
    I: IntoIterator<Item = A>,
    A: Into<CommandArg>,
{
    rest.into_iter()
        .fold(Command::new(name).arg(key), |cmd, arg| cmd.arg(arg))
}

fn with_pairs<I, F, V>(name: &str, key: impl Into<CommandArg>, pairs: I) -> Command
where
    I: IntoIterator<Item = (F, V)>,
    F: Into<CommandArg>,
    V: Into<CommandArg>,
{
    pairs
        .into_iter()
        .fold(Command::new(name).arg(key), |cmd, (field, value)| {
            cmd.arg(field).arg(value)
        })
}

// String commands
impl Client {
    /// SET a value.
    ///
    /// # Errors
    ///
    /// [`RedisError::NotOk`] if the server does not acknowledge with `OK`.
    pub async fn set(
        &self,
        key: impl Into<CommandArg>,
        value: impl Into<CommandArg>,
    ) -> RedisResult<()> {
        expect_ok(
            self.execute_command(&Command::new("SET").arg(key).arg(value))
                .await?,
        )
    }

    /// SET with NX and EX: store the value only if the key does not exist,
    /// expiring after `expire_secs`. Returns whether the value was stored.
    ///
    /// # Errors
    ///
    /// Any execution error.
    pub async fn set_nx(
        &self,
        key: impl Into<CommandArg>,
        value: impl Into<CommandArg>,
        expire_secs: i64,
    ) -> RedisResult<bool> {
        let reply = self
            .execute_command(
                &Command::new("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("EX")
                    .arg(expire_secs),
            )
            .await?;
        Ok(reply.is_ok())
    }

    /// SETEX: store a value expiring after `expire_secs`
    ///
    /// # Errors
    ///
    /// Any execution error.
    pub async fn set_ex(
        &self,
        key: impl Into<CommandArg>,
        value: impl Into<CommandArg>,
        expire_secs: i64,
    ) -> RedisResult<String> {
        self.execute_command(&Command::new("SETEX").arg(key).arg(expire_secs).arg(value))
            .await?
            .as_string()
    }

    /// GET a value.
    ///
    /// # Errors
    ///
    /// [`RedisError::Nil`] if the key does not exist.
    pub async fn get(&self, key: impl Into<CommandArg>) -> RedisResult<String> {
        self.execute_command(&Command::new("GET").arg(key))
            .await?
            .as_string()
    }

    /// MSET key/value pairs.
    ///
    /// # Errors
    ///
    /// [`RedisError::NotOk`] if the server does not acknowledge with `OK`.
    pub async fn mset<I, K, V>(&self, pairs: I) -> RedisResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<CommandArg>,
        V: Into<CommandArg>,
    {
        let command = pairs
            .into_iter()
            .fold(Command::new("MSET"), |cmd, (k, v)| cmd.arg(k).arg(v));
        expect_ok(self.execute_command(&command).await?)
    }

    /// MGET keys. Missing keys come back as empty strings.
    ///
    /// # Errors
    ///
    /// Any execution error.
    pub async fn mget<I, K>(&self, keys: I) -> RedisResult<Vec<String>>
    where
        I: IntoIterator<Item = K>,
        K: Into<CommandArg>,
    {
        self.execute_command(&Command::with_args("MGET", keys))
            .await?
            .as_strings()
    }

    /// APPEND to a string, returning its new length
    ///
    /// # Errors
    ///
    /// Any execution error.
    pub async fn append(
        &self,
        key: impl Into<CommandArg>,
        value: impl Into<CommandArg>,
    ) -> RedisResult<i64> {
        self.execute_command(&Command::new("APPEND").arg(key).arg(value))
            .await?
            .as_int()
    }

    /// INCR
    ///
    /// # Errors
    ///
    /// [`RedisError::Server`] if the value is not an integer.
    pub async fn incr(&self, key: impl Into<CommandArg>) -> RedisResult<i64> {
        self.execute_command(&Command::new("INCR").arg(key))
            .await?
            .as_int()
    }

    /// INCRBY
    ///
    /// # Errors
    ///
    /// [`RedisError::Server`] if the value is not an integer.
    pub async fn incr_by(&self, key: impl Into<CommandArg>, increment: i64) -> RedisResult<i64> {
        self.execute_command(&Command::new("INCRBY").arg(key).arg(increment))
            .await?
            .as_int()
    }

    /// DECR
    ///
    /// # Errors
    ///
    /// [`RedisError::Server`] if the value is not an integer.
    pub async fn decr(&self, key: impl Into<CommandArg>) -> RedisResult<i64> {
        self.execute_command(&Command::new("DECR").arg(key))
            .await?
            .as_int()
    }

    /// DECRBY
    ///
    /// # Errors
    ///
    /// [`RedisError::Server`] if the value is not an integer.
    pub async fn decr_by(&self, key: impl Into<CommandArg>, decrement: i64) -> RedisResult<i64> {
        self.execute_command(&Command::new("DECRBY").arg(key).arg(decrement))
            .await?
            .as_int()
    }
}

// Key commands
impl Client {
    /// DEL keys, returning how many existed
    ///
    /// # Errors
    ///
    /// Any execution error.
    pub async fn delete<I, K>(&self, keys: I) -> RedisResult<i64>
    where
        I: IntoIterator<Item = K>,
        K: Into<CommandArg>,
    {
        self.execute_command(&Command::with_args("DEL", keys))
            .await?
            .as_int()
    }

    /// EXISTS
    ///
    /// # Errors
    ///
    /// Any execution error.
    pub async fn exists(&self, key: impl Into<CommandArg>) -> RedisResult<bool> {
        self.execute_command(&Command::new("EXISTS").arg(key))
            .await?
            .as_bool()
    }

    /// EXPIRE a key after `expire_secs`. Returns `false` if the key does not
    /// exist.
    ///
    /// # Errors
    ///
    /// Any execution error.
    pub async fn expire(&self, key: impl Into<CommandArg>, expire_secs: i64) -> RedisResult<bool> {
        self.execute_command(&Command::new("EXPIRE").arg(key).arg(expire_secs))
            .await?
            .as_bool()
    }

    /// TTL in seconds: -2 when the key does not exist, -1 when it has no
    /// expiry.
    ///
    /// # Errors
    ///
    /// Any execution error.
    pub async fn ttl(&self, key: impl Into<CommandArg>) -> RedisResult<i64> {
        self.execute_command(&Command::new("TTL").arg(key))
            .await?
            .as_int()
    }

    /// One SCAN step. Returns the keys found and the cursor to continue
    /// from (0 when the iteration is complete).
    ///
    /// # Errors
    ///
    /// [`RedisError::UnexpectedResponse`] if the reply is not a
    /// cursor/keys pair.
    pub async fn scan(
        &self,
        pattern: impl Into<CommandArg>,
        cursor: u64,
        count: i64,
    ) -> RedisResult<(Vec<String>, u64)> {
        let reply = self
            .execute_command(
                &Command::new("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(pattern)
                    .arg("COUNT")
                    .arg(count),
            )
            .await?;

        match reply.as_array()? {
            [next, keys, ..] => Ok((keys.as_strings()?, next.as_u64()?)),
            _ => Err(RedisError::UnexpectedResponse(format!(
                "SCAN reply: {reply:?}"
            ))),
        }
    }
}

// Hash commands
impl Client {
    /// HSET a field, then EXPIRE the whole hash after `expire_secs`, on one
    /// connection. Returns the EXPIRE reply (1 when the expiry was set).
    ///
    /// # Errors
    ///
    /// The first error of either command.
    pub async fn hset_ex(
        &self,
        key: impl Into<CommandArg>,
        field: impl Into<CommandArg>,
        value: impl Into<CommandArg>,
        expire_secs: i64,
    ) -> RedisResult<i64> {
        let key = key.into();
        let replies = self
            .executor()
            .execute_sequence(&[
                Command::new("HSET").arg(key.clone()).arg(field).arg(value),
                Command::new("EXPIRE").arg(key).arg(expire_secs),
            ])
            .await?;

        match replies.as_slice() {
            [hset, expire] => {
                hset.as_int()?;
                expire.as_int()
            }
            _ => Err(RedisError::UnexpectedResponse(format!("{replies:?}"))),
        }
    }

    /// HGET a field.
    ///
    /// # Errors
    ///
    /// [`RedisError::Nil`] if the key or field does not exist.
    pub async fn hget(
        &self,
        key: impl Into<CommandArg>,
        field: impl Into<CommandArg>,
    ) -> RedisResult<String> {
        self.execute_command(&Command::new("HGET").arg(key).arg(field))
            .await?
            .as_string()
    }

    /// HMSET field/value pairs, returning the status reply
    ///
    /// # Errors
    ///
    /// Any execution error.
    pub async fn hmset<I, F, V>(&self, key: impl Into<CommandArg>, pairs: I) -> RedisResult<String>
    where
        I: IntoIterator<Item = (F, V)>,
        F: Into<CommandArg>,
        V: Into<CommandArg>,
    {
        self.execute_command(&with_pairs("HMSET", key, pairs))
            .await?
            .as_string()
    }

    /// HMGET fields. Missing fields come back as empty strings.
    ///
    /// # Errors
    ///
    /// Any execution error.
    pub async fn hmget<I, F>(&self, key: impl Into<CommandArg>, fields: I) -> RedisResult<Vec<String>>
    where
        I: IntoIterator<Item = F>,
        F: Into<CommandArg>,
    {
        self.execute_command(&with_key("HMGET", key, fields))
            .await?
            .as_strings()
    }

    /// HDEL fields, returning how many were removed
    ///
    /// # Errors
    ///
    /// Any execution error.
    pub async fn hdel<I, F>(&self, key: impl Into<CommandArg>, fields: I) -> RedisResult<i64>
    where
        I: IntoIterator<Item = F>,
        F: Into<CommandArg>,
    {
        self.execute_command(&with_key("HDEL", key, fields))
            .await?
            .as_int()
    }
}

// List commands
impl Client {
    /// LPUSH values, returning the new length
    ///
    /// # Errors
    ///
    /// Any execution error.
    pub async fn lpush<I, V>(&self, key: impl Into<CommandArg>, values: I) -> RedisResult<i64>
    where
        I: IntoIterator<Item = V>,
        V: Into<CommandArg>,
    {
        self.execute_command(&with_key("LPUSH", key, values))
            .await?
            .as_int()
    }

    /// RPUSH values, returning the new length
    ///
    /// # Errors
    ///
    /// Any execution error.
    pub async fn rpush<I, V>(&self, key: impl Into<CommandArg>, values: I) -> RedisResult<i64>
    where
        I: IntoIterator<Item = V>,
        V: Into<CommandArg>,
    {
        self.execute_command(&with_key("RPUSH", key, values))
            .await?
            .as_int()
    }

    /// LPOP the first element.
    ///
    /// # Errors
    ///
    /// [`RedisError::Nil`] if the list is empty or missing.
    pub async fn lpop(&self, key: impl Into<CommandArg>) -> RedisResult<String> {
        self.execute_command(&Command::new("LPOP").arg(key))
            .await?
            .as_string()
    }

    /// RPOP the last element.
    ///
    /// # Errors
    ///
    /// [`RedisError::Nil`] if the list is empty or missing.
    pub async fn rpop(&self, key: impl Into<CommandArg>) -> RedisResult<String> {
        self.execute_command(&Command::new("RPOP").arg(key))
            .await?
            .as_string()
    }

    /// LLEN
    ///
    /// # Errors
    ///
    /// Any execution error.
    pub async fn llen(&self, key: impl Into<CommandArg>) -> RedisResult<i64> {
        self.execute_command(&Command::new("LLEN").arg(key))
            .await?
            .as_int()
    }

    /// LRANGE, inclusive on both ends; negative indexes count from the tail
    ///
    /// # Errors
    ///
    /// Any execution error.
    pub async fn lrange(
        &self,
        key: impl Into<CommandArg>,
        start: i64,
        stop: i64,
    ) -> RedisResult<Vec<String>> {
        self.execute_command(&Command::new("LRANGE").arg(key).arg(start).arg(stop))
            .await?
            .as_strings()
    }
}

// Set commands
impl Client {
    /// SADD members, returning how many were new
    ///
    /// # Errors
    ///
    /// Any execution error.
    pub async fn sadd<I, M>(&self, key: impl Into<CommandArg>, members: I) -> RedisResult<i64>
    where
        I: IntoIterator<Item = M>,
        M: Into<CommandArg>,
    {
        self.execute_command(&with_key("SADD", key, members))
            .await?
            .as_int()
    }

    /// SREM members, returning how many were removed
    ///
    /// # Errors
    ///
    /// Any execution error.
    pub async fn srem<I, M>(&self, key: impl Into<CommandArg>, members: I) -> RedisResult<i64>
    where
        I: IntoIterator<Item = M>,
        M: Into<CommandArg>,
    {
        self.execute_command(&with_key("SREM", key, members))
            .await?
            .as_int()
    }

    /// SMEMBERS
    ///
    /// # Errors
    ///
    /// Any execution error.
    pub async fn smembers(&self, key: impl Into<CommandArg>) -> RedisResult<Vec<String>> {
        self.execute_command(&Command::new("SMEMBERS").arg(key))
            .await?
            .as_strings()
    }
}

impl Pipeline {
    /// Queue INCR
    pub fn incr(&self, key: impl Into<CommandArg>) {
        self.add(Command::new("INCR").arg(key));
    }

    /// Queue INCRBY
    pub fn incr_by(&self, key: impl Into<CommandArg>, increment: i64) {
        self.add(Command::new("INCRBY").arg(key).arg(increment));
    }

    /// Queue DECR
    pub fn decr(&self, key: impl Into<CommandArg>) {
        self.add(Command::new("DECR").arg(key));
    }

    /// Queue DECRBY
    pub fn decr_by(&self, key: impl Into<CommandArg>, decrement: i64) {
        self.add(Command::new("DECRBY").arg(key).arg(decrement));
    }

    /// Queue EXPIRE
    pub fn expire(&self, key: impl Into<CommandArg>, expire_secs: i64) {
        self.add(Command::new("EXPIRE").arg(key).arg(expire_secs));
    }

    /// Queue DEL
    pub fn delete<I, K>(&self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: Into<CommandArg>,
    {
        self.add(Command::with_args("DEL", keys));
    }

    /// Queue HMSET
    pub fn hmset<I, F, V>(&self, key: impl Into<CommandArg>, pairs: I)
    where
        I: IntoIterator<Item = (F, V)>,
        F: Into<CommandArg>,
        V: Into<CommandArg>,
    {
        self.add(with_pairs("HMSET", key, pairs));
    }

    /// Queue HDEL
    pub fn hdel<I, F>(&self, key: impl Into<CommandArg>, fields: I)
    where
        I: IntoIterator<Item = F>,
        F: Into<CommandArg>,
    {
        self.add(with_key("HDEL", key, fields));
    }
}
