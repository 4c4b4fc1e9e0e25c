//! Typed key-value commands and the operation table
//!
//! A wire command is `[operationName, ...args]`. The operation name is
//! looked up (case-insensitively) in [`OPS`]; each entry declares the
//! argument shape it accepts and the parser that turns the positional
//! arguments into a [`Command`]. A name missing from the table is an
//! unsupported operation.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("wrong number of arguments for '{op}': expected {expected}, got {got}")]
    Arity {
        op: &'static str,
        expected: String,
        got: usize,
    },

    #[error("invalid {what} for '{op}': '{value}'")]
    InvalidNumber {
        op: &'static str,
        what: &'static str,
        value: String,
    },

    #[error("command must be a non-empty array whose first element is the operation name")]
    Malformed,
}

/// Operation tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Get,
    Set,
    Del,
    Exists,
    Keys,
    MGet,
    MSet,
    Incr,
    Decr,
    Append,
    StrLen,
    GetRange,
    SetRange,
    HGet,
    HSet,
    HGetAll,
    HDel,
    HExists,
    HLen,
    HKeys,
    HVals,
    LPush,
    RPush,
    LPop,
    RPop,
    LLen,
    LRange,
    SAdd,
    SMembers,
    SRem,
    SCard,
    SIsMember,
    ZAdd,
    ZRange,
    ZRem,
    ZCard,
    Ttl,
    Expire,
    Persist,
    Type,
    Ping,
}

/// Accepted number of arguments after the operation name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Between(usize, usize),
    /// `fixed` leading arguments followed by one or more pairs
    Pairs { fixed: usize },
}

impl Arity {
    pub fn accepts(&self, n: usize) -> bool {
        match *self {
            Arity::Exact(k) => n == k,
            Arity::AtLeast(k) => n >= k,
            Arity::Between(lo, hi) => n >= lo && n <= hi,
            Arity::Pairs { fixed } => n >= fixed + 2 && (n - fixed) % 2 == 0,
        }
    }

    fn describe(&self) -> String {
        match *self {
            Arity::Exact(k) => format!("exactly {}", k),
            Arity::AtLeast(k) => format!("at least {}", k),
            Arity::Between(lo, hi) => format!("{} to {}", lo, hi),
            Arity::Pairs { fixed: 0 } => "one or more pairs".to_string(),
            Arity::Pairs { fixed } => format!("{} followed by one or more pairs", fixed),
        }
    }
}

type Parser = fn(Vec<String>) -> Result<Command, CommandError>;

/// One row of the operation table
pub struct OpSpec {
    pub name: &'static str,
    pub op: Op,
    pub arity: Arity,
    parse: Parser,
}

#[rustfmt::skip]
pub static OPS: &[OpSpec] = &[
    OpSpec { name: "get", op: Op::Get, arity: Arity::Exact(1), parse: parse_get },
    OpSpec { name: "set", op: Op::Set, arity: Arity::AtLeast(2), parse: parse_set },
    OpSpec { name: "del", op: Op::Del, arity: Arity::AtLeast(1), parse: parse_del },
    OpSpec { name: "exists", op: Op::Exists, arity: Arity::AtLeast(1), parse: parse_exists },
    OpSpec { name: "keys", op: Op::Keys, arity: Arity::Exact(1), parse: parse_keys },
    OpSpec { name: "mget", op: Op::MGet, arity: Arity::AtLeast(1), parse: parse_mget },
    OpSpec { name: "mset", op: Op::MSet, arity: Arity::Pairs { fixed: 0 }, parse: parse_mset },
    OpSpec { name: "incr", op: Op::Incr, arity: Arity::Exact(1), parse: parse_incr },
    OpSpec { name: "decr", op: Op::Decr, arity: Arity::Exact(1), parse: parse_decr },
    OpSpec { name: "append", op: Op::Append, arity: Arity::Exact(2), parse: parse_append },
    OpSpec { name: "strlen", op: Op::StrLen, arity: Arity::Exact(1), parse: parse_strlen },
    OpSpec { name: "getrange", op: Op::GetRange, arity: Arity::Exact(3), parse: parse_getrange },
    OpSpec { name: "setrange", op: Op::SetRange, arity: Arity::Exact(3), parse: parse_setrange },
    OpSpec { name: "hget", op: Op::HGet, arity: Arity::Exact(2), parse: parse_hget },
    OpSpec { name: "hset", op: Op::HSet, arity: Arity::Pairs { fixed: 1 }, parse: parse_hset },
    OpSpec { name: "hgetall", op: Op::HGetAll, arity: Arity::Exact(1), parse: parse_hgetall },
    OpSpec { name: "hdel", op: Op::HDel, arity: Arity::AtLeast(2), parse: parse_hdel },
    OpSpec { name: "hexists", op: Op::HExists, arity: Arity::Exact(2), parse: parse_hexists },
    OpSpec { name: "hlen", op: Op::HLen, arity: Arity::Exact(1), parse: parse_hlen },
    OpSpec { name: "hkeys", op: Op::HKeys, arity: Arity::Exact(1), parse: parse_hkeys },
    OpSpec { name: "hvals", op: Op::HVals, arity: Arity::Exact(1), parse: parse_hvals },
    OpSpec { name: "lpush", op: Op::LPush, arity: Arity::AtLeast(2), parse: parse_lpush },
    OpSpec { name: "rpush", op: Op::RPush, arity: Arity::AtLeast(2), parse: parse_rpush },
    OpSpec { name: "lpop", op: Op::LPop, arity: Arity::Between(1, 2), parse: parse_lpop },
    OpSpec { name: "rpop", op: Op::RPop, arity: Arity::Between(1, 2), parse: parse_rpop },
    OpSpec { name: "llen", op: Op::LLen, arity: Arity::Exact(1), parse: parse_llen },
    OpSpec { name: "lrange", op: Op::LRange, arity: Arity::Exact(3), parse: parse_lrange },
    OpSpec { name: "sadd", op: Op::SAdd, arity: Arity::AtLeast(2), parse: parse_sadd },
    OpSpec { name: "smembers", op: Op::SMembers, arity: Arity::Exact(1), parse: parse_smembers },
    OpSpec { name: "srem", op: Op::SRem, arity: Arity::AtLeast(2), parse: parse_srem },
    OpSpec { name: "scard", op: Op::SCard, arity: Arity::Exact(1), parse: parse_scard },
    OpSpec { name: "sismember", op: Op::SIsMember, arity: Arity::Exact(2), parse: parse_sismember },
    OpSpec { name: "zadd", op: Op::ZAdd, arity: Arity::Pairs { fixed: 1 }, parse: parse_zadd },
    OpSpec { name: "zrange", op: Op::ZRange, arity: Arity::Between(3, 4), parse: parse_zrange },
    OpSpec { name: "zrem", op: Op::ZRem, arity: Arity::AtLeast(2), parse: parse_zrem },
    OpSpec { name: "zcard", op: Op::ZCard, arity: Arity::Exact(1), parse: parse_zcard },
    OpSpec { name: "ttl", op: Op::Ttl, arity: Arity::Exact(1), parse: parse_ttl },
    OpSpec { name: "expire", op: Op::Expire, arity: Arity::Exact(2), parse: parse_expire },
    OpSpec { name: "persist", op: Op::Persist, arity: Arity::Exact(1), parse: parse_persist },
    OpSpec { name: "type", op: Op::Type, arity: Arity::Exact(1), parse: parse_type },
    OpSpec { name: "ping", op: Op::Ping, arity: Arity::Between(0, 1), parse: parse_ping },
];

impl Op {
    /// Case-insensitive table lookup
    pub fn from_name(name: &str) -> Option<Op> {
        lookup(name).map(|spec| spec.op)
    }

    pub fn as_str(&self) -> &'static str {
        OPS.iter()
            .find(|spec| spec.op == *self)
            .map(|spec| spec.name)
            .unwrap_or("unknown")
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn lookup(name: &str) -> Option<&'static OpSpec> {
    OPS.iter().find(|spec| spec.name.eq_ignore_ascii_case(name))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Seconds(u64),
    Millis(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetCondition {
    /// NX
    NotExists,
    /// XX
    Exists,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    pub expiry: Option<Expiry>,
    pub condition: Option<SetCondition>,
}

/// A parsed command in the backend's native shape
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Get { key: String },
    Set { key: String, value: String, options: SetOptions },
    Del { keys: Vec<String> },
    Exists { keys: Vec<String> },
    Keys { pattern: String },
    MGet { keys: Vec<String> },
    MSet { pairs: Vec<(String, String)> },
    Incr { key: String },
    Decr { key: String },
    Append { key: String, value: String },
    StrLen { key: String },
    GetRange { key: String, start: i64, end: i64 },
    SetRange { key: String, offset: usize, value: String },
    HGet { key: String, field: String },
    HSet { key: String, fields: Vec<(String, String)> },
    HGetAll { key: String },
    HDel { key: String, fields: Vec<String> },
    HExists { key: String, field: String },
    HLen { key: String },
    HKeys { key: String },
    HVals { key: String },
    LPush { key: String, values: Vec<String> },
    RPush { key: String, values: Vec<String> },
    LPop { key: String, count: Option<usize> },
    RPop { key: String, count: Option<usize> },
    LLen { key: String },
    LRange { key: String, start: i64, stop: i64 },
    SAdd { key: String, members: Vec<String> },
    SMembers { key: String },
    SRem { key: String, members: Vec<String> },
    SCard { key: String },
    SIsMember { key: String, member: String },
    ZAdd { key: String, entries: Vec<(f64, String)> },
    ZRange { key: String, start: i64, stop: i64, with_scores: bool },
    ZRem { key: String, members: Vec<String> },
    ZCard { key: String },
    Ttl { key: String },
    Expire { key: String, seconds: i64 },
    Persist { key: String },
    Type { key: String },
    Ping { message: Option<String> },
}

impl Command {
    /// Look up `name` in the operation table, check the argument count,
    /// and build the typed command
    pub fn parse(name: &str, args: Vec<String>) -> Result<Command, CommandError> {
        let spec = lookup(name).ok_or_else(|| CommandError::Unsupported(name.to_string()))?;
        if !spec.arity.accepts(args.len()) {
            return Err(CommandError::Arity {
                op: spec.name,
                expected: spec.arity.describe(),
                got: args.len(),
            });
        }
        (spec.parse)(args)
    }

    /// Parse a wire tuple `[operationName, ...args]`
    ///
    /// Arguments may be JSON strings, numbers or booleans.
    pub fn from_wire(tuple: &serde_json::Value) -> Result<Command, CommandError> {
        let items = tuple.as_array().ok_or(CommandError::Malformed)?;
        let (name, rest) = items.split_first().ok_or(CommandError::Malformed)?;
        let name = name.as_str().ok_or(CommandError::Malformed)?;
        let args = rest
            .iter()
            .map(wire_arg)
            .collect::<Option<Vec<_>>>()
            .ok_or(CommandError::Malformed)?;
        Command::parse(name, args)
    }

    pub fn op(&self) -> Op {
        match self {
            Command::Get { .. } => Op::Get,
            Command::Set { .. } => Op::Set,
            Command::Del { .. } => Op::Del,
            Command::Exists { .. } => Op::Exists,
            Command::Keys { .. } => Op::Keys,
            Command::MGet { .. } => Op::MGet,
            Command::MSet { .. } => Op::MSet,
            Command::Incr { .. } => Op::Incr,
            Command::Decr { .. } => Op::Decr,
            Command::Append { .. } => Op::Append,
            Command::StrLen { .. } => Op::StrLen,
            Command::GetRange { .. } => Op::GetRange,
            Command::SetRange { .. } => Op::SetRange,
            Command::HGet { .. } => Op::HGet,
            Command::HSet { .. } => Op::HSet,
            Command::HGetAll { .. } => Op::HGetAll,
            Command::HDel { .. } => Op::HDel,
            Command::HExists { .. } => Op::HExists,
            Command::HLen { .. } => Op::HLen,
            Command::HKeys { .. } => Op::HKeys,
            Command::HVals { .. } => Op::HVals,
            Command::LPush { .. } => Op::LPush,
            Command::RPush { .. } => Op::RPush,
            Command::LPop { .. } => Op::LPop,
            Command::RPop { .. } => Op::RPop,
            Command::LLen { .. } => Op::LLen,
            Command::LRange { .. } => Op::LRange,
            Command::SAdd { .. } => Op::SAdd,
            Command::SMembers { .. } => Op::SMembers,
            Command::SRem { .. } => Op::SRem,
            Command::SCard { .. } => Op::SCard,
            Command::SIsMember { .. } => Op::SIsMember,
            Command::ZAdd { .. } => Op::ZAdd,
            Command::ZRange { .. } => Op::ZRange,
            Command::ZRem { .. } => Op::ZRem,
            Command::ZCard { .. } => Op::ZCard,
            Command::Ttl { .. } => Op::Ttl,
            Command::Expire { .. } => Op::Expire,
            Command::Persist { .. } => Op::Persist,
            Command::Type { .. } => Op::Type,
            Command::Ping { .. } => Op::Ping,
        }
    }

    /// Native argument list (command name first, upper-case) as a Redis
    /// server expects it
    pub fn to_args(&self) -> Vec<String> {
        let mut out = vec![self.op().as_str().to_ascii_uppercase()];
        match self {
            Command::Get { key }
            | Command::Incr { key }
            | Command::Decr { key }
            | Command::StrLen { key }
            | Command::HGetAll { key }
            | Command::HLen { key }
            | Command::HKeys { key }
            | Command::HVals { key }
            | Command::LLen { key }
            | Command::SMembers { key }
            | Command::SCard { key }
            | Command::ZCard { key }
            | Command::Ttl { key }
            | Command::Persist { key }
            | Command::Type { key } => out.push(key.clone()),
            Command::Set {
                key,
                value,
                options,
            } => {
                out.push(key.clone());
                out.push(value.clone());
                match options.expiry {
                    Some(Expiry::Seconds(s)) => out.extend(["EX".to_string(), s.to_string()]),
                    Some(Expiry::Millis(ms)) => out.extend(["PX".to_string(), ms.to_string()]),
                    None => {}
                }
                match options.condition {
                    Some(SetCondition::NotExists) => out.push("NX".to_string()),
                    Some(SetCondition::Exists) => out.push("XX".to_string()),
                    None => {}
                }
            }
            Command::Del { keys } | Command::Exists { keys } | Command::MGet { keys } => {
                out.extend(keys.iter().cloned())
            }
            Command::Keys { pattern } => out.push(pattern.clone()),
            Command::MSet { pairs } => {
                for (k, v) in pairs {
                    out.push(k.clone());
                    out.push(v.clone());
                }
            }
            Command::Append { key, value } => out.extend([key.clone(), value.clone()]),
            Command::GetRange { key, start, end } => {
                out.extend([key.clone(), start.to_string(), end.to_string()])
            }
            Command::SetRange { key, offset, value } => {
                out.extend([key.clone(), offset.to_string(), value.clone()])
            }
            Command::HGet { key, field } | Command::HExists { key, field } => {
                out.extend([key.clone(), field.clone()])
            }
            Command::HSet { key, fields } => {
                out.push(key.clone());
                for (f, v) in fields {
                    out.push(f.clone());
                    out.push(v.clone());
                }
            }
            Command::HDel { key, fields } => {
                out.push(key.clone());
                out.extend(fields.iter().cloned());
            }
            Command::LPush { key, values } | Command::RPush { key, values } => {
                out.push(key.clone());
                out.extend(values.iter().cloned());
            }
            Command::LPop { key, count } | Command::RPop { key, count } => {
                out.push(key.clone());
                if let Some(c) = count {
                    out.push(c.to_string());
                }
            }
            Command::LRange { key, start, stop } => {
                out.extend([key.clone(), start.to_string(), stop.to_string()])
            }
            Command::SAdd { key, members }
            | Command::SRem { key, members }
            | Command::ZRem { key, members } => {
                out.push(key.clone());
                out.extend(members.iter().cloned());
            }
            Command::SIsMember { key, member } => out.extend([key.clone(), member.clone()]),
            Command::ZAdd { key, entries } => {
                out.push(key.clone());
                for (score, member) in entries {
                    out.push(score.to_string());
                    out.push(member.clone());
                }
            }
            Command::ZRange {
                key,
                start,
                stop,
                with_scores,
            } => {
                out.extend([key.clone(), start.to_string(), stop.to_string()]);
                if *with_scores {
                    out.push("WITHSCORES".to_string());
                }
            }
            Command::Expire { key, seconds } => out.extend([key.clone(), seconds.to_string()]),
            Command::Ping { message } => {
                if let Some(m) = message {
                    out.push(m.clone());
                }
            }
        }
        out
    }
}

fn wire_arg(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn int_arg(op: &'static str, what: &'static str, value: String) -> Result<i64, CommandError> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| CommandError::InvalidNumber { op, what, value })
}

fn uint_arg(op: &'static str, what: &'static str, value: String) -> Result<u64, CommandError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| CommandError::InvalidNumber { op, what, value })
}

fn pairs(args: impl Iterator<Item = String>) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut it = args;
    while let (Some(a), Some(b)) = (it.next(), it.next()) {
        out.push((a, b));
    }
    out
}

/// Split off the leading key; the arity check guarantees it is present
fn split_key(args: Vec<String>) -> (String, std::vec::IntoIter<String>) {
    let mut it = args.into_iter();
    let key = it.next().unwrap_or_default();
    (key, it)
}

fn single_key(args: Vec<String>) -> String {
    split_key(args).0
}

fn key_and_one(args: Vec<String>) -> (String, String) {
    let (key, mut it) = split_key(args);
    (key, it.next().unwrap_or_default())
}

fn parse_get(args: Vec<String>) -> Result<Command, CommandError> {
    Ok(Command::Get { key: single_key(args) })
}

fn parse_set(args: Vec<String>) -> Result<Command, CommandError> {
    let (key, mut it) = split_key(args);
    let value = it.next().unwrap_or_default();
    let mut options = SetOptions::default();

    while let Some(option) = it.next() {
        match option.to_ascii_uppercase().as_str() {
            "EX" => {
                let v = it.next().unwrap_or_default();
                options.expiry = Some(Expiry::Seconds(uint_arg("set", "EX seconds", v)?));
            }
            "PX" => {
                let v = it.next().unwrap_or_default();
                options.expiry = Some(Expiry::Millis(uint_arg("set", "PX milliseconds", v)?));
            }
            "NX" => options.condition = Some(SetCondition::NotExists),
            "XX" => options.condition = Some(SetCondition::Exists),
            _ => {}
        }
    }

    Ok(Command::Set {
        key,
        value,
        options,
    })
}

fn parse_del(args: Vec<String>) -> Result<Command, CommandError> {
    Ok(Command::Del { keys: args })
}

fn parse_exists(args: Vec<String>) -> Result<Command, CommandError> {
    Ok(Command::Exists { keys: args })
}

fn parse_keys(args: Vec<String>) -> Result<Command, CommandError> {
    Ok(Command::Keys {
        pattern: single_key(args),
    })
}

fn parse_mget(args: Vec<String>) -> Result<Command, CommandError> {
    Ok(Command::MGet { keys: args })
}

fn parse_mset(args: Vec<String>) -> Result<Command, CommandError> {
    Ok(Command::MSet {
        pairs: pairs(args.into_iter()),
    })
}

fn parse_incr(args: Vec<String>) -> Result<Command, CommandError> {
    Ok(Command::Incr { key: single_key(args) })
}

fn parse_decr(args: Vec<String>) -> Result<Command, CommandError> {
    Ok(Command::Decr { key: single_key(args) })
}

fn parse_append(args: Vec<String>) -> Result<Command, CommandError> {
    let (key, value) = key_and_one(args);
    Ok(Command::Append { key, value })
}

fn parse_strlen(args: Vec<String>) -> Result<Command, CommandError> {
    Ok(Command::StrLen { key: single_key(args) })
}

fn parse_getrange(args: Vec<String>) -> Result<Command, CommandError> {
    let (key, mut it) = split_key(args);
    let start = int_arg("getrange", "start", it.next().unwrap_or_default())?;
    let end = int_arg("getrange", "end", it.next().unwrap_or_default())?;
    Ok(Command::GetRange { key, start, end })
}

fn parse_setrange(args: Vec<String>) -> Result<Command, CommandError> {
    let (key, mut it) = split_key(args);
    let offset = uint_arg("setrange", "offset", it.next().unwrap_or_default())? as usize;
    let value = it.next().unwrap_or_default();
    Ok(Command::SetRange { key, offset, value })
}

fn parse_hget(args: Vec<String>) -> Result<Command, CommandError> {
    let (key, field) = key_and_one(args);
    Ok(Command::HGet { key, field })
}

fn parse_hset(args: Vec<String>) -> Result<Command, CommandError> {
    let (key, it) = split_key(args);
    Ok(Command::HSet {
        key,
        fields: pairs(it),
    })
}

fn parse_hgetall(args: Vec<String>) -> Result<Command, CommandError> {
    Ok(Command::HGetAll { key: single_key(args) })
}

fn parse_hdel(args: Vec<String>) -> Result<Command, CommandError> {
    let (key, it) = split_key(args);
    Ok(Command::HDel {
        key,
        fields: it.collect(),
    })
}

fn parse_hexists(args: Vec<String>) -> Result<Command, CommandError> {
    let (key, field) = key_and_one(args);
    Ok(Command::HExists { key, field })
}

fn parse_hlen(args: Vec<String>) -> Result<Command, CommandError> {
    Ok(Command::HLen { key: single_key(args) })
}

fn parse_hkeys(args: Vec<String>) -> Result<Command, CommandError> {
    Ok(Command::HKeys { key: single_key(args) })
}

fn parse_hvals(args: Vec<String>) -> Result<Command, CommandError> {
    Ok(Command::HVals { key: single_key(args) })
}

fn parse_lpush(args: Vec<String>) -> Result<Command, CommandError> {
    let (key, it) = split_key(args);
    Ok(Command::LPush {
        key,
        values: it.collect(),
    })
}

fn parse_rpush(args: Vec<String>) -> Result<Command, CommandError> {
    let (key, it) = split_key(args);
    Ok(Command::RPush {
        key,
        values: it.collect(),
    })
}

fn pop_count(op: &'static str, it: &mut std::vec::IntoIter<String>) -> Result<Option<usize>, CommandError> {
    it.next()
        .map(|v| uint_arg(op, "count", v).map(|c| c as usize))
        .transpose()
}

fn parse_lpop(args: Vec<String>) -> Result<Command, CommandError> {
    let (key, mut it) = split_key(args);
    let count = pop_count("lpop", &mut it)?;
    Ok(Command::LPop { key, count })
}

fn parse_rpop(args: Vec<String>) -> Result<Command, CommandError> {
    let (key, mut it) = split_key(args);
    let count = pop_count("rpop", &mut it)?;
    Ok(Command::RPop { key, count })
}

fn parse_llen(args: Vec<String>) -> Result<Command, CommandError> {
    Ok(Command::LLen { key: single_key(args) })
}

fn parse_lrange(args: Vec<String>) -> Result<Command, CommandError> {
    let (key, mut it) = split_key(args);
    let start = int_arg("lrange", "start", it.next().unwrap_or_default())?;
    let stop = int_arg("lrange", "stop", it.next().unwrap_or_default())?;
    Ok(Command::LRange { key, start, stop })
}

fn parse_sadd(args: Vec<String>) -> Result<Command, CommandError> {
    let (key, it) = split_key(args);
    Ok(Command::SAdd {
        key,
        members: it.collect(),
    })
}

fn parse_smembers(args: Vec<String>) -> Result<Command, CommandError> {
    Ok(Command::SMembers { key: single_key(args) })
}

fn parse_srem(args: Vec<String>) -> Result<Command, CommandError> {
    let (key, it) = split_key(args);
    Ok(Command::SRem {
        key,
        members: it.collect(),
    })
}

fn parse_scard(args: Vec<String>) -> Result<Command, CommandError> {
    Ok(Command::SCard { key: single_key(args) })
}

fn parse_sismember(args: Vec<String>) -> Result<Command, CommandError> {
    let (key, member) = key_and_one(args);
    Ok(Command::SIsMember { key, member })
}

fn parse_zadd(args: Vec<String>) -> Result<Command, CommandError> {
    let (key, it) = split_key(args);
    let mut entries = Vec::new();
    for (score, member) in pairs(it) {
        let parsed = score
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|s| !s.is_nan())
            .ok_or(CommandError::InvalidNumber {
                op: "zadd",
                what: "score",
                value: score,
            })?;
        entries.push((parsed, member));
    }
    Ok(Command::ZAdd { key, entries })
}

fn parse_zrange(args: Vec<String>) -> Result<Command, CommandError> {
    let (key, mut it) = split_key(args);
    let start = int_arg("zrange", "start", it.next().unwrap_or_default())?;
    let stop = int_arg("zrange", "stop", it.next().unwrap_or_default())?;
    let with_scores = it
        .next()
        .is_some_and(|flag| flag.eq_ignore_ascii_case("withscores"));
    Ok(Command::ZRange {
        key,
        start,
        stop,
        with_scores,
    })
}

fn parse_zrem(args: Vec<String>) -> Result<Command, CommandError> {
    let (key, it) = split_key(args);
    Ok(Command::ZRem {
        key,
        members: it.collect(),
    })
}

fn parse_zcard(args: Vec<String>) -> Result<Command, CommandError> {
    Ok(Command::ZCard { key: single_key(args) })
}

fn parse_ttl(args: Vec<String>) -> Result<Command, CommandError> {
    Ok(Command::Ttl { key: single_key(args) })
}

fn parse_expire(args: Vec<String>) -> Result<Command, CommandError> {
    let (key, seconds) = key_and_one(args);
    let seconds = int_arg("expire", "seconds", seconds)?;
    Ok(Command::Expire { key, seconds })
}

fn parse_persist(args: Vec<String>) -> Result<Command, CommandError> {
    Ok(Command::Persist { key: single_key(args) })
}

fn parse_type(args: Vec<String>) -> Result<Command, CommandError> {
    Ok(Command::Type { key: single_key(args) })
}

fn parse_ping(args: Vec<String>) -> Result<Command, CommandError> {
    Ok(Command::Ping {
        message: args.into_iter().next(),
    })
}
