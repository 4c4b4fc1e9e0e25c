//! In-process backend implementing the full command surface
//!
//! Used by `pmkv serve --memory` and as the store behind every test.
//! Expiry is lazy: an expired key is dropped the next time it is touched.

use super::{BackendError, KvBackend};
use crate::command::{Command, Expiry, SetCondition};
use async_trait::async_trait;
use globset::{GlobBuilder, GlobMatcher};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
enum Data {
    Str(String),
    Hash(BTreeMap<String, String>),
    List(VecDeque<String>),
    Set(BTreeSet<String>),
    /// Kept sorted by (score, member)
    ZSet(Vec<(f64, String)>),
}

impl Data {
    fn type_name(&self) -> &'static str {
        match self {
            Data::Str(_) => "string",
            Data::Hash(_) => "hash",
            Data::List(_) => "list",
            Data::Set(_) => "set",
            Data::ZSet(_) => "zset",
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Data::Str(_) => false,
            Data::Hash(h) => h.is_empty(),
            Data::List(l) => l.is_empty(),
            Data::Set(s) => s.is_empty(),
            Data::ZSet(z) => z.is_empty(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    data: Data,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Store {
    entries: HashMap<String, Entry>,
}

impl Store {
    fn purge_if_expired(&mut self, key: &str, now: Instant) {
        let expired = self
            .entries
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|at| at <= now);
        if expired {
            self.entries.remove(key);
        }
    }

    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        self.purge_if_expired(key, Instant::now());
        self.entries.get_mut(key)
    }

    fn contains(&mut self, key: &str) -> bool {
        self.live(key).is_some()
    }

    fn live_keys(&mut self) -> Vec<String> {
        let now = Instant::now();
        self.entries
            .retain(|_, e| e.expires_at.map_or(true, |at| at > now));
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn get_str(&mut self, key: &str) -> Result<Option<&mut String>, BackendError> {
        match self.live(key) {
            None => Ok(None),
            Some(Entry {
                data: Data::Str(s), ..
            }) => Ok(Some(s)),
            Some(_) => Err(BackendError::WrongType),
        }
    }

    /// Fetch the collection at `key`, creating it with `make` when absent
    fn collection(
        &mut self,
        key: &str,
        make: fn() -> Data,
        matches: fn(&Data) -> bool,
    ) -> Result<&mut Data, BackendError> {
        self.purge_if_expired(key, Instant::now());
        let entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            data: make(),
            expires_at: None,
        });
        if matches(&entry.data) {
            Ok(&mut entry.data)
        } else {
            Err(BackendError::WrongType)
        }
    }

    fn existing(
        &mut self,
        key: &str,
        matches: fn(&Data) -> bool,
    ) -> Result<Option<&mut Data>, BackendError> {
        match self.live(key) {
            None => Ok(None),
            Some(entry) if matches(&entry.data) => Ok(Some(&mut entry.data)),
            Some(_) => Err(BackendError::WrongType),
        }
    }

    fn drop_if_empty(&mut self, key: &str) {
        if self.entries.get(key).is_some_and(|e| e.data.is_empty()) {
            self.entries.remove(key);
        }
    }

    fn add_to_int(&mut self, key: &str, delta: i64) -> Result<Value, BackendError> {
        let current = match self.get_str(key)? {
            Some(s) => s.parse::<i64>().map_err(|_| BackendError::NotInteger)?,
            None => 0,
        };
        let next = current.checked_add(delta).ok_or(BackendError::NotInteger)?;
        match self.get_str(key)? {
            Some(s) => *s = next.to_string(),
            None => {
                self.entries.insert(
                    key.to_string(),
                    Entry {
                        data: Data::Str(next.to_string()),
                        expires_at: None,
                    },
                );
            }
        }
        Ok(json!(next))
    }
}

fn is_hash(d: &Data) -> bool {
    matches!(d, Data::Hash(_))
}

fn is_list(d: &Data) -> bool {
    matches!(d, Data::List(_))
}

fn is_set(d: &Data) -> bool {
    matches!(d, Data::Set(_))
}

fn is_zset(d: &Data) -> bool {
    matches!(d, Data::ZSet(_))
}

fn new_hash() -> Data {
    Data::Hash(BTreeMap::new())
}

fn new_list() -> Data {
    Data::List(VecDeque::new())
}

fn new_set() -> Data {
    Data::Set(BTreeSet::new())
}

fn new_zset() -> Data {
    Data::ZSet(Vec::new())
}

/// Resolve a Redis-style inclusive index range against `len`
fn normalize_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        None
    } else {
        Some((start as usize, stop as usize))
    }
}

/// Largest string SETRANGE may produce, as in Redis
const MAX_STRING_BYTES: usize = 512 * 1024 * 1024;

/// Rewrite a Redis `KEYS` pattern into globset syntax
///
/// `[^..]` becomes `[!..]`, braces are literal, runs of `*` collapse and an
/// unclosed `[` matches itself.
fn to_glob(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() + 4);
    let mut in_class = false;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' if i + 1 < chars.len() => {
                out.push('\\');
                out.push(chars[i + 1]);
                i += 1;
            }
            '\\' => out.push_str("\\\\"),
            _ if in_class => {
                out.push(c);
                if c == ']' {
                    in_class = false;
                }
            }
            '*' => {
                if !out.ends_with('*') || out.ends_with("\\*") {
                    out.push('*');
                }
            }
            '[' if chars[i + 1..].contains(&']') => {
                in_class = true;
                out.push('[');
                if chars.get(i + 1) == Some(&'^') {
                    out.push('!');
                    i += 1;
                }
            }
            '[' | ']' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
        i += 1;
    }
    out
}

/// Compile a `KEYS` pattern: `*`, `?`, `[...]` and `\` escapes
pub fn key_matcher(pattern: &str) -> Result<GlobMatcher, BackendError> {
    GlobBuilder::new(&to_glob(pattern))
        .backslash_escape(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|e| BackendError::Pattern(e.to_string()))
}

/// Instant `ttl` from now, rejecting values past what `Instant` can hold
fn deadline(ttl: Duration) -> Result<Instant, BackendError> {
    Instant::now()
        .checked_add(ttl)
        .ok_or(BackendError::InvalidExpire)
}

/// In-memory key-value store
#[derive(Debug, Default)]
pub struct MemoryBackend {
    store: Mutex<Store>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.lock().live_keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn apply(&self, command: &Command) -> Result<Value, BackendError> {
        let mut store = self.lock();
        let s = &mut *store;

        match command {
            Command::Get { key } => Ok(s.get_str(key)?.map_or(Value::Null, |v| json!(v))),

            Command::Set {
                key,
                value,
                options,
            } => {
                let exists = s.contains(key);
                match options.condition {
                    Some(SetCondition::NotExists) if exists => return Ok(Value::Null),
                    Some(SetCondition::Exists) if !exists => return Ok(Value::Null),
                    _ => {}
                }
                let expires_at = match options.expiry {
                    Some(Expiry::Seconds(secs)) => Some(deadline(Duration::from_secs(secs))?),
                    Some(Expiry::Millis(ms)) => Some(deadline(Duration::from_millis(ms))?),
                    None => None,
                };
                s.entries.insert(
                    key.clone(),
                    Entry {
                        data: Data::Str(value.clone()),
                        expires_at,
                    },
                );
                Ok(json!("OK"))
            }

            Command::Del { keys } => {
                let mut removed = 0;
                for key in keys {
                    if s.contains(key) {
                        s.entries.remove(key);
                        removed += 1;
                    }
                }
                Ok(json!(removed))
            }

            Command::Exists { keys } => {
                Ok(json!(keys.iter().filter(|k| s.contains(k)).count()))
            }

            Command::Keys { pattern } => {
                let matcher = key_matcher(pattern)?;
                let keys: Vec<String> = s
                    .live_keys()
                    .into_iter()
                    .filter(|k| matcher.is_match(k))
                    .collect();
                Ok(json!(keys))
            }

            Command::MGet { keys } => {
                let values: Vec<Value> = keys
                    .iter()
                    .map(|k| match s.get_str(k) {
                        Ok(Some(v)) => json!(v),
                        _ => Value::Null,
                    })
                    .collect();
                Ok(Value::Array(values))
            }

            Command::MSet { pairs } => {
                for (k, v) in pairs {
                    s.entries.insert(
                        k.clone(),
                        Entry {
                            data: Data::Str(v.clone()),
                            expires_at: None,
                        },
                    );
                }
                Ok(json!("OK"))
            }

            Command::Incr { key } => s.add_to_int(key, 1),
            Command::Decr { key } => s.add_to_int(key, -1),

            Command::Append { key, value } => match s.get_str(key)? {
                Some(existing) => {
                    existing.push_str(value);
                    Ok(json!(existing.len()))
                }
                None => {
                    s.entries.insert(
                        key.clone(),
                        Entry {
                            data: Data::Str(value.clone()),
                            expires_at: None,
                        },
                    );
                    Ok(json!(value.len()))
                }
            },

            Command::StrLen { key } => Ok(json!(s.get_str(key)?.map_or(0, |v| v.len()))),

            Command::GetRange { key, start, end } => {
                let bytes = s.get_str(key)?.map(|v| v.as_bytes().to_vec()).unwrap_or_default();
                let out = match normalize_range(*start, *end, bytes.len()) {
                    Some((a, b)) => String::from_utf8_lossy(&bytes[a..=b]).into_owned(),
                    None => String::new(),
                };
                Ok(json!(out))
            }

            Command::SetRange { key, offset, value } => {
                let mut bytes = s.get_str(key)?.map(|v| v.as_bytes().to_vec()).unwrap_or_default();
                if value.is_empty() {
                    return Ok(json!(bytes.len()));
                }
                let end = offset
                    .checked_add(value.len())
                    .filter(|end| *end <= MAX_STRING_BYTES)
                    .ok_or(BackendError::TooLarge)?;
                if bytes.len() < end {
                    bytes.resize(end, 0);
                }
                bytes[*offset..end].copy_from_slice(value.as_bytes());
                let len = bytes.len();
                let text = String::from_utf8_lossy(&bytes).into_owned();
                match s.get_str(key)? {
                    Some(existing) => *existing = text,
                    None => {
                        s.entries.insert(
                            key.clone(),
                            Entry {
                                data: Data::Str(text),
                                expires_at: None,
                            },
                        );
                    }
                }
                Ok(json!(len))
            }

            Command::HGet { key, field } => match s.existing(key, is_hash)? {
                Some(Data::Hash(h)) => Ok(h.get(field).map_or(Value::Null, |v| json!(v))),
                _ => Ok(Value::Null),
            },

            Command::HSet { key, fields } => {
                let Data::Hash(h) = s.collection(key, new_hash, is_hash)? else {
                    return Err(BackendError::WrongType);
                };
                let added = fields
                    .iter()
                    .filter(|(f, v)| h.insert(f.clone(), v.clone()).is_none())
                    .count();
                Ok(json!(added))
            }

            Command::HGetAll { key } => match s.existing(key, is_hash)? {
                Some(Data::Hash(h)) => {
                    let obj: Map<String, Value> =
                        h.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
                    Ok(Value::Object(obj))
                }
                _ => Ok(Value::Object(Map::new())),
            },

            Command::HDel { key, fields } => {
                let removed = match s.existing(key, is_hash)? {
                    Some(Data::Hash(h)) => fields.iter().filter(|f| h.remove(*f).is_some()).count(),
                    _ => 0,
                };
                s.drop_if_empty(key);
                Ok(json!(removed))
            }

            Command::HExists { key, field } => match s.existing(key, is_hash)? {
                Some(Data::Hash(h)) => Ok(json!(h.contains_key(field) as i64)),
                _ => Ok(json!(0)),
            },

            Command::HLen { key } => match s.existing(key, is_hash)? {
                Some(Data::Hash(h)) => Ok(json!(h.len())),
                _ => Ok(json!(0)),
            },

            Command::HKeys { key } => match s.existing(key, is_hash)? {
                Some(Data::Hash(h)) => Ok(json!(h.keys().collect::<Vec<_>>())),
                _ => Ok(json!([])),
            },

            Command::HVals { key } => match s.existing(key, is_hash)? {
                Some(Data::Hash(h)) => Ok(json!(h.values().collect::<Vec<_>>())),
                _ => Ok(json!([])),
            },

            Command::LPush { key, values } | Command::RPush { key, values } => {
                let front = matches!(command, Command::LPush { .. });
                let Data::List(l) = s.collection(key, new_list, is_list)? else {
                    return Err(BackendError::WrongType);
                };
                for v in values {
                    if front {
                        l.push_front(v.clone());
                    } else {
                        l.push_back(v.clone());
                    }
                }
                Ok(json!(l.len()))
            }

            Command::LPop { key, count } | Command::RPop { key, count } => {
                let front = matches!(command, Command::LPop { .. });
                let result = match s.existing(key, is_list)? {
                    Some(Data::List(l)) => {
                        let take = count.unwrap_or(1);
                        let mut popped = Vec::new();
                        for _ in 0..take {
                            let v = if front { l.pop_front() } else { l.pop_back() };
                            match v {
                                Some(v) => popped.push(v),
                                None => break,
                            }
                        }
                        match count {
                            Some(_) => json!(popped),
                            None => popped.pop().map_or(Value::Null, |v| json!(v)),
                        }
                    }
                    _ => Value::Null,
                };
                s.drop_if_empty(key);
                Ok(result)
            }

            Command::LLen { key } => match s.existing(key, is_list)? {
                Some(Data::List(l)) => Ok(json!(l.len())),
                _ => Ok(json!(0)),
            },

            Command::LRange { key, start, stop } => match s.existing(key, is_list)? {
                Some(Data::List(l)) => match normalize_range(*start, *stop, l.len()) {
                    Some((a, b)) => Ok(json!(l.range(a..=b).collect::<Vec<_>>())),
                    None => Ok(json!([])),
                },
                _ => Ok(json!([])),
            },

            Command::SAdd { key, members } => {
                let Data::Set(set) = s.collection(key, new_set, is_set)? else {
                    return Err(BackendError::WrongType);
                };
                Ok(json!(members.iter().filter(|m| set.insert((*m).clone())).count()))
            }

            Command::SMembers { key } => match s.existing(key, is_set)? {
                Some(Data::Set(set)) => Ok(json!(set.iter().collect::<Vec<_>>())),
                _ => Ok(json!([])),
            },

            Command::SRem { key, members } => {
                let removed = match s.existing(key, is_set)? {
                    Some(Data::Set(set)) => members.iter().filter(|m| set.remove(*m)).count(),
                    _ => 0,
                };
                s.drop_if_empty(key);
                Ok(json!(removed))
            }

            Command::SCard { key } => match s.existing(key, is_set)? {
                Some(Data::Set(set)) => Ok(json!(set.len())),
                _ => Ok(json!(0)),
            },

            Command::SIsMember { key, member } => match s.existing(key, is_set)? {
                Some(Data::Set(set)) => Ok(json!(set.contains(member) as i64)),
                _ => Ok(json!(0)),
            },

            Command::ZAdd { key, entries } => {
                let Data::ZSet(z) = s.collection(key, new_zset, is_zset)? else {
                    return Err(BackendError::WrongType);
                };
                let mut added = 0;
                for (score, member) in entries {
                    match z.iter_mut().find(|(_, m)| m == member) {
                        Some(existing) => existing.0 = *score,
                        None => {
                            z.push((*score, member.clone()));
                            added += 1;
                        }
                    }
                }
                z.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
                Ok(json!(added))
            }

            Command::ZRange {
                key,
                start,
                stop,
                with_scores,
            } => match s.existing(key, is_zset)? {
                Some(Data::ZSet(z)) => match normalize_range(*start, *stop, z.len()) {
                    Some((a, b)) => {
                        let mut out = Vec::new();
                        for (score, member) in &z[a..=b] {
                            out.push(json!(member));
                            if *with_scores {
                                out.push(json!(score.to_string()));
                            }
                        }
                        Ok(Value::Array(out))
                    }
                    None => Ok(json!([])),
                },
                _ => Ok(json!([])),
            },

            Command::ZRem { key, members } => {
                let removed = match s.existing(key, is_zset)? {
                    Some(Data::ZSet(z)) => {
                        let before = z.len();
                        z.retain(|(_, m)| !members.contains(m));
                        before - z.len()
                    }
                    _ => 0,
                };
                s.drop_if_empty(key);
                Ok(json!(removed))
            }

            Command::ZCard { key } => match s.existing(key, is_zset)? {
                Some(Data::ZSet(z)) => Ok(json!(z.len())),
                _ => Ok(json!(0)),
            },

            Command::Ttl { key } => match s.live(key) {
                None => Ok(json!(-2)),
                Some(Entry {
                    expires_at: None, ..
                }) => Ok(json!(-1)),
                Some(Entry {
                    expires_at: Some(at),
                    ..
                }) => {
                    let remaining = at.saturating_duration_since(Instant::now());
                    Ok(json!(((remaining.as_millis() + 500) / 1000) as i64))
                }
            },

            Command::Expire { key, seconds } => {
                if !s.contains(key) {
                    return Ok(json!(0));
                }
                if *seconds <= 0 {
                    s.entries.remove(key);
                } else {
                    let at = deadline(Duration::from_secs(*seconds as u64))?;
                    if let Some(entry) = s.live(key) {
                        entry.expires_at = Some(at);
                    }
                }
                Ok(json!(1))
            }

            Command::Persist { key } => match s.live(key) {
                Some(entry) if entry.expires_at.is_some() => {
                    entry.expires_at = None;
                    Ok(json!(1))
                }
                _ => Ok(json!(0)),
            },

            Command::Type { key } => Ok(json!(s
                .live(key)
                .map_or("none", |entry| entry.data.type_name()))),

            Command::Ping { message } => Ok(json!(message.as_deref().unwrap_or("PONG"))),
        }
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn execute(&self, command: &Command) -> Result<Value, BackendError> {
        self.apply(command)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
