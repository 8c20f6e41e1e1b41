//! Redis-compatible value types stored in cache entries

use crate::cache::geo::GeoValue;
use crate::cache::sorted_set::SortedSetValue;
use crate::cache::stream::StreamValue;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

/// Type tag of a stored value
///
/// The discriminants are stable and shared with the snapshot format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum DataType {
    String = 1,
    Hash = 2,
    List = 3,
    Set = 4,
    SortedSet = 5,
    Stream = 6,
    Geo = 7,
}

impl DataType {
    /// Decode the stable integer encoding
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(DataType::String),
            2 => Some(DataType::Hash),
            3 => Some(DataType::List),
            4 => Some(DataType::Set),
            5 => Some(DataType::SortedSet),
            6 => Some(DataType::Stream),
            7 => Some(DataType::Geo),
            _ => None,
        }
    }

    /// Stable integer encoding
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Name reported by the TYPE command
    pub fn name(self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Hash => "hash",
            DataType::List => "list",
            DataType::Set => "set",
            DataType::SortedSet => "zset",
            DataType::Stream => "stream",
            DataType::Geo => "geo",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed cache value
///
/// `Clone` is always a deep copy: mutating a clone never affects the original.
#[derive(Debug, Clone)]
pub enum Value {
    String(StringValue),
    Hash(HashValue),
    List(ListValue),
    Set(SetValue),
    SortedSet(SortedSetValue),
    Stream(StreamValue),
    Geo(GeoValue),
}

impl Value {
    /// Shorthand for a string value
    pub fn string(data: impl Into<Vec<u8>>) -> Self {
        Value::String(StringValue::new(data))
    }

    /// Type tag of this value
    pub fn data_type(&self) -> DataType {
        match self {
            Value::String(_) => DataType::String,
            Value::Hash(_) => DataType::Hash,
            Value::List(_) => DataType::List,
            Value::Set(_) => DataType::Set,
            Value::SortedSet(_) => DataType::SortedSet,
            Value::Stream(_) => DataType::Stream,
            Value::Geo(_) => DataType::Geo,
        }
    }

    /// Approximate memory footprint in bytes, including per-element overhead
    pub fn size_of(&self) -> i64 {
        match self {
            Value::String(v) => v.size_of(),
            Value::Hash(v) => v.size_of(),
            Value::List(v) => v.size_of(),
            Value::Set(v) => v.size_of(),
            Value::SortedSet(v) => v.size_of(),
            Value::Stream(v) => v.size_of(),
            Value::Geo(v) => v.size_of(),
        }
    }

    pub fn as_string(&self) -> Option<&StringValue> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_hash(&self) -> Option<&HashValue> {
        match self {
            Value::Hash(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ListValue> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&SetValue> {
        match self {
            Value::Set(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_sorted_set(&self) -> Option<&SortedSetValue> {
        match self {
            Value::SortedSet(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_stream(&self) -> Option<&StreamValue> {
        match self {
            Value::Stream(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_geo(&self) -> Option<&GeoValue> {
        match self {
            Value::Geo(v) => Some(v),
            _ => None,
        }
    }
}

impl From<StringValue> for Value {
    fn from(v: StringValue) -> Self {
        Value::String(v)
    }
}

impl From<HashValue> for Value {
    fn from(v: HashValue) -> Self {
        Value::Hash(v)
    }
}

impl From<ListValue> for Value {
    fn from(v: ListValue) -> Self {
        Value::List(v)
    }
}

impl From<SetValue> for Value {
    fn from(v: SetValue) -> Self {
        Value::Set(v)
    }
}

impl From<SortedSetValue> for Value {
    fn from(v: SortedSetValue) -> Self {
        Value::SortedSet(v)
    }
}

impl From<StreamValue> for Value {
    fn from(v: StreamValue) -> Self {
        Value::Stream(v)
    }
}

impl From<GeoValue> for Value {
    fn from(v: GeoValue) -> Self {
        Value::Geo(v)
    }
}

/// Plain byte string (Redis STRING)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringValue {
    data: Vec<u8>,
}

impl StringValue {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Lossy UTF-8 view
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn size_of(&self) -> i64 {
        self.data.len() as i64 + 24
    }
}

/// Field-value map (Redis HASH)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashValue {
    fields: BTreeMap<String, Vec<u8>>,
}

impl HashValue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, returns true if the field is new
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Vec<u8>>) -> bool {
        self.fields.insert(field.into(), value.into()).is_none()
    }

    pub fn get(&self, field: &str) -> Option<&[u8]> {
        self.fields.get(field).map(Vec::as_slice)
    }

    pub fn remove(&mut self, field: &str) -> bool {
        self.fields.remove(field).is_some()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn fields(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<u8>)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn size_of(&self) -> i64 {
        self.fields
            .iter()
            .map(|(k, v)| (k.len() + v.len()) as i64 + 80)
            .sum::<i64>()
            + 48
    }
}

/// Ordered sequence of byte strings (Redis LIST)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListValue {
    items: VecDeque<Vec<u8>>,
}

impl ListValue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push to the head
    pub fn push_front(&mut self, value: impl Into<Vec<u8>>) {
        self.items.push_front(value.into());
    }

    /// Push to the tail
    pub fn push_back(&mut self, value: impl Into<Vec<u8>>) {
        self.items.push_back(value.into());
    }

    pub fn pop_front(&mut self) -> Option<Vec<u8>> {
        self.items.pop_front()
    }

    pub fn pop_back(&mut self) -> Option<Vec<u8>> {
        self.items.pop_back()
    }

    /// Element at `index`; negative indexes count from the tail
    pub fn index(&self, index: i64) -> Option<&[u8]> {
        let len = self.items.len() as i64;
        let idx = if index < 0 { len + index } else { index };
        if idx < 0 {
            return None;
        }
        self.items.get(idx as usize).map(Vec::as_slice)
    }

    /// Inclusive range with Redis-style negative indexes
    pub fn range(&self, start: i64, stop: i64) -> Vec<Vec<u8>> {
        match normalize_range(start, stop, self.items.len()) {
            Some((from, to)) => self.items.range(from..=to).cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn size_of(&self) -> i64 {
        self.items.iter().map(|v| v.len() as i64 + 24).sum::<i64>() + 24
    }
}

/// Unordered unique members (Redis SET)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetValue {
    members: BTreeSet<String>,
}

impl SetValue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member, returns true if it was not present
    pub fn insert(&mut self, member: impl Into<String>) -> bool {
        self.members.insert(member.into())
    }

    pub fn remove(&mut self, member: &str) -> bool {
        self.members.remove(member)
    }

    pub fn contains(&self, member: &str) -> bool {
        self.members.contains(member)
    }

    pub fn members(&self) -> Vec<String> {
        self.members.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn size_of(&self) -> i64 {
        self.members.iter().map(|m| m.len() as i64 + 48).sum::<i64>() + 48
    }
}

/// Resolve an inclusive `[start, stop]` pair with negative indexes against a
/// collection of `len` items. Returns `None` for an empty selection.
pub(crate) fn normalize_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let mut start = if start < 0 { len + start } else { start };
    let mut stop = if stop < 0 { len + stop } else { stop };
    if start < 0 {
        start = 0;
    }
    if stop >= len {
        stop = len - 1;
    }
    if start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_encoding() {
        for raw in 1..=7u8 {
            let dt = DataType::from_u8(raw).unwrap();
            assert_eq!(dt.as_u8(), raw);
        }
        assert_eq!(DataType::from_u8(0), None);
        assert_eq!(DataType::from_u8(8), None);
        assert_eq!(DataType::SortedSet.name(), "zset");
        assert_eq!(DataType::Hash.to_string(), "hash");
    }

    #[test]
    fn test_string_size() {
        let v = Value::string("hello");
        assert_eq!(v.data_type(), DataType::String);
        assert_eq!(v.size_of(), 5 + 24);
        assert_eq!(v.as_string().unwrap().as_bytes(), b"hello");
    }

    #[test]
    fn test_list_operations() {
        let mut list = ListValue::new();

        list.push_back("1");
        list.push_back("2");
        list.push_front("0");

        assert_eq!(list.len(), 3);
        assert_eq!(list.index(0), Some(&b"0"[..]));
        assert_eq!(list.index(-1), Some(&b"2"[..]));
        assert_eq!(list.index(-4), None);

        assert_eq!(list.pop_front(), Some(b"0".to_vec()));
        assert_eq!(list.pop_back(), Some(b"2".to_vec()));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_list_range() {
        let mut list = ListValue::new();
        for i in 0..5 {
            list.push_back(i.to_string());
        }

        let range = list.range(1, 3);
        assert_eq!(range, vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]);

        assert_eq!(list.range(-2, -1).len(), 2);
        assert_eq!(list.range(0, 100).len(), 5);
        assert!(list.range(4, 1).is_empty());
    }

    #[test]
    fn test_set_operations() {
        let mut set = SetValue::new();

        assert!(set.insert("a"));
        assert!(set.insert("b"));
        assert!(!set.insert("a"));

        assert_eq!(set.len(), 2);
        assert!(set.contains("a"));
        assert!(!set.contains("c"));

        assert!(set.remove("a"));
        assert!(!set.remove("a"));
        assert_eq!(set.members(), vec!["b".to_string()]);
        assert_eq!(set.size_of(), 1 + 48 + 48);
    }

    #[test]
    fn test_hash_operations() {
        let mut hash = HashValue::new();

        assert!(hash.set("name", "John"));
        assert!(hash.set("age", "30"));
        assert!(!hash.set("age", "31"));

        assert_eq!(hash.len(), 2);
        assert!(hash.contains("name"));
        assert_eq!(hash.get("age"), Some(&b"31"[..]));

        assert!(hash.remove("age"));
        assert_eq!(hash.fields(), vec!["name".to_string()]);
        assert_eq!(hash.size_of(), 48 + 4 + 4 + 80);
    }

    #[test]
    fn test_clone_is_independent() {
        let mut hash = HashValue::new();
        hash.set("f", "v");
        let original = Value::Hash(hash);

        let mut copy = original.clone();
        if let Value::Hash(h) = &mut copy {
            h.set("g", "w");
        }

        assert_eq!(original.as_hash().unwrap().len(), 1);
        assert_eq!(copy.as_hash().unwrap().len(), 2);
    }

    #[test]
    fn test_empty_sizes() {
        assert_eq!(ListValue::new().size_of(), 24);
        assert_eq!(SetValue::new().size_of(), 48);
        assert_eq!(HashValue::new().size_of(), 48);
    }
}
