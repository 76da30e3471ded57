//! OVSDB values (RFC 7047 section 5.1)
//!
//! Every column value is a [`Datum`]: a single atom, a set of atoms or a map.
//! A set of one element may appear on the wire as the bare atom, so the
//! accessors treat the two the same way.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{OvsdbError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum Atom {
    String(String),
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Uuid(String),
    /// Transaction-local row reference
    NamedUuid(String),
}

impl Atom {
    pub fn string(s: impl Into<String>) -> Self {
        Atom::String(s.into())
    }

    pub fn uuid(s: impl Into<String>) -> Self {
        Atom::Uuid(s.into())
    }

    pub fn named_uuid(s: impl Into<String>) -> Self {
        Atom::NamedUuid(s.into())
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Atom::String(s) => Ok(s),
            other => Err(OvsdbError::type_mismatch("string", other)),
        }
    }

    pub fn as_integer(&self) -> Result<i64> {
        match self {
            Atom::Integer(i) => Ok(*i),
            other => Err(OvsdbError::type_mismatch("integer", other)),
        }
    }

    pub fn as_uuid(&self) -> Result<&str> {
        match self {
            Atom::Uuid(u) => Ok(u),
            other => Err(OvsdbError::type_mismatch("uuid", other)),
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::String(s) | Atom::Uuid(s) | Atom::NamedUuid(s) => write!(f, "{}", s),
            Atom::Integer(i) => write!(f, "{}", i),
            Atom::Real(r) => write!(f, "{}", r),
            Atom::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl TryFrom<Value> for Atom {
    type Error = OvsdbError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(Atom::String(s)),
            Value::Bool(b) => Ok(Atom::Boolean(b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Atom::Integer(i)),
                None => n
                    .as_f64()
                    .map(Atom::Real)
                    .ok_or_else(|| OvsdbError::type_mismatch("number", n)),
            },
            Value::Array(pair) => match <[Value; 2]>::try_from(pair) {
                Ok([Value::String(tag), Value::String(id)]) if tag == "uuid" => Ok(Atom::Uuid(id)),
                Ok([Value::String(tag), Value::String(id)]) if tag == "named-uuid" => {
                    Ok(Atom::NamedUuid(id))
                }
                Ok(other) => Err(OvsdbError::type_mismatch("atom", other)),
                Err(other) => Err(OvsdbError::type_mismatch("atom", other)),
            },
            other => Err(OvsdbError::type_mismatch("atom", other)),
        }
    }
}

impl From<Atom> for Value {
    fn from(atom: Atom) -> Self {
        match atom {
            Atom::String(s) => Value::String(s),
            Atom::Integer(i) => Value::from(i),
            Atom::Real(r) => Value::from(r),
            Atom::Boolean(b) => Value::Bool(b),
            Atom::Uuid(u) => json!(["uuid", u]),
            Atom::NamedUuid(u) => json!(["named-uuid", u]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum Datum {
    Atom(Atom),
    Set(Vec<Atom>),
    Map(Vec<(Atom, Atom)>),
}

impl Datum {
    pub fn string(s: impl Into<String>) -> Self {
        Datum::Atom(Atom::string(s))
    }

    pub fn integer(i: i64) -> Self {
        Datum::Atom(Atom::Integer(i))
    }

    pub fn boolean(b: bool) -> Self {
        Datum::Atom(Atom::Boolean(b))
    }

    pub fn uuid(u: impl Into<String>) -> Self {
        Datum::Atom(Atom::uuid(u))
    }

    pub fn named_uuid(u: impl Into<String>) -> Self {
        Datum::Atom(Atom::named_uuid(u))
    }

    pub fn set(atoms: impl IntoIterator<Item = Atom>) -> Self {
        Datum::Set(atoms.into_iter().collect())
    }

    pub fn empty_set() -> Self {
        Datum::Set(Vec::new())
    }

    /// String-to-string map, the shape of `external_ids` and `options`
    pub fn string_map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Datum::Map(
            entries
                .into_iter()
                .map(|(k, v)| (Atom::String(k.into()), Atom::String(v.into())))
                .collect(),
        )
    }

    /// True for an empty set or empty map
    pub fn is_empty(&self) -> bool {
        match self {
            Datum::Atom(_) => false,
            Datum::Set(atoms) => atoms.is_empty(),
            Datum::Map(entries) => entries.is_empty(),
        }
    }

    /// The single atom, unwrapping a one-element set
    pub fn as_atom(&self) -> Result<&Atom> {
        match self {
            Datum::Atom(atom) => Ok(atom),
            Datum::Set(atoms) if atoms.len() == 1 => Ok(&atoms[0]),
            other => Err(OvsdbError::type_mismatch("single atom", other)),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        self.as_atom()?.as_str()
    }

    /// Integer value; an empty set (unassigned column) is an error
    pub fn as_integer(&self) -> Result<i64> {
        self.as_atom()?.as_integer()
    }

    pub fn as_uuid(&self) -> Result<&str> {
        self.as_atom()?.as_uuid()
    }

    /// Members of a set; a bare atom is a set of one
    pub fn as_set(&self) -> Result<Vec<&Atom>> {
        match self {
            Datum::Atom(atom) => Ok(vec![atom]),
            Datum::Set(atoms) => Ok(atoms.iter().collect()),
            other => Err(OvsdbError::type_mismatch("set", other)),
        }
    }

    pub fn as_uuid_set(&self) -> Result<Vec<&str>> {
        self.as_set()?.into_iter().map(Atom::as_uuid).collect()
    }

    pub fn as_string_map(&self) -> Result<BTreeMap<String, String>> {
        match self {
            Datum::Map(entries) => entries
                .iter()
                .map(|(k, v)| Ok((k.as_str()?.to_string(), v.as_str()?.to_string())))
                .collect(),
            Datum::Set(atoms) if atoms.is_empty() => Ok(BTreeMap::new()),
            other => Err(OvsdbError::type_mismatch("map", other)),
        }
    }
}

impl From<Atom> for Datum {
    fn from(atom: Atom) -> Self {
        Datum::Atom(atom)
    }
}

impl TryFrom<Value> for Datum {
    type Error = OvsdbError;

    fn try_from(value: Value) -> Result<Self> {
        if let Value::Array(items) = &value {
            if let [Value::String(tag), Value::Array(inner)] = items.as_slice() {
                match tag.as_str() {
                    "set" => {
                        let atoms = inner
                            .iter()
                            .cloned()
                            .map(Atom::try_from)
                            .collect::<Result<Vec<_>>>()?;
                        return Ok(Datum::Set(atoms));
                    }
                    "map" => {
                        let entries = inner
                            .iter()
                            .map(|pair| match pair {
                                Value::Array(kv) if kv.len() == 2 => Ok((
                                    Atom::try_from(kv[0].clone())?,
                                    Atom::try_from(kv[1].clone())?,
                                )),
                                other => Err(OvsdbError::type_mismatch("map entry", other)),
                            })
                            .collect::<Result<Vec<_>>>()?;
                        return Ok(Datum::Map(entries));
                    }
                    _ => {}
                }
            }
        }
        Atom::try_from(value).map(Datum::Atom)
    }
}

impl From<Datum> for Value {
    fn from(datum: Datum) -> Self {
        match datum {
            Datum::Atom(atom) => atom.into(),
            Datum::Set(atoms) => {
                json!(["set", atoms.into_iter().map(Value::from).collect::<Vec<_>>()])
            }
            Datum::Map(entries) => json!([
                "map",
                entries
                    .into_iter()
                    .map(|(k, v)| json!([Value::from(k), Value::from(v)]))
                    .collect::<Vec<_>>()
            ]),
        }
    }
}

/// Column values of one row
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(pub BTreeMap<String, Datum>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: Datum) -> Self {
        self.0.insert(column.into(), value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&Datum> {
        self.0.get(column)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// String column, or `TypeMismatch`/`NotFound`
    pub fn string(&self, column: &str) -> Result<&str> {
        self.get(column)
            .ok_or_else(|| OvsdbError::not_found("column", column))?
            .as_str()
    }

    pub fn name(&self) -> Option<&str> {
        self.string("name").ok()
    }

    /// A string-map column, empty when missing
    pub fn string_map(&self, column: &str) -> BTreeMap<String, String> {
        self.get(column)
            .and_then(|d| d.as_string_map().ok())
            .unwrap_or_default()
    }

    pub fn external_ids(&self) -> BTreeMap<String, String> {
        self.string_map("external_ids")
    }

    pub fn options(&self) -> BTreeMap<String, String> {
        self.string_map("options")
    }

    /// Assigned OpenFlow port number, if the column is a number yet
    pub fn of_port(&self) -> Option<i64> {
        self.get("ofport").and_then(|d| d.as_integer().ok())
    }

    /// Uuids referenced by a set-of-references column
    pub fn uuid_refs(&self, column: &str) -> Vec<String> {
        self.get(column)
            .and_then(|d| d.as_uuid_set().ok())
            .map(|ids| ids.into_iter().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

impl From<Row> for Value {
    fn from(row: Row) -> Self {
        Value::Object(row.0.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl TryFrom<Value> for Row {
    type Error = OvsdbError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(columns) => columns
                .into_iter()
                .map(|(k, v)| Ok((k, Datum::try_from(v)?)))
                .collect::<Result<BTreeMap<_, _>>>()
                .map(Row),
            Value::Null => Ok(Row::new()),
            other => Err(OvsdbError::type_mismatch("row object", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_bare_atom_is_a_set_of_one() {
        let d = Datum::try_from(json!(["uuid", "2f0b"])).unwrap();
        assert_eq!(d.as_uuid_set().unwrap(), vec!["2f0b"]);
        assert_eq!(d.as_uuid().unwrap(), "2f0b");
    }

    #[test]
    fn test_set_of_uuids() {
        let d = Datum::try_from(json!(["set", [["uuid", "a"], ["uuid", "b"]]])).unwrap();
        assert_eq!(d.as_uuid_set().unwrap(), vec!["a", "b"]);
        assert!(d.as_uuid().is_err());
    }

    #[test]
    fn test_empty_ofport_is_not_an_integer() {
        let d = Datum::try_from(json!(["set", []])).unwrap();
        assert!(d.is_empty());
        assert!(matches!(
            d.as_integer(),
            Err(OvsdbError::TypeMismatch { .. })
        ));
        assert_eq!(Datum::try_from(json!(7)).unwrap().as_integer().unwrap(), 7);
    }

    #[test]
    fn test_string_map() {
        let d = Datum::try_from(json!([
            "map",
            [["iface-id", "default:web-0"], ["attached-mac", "0a:58:0a:f4:00:07"]]
        ]))
        .unwrap();
        let map = d.as_string_map().unwrap();
        assert_eq!(map["iface-id"], "default:web-0");
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_wire_encoding() {
        let value = Value::from(Datum::string_map([("key", "flow")]));
        assert_eq!(value, json!(["map", [["key", "flow"]]]));
        let value = Value::from(Datum::set([Atom::named_uuid("row1")]));
        assert_eq!(value, json!(["set", [["named-uuid", "row1"]]]));
    }

    #[test]
    fn test_row_from_monitor_json() {
        let row = Row::try_from(json!({
            "name": "p1",
            "ofport": 3,
            "external_ids": ["map", [["ip-address", "10.244.0.7"]]],
            "ports": ["set", []]
        }))
        .unwrap();
        assert_eq!(row.name(), Some("p1"));
        assert_eq!(row.of_port(), Some(3));
        assert_eq!(row.external_ids()["ip-address"], "10.244.0.7");
        assert!(row.uuid_refs("ports").is_empty());
    }

    #[test]
    fn test_malformed_values() {
        assert!(Datum::try_from(json!({"a": 1})).is_err());
        assert!(Datum::try_from(json!(["map", [["k"]]])).is_err());
        assert!(Row::try_from(json!([1, 2])).is_err());
    }
}
