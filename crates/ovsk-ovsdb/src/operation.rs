//! Transaction operations (RFC 7047 section 5.2)

use serde_json::{json, Value};

use crate::datum::{Datum, Row};

/// Comparison used in `where` clauses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Equal,
    NotEqual,
    Includes,
    Excludes,
}

impl Function {
    fn as_str(&self) -> &'static str {
        match self {
            Function::Equal => "==",
            Function::NotEqual => "!=",
            Function::Includes => "includes",
            Function::Excludes => "excludes",
        }
    }
}

/// `[column, function, value]`
#[derive(Debug, Clone, PartialEq)]
pub struct Condition(pub String, pub Function, pub Datum);

impl Condition {
    pub fn eq(column: impl Into<String>, value: Datum) -> Self {
        Condition(column.into(), Function::Equal, value)
    }

    /// Match the row with the given uuid
    pub fn uuid(uuid: impl Into<String>) -> Self {
        Condition::eq("_uuid", Datum::uuid(uuid))
    }

    /// Match a row by its transaction-local name
    pub fn named_uuid(name: impl Into<String>) -> Self {
        Condition::eq("_uuid", Datum::named_uuid(name))
    }

    pub fn name(name: impl Into<String>) -> Self {
        Condition::eq("name", Datum::string(name))
    }

    fn to_json(&self) -> Value {
        json!([self.0, self.1.as_str(), Value::from(self.2.clone())])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutator {
    Insert,
    Delete,
}

impl Mutator {
    fn as_str(&self) -> &'static str {
        match self {
            Mutator::Insert => "insert",
            Mutator::Delete => "delete",
        }
    }
}

/// `[column, mutator, value]`
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation(pub String, pub Mutator, pub Datum);

impl Mutation {
    pub fn insert(column: impl Into<String>, value: Datum) -> Self {
        Mutation(column.into(), Mutator::Insert, value)
    }

    pub fn delete(column: impl Into<String>, value: Datum) -> Self {
        Mutation(column.into(), Mutator::Delete, value)
    }

    fn to_json(&self) -> Value {
        json!([self.0, self.1.as_str(), Value::from(self.2.clone())])
    }
}

/// One operation of a `transact` request
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Insert {
        table: String,
        row: Row,
        uuid_name: Option<String>,
    },
    Delete {
        table: String,
        conditions: Vec<Condition>,
    },
    Mutate {
        table: String,
        conditions: Vec<Condition>,
        mutations: Vec<Mutation>,
    },
    Select {
        table: String,
        conditions: Vec<Condition>,
    },
}

impl Operation {
    pub fn insert(table: impl Into<String>, row: Row, uuid_name: impl Into<String>) -> Self {
        Operation::Insert {
            table: table.into(),
            row,
            uuid_name: Some(uuid_name.into()),
        }
    }

    pub fn delete(table: impl Into<String>, conditions: Vec<Condition>) -> Self {
        Operation::Delete {
            table: table.into(),
            conditions,
        }
    }

    pub fn mutate(
        table: impl Into<String>,
        conditions: Vec<Condition>,
        mutations: Vec<Mutation>,
    ) -> Self {
        Operation::Mutate {
            table: table.into(),
            conditions,
            mutations,
        }
    }

    pub fn select(table: impl Into<String>, conditions: Vec<Condition>) -> Self {
        Operation::Select {
            table: table.into(),
            conditions,
        }
    }

    pub fn to_json(&self) -> Value {
        fn conds(conditions: &[Condition]) -> Vec<Value> {
            conditions.iter().map(Condition::to_json).collect()
        }

        match self {
            Operation::Insert {
                table,
                row,
                uuid_name,
            } => {
                let mut op = json!({
                    "op": "insert",
                    "table": table,
                    "row": Value::from(row.clone()),
                });
                if let Some(name) = uuid_name {
                    op["uuid-name"] = Value::String(name.clone());
                }
                op
            }
            Operation::Delete { table, conditions } => json!({
                "op": "delete",
                "table": table,
                "where": conds(conditions),
            }),
            Operation::Mutate {
                table,
                conditions,
                mutations,
            } => json!({
                "op": "mutate",
                "table": table,
                "where": conds(conditions),
                "mutations": mutations.iter().map(Mutation::to_json).collect::<Vec<_>>(),
            }),
            Operation::Select { table, conditions } => json!({
                "op": "select",
                "table": table,
                "where": conds(conditions),
            }),
        }
    }
}

/// Turn an arbitrary name into a valid `uuid-name` (`[_a-zA-Z][_a-zA-Z0-9]*`)
pub fn sanitize_uuid_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if !out.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        out.insert(0, '_');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_insert_json() {
        let op = Operation::insert(
            "Bridge",
            Row::new().with("name", Datum::string("br0")),
            "br0",
        );
        assert_eq!(
            op.to_json(),
            json!({"op": "insert", "table": "Bridge", "row": {"name": "br0"}, "uuid-name": "br0"})
        );
    }

    #[test]
    fn test_mutate_json() {
        let op = Operation::mutate(
            "Open_vSwitch",
            vec![Condition::uuid("abc")],
            vec![Mutation::insert(
                "bridges",
                Datum::set([crate::datum::Atom::named_uuid("br0")]),
            )],
        );
        assert_eq!(
            op.to_json(),
            json!({
                "op": "mutate",
                "table": "Open_vSwitch",
                "where": [["_uuid", "==", ["uuid", "abc"]]],
                "mutations": [["bridges", "insert", ["set", [["named-uuid", "br0"]]]]]
            })
        );
    }

    #[test]
    fn test_sanitize_uuid_name() {
        assert_eq!(sanitize_uuid_name("tun192_168_1_5"), "tun192_168_1_5");
        assert_eq!(sanitize_uuid_name("veth-1.a"), "veth_1_a");
        assert_eq!(sanitize_uuid_name("9abc"), "_9abc");
    }
}
