//! OVSDB JSON-RPC 1.0 message types (RFC 7047 section 4)

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{OvsdbError, Result};

/// Database served by ovsdb-server for the switch
pub const DATABASE: &str = "Open_vSwitch";

/// Request methods
pub mod methods {
    pub const GET_SCHEMA: &str = "get_schema";
    pub const MONITOR: &str = "monitor";
    pub const TRANSACT: &str = "transact";
    pub const ECHO: &str = "echo";
    pub const UPDATE: &str = "update";
    pub const LOCKED: &str = "locked";
    pub const STOLEN: &str = "stolen";
}

/// Request or notification. Notifications carry a null id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

impl Request {
    pub fn new(method: impl Into<String>, params: Value, id: u64) -> Self {
        Self {
            method: method.into(),
            params,
            id: Value::from(id),
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
            id: Value::Null,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_null()
    }
}

/// Reply to a request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Value,
    pub id: Value,
}

impl Response {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            result,
            error: Value::Null,
            id,
        }
    }

    pub fn error(id: Value, error: impl Into<String>) -> Self {
        Self {
            result: Value::Null,
            error: Value::String(error.into()),
            id,
        }
    }

    /// Unwrap the result, turning a non-null error into `Rpc`
    pub fn into_result(self, method: &str) -> Result<Value> {
        if self.error.is_null() {
            Ok(self.result)
        } else {
            Err(OvsdbError::Rpc {
                method: method.to_string(),
                error: self.error.to_string(),
            })
        }
    }
}

/// Any message read off the wire
#[derive(Debug, Clone)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    /// Classify a JSON value: anything with a `method` is a request
    pub fn from_value(value: Value) -> Result<Self> {
        if value.get("method").is_some() {
            Ok(Message::Request(serde_json::from_value(value)?))
        } else if value.get("id").is_some() {
            Ok(Message::Response(serde_json::from_value(value)?))
        } else {
            Err(OvsdbError::Protocol(format!("unrecognized message: {}", value)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let req = Request::new(methods::ECHO, json!([]), 7);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"method\":\"echo\""));
        assert!(json.contains("\"id\":7"));
    }

    #[test]
    fn test_classify_update_notification() {
        let msg = Message::from_value(json!({
            "method": "update",
            "params": [null, {}],
            "id": null
        }))
        .unwrap();
        match msg {
            Message::Request(req) => assert!(req.is_notification()),
            _ => panic!("expected a request"),
        }
    }

    #[test]
    fn test_response_error() {
        let msg = Message::from_value(json!({"result": null, "error": "unknown method", "id": 3}))
            .unwrap();
        let Message::Response(resp) = msg else {
            panic!("expected a response");
        };
        let err = resp.into_result("frobnicate").unwrap_err();
        assert!(matches!(err, OvsdbError::Rpc { .. }));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(Message::from_value(json!({"hello": 1})).is_err());
    }
}
