use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bson::{Bson, Document};
use crate::error::kinds::{ErrorDomain, ServerError};

/// Structured error information extracted from a command reply.
///
/// This is intended to be serialized to JSON and consumed by other
/// components (e.g. logging, APIs).
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub(crate) error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) message: Option<String>,
}

impl ErrorInfo {
    /// Convert error info to pretty-printed JSON string.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Convert error info to compact JSON string (single line).
    pub fn to_json_compact(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A single failed item in a bulk write, as reported in `writeErrors`.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteError {
    /// Index of the failed item in the caller's input order.
    pub index: usize,

    /// Server error code.
    pub code: i32,

    /// Server error message.
    pub message: String,
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Write error at index {} (code {}): {}",
            self.index, self.code, self.message
        )
    }
}

/// Check a command reply for a top-level failure.
///
/// Returns the `ServerError` for an `{ok: 0}` reply, `None` when the
/// command succeeded at the top level. Per-item write errors are not
/// top-level failures and are read separately via [`extract_write_errors`].
pub fn check_reply(reply: &Document) -> Option<ServerError> {
    let ok = match reply.get("ok") {
        Some(Bson::Double(v)) => *v != 0.0,
        Some(Bson::Int32(v)) => *v != 0,
        Some(Bson::Int64(v)) => *v != 0,
        // A reply without an `ok` field is treated as success; the raw
        // document is still handed back to the caller untouched.
        _ => true,
    };

    if ok {
        return None;
    }

    let code = reply.get_i32("code").unwrap_or(0);
    let message = reply
        .get_str("errmsg")
        .unwrap_or("unknown server error")
        .to_string();

    Some(ServerError {
        domain: ErrorDomain::Command,
        code,
        message,
    })
}

/// Extract per-item write errors from a reply's `writeErrors` array.
pub fn extract_write_errors(reply: &Document) -> Vec<WriteError> {
    let mut errors = Vec::new();

    if let Some(Bson::Array(items)) = reply.get("writeErrors") {
        for item in items {
            if let Bson::Document(doc) = item {
                errors.push(WriteError {
                    index: doc.get_i32("index").unwrap_or(0) as usize,
                    code: doc.get_i32("code").unwrap_or(0),
                    message: doc.get_str("errmsg").unwrap_or("").to_string(),
                });
            }
        }
    }

    errors
}

/// Extract a write-concern error from a reply, if present.
pub fn extract_write_concern_error(reply: &Document) -> Option<ServerError> {
    if let Some(Bson::Document(doc)) = reply.get("writeConcernError") {
        return Some(ServerError {
            domain: ErrorDomain::WriteConcern,
            code: doc.get_i32("code").unwrap_or(0),
            message: doc.get_str("errmsg").unwrap_or("").to_string(),
        });
    }
    None
}

/// Build serializable error info from a server error.
pub fn error_info(error: &ServerError) -> ErrorInfo {
    let error_type = match error.domain {
        ErrorDomain::Command => "mongo.command_error",
        ErrorDomain::Write => "mongo.write_error",
        ErrorDomain::WriteConcern => "mongo.write_concern_error",
    };

    let mut message = error.message.clone();
    // Simplify message for known error types to avoid redundancy.
    if error.code == 11000 || error.code == 11001 {
        message = "Duplicate key error".to_string();
    }

    ErrorInfo {
        error_type: Some(error_type.to_string()),
        code: Some(error.code),
        name: get_error_name(error.code),
        message: Some(message),
    }
}

/// Get a human-readable error name from a MongoDB error code.
pub fn get_error_name(code: i32) -> Option<String> {
    let name = match code {
        11000 | 11001 => "DuplicateKey",
        13 => "Unauthorized",
        18 => "AuthenticationFailed",
        26 => "NamespaceNotFound",
        50 => "MaxTimeMSExpired",
        112 => "WriteConflict",
        121 => "DocumentValidationFailure",
        251 => "NoSuchTransaction",
        _ => return None,
    };

    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_reply_ok() {
        let mut reply = Document::new();
        reply.append("ok", Bson::Double(1.0));
        assert!(check_reply(&reply).is_none());
    }

    #[test]
    fn test_check_reply_failure() {
        let mut reply = Document::new();
        reply.append("ok", Bson::Double(0.0));
        reply.append("code", Bson::Int32(26));
        reply.append("errmsg", Bson::String("ns not found".to_string()));

        let err = check_reply(&reply).unwrap();
        assert_eq!(err.domain, ErrorDomain::Command);
        assert_eq!(err.code, 26);
        assert_eq!(err.message, "ns not found");
    }

    #[test]
    fn test_extract_write_errors() {
        let mut item = Document::new();
        item.append("index", Bson::Int32(2));
        item.append("code", Bson::Int32(11000));
        item.append("errmsg", Bson::String("E11000 duplicate key".to_string()));

        let mut reply = Document::new();
        reply.append("ok", Bson::Double(1.0));
        reply.append("writeErrors", Bson::Array(vec![Bson::Document(item)]));

        let errors = extract_write_errors(&reply);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].index, 2);
        assert_eq!(errors[0].code, 11000);
    }

    #[test]
    fn test_extract_write_concern_error() {
        let mut concern = Document::new();
        concern.append("code", Bson::Int32(64));
        concern.append(
            "errmsg",
            Bson::String("waiting for replication timed out".to_string()),
        );

        let mut reply = Document::new();
        reply.append("ok", Bson::Double(1.0));
        reply.append("n", Bson::Int32(1));
        reply.append("writeConcernError", Bson::Document(concern));

        let err = extract_write_concern_error(&reply).unwrap();
        assert_eq!(err.domain, ErrorDomain::WriteConcern);
        assert_eq!(err.code, 64);

        // An acknowledged reply without the block yields nothing.
        let clean = Document::new().with("ok", 1.0f64);
        assert!(extract_write_concern_error(&clean).is_none());
    }

    #[test]
    fn test_error_info_json() {
        let err = ServerError {
            domain: ErrorDomain::Write,
            code: 11000,
            message: "E11000 duplicate key error, dup key: x".to_string(),
        };
        let info = error_info(&err);
        let json = info.to_json_compact().unwrap();
        assert!(json.contains("\"type\":\"mongo.write_error\""));
        assert!(json.contains("\"code\":11000"));
        assert!(json.contains("\"name\":\"DuplicateKey\""));
        // Known duplicate-key codes get the simplified message.
        assert!(json.contains("\"message\":\"Duplicate key error\""));

        // Pretty output carries the same fields across multiple lines.
        let pretty = info.to_json().unwrap();
        assert!(pretty.contains('\n'));
        assert!(pretty.contains("\"code\": 11000"));
    }

    #[test]
    fn test_error_name_table() {
        assert_eq!(get_error_name(11000).as_deref(), Some("DuplicateKey"));
        assert_eq!(get_error_name(251).as_deref(), Some("NoSuchTransaction"));
        assert!(get_error_name(-1).is_none());
    }
}
