//! Attestation objects: `{fmt, attStmt, authData}`.

use ciborium::value::Value;
use serde::{Deserialize, Serialize};

use super::{base64url, CodecError};

/// Wire encoding for attestation objects.
///
/// `Json` emits `{"fmt":..,"attStmt":{..},"authData":"<base64url>"}` for
/// backends that cannot parse CBOR; `Cbor` is the standard WebAuthn encoding
/// with `authData` as a byte string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttestationEncoding {
    #[default]
    Json,
    Cbor,
}

impl std::str::FromStr for AttestationEncoding {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "cbor" => Ok(Self::Cbor),
            other => Err(CodecError::Json(format!("unknown attestation encoding: {other}"))),
        }
    }
}

/// Attestation statement.
#[derive(Clone, PartialEq, Eq)]
pub enum AttestationStatement {
    /// `fmt: "none"` with an empty statement.
    None,
    /// `fmt: "packed"` self-attestation signed by the credential key.
    Packed { alg: i64, sig: Vec<u8> },
}

impl AttestationStatement {
    pub fn format(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Packed { .. } => "packed",
        }
    }
}

impl std::fmt::Debug for AttestationStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Packed { alg, sig } => f
                .debug_struct("Packed")
                .field("alg", alg)
                .field("sig_len", &sig.len())
                .finish(),
        }
    }
}

/// JSON form, serialized in `fmt, attStmt, authData` order.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonAttestationObject<'a> {
    fmt: &'a str,
    att_stmt: serde_json::Value,
    auth_data: String,
}

/// An attestation object prior to encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationObject {
    pub statement: AttestationStatement,
    pub auth_data: Vec<u8>,
}

impl AttestationObject {
    pub fn new(statement: AttestationStatement, auth_data: Vec<u8>) -> Self {
        Self {
            statement,
            auth_data,
        }
    }

    pub fn encode(&self, encoding: AttestationEncoding) -> Result<Vec<u8>, CodecError> {
        match encoding {
            AttestationEncoding::Json => self.encode_json(),
            AttestationEncoding::Cbor => self.encode_cbor(),
        }
    }

    fn encode_json(&self) -> Result<Vec<u8>, CodecError> {
        let att_stmt = match &self.statement {
            AttestationStatement::None => serde_json::json!({}),
            AttestationStatement::Packed { alg, sig } => serde_json::json!({
                "alg": alg,
                "sig": base64url::encode(sig),
            }),
        };
        let object = JsonAttestationObject {
            fmt: self.statement.format(),
            att_stmt,
            auth_data: base64url::encode(&self.auth_data),
        };
        serde_json::to_vec(&object).map_err(|e| CodecError::Json(e.to_string()))
    }

    fn encode_cbor(&self) -> Result<Vec<u8>, CodecError> {
        let att_stmt = match &self.statement {
            AttestationStatement::None => Value::Map(vec![]),
            AttestationStatement::Packed { alg, sig } => Value::Map(vec![
                (Value::Text("alg".into()), Value::Integer((*alg).into())),
                (Value::Text("sig".into()), Value::Bytes(sig.clone())),
            ]),
        };
        let object = Value::Map(vec![
            (
                Value::Text("fmt".into()),
                Value::Text(self.statement.format().into()),
            ),
            (Value::Text("attStmt".into()), att_stmt),
            (
                Value::Text("authData".into()),
                Value::Bytes(self.auth_data.clone()),
            ),
        ]);

        let mut out = Vec::new();
        ciborium::ser::into_writer(&object, &mut out)
            .map_err(|e| CodecError::Cbor(e.to_string()))?;
        Ok(out)
    }

    /// Decode an attestation object produced by [`encode`](Self::encode).
    pub fn decode(bytes: &[u8], encoding: AttestationEncoding) -> Result<Self, CodecError> {
        match encoding {
            AttestationEncoding::Json => Self::decode_json(bytes),
            AttestationEncoding::Cbor => Self::decode_cbor(bytes),
        }
    }

    fn decode_json(bytes: &[u8]) -> Result<Self, CodecError> {
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| CodecError::Json(e.to_string()))?;

        let auth_data = value["authData"]
            .as_str()
            .ok_or_else(|| CodecError::Json("missing authData".into()))
            .and_then(base64url::decode)?;

        let statement = match value["fmt"].as_str() {
            Some("none") => AttestationStatement::None,
            Some("packed") => {
                let alg = value["attStmt"]["alg"]
                    .as_i64()
                    .ok_or_else(|| CodecError::Json("missing attStmt.alg".into()))?;
                let sig = value["attStmt"]["sig"]
                    .as_str()
                    .ok_or_else(|| CodecError::Json("missing attStmt.sig".into()))
                    .and_then(base64url::decode)?;
                AttestationStatement::Packed { alg, sig }
            }
            other => {
                return Err(CodecError::Json(format!(
                    "unsupported attestation format: {other:?}"
                )))
            }
        };

        Ok(Self {
            statement,
            auth_data,
        })
    }

    fn decode_cbor(bytes: &[u8]) -> Result<Self, CodecError> {
        let value: Value =
            ciborium::de::from_reader(bytes).map_err(|e| CodecError::Cbor(e.to_string()))?;
        let entries = value
            .as_map()
            .ok_or_else(|| CodecError::Cbor("attestation object is not a map".into()))?;

        let field = |name: &str| {
            entries
                .iter()
                .find(|(k, _)| k.as_text() == Some(name))
                .map(|(_, v)| v)
        };

        let auth_data = field("authData")
            .and_then(Value::as_bytes)
            .cloned()
            .ok_or_else(|| CodecError::Cbor("missing authData".into()))?;

        let statement = match field("fmt").and_then(Value::as_text) {
            Some("none") => AttestationStatement::None,
            Some("packed") => {
                let stmt = field("attStmt")
                    .and_then(Value::as_map)
                    .ok_or_else(|| CodecError::Cbor("missing attStmt".into()))?;
                let get = |name: &str| {
                    stmt.iter()
                        .find(|(k, _)| k.as_text() == Some(name))
                        .map(|(_, v)| v)
                };
                let alg = get("alg")
                    .and_then(Value::as_integer)
                    .and_then(|i| i64::try_from(i).ok())
                    .ok_or_else(|| CodecError::Cbor("missing attStmt.alg".into()))?;
                let sig = get("sig")
                    .and_then(Value::as_bytes)
                    .cloned()
                    .ok_or_else(|| CodecError::Cbor("missing attStmt.sig".into()))?;
                AttestationStatement::Packed { alg, sig }
            }
            other => {
                return Err(CodecError::Cbor(format!(
                    "unsupported attestation format: {other:?}"
                )))
            }
        };

        Ok(Self {
            statement,
            auth_data,
        })
    }
}

/// Encode an attestation object.
pub fn encode_attestation_object(
    statement: AttestationStatement,
    auth_data: &[u8],
    encoding: AttestationEncoding,
) -> Result<Vec<u8>, CodecError> {
    AttestationObject::new(statement, auth_data.to_vec()).encode(encoding)
}
