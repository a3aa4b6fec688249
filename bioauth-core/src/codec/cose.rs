//! COSE_Key encoding (RFC 9052) for P-256 credential public keys.

use ciborium::value::Value;
use p256::elliptic_curve::sec1::ToEncodedPoint;

use super::CodecError;

/// COSE algorithm identifier for ECDSA P-256 with SHA-256.
pub const COSE_ALG_ES256: i64 = -7;

const COSE_KEY_KTY: i64 = 1;
const COSE_KEY_ALG: i64 = 3;
const COSE_EC2_CRV: i64 = -1;
const COSE_EC2_X: i64 = -2;
const COSE_EC2_Y: i64 = -3;
const COSE_KTY_EC2: i64 = 2;
const COSE_CRV_P256: i64 = 1;

/// Encode a SEC1 P-256 public key (compressed or uncompressed) as a COSE_Key.
pub fn encode_p256_public_key(sec1: &[u8]) -> Result<Vec<u8>, CodecError> {
    let key = p256::PublicKey::from_sec1_bytes(sec1)
        .map_err(|e| CodecError::InvalidPublicKey(format!("{e}")))?;
    let point = key.to_encoded_point(false);
    let x = point
        .x()
        .ok_or_else(|| CodecError::InvalidPublicKey("point at infinity".into()))?;
    let y = point
        .y()
        .ok_or_else(|| CodecError::InvalidPublicKey("missing y coordinate".into()))?;

    let map = Value::Map(vec![
        (Value::Integer(COSE_KEY_KTY.into()), Value::Integer(COSE_KTY_EC2.into())),
        (Value::Integer(COSE_KEY_ALG.into()), Value::Integer(COSE_ALG_ES256.into())),
        (Value::Integer(COSE_EC2_CRV.into()), Value::Integer(COSE_CRV_P256.into())),
        (Value::Integer(COSE_EC2_X.into()), Value::Bytes(x.to_vec())),
        (Value::Integer(COSE_EC2_Y.into()), Value::Bytes(y.to_vec())),
    ]);

    let mut out = Vec::new();
    ciborium::ser::into_writer(&map, &mut out).map_err(|e| CodecError::Cbor(e.to_string()))?;
    Ok(out)
}

/// Decode a COSE_Key back to an uncompressed SEC1 P-256 point.
pub fn decode_p256_public_key(cose: &[u8]) -> Result<Vec<u8>, CodecError> {
    let value: Value =
        ciborium::de::from_reader(cose).map_err(|e| CodecError::Cbor(e.to_string()))?;
    let entries = value
        .as_map()
        .ok_or_else(|| CodecError::InvalidPublicKey("COSE_Key is not a map".into()))?;

    let lookup = |label: i64| {
        entries.iter().find_map(|(k, v)| match k.as_integer() {
            Some(i) if i128::from(i) == i128::from(label) => Some(v),
            _ => None,
        })
    };

    let kty = lookup(COSE_KEY_KTY)
        .and_then(Value::as_integer)
        .map(i128::from);
    if kty != Some(i128::from(COSE_KTY_EC2)) {
        return Err(CodecError::InvalidPublicKey("unsupported key type".into()));
    }

    let x = lookup(COSE_EC2_X)
        .and_then(Value::as_bytes)
        .ok_or_else(|| CodecError::InvalidPublicKey("missing x coordinate".into()))?;
    let y = lookup(COSE_EC2_Y)
        .and_then(Value::as_bytes)
        .ok_or_else(|| CodecError::InvalidPublicKey("missing y coordinate".into()))?;

    let mut sec1 = Vec::with_capacity(1 + x.len() + y.len());
    sec1.push(0x04);
    sec1.extend_from_slice(x);
    sec1.extend_from_slice(y);

    p256::PublicKey::from_sec1_bytes(&sec1)
        .map_err(|e| CodecError::InvalidPublicKey(format!("{e}")))?;
    Ok(sec1)
}
