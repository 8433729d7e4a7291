//! Participant identity and canonical-payload hashing.
//!
//! Four pure operations, mirrored directly from the signed-request contract:
//! derive a participant id from a public key, canonicalize a JSON payload for
//! hashing/signing, verify an Ed25519 signature over canonical bytes, and
//! build the domain-tagged signable bytes for a given operation.

use crate::error::HubError;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Operation-domain tags. A signature for one cannot be replayed as another
/// because the tag is folded into the signed bytes.
pub const OP_PARTICIPANT_CREATE: &str = "participant.create";
pub const OP_TRUSTLINE_CREATE: &str = "trustline.create";
pub const OP_TRUSTLINE_UPDATE: &str = "trustline.update";
pub const OP_TRUSTLINE_CLOSE: &str = "trustline.close";
pub const OP_PAYMENT_CREATE: &str = "payment.create";
pub const OP_CLEARING_ACCEPT: &str = "clearing.accept";

/// Derive a participant id from a 32-byte Ed25519 public key:
/// `base58(sha256(public_key))`.
pub fn derive_pid(public_key: &[u8; 32]) -> String {
    let digest = Sha256::digest(public_key);
    bs58::encode(digest).into_string()
}

/// Canonicalize a JSON payload: keys sorted lexicographically, no
/// whitespace, UTF-8, numbers in shortest faithful decimal form. Stable
/// across platforms because it never depends on map iteration order.
pub fn canonical_json(payload: &Value) -> Result<Vec<u8>, HubError> {
    let mut out = String::new();
    write_canonical(payload, &mut out)?;
    Ok(out.into_bytes())
}

fn write_canonical(value: &Value, out: &mut String) -> Result<(), HubError> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&canonical_number(n)?),
        Value::String(s) => out.push_str(&serde_json::to_string(s)?),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_canonical(&map[*key], out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

fn canonical_number(n: &serde_json::Number) -> Result<String, HubError> {
    if let Some(i) = n.as_i64() {
        return Ok(i.to_string());
    }
    if let Some(u) = n.as_u64() {
        return Ok(u.to_string());
    }
    let f = n
        .as_f64()
        .ok_or_else(|| HubError::Serialization("non-finite number in canonical payload".into()))?;
    if !f.is_finite() {
        return Err(HubError::Serialization(
            "non-finite number in canonical payload".into(),
        ));
    }
    // Shortest faithful decimal form: no trailing zeros, no exponent.
    let mut s = format!("{f}");
    if let Some(stripped) = s.strip_suffix(".0") {
        s = stripped.to_string();
    }
    if s.contains('e') || s.contains('E') {
        return Err(HubError::Serialization(
            "exponent form unsupported in canonical payload".into(),
        ));
    }
    Ok(s)
}

/// Prepend an operation-domain tag to a canonicalized payload so a signature
/// for one operation class cannot be replayed as another.
pub fn make_signable(payload: &Value, operation_type: &str) -> Result<Vec<u8>, HubError> {
    let tagged = serde_json::json!({ "op": operation_type, "payload": payload });
    canonical_json(&tagged)
}

/// Lowercase hex encoding, used for signatures/public keys on the wire.
pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Decode a lowercase (or uppercase) hex string. Returns `None` on odd
/// length or a non-hex digit.
pub fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

/// Verify an Ed25519 signature over canonical bytes.
pub fn verify_signature(
    public_key: &[u8; 32],
    canonical_bytes: &[u8],
    signature: &[u8; 64],
) -> Result<(), HubError> {
    let verifying_key = VerifyingKey::from_bytes(public_key)
        .map_err(|e| HubError::InvalidSignature(format!("malformed public key: {e}")))?;
    let sig = Signature::from_bytes(signature);
    verifying_key
        .verify(canonical_bytes, &sig)
        .map_err(|e| HubError::InvalidSignature(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    #[test]
    fn derive_pid_is_deterministic() {
        let key = [7u8; 32];
        assert_eq!(derive_pid(&key), derive_pid(&key));
    }

    #[test]
    fn derive_pid_differs_across_keys() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        assert_ne!(derive_pid(&a), derive_pid(&b));
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(canonical_json(&a).unwrap(), canonical_json(&b).unwrap());
    }

    #[test]
    fn canonical_json_round_trips() {
        let payload = serde_json::json!({"amount": 10, "to": "pid-b", "nested": {"z": 1, "a": 2}});
        let bytes = canonical_json(&payload).unwrap();
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(canonical_json(&parsed).unwrap(), bytes);
    }

    #[test]
    fn verify_signature_accepts_valid_and_rejects_tampered() {
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        let payload = serde_json::json!({"to": "pid-b", "amount": 100});
        let signable = make_signable(&payload, OP_PAYMENT_CREATE).unwrap();
        let signature = signing_key.sign(&signable);

        let public_key = signing_key.verifying_key().to_bytes();
        assert!(verify_signature(&public_key, &signable, &signature.to_bytes()).is_ok());

        let mut tampered = signable.clone();
        tampered.push(b'!');
        assert!(verify_signature(&public_key, &tampered, &signature.to_bytes()).is_err());
    }

    #[test]
    fn make_signable_binds_operation_tag() {
        let payload = serde_json::json!({"to": "pid-b"});
        let a = make_signable(&payload, OP_PAYMENT_CREATE).unwrap();
        let b = make_signable(&payload, OP_TRUSTLINE_CREATE).unwrap();
        assert_ne!(a, b);
    }
}
