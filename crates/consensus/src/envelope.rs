//! Signed gossip envelopes
//!
//! Every frame on the wire is one JSON envelope signed by its originator.
//! The signed bytes are the envelope re-serialized with `sign` cleared and
//! absent optional fields omitted, in declaration field order; receivers
//! re-serialize the parsed struct the same way, so both sides hash
//! identical bytes without trusting the sender's formatting.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use stakemesh_crypto::{sha256_hex, verify_digest_hex, KeyPair};

/// The seven protocol message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    GetChain,
    Chain,
    Validators,
    Validator,
    HelloValidator,
    NewTransaction,
    Transaction,
}

/// One gossip frame: `{ type, data?, for?, id, key, sign }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(rename = "for", default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    pub id: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign: Option<String>,
}

impl Envelope {
    /// Build an unsigned envelope with a fresh message id.
    pub fn new(kind: MessageKind, data: Option<Value>, recipient: Option<String>, key: String) -> Self {
        Self {
            kind,
            data,
            recipient,
            id: Uuid::new_v4().to_string(),
            key,
            sign: None,
        }
    }

    /// Canonical bytes covered by the signature.
    pub fn signing_bytes(&self) -> String {
        let unsigned = Self {
            sign: None,
            ..self.clone()
        };
        serde_json::to_string(&unsigned).expect("envelope serialization should not fail")
    }

    /// Sign the envelope with the node key.
    pub fn sign(&mut self, keypair: &KeyPair) -> stakemesh_crypto::Result<()> {
        let digest = sha256_hex(&self.signing_bytes());
        self.sign = Some(keypair.sign_digest_hex(&digest)?);
        Ok(())
    }

    /// True iff `sign` verifies under `key` over the canonical bytes.
    pub fn verify(&self) -> bool {
        match &self.sign {
            Some(signature) => {
                verify_digest_hex(&self.key, &sha256_hex(&self.signing_bytes()), signature)
            }
            None => false,
        }
    }
}

/// `CHAIN` payload: a snapshot of committed records and the Merkle root
/// over them. `transactions` is itself a JSON string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainData {
    pub transactions: String,
    pub root: String,
}

/// `TRANSACTION` payload: one validator's vote on the current candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteData {
    pub transaction: String,
    pub valid: bool,
    pub root: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_uses_protocol_field_names() {
        let mut envelope = Envelope::new(
            MessageKind::HelloValidator,
            Some(Value::String("abc".into())),
            Some("def".into()),
            "sender-key".into(),
        );
        let keypair = KeyPair::generate();
        envelope.key = keypair.public_key_hex();
        envelope.sign(&keypair).unwrap();

        let wire = serde_json::to_string(&envelope).unwrap();
        assert!(wire.contains(r#""type":"HELLO_VALIDATOR""#));
        assert!(wire.contains(r#""for":"def""#));
        assert!(wire.contains(r#""sign":"#));
        assert!(!wire.contains("recipient"));
        assert!(!wire.contains("kind"));
    }

    #[test]
    fn envelope_roundtrip() {
        let keypair = KeyPair::generate();
        let mut envelope = Envelope::new(
            MessageKind::GetChain,
            None,
            None,
            keypair.public_key_hex(),
        );
        envelope.sign(&keypair).unwrap();

        let wire = serde_json::to_string(&envelope).unwrap();
        let parsed: Envelope = serde_json::from_str(&wire).unwrap();
        assert_eq!(parsed, envelope);
        assert!(parsed.verify());
    }

    #[test]
    fn signing_bytes_are_stable_across_reparse() {
        let keypair = KeyPair::generate();
        let mut envelope = Envelope::new(
            MessageKind::Transaction,
            Some(serde_json::to_value(VoteData {
                transaction: "{}".into(),
                valid: true,
                root: "00".into(),
            }).unwrap()),
            None,
            keypair.public_key_hex(),
        );
        envelope.sign(&keypair).unwrap();

        let reparsed: Envelope =
            serde_json::from_str(&serde_json::to_string(&envelope).unwrap()).unwrap();
        assert_eq!(reparsed.signing_bytes(), envelope.signing_bytes());
    }

    #[test]
    fn tampering_breaks_verification() {
        let keypair = KeyPair::generate();
        let mut envelope = Envelope::new(
            MessageKind::Validator,
            Some(Value::String(keypair.public_key_hex())),
            None,
            keypair.public_key_hex(),
        );
        envelope.sign(&keypair).unwrap();
        assert!(envelope.verify());

        let mut forged = envelope.clone();
        forged.data = Some(Value::String("other-key".into()));
        assert!(!forged.verify());

        let mut stolen = envelope.clone();
        stolen.key = KeyPair::generate().public_key_hex();
        assert!(!stolen.verify());

        let mut unsigned = envelope;
        unsigned.sign = None;
        assert!(!unsigned.verify());
    }
}
