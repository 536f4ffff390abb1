// SPDX-License-Identifier: MIT OR Apache-2.0

//! Record types exchanged on the wire and their encoders/decoders.
//!
//! Field ids and value types are static data per record; required fields missing at decode time
//! surface as [`CodecError`](super::CodecError). The only messages peers ever exchange are
//! [`PreKeyBundle`] (out-of-band or via a directory), [`PreKeyMessage`] (first message of a
//! session) and [`MessageSigned`] (everything afterwards).
use chrono::{DateTime, Utc};

use crate::codec::{CodecError, FieldReader, FieldWriter};
use crate::crypto::ed25519::{Signature, VerifyingKey};
use crate::crypto::hmac::HMAC_TAG_SIZE;
use crate::crypto::x25519::PublicKey;

/// Public half of a peer identity: signing key, exchange key and the signature binding the
/// exchange key to the signing key.
///
/// Fields: 1 signing key, 2 exchange key, 3 signature, 4 creation date.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityRecord {
    pub signing_key: VerifyingKey,
    pub exchange_key: PublicKey,
    pub signature: Signature,
    pub created_at: DateTime<Utc>,
}

impl IdentityRecord {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = FieldWriter::new();
        writer.key(1, self.signing_key.as_bytes());
        writer.key(2, self.exchange_key.as_bytes());
        writer.bytes(3, self.signature.as_bytes());
        writer.date(4, &self.created_at);
        writer.finish()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let reader = FieldReader::parse("identity", bytes)?;
        Ok(Self {
            signing_key: VerifyingKey::from_bytes(reader.key(1)?),
            exchange_key: PublicKey::from_bytes(reader.key(2)?),
            signature: Signature::from_bytes(reader.signature(3)?),
            created_at: reader.date(4)?,
        })
    }
}

/// One-time pre-key: 1 id, 2 key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreKeyRecord {
    pub id: u32,
    pub key: PublicKey,
}

impl PreKeyRecord {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = FieldWriter::new();
        writer.uint32(1, self.id);
        writer.key(2, self.key.as_bytes());
        writer.finish()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let reader = FieldReader::parse("prekey", bytes)?;
        Ok(Self {
            id: reader.uint32(1)?,
            key: PublicKey::from_bytes(reader.key(2)?),
        })
    }
}

/// Signed pre-key, extending the pre-key layout with 3 signature (over the 32 key bytes).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedPreKeyRecord {
    pub id: u32,
    pub key: PublicKey,
    pub signature: Signature,
}

impl SignedPreKeyRecord {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = FieldWriter::new();
        writer.uint32(1, self.id);
        writer.key(2, self.key.as_bytes());
        writer.bytes(3, self.signature.as_bytes());
        writer.finish()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let reader = FieldReader::parse("prekey_signed", bytes)?;
        Ok(Self {
            id: reader.uint32(1)?,
            key: PublicKey::from_bytes(reader.key(2)?),
            signature: Signature::from_bytes(reader.signature(3)?),
        })
    }
}

/// Everything a peer publishes so others can open sessions towards them.
///
/// Fields: 1 registration id, 2 identity, 3 optional one-time pre-key, 4 signed pre-key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreKeyBundle {
    pub registration_id: u32,
    pub identity: IdentityRecord,
    pub prekey: Option<PreKeyRecord>,
    pub signed_prekey: SignedPreKeyRecord,
}

impl PreKeyBundle {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = FieldWriter::new();
        writer.uint32(1, self.registration_id);
        writer.record(2, &self.identity.to_bytes());
        if let Some(prekey) = &self.prekey {
            writer.record(3, &prekey.to_bytes());
        }
        writer.record(4, &self.signed_prekey.to_bytes());
        writer.finish()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let reader = FieldReader::parse("prekey_bundle", bytes)?;
        let prekey = match reader.has(3) {
            true => Some(PreKeyRecord::from_bytes(reader.record(3)?)?),
            false => None,
        };
        Ok(Self {
            registration_id: reader.uint32(1)?,
            identity: IdentityRecord::from_bytes(reader.record(2)?)?,
            prekey,
            signed_prekey: SignedPreKeyRecord::from_bytes(reader.record(4)?)?,
        })
    }
}

/// Inner ratchet message: 1 sender ratchet key, 2 counter, 3 previous counter, 4 ciphertext.
///
/// `previous_counter` carries the sender's DH rotation count at encryption time; receivers use
/// it for the too-old window check only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub sender_ratchet_key: PublicKey,
    pub counter: u32,
    pub previous_counter: u32,
    pub ciphertext: Vec<u8>,
}

impl Message {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = FieldWriter::new();
        writer.key(1, self.sender_ratchet_key.as_bytes());
        writer.uint32(2, self.counter);
        writer.uint32(3, self.previous_counter);
        writer.bytes(4, &self.ciphertext);
        writer.finish()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let reader = FieldReader::parse("message", bytes)?;
        Ok(Self {
            sender_ratchet_key: PublicKey::from_bytes(reader.key(1)?),
            counter: reader.uint32(2)?,
            previous_counter: reader.uint32(3)?,
            ciphertext: reader.bytes(4)?.to_vec(),
        })
    }

    /// Associated data bound into the AEAD: big-endian counter and previous counter.
    pub fn header_binding(&self) -> [u8; 8] {
        let mut aad = [0u8; 8];
        aad[..4].copy_from_slice(&self.counter.to_be_bytes());
        aad[4..].copy_from_slice(&self.previous_counter.to_be_bytes());
        aad
    }
}

/// Authenticated envelope around [`Message`]: 1 sender signing key, 2 message, 3 tag.
///
/// The tag is HMAC-SHA-256 (not Ed25519) over `receiver signing key ‖ sender signing key ‖
/// encode(message)`, keyed by the per-message HMAC key. The receiver key is not carried on the
/// wire; each endpoint supplies its own signing public key when verifying, binding the tag to
/// the intended recipient.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageSigned {
    pub sender_key: VerifyingKey,
    pub message: Message,
    pub signature: [u8; HMAC_TAG_SIZE],
}

impl MessageSigned {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = FieldWriter::new();
        writer.key(1, self.sender_key.as_bytes());
        writer.record(2, &self.message.to_bytes());
        writer.bytes(3, &self.signature);
        writer.finish()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let reader = FieldReader::parse("message_signed", bytes)?;
        Ok(Self {
            sender_key: VerifyingKey::from_bytes(reader.key(1)?),
            message: Message::from_bytes(reader.record(2)?)?,
            signature: reader.tag(3)?,
        })
    }
}

/// First-message envelope carrying everything the responder needs to complete X3DH.
///
/// Fields: 1 registration id, 2 optional one-time pre-key id, 3 signed pre-key id, 4 base key,
/// 5 identity, 6 signed message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreKeyMessage {
    pub registration_id: u32,
    pub prekey_id: Option<u32>,
    pub signed_prekey_id: u32,
    pub base_key: PublicKey,
    pub identity: IdentityRecord,
    pub signed_message: MessageSigned,
}

impl PreKeyMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = FieldWriter::new();
        writer.uint32(1, self.registration_id);
        if let Some(prekey_id) = self.prekey_id {
            writer.uint32(2, prekey_id);
        }
        writer.uint32(3, self.signed_prekey_id);
        writer.key(4, self.base_key.as_bytes());
        writer.record(5, &self.identity.to_bytes());
        writer.record(6, &self.signed_message.to_bytes());
        writer.finish()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let reader = FieldReader::parse("prekey_message", bytes)?;
        Ok(Self {
            registration_id: reader.uint32(1)?,
            prekey_id: reader.optional_uint32(2)?,
            signed_prekey_id: reader.uint32(3)?,
            base_key: PublicKey::from_bytes(reader.key(4)?),
            identity: IdentityRecord::from_bytes(reader.record(5)?)?,
            signed_message: MessageSigned::from_bytes(reader.record(6)?)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use crate::codec::CodecError;
    use crate::crypto::ed25519::{Signature, SigningKey};
    use crate::crypto::x25519::SecretKey;
    use crate::engine::CryptoEngine;

    use super::{
        IdentityRecord, Message, MessageSigned, PreKeyBundle, PreKeyMessage, PreKeyRecord,
        SignedPreKeyRecord,
    };

    fn test_identity(engine: &CryptoEngine) -> IdentityRecord {
        let signing_key = SigningKey::from_bytes(engine.random_array().unwrap());
        let exchange_secret = SecretKey::from_bytes(engine.random_array().unwrap());
        let exchange_key = exchange_secret.public_key().unwrap();
        let signature = signing_key.sign(exchange_key.as_bytes()).unwrap();
        IdentityRecord {
            signing_key: signing_key.verifying_key(),
            exchange_key,
            signature,
            created_at: Utc.with_ymd_and_hms(2026, 8, 2, 9, 15, 4).unwrap(),
        }
    }

    fn test_message(engine: &CryptoEngine) -> Message {
        let ratchet_key = SecretKey::from_bytes(engine.random_array().unwrap())
            .public_key()
            .unwrap();
        Message {
            sender_ratchet_key: ratchet_key,
            counter: 3,
            previous_counter: 1,
            ciphertext: b"sealed bytes".to_vec(),
        }
    }

    #[test]
    fn identity_round_trip() {
        let engine = CryptoEngine::from_seed([1; 32]);
        let identity = test_identity(&engine);

        let decoded = IdentityRecord::from_bytes(&identity.to_bytes()).unwrap();
        assert_eq!(identity, decoded);
    }

    #[test]
    fn prekey_round_trips() {
        let engine = CryptoEngine::from_seed([2; 32]);
        let key = SecretKey::from_bytes(engine.random_array().unwrap())
            .public_key()
            .unwrap();

        let prekey = PreKeyRecord { id: 7, key };
        assert_eq!(prekey, PreKeyRecord::from_bytes(&prekey.to_bytes()).unwrap());

        let signed = SignedPreKeyRecord {
            id: 2,
            key,
            signature: Signature::from_bytes([9; 64]),
        };
        assert_eq!(
            signed,
            SignedPreKeyRecord::from_bytes(&signed.to_bytes()).unwrap()
        );
    }

    #[test]
    fn bundle_round_trip_with_and_without_one_time_prekey() {
        let engine = CryptoEngine::from_seed([3; 32]);
        let key = SecretKey::from_bytes(engine.random_array().unwrap())
            .public_key()
            .unwrap();

        let mut bundle = PreKeyBundle {
            registration_id: 1,
            identity: test_identity(&engine),
            prekey: Some(PreKeyRecord { id: 1, key }),
            signed_prekey: SignedPreKeyRecord {
                id: 1,
                key,
                signature: Signature::from_bytes([4; 64]),
            },
        };
        assert_eq!(bundle, PreKeyBundle::from_bytes(&bundle.to_bytes()).unwrap());

        bundle.prekey = None;
        assert_eq!(bundle, PreKeyBundle::from_bytes(&bundle.to_bytes()).unwrap());
    }

    #[test]
    fn message_round_trip_and_header_binding() {
        let engine = CryptoEngine::from_seed([4; 32]);
        let message = test_message(&engine);

        assert_eq!(message, Message::from_bytes(&message.to_bytes()).unwrap());
        assert_eq!(message.header_binding(), [0, 0, 0, 3, 0, 0, 0, 1]);
    }

    #[test]
    fn signed_message_and_prekey_message_round_trip() {
        let engine = CryptoEngine::from_seed([5; 32]);
        let identity = test_identity(&engine);

        let signed = MessageSigned {
            sender_key: identity.signing_key,
            message: test_message(&engine),
            signature: [7; 32],
        };
        assert_eq!(
            signed,
            MessageSigned::from_bytes(&signed.to_bytes()).unwrap()
        );

        let base_key = SecretKey::from_bytes(engine.random_array().unwrap())
            .public_key()
            .unwrap();
        let mut prekey_message = PreKeyMessage {
            registration_id: 2,
            prekey_id: Some(1),
            signed_prekey_id: 1,
            base_key,
            identity,
            signed_message: signed,
        };
        assert_eq!(
            prekey_message,
            PreKeyMessage::from_bytes(&prekey_message.to_bytes()).unwrap()
        );

        prekey_message.prekey_id = None;
        assert_eq!(
            prekey_message,
            PreKeyMessage::from_bytes(&prekey_message.to_bytes()).unwrap()
        );
    }

    #[test]
    fn missing_required_field_is_rejected() {
        // A message record without its ciphertext field.
        let engine = CryptoEngine::from_seed([6; 32]);
        let ratchet_key = SecretKey::from_bytes(engine.random_array().unwrap())
            .public_key()
            .unwrap();

        let mut writer = crate::codec::FieldWriter::new();
        writer.key(1, ratchet_key.as_bytes());
        writer.uint32(2, 0);
        writer.uint32(3, 0);
        let bytes = writer.finish();

        assert!(matches!(
            Message::from_bytes(&bytes),
            Err(CodecError::MissingField { id: 4, .. })
        ));
    }

    #[test]
    fn reencoding_reorders_fields_canonically() {
        let engine = CryptoEngine::from_seed([7; 32]);
        let message = test_message(&engine);
        let canonical = message.to_bytes();

        // Rebuild the same record with its fields permuted: counter before ratchet key.
        let mut shuffled = Vec::new();
        for id in [2u32, 1, 3, 4, 0] {
            let value: Vec<u8> = match id {
                0 => 1u32.to_le_bytes().to_vec(),
                1 => message.sender_ratchet_key.as_bytes().to_vec(),
                2 => message.counter.to_le_bytes().to_vec(),
                3 => message.previous_counter.to_le_bytes().to_vec(),
                4 => message.ciphertext.clone(),
                _ => unreachable!(),
            };
            shuffled.extend_from_slice(&id.to_le_bytes());
            shuffled.extend_from_slice(&(value.len() as u32).to_le_bytes());
            shuffled.extend_from_slice(&value);
        }

        let decoded = Message::from_bytes(&shuffled).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded.to_bytes(), canonical);
    }

    #[test]
    fn truncated_signature_is_rejected() {
        let engine = CryptoEngine::from_seed([8; 32]);
        let identity = test_identity(&engine);

        let mut writer = crate::codec::FieldWriter::new();
        writer.key(1, identity.signing_key.as_bytes());
        writer.key(2, identity.exchange_key.as_bytes());
        writer.bytes(3, &identity.signature.as_bytes()[..32]);
        writer.date(4, &identity.created_at);
        let bytes = writer.finish();

        assert!(matches!(
            IdentityRecord::from_bytes(&bytes),
            Err(CodecError::InvalidFieldLength { id: 3, .. })
        ));
    }
}
