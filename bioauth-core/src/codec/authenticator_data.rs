//! WebAuthn authenticator data.
//!
//! Layout: `rpIdHash (32) ‖ flags (1) ‖ signCount (4, big-endian)`, optionally
//! followed by attested credential data
//! `aaguid (16) ‖ credentialIdLength (2, big-endian) ‖ credentialId ‖ COSE_Key`.

use std::io::Cursor;

use super::{sha256, CodecError};

/// Length of authenticator data without attested credential data.
pub const AUTHENTICATOR_DATA_MIN_LEN: usize = 37;

const AAGUID_LEN: usize = 16;

/// Authenticator data flag bits.
pub struct AuthenticatorFlags;

impl AuthenticatorFlags {
    pub const USER_PRESENT: u8 = 0x01;
    pub const USER_VERIFIED: u8 = 0x04;
    pub const ATTESTED_CREDENTIAL_DATA: u8 = 0x40;
    pub const EXTENSION_DATA: u8 = 0x80;
}

/// Attested credential data block, present only in registration output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedCredentialData {
    pub aaguid: [u8; AAGUID_LEN],
    pub credential_id: Vec<u8>,
    /// COSE_Key encoded credential public key.
    pub credential_public_key: Vec<u8>,
}

impl AttestedCredentialData {
    /// Emulated authenticators have no certified model, so the AAGUID is zero.
    pub fn new(credential_id: Vec<u8>, credential_public_key: Vec<u8>) -> Self {
        Self {
            aaguid: [0u8; AAGUID_LEN],
            credential_id,
            credential_public_key,
        }
    }

    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        let id_len = u16::try_from(self.credential_id.len())
            .map_err(|_| CodecError::CredentialIdTooLong(self.credential_id.len()))?;

        out.extend_from_slice(&self.aaguid);
        out.extend_from_slice(&id_len.to_be_bytes());
        out.extend_from_slice(&self.credential_id);
        out.extend_from_slice(&self.credential_public_key);
        Ok(())
    }

    fn parse(bytes: &[u8]) -> Result<(Self, usize), CodecError> {
        if bytes.len() < AAGUID_LEN + 2 {
            return Err(CodecError::Truncated("attested credential data"));
        }

        let mut aaguid = [0u8; AAGUID_LEN];
        aaguid.copy_from_slice(&bytes[..AAGUID_LEN]);

        let id_len = u16::from_be_bytes([bytes[AAGUID_LEN], bytes[AAGUID_LEN + 1]]) as usize;
        let id_start = AAGUID_LEN + 2;
        let key_start = id_start + id_len;
        if bytes.len() < key_start {
            return Err(CodecError::Truncated("credential id"));
        }
        let credential_id = bytes[id_start..key_start].to_vec();

        // The COSE key is self-delimiting CBOR; measure how much of it we consume.
        let mut cursor = Cursor::new(&bytes[key_start..]);
        let _: ciborium::value::Value = ciborium::de::from_reader(&mut cursor)
            .map_err(|e| CodecError::Cbor(format!("credential public key: {e}")))?;
        let key_len = cursor.position() as usize;
        let credential_public_key = bytes[key_start..key_start + key_len].to_vec();

        Ok((
            Self {
                aaguid,
                credential_id,
                credential_public_key,
            },
            key_start + key_len,
        ))
    }
}

/// Decoded authenticator data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; 32],
    pub flags: u8,
    pub sign_count: u32,
    pub attested_credential_data: Option<AttestedCredentialData>,
}

impl AuthenticatorData {
    pub fn new(
        rp_id: &str,
        sign_count: u32,
        user_present: bool,
        user_verified: bool,
        attested_credential_data: Option<AttestedCredentialData>,
    ) -> Self {
        let mut flags = 0u8;
        if user_present {
            flags |= AuthenticatorFlags::USER_PRESENT;
        }
        if user_verified {
            flags |= AuthenticatorFlags::USER_VERIFIED;
        }
        if attested_credential_data.is_some() {
            flags |= AuthenticatorFlags::ATTESTED_CREDENTIAL_DATA;
        }

        Self {
            rp_id_hash: sha256(rp_id.as_bytes()),
            flags,
            sign_count,
            attested_credential_data,
        }
    }

    pub fn user_present(&self) -> bool {
        self.flags & AuthenticatorFlags::USER_PRESENT != 0
    }

    pub fn user_verified(&self) -> bool {
        self.flags & AuthenticatorFlags::USER_VERIFIED != 0
    }

    pub fn has_attested_credential_data(&self) -> bool {
        self.flags & AuthenticatorFlags::ATTESTED_CREDENTIAL_DATA != 0
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(AUTHENTICATOR_DATA_MIN_LEN);
        out.extend_from_slice(&self.rp_id_hash);
        out.push(self.flags);
        out.extend_from_slice(&self.sign_count.to_be_bytes());
        if let Some(attested) = &self.attested_credential_data {
            attested.encode_into(&mut out)?;
        }
        Ok(out)
    }

    /// Parse authenticator data, including the attested block when flagged.
    pub fn parse(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < AUTHENTICATOR_DATA_MIN_LEN {
            return Err(CodecError::InvalidLength {
                field: "authenticator data",
                expected: AUTHENTICATOR_DATA_MIN_LEN,
                actual: bytes.len(),
            });
        }

        let mut rp_id_hash = [0u8; 32];
        rp_id_hash.copy_from_slice(&bytes[..32]);
        let flags = bytes[32];
        let sign_count = u32::from_be_bytes([bytes[33], bytes[34], bytes[35], bytes[36]]);

        let rest = &bytes[AUTHENTICATOR_DATA_MIN_LEN..];
        let attested_credential_data = if flags & AuthenticatorFlags::ATTESTED_CREDENTIAL_DATA != 0
        {
            let (attested, consumed) = AttestedCredentialData::parse(rest)?;
            if consumed != rest.len() && flags & AuthenticatorFlags::EXTENSION_DATA == 0 {
                return Err(CodecError::InvalidLength {
                    field: "authenticator data",
                    expected: AUTHENTICATOR_DATA_MIN_LEN + consumed,
                    actual: bytes.len(),
                });
            }
            Some(attested)
        } else {
            if !rest.is_empty() && flags & AuthenticatorFlags::EXTENSION_DATA == 0 {
                return Err(CodecError::InvalidLength {
                    field: "authenticator data",
                    expected: AUTHENTICATOR_DATA_MIN_LEN,
                    actual: bytes.len(),
                });
            }
            None
        };

        Ok(Self {
            rp_id_hash,
            flags,
            sign_count,
            attested_credential_data,
        })
    }
}

/// Encode authenticator data for `rp_id`.
pub fn encode_authenticator_data(
    rp_id: &str,
    sign_count: u32,
    user_present: bool,
    user_verified: bool,
    attested_credential_data: Option<AttestedCredentialData>,
) -> Result<Vec<u8>, CodecError> {
    AuthenticatorData::new(
        rp_id,
        sign_count,
        user_present,
        user_verified,
        attested_credential_data,
    )
    .to_bytes()
}
