use std::time::{SystemTime, UNIX_EPOCH};

use base64ct::{Base64Url, Encoding};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    Error,
    config::ExpiryPolicy,
    crypto::CryptoError,
    definitions::{PublicVerificationKeyData, decode_base64},
    messages::{Connection, DIDCOMM_PREFIX, strip_type_prefix},
    pipe::SecurePipe,
};

const SIGNATURE_TYPE_PATH: &str = "signature/1.0/ed25519Sha512_single";
const TIMESTAMP_SIZE: usize = 8;

/// Default freshness window of a connection signature: ten hours
pub const DEFAULT_FRESHNESS_WINDOW: u64 = 10 * 60 * 60;

/// `connection~sig` decorator of the legacy response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSignature {
    #[serde(rename = "@type", default)]
    pub signature_type: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub sig_data: String,
    #[serde(default)]
    pub signer: String,
}

/// How old (or how far in the future) a signature may be
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Freshness {
    pub window: u64,
    pub on_expired: ExpiryPolicy,
}

impl Default for Freshness {
    fn default() -> Self {
        Self {
            window: DEFAULT_FRESHNESS_WINDOW,
            on_expired: ExpiryPolicy::Reject,
        }
    }
}

pub(crate) fn unix_now() -> Result<u64, Error> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| Error::Internal)
}

/// JSON with object members sorted by key at every level
pub(crate) fn canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    fn sorted(value: serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let mut entries = map.into_iter().collect::<Vec<_>>();
                entries.sort_by(|(a, _), (b, _)| a.cmp(b));

                serde_json::Value::Object(
                    entries
                        .into_iter()
                        .map(|(k, v)| (k, sorted(v)))
                        .collect(),
                )
            }
            serde_json::Value::Array(values) => {
                serde_json::Value::Array(values.into_iter().map(sorted).collect())
            }
            other => other,
        }
    }

    Ok(serde_json::to_vec(&sorted(serde_json::to_value(value)?))?)
}

/// Sign `connection` with the owning key of `pipe`, stamped with the current time
pub fn sign_connection(
    pipe: &SecurePipe,
    connection: &Connection,
) -> Result<ConnectionSignature, Error> {
    sign_connection_at(pipe, connection, unix_now()?)
}

pub fn sign_connection_at(
    pipe: &SecurePipe,
    connection: &Connection,
    timestamp: u64,
) -> Result<ConnectionSignature, Error> {
    let mut sig_data = timestamp.to_be_bytes().to_vec();
    sig_data.extend(canonical_json(connection)?);

    let (signature, signer) = pipe.sign(&sig_data)?;

    Ok(ConnectionSignature {
        signature_type: format!("{DIDCOMM_PREFIX}{SIGNATURE_TYPE_PATH}"),
        signature: Base64Url::encode_string(&signature),
        sig_data: Base64Url::encode_string(&sig_data),
        signer: signer.to_base58(),
    })
}

/// Verify a connection signature and return the signed connection and the signer
pub fn verify_connection(
    pipe: &SecurePipe,
    signature: &ConnectionSignature,
    freshness: &Freshness,
) -> Result<(Connection, PublicVerificationKeyData), Error> {
    verify_connection_at(pipe, signature, freshness, unix_now()?)
}

fn decode_field(value: &str, field: &'static str) -> Result<Vec<u8>, Error> {
    if value.is_empty() {
        return Err(Error::MissingField(field));
    }

    decode_base64(value)
        .ok_or_else(|| Error::MalformedAttachment(format!("'{field}' is not valid base64")))
}

fn is_recent(timestamp: u64, now: u64, window: u64) -> bool {
    now.abs_diff(timestamp) <= window
}

pub fn verify_connection_at(
    pipe: &SecurePipe,
    signature: &ConnectionSignature,
    freshness: &Freshness,
    now: u64,
) -> Result<(Connection, PublicVerificationKeyData), Error> {
    if strip_type_prefix(&signature.signature_type) != SIGNATURE_TYPE_PATH {
        return Err(Error::MalformedAttachment(format!(
            "unsupported signature type '{}'",
            signature.signature_type
        )));
    }

    if signature.signer.is_empty() {
        return Err(Error::MissingField("signer"));
    }
    let signer = PublicVerificationKeyData::from_base58(&signature.signer)
        .ok_or_else(|| CryptoError::InvalidKey(signature.signer.clone()))?;

    let signature_bytes = decode_field(&signature.signature, "signature")?;
    let sig_data = decode_field(&signature.sig_data, "sig_data")?;

    let Some((timestamp, connection)) = sig_data.split_first_chunk::<TIMESTAMP_SIZE>() else {
        return Err(Error::MalformedAttachment(
            "'sig_data' is shorter than its timestamp".to_string(),
        ));
    };

    let (valid, verkey) = pipe.verify(&sig_data, &signature_bytes, Some(&signer))?;
    if !valid {
        return Err(CryptoError::SignatureInvalid(verkey.to_base58()).into());
    }

    check_freshness(*timestamp, freshness, now)?;

    let connection = serde_json::from_slice(connection)
        .map_err(|e| Error::MalformedAttachment(format!("signed connection: {e}")))?;

    Ok((connection, verkey))
}

fn check_freshness(
    timestamp: [u8; TIMESTAMP_SIZE],
    freshness: &Freshness,
    now: u64,
) -> Result<(), Error> {
    let big_endian = u64::from_be_bytes(timestamp);
    if is_recent(big_endian, now, freshness.window) {
        return Ok(());
    }

    // some agents write the timestamp in host (little-endian) order
    let little_endian = u64::from_le_bytes(timestamp);
    if is_recent(little_endian, now, freshness.window) {
        warn!("accepting connection signature with a little-endian timestamp");
        return Ok(());
    }

    let age = i64::try_from(i128::from(now) - i128::from(big_endian)).unwrap_or(i64::MIN);

    match freshness.on_expired {
        ExpiryPolicy::Reject => Err(Error::SignatureExpired {
            age,
            window: freshness.window,
        }),
        ExpiryPolicy::Warn => {
            warn!(
                "accepting connection signature {age}s old, outside the {}s window",
                freshness.window
            );
            Ok(())
        }
    }
}
