use base64ct::{Base64Url, Base64UrlUnpadded, Encoding};
use serde::{Deserialize, Serialize};

use crate::{
    Error,
    crypto::Crypto,
    definitions::{PublicVerificationKeyData, decode_base64},
    did::{DidDoc, did_key_to_verkey, verkey_to_did_key},
    pipe::SecurePipe,
};

const JSON_MIME_TYPE: &str = "application/json";
const JWS_ALGORITHM: &str = "EdDSA";

/// Attachment decorator (`~attach`) carrying base64 data and an optional detached JWS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "mime-type", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub data: AttachmentData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttachmentData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jws: Option<Jws>,
}

/// Detached JWS over the attachment data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jws {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<JwsHeader>,
    pub protected: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JwsHeader {
    pub kid: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ProtectedHeader {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    jwk: Option<Jwk>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Jwk {
    kty: String,
    crv: String,
    x: String,
}

impl Jwk {
    fn ed25519(verkey: &PublicVerificationKeyData) -> Self {
        Self {
            kty: "OKP".to_string(),
            crv: "Ed25519".to_string(),
            x: Base64UrlUnpadded::encode_string(verkey.as_ref()),
        }
    }

    fn verkey(&self) -> Option<PublicVerificationKeyData> {
        if self.kty != "OKP" || self.crv != "Ed25519" {
            return None;
        }

        decode_base64(&self.x).and_then(|x| PublicVerificationKeyData::from_slice(&x))
    }
}

fn malformed(reason: impl Into<String>) -> Error {
    Error::MalformedAttachment(reason.into())
}

/// Attach `did_doc` signed by the owning key of `pipe`
pub fn sign_attachment(pipe: &SecurePipe, did_doc: &DidDoc) -> Result<Attachment, Error> {
    let owned = pipe.owning().ok_or(Error::CryptoUnavailable)?;
    let verkey = owned.identity.verkey;
    let did_key = verkey_to_did_key(&verkey);

    let data = Base64Url::encode_string(&serde_json::to_vec(did_doc)?);
    let protected = Base64UrlUnpadded::encode_string(&serde_json::to_vec(&ProtectedHeader {
        alg: JWS_ALGORITHM.to_string(),
        kid: Some(did_key.clone()),
        jwk: Some(Jwk::ed25519(&verkey)),
    })?);

    let (signature, _) = pipe.sign(format!("{protected}.{data}").as_bytes())?;

    Ok(Attachment {
        id: uuid::Uuid::new_v4().to_string(),
        mime_type: Some(JSON_MIME_TYPE.to_string()),
        data: AttachmentData {
            base64: Some(data),
            jws: Some(Jws {
                header: Some(JwsHeader { kid: did_key }),
                protected,
                signature: Base64UrlUnpadded::encode_string(&signature),
            }),
        },
    })
}

/// Check the detached signature of a DID document attachment
///
/// Returns the document and the key that signed it.
pub fn verify_attachment(
    attachment: &Attachment,
    crypto: &dyn Crypto,
) -> Result<(DidDoc, PublicVerificationKeyData), Error> {
    let data = attachment
        .data
        .base64
        .as_deref()
        .ok_or(Error::MissingField("data.base64"))?;
    let jws = attachment
        .data
        .jws
        .as_ref()
        .ok_or(Error::MissingField("data.jws"))?;

    let header: ProtectedHeader = decode_base64(&jws.protected)
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .ok_or_else(|| malformed("unreadable JWS protected header"))?;

    if header.alg != JWS_ALGORITHM {
        return Err(malformed(format!("unsupported JWS algorithm '{}'", header.alg)));
    }

    let from_jwk = header.jwk.as_ref().map(|jwk| {
        jwk.verkey()
            .ok_or_else(|| malformed("JWS key is not an Ed25519 JWK"))
    });
    let from_kid = header
        .kid
        .as_deref()
        .or(jws.header.as_ref().map(|h| h.kid.as_str()))
        .and_then(did_key_to_verkey);

    let signer = match (from_jwk.transpose()?, from_kid) {
        (Some(jwk), Some(kid)) if jwk != kid => {
            return Err(malformed("JWS key does not match its key id"));
        }
        (Some(key), _) | (None, Some(key)) => key,
        (None, None) => return Err(Error::MissingField("jwk")),
    };

    let signature = decode_base64(&jws.signature).ok_or_else(|| malformed("JWS signature"))?;
    crypto.verify(
        &signer,
        format!("{}.{data}", jws.protected).as_bytes(),
        &signature,
    )?;

    let did_doc = decode_base64(data)
        .ok_or_else(|| malformed("attachment data is not base64"))
        .and_then(|bytes| {
            serde_json::from_slice(&bytes)
                .map_err(|e| malformed(format!("attached DID document: {e}")))
        })?;

    Ok((did_doc, signer))
}
