use super::DidDoc;
use crate::{Error, definitions::PublicVerificationKeyData};

pub(crate) const SCHEME: &str = "peer";
pub(crate) const KEY_SCHEME: &str = "key";

const DID_PEER_PREFIX: &str = "did:peer:0";
const DID_KEY_PREFIX: &str = "did:key:";

// multicodec for ed25519-pub, as unsigned varint
const ED25519_MULTICODEC: [u8; 2] = [0xed, 0x01];

/// Multibase (base58btc, prefix `z`) encoding of a multicodec ed25519 key
fn multibase_key(verkey: &PublicVerificationKeyData) -> String {
    let mut v = Vec::with_capacity(34);
    v.extend_from_slice(&ED25519_MULTICODEC);
    v.extend_from_slice(verkey.as_ref());

    let encoded = bs58::encode(&v)
        .with_alphabet(bs58::Alphabet::BITCOIN)
        .into_string();

    format!("z{encoded}")
}

fn parse_multibase_key(multibase: &str) -> Option<PublicVerificationKeyData> {
    let encoded = multibase.strip_prefix('z')?;
    let mut buf = [0u8; 34];

    let written = bs58::decode(encoded)
        .with_alphabet(bs58::Alphabet::BITCOIN)
        .onto(&mut buf)
        .ok()?;

    match &buf[..written] {
        [0xed, 0x01, rest @ ..] => PublicVerificationKeyData::from_slice(rest),
        _ => None,
    }
}

/// Encode an Ed25519 verkey as `did:peer:0` (inception key without a document)
pub fn encode_did_peer(verkey: &PublicVerificationKeyData) -> String {
    format!("{DID_PEER_PREFIX}{}", multibase_key(verkey))
}

/// Encode an Ed25519 verkey as `did:key`
pub fn verkey_to_did_key(verkey: &PublicVerificationKeyData) -> String {
    format!("{DID_KEY_PREFIX}{}", multibase_key(verkey))
}

/// Decode a `did:key` (optionally with a `#fragment`) to its Ed25519 verkey
pub fn did_key_to_verkey(did_key: &str) -> Option<PublicVerificationKeyData> {
    let did_key = did_key.split('#').next()?;

    parse_multibase_key(did_key.strip_prefix(DID_KEY_PREFIX)?)
}

/// Build the (service-less) document of a `did:peer:0` or `did:key` identifier
pub(crate) fn resolve_did_peer(did: &str) -> Result<DidDoc, Error> {
    let verkey = did
        .strip_prefix(DID_PEER_PREFIX)
        .and_then(parse_multibase_key)
        .or_else(|| did_key_to_verkey(did))
        .ok_or_else(|| Error::UnknownDidMethod(did.to_string()))?;

    Ok(DidDoc::key_only(did, &verkey))
}
