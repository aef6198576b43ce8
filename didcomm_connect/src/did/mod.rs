use serde::{Deserialize, Serialize};

use crate::{Error, definitions::PublicVerificationKeyData};

mod doc;
pub(crate) mod peer;

pub use doc::{Authentication, DidDoc, PublicKeyEntry, Service};
pub use peer::{did_key_to_verkey, verkey_to_did_key};

pub(crate) const SCHEME: &str = "did";

/// Prefix of fully qualified legacy (Sovrin) DIDs
pub const SOV_PREFIX: &str = "did:sov:";

/// Strip the legacy method prefix, so that `did:sov:X` and `X` compare equal
pub fn normalize(did: &str) -> &str {
    did.strip_prefix(SOV_PREFIX).unwrap_or(did)
}

/// DID method used for newly created pairwise DIDs
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DidMethod {
    /// `did:peer:0`, self-certifying and resolvable offline
    #[default]
    Peer,
    /// Unqualified legacy DID: base58 of the first 16 bytes of the verkey
    Sov,
}

impl DidMethod {
    pub fn create_did(&self, verkey: &PublicVerificationKeyData) -> String {
        match self {
            DidMethod::Peer => peer::encode_did_peer(verkey),
            DidMethod::Sov => bs58::encode(&verkey[..16])
                .with_alphabet(bs58::Alphabet::BITCOIN)
                .into_string(),
        }
    }
}

/// Resolve the document of `did`, preferring a document delivered inline with the message.
///
/// An inline document must describe the DID it is delivered with. Without one,
/// only self-certifying methods can be resolved.
pub fn resolve(did: &str, inline: Option<&DidDoc>) -> Result<DidDoc, Error> {
    if let Some(doc) = inline {
        if normalize(&doc.id) != normalize(did) {
            return Err(Error::MalformedAttachment(format!(
                "DID document '{}' does not describe '{did}'",
                doc.id
            )));
        }

        return Ok(doc.clone());
    }

    let parts = did.split(':').collect::<Vec<&str>>();

    match parts.get(0..2) {
        Some([SCHEME, peer::SCHEME]) | Some([SCHEME, peer::KEY_SCHEME]) => {
            peer::resolve_did_peer(did)
        }
        _ => Err(Error::UnknownDidMethod(did.to_string())),
    }
}

/// Check that every key of `doc` is the key `did` is derived from, and return that key
///
/// `did:peer:0` and `did:key` embed the key; an unqualified legacy DID is the
/// base58 of its first 16 bytes. Other methods cannot be checked offline.
pub fn verify_binding(did: &str, doc: &DidDoc) -> Result<PublicVerificationKeyData, Error> {
    let did = normalize(did);

    let bound = if did.starts_with("did:") {
        resolve(did, None)?
            .verkey()
            .ok_or_else(|| Error::UnknownDidMethod(did.to_string()))?
    } else {
        doc.verkey()
            .filter(|key| DidMethod::Sov.create_did(key) == did)
            .ok_or_else(|| {
                Error::MalformedAttachment(format!("'{did}' is not derived from its document's key"))
            })?
    };

    let stranger = doc
        .verkeys()
        .into_iter()
        .chain(doc.recipient_keys()?)
        .find(|key| *key != bound);
    if let Some(key) = stranger {
        return Err(Error::MalformedAttachment(format!(
            "key {} does not belong to '{did}'",
            key.to_base58()
        )));
    }

    Ok(bound)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn normalize_sov() {
        let did = "Th7MpTaRZVRYnPiabds81Y";
        assert_eq!(normalize(&format!("did:sov:{did}")), did);
        assert_eq!(normalize(did), did);
        assert_eq!(normalize(normalize(&format!("did:sov:{did}"))), did);
        assert_eq!(normalize("did:peer:0z6Mk"), "did:peer:0z6Mk");
    }

    #[test]
    fn sov_did_from_verkey() {
        let verkey = PublicVerificationKeyData::from([1u8; 32]);
        let did = DidMethod::Sov.create_did(&verkey);

        let decoded = bs58::decode(&did).into_vec().unwrap();
        assert_eq!(decoded, vec![1u8; 16]);
    }

    #[test]
    fn resolve_requires_matching_inline_doc() {
        let verkey = PublicVerificationKeyData::from([3u8; 32]);
        let doc = DidDoc::new(
            "did:sov:abc",
            &verkey,
            "http://localhost:8080".parse().unwrap(),
            &[],
        );

        assert_eq!(resolve("abc", Some(&doc)).unwrap(), doc);
        assert!(matches!(
            resolve("xyz", Some(&doc)),
            Err(Error::MalformedAttachment(_))
        ));
        assert!(matches!(
            resolve("abc", None),
            Err(Error::UnknownDidMethod(_))
        ));
        assert!(matches!(
            resolve("did:web:example.com", None),
            Err(Error::UnknownDidMethod(_))
        ));
    }

    #[test]
    fn binding_of_self_certifying_dids() {
        let verkey = PublicVerificationKeyData::from([3u8; 32]);
        let other = PublicVerificationKeyData::from([4u8; 32]);
        let endpoint: url::Url = "https://alice.example/".parse().unwrap();

        for did in [DidMethod::Peer.create_did(&verkey), verkey_to_did_key(&verkey)] {
            let doc = DidDoc::new(&did, &verkey, endpoint.clone(), &[other]);
            assert_eq!(verify_binding(&did, &doc).unwrap(), verkey);

            // someone else's key under this DID
            let forged = DidDoc::new(&did, &other, endpoint.clone(), &[]);
            assert!(matches!(
                verify_binding(&did, &forged),
                Err(Error::MalformedAttachment(_))
            ));

            // an extra recipient key smuggled into the service
            let mut smuggled = doc.clone();
            smuggled.service[0].recipient_keys.push(other.to_base58());
            assert!(matches!(
                verify_binding(&did, &smuggled),
                Err(Error::MalformedAttachment(_))
            ));
        }
    }

    #[test]
    fn binding_of_unqualified_dids() {
        let verkey = PublicVerificationKeyData::from([3u8; 32]);
        let other = PublicVerificationKeyData::from([4u8; 32]);
        let endpoint: url::Url = "https://alice.example/".parse().unwrap();
        let did = DidMethod::Sov.create_did(&verkey);

        let doc = DidDoc::new(&did, &verkey, endpoint.clone(), &[]);
        assert_eq!(verify_binding(&did, &doc).unwrap(), verkey);
        assert_eq!(verify_binding(&format!("did:sov:{did}"), &doc).unwrap(), verkey);

        let forged = DidDoc::new(&did, &other, endpoint.clone(), &[]);
        assert!(matches!(
            verify_binding(&did, &forged),
            Err(Error::MalformedAttachment(_))
        ));

        let web = DidDoc::new("did:web:example.com", &verkey, endpoint, &[]);
        assert!(matches!(
            verify_binding("did:web:example.com", &web),
            Err(Error::UnknownDidMethod(_))
        ));
    }
}
