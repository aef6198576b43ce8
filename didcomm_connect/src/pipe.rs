use std::sync::Arc;

use tracing::trace;
use url::Url;

use crate::{
    Error,
    crypto::{CryptoError, verify_signature},
    definitions::{KeyId, PackedMessage, PublicVerificationKeyData},
    did::{self, DidDoc, verkey_to_did_key},
    forward::ForwardRouter,
    messages::InvitationTarget,
    packer::{Envelope, Packager, PackerKind},
};

/// Public material of one side of a pipe
#[derive(Clone, Debug, PartialEq)]
pub struct Identity {
    pub verkey: PublicVerificationKeyData,
    pub did: Option<String>,
    pub did_doc: Option<DidDoc>,
}

impl Identity {
    pub fn new(verkey: PublicVerificationKeyData) -> Self {
        Self {
            verkey,
            did: None,
            did_doc: None,
        }
    }

    pub fn with_did(mut self, did: &str, did_doc: Option<DidDoc>) -> Self {
        self.did = Some(did::normalize(did).to_string());
        self.did_doc = did_doc;
        self
    }

    /// The party behind an invitation, described by a document derived from the invitation
    pub fn from_invitation(target: &InvitationTarget) -> Result<Self, Error> {
        let verkey = *target
            .recipient_keys
            .first()
            .ok_or(Error::MissingField("recipientKeys"))?;

        let mut doc = DidDoc::new(
            &verkey_to_did_key(&verkey),
            &verkey,
            target.endpoint.clone(),
            &target.routing_keys,
        );
        if let Some(service) = doc.service.first_mut() {
            service.recipient_keys = target.recipient_keys.iter().map(|k| k.to_base58()).collect();
        }

        Ok(Self {
            verkey,
            did: None,
            did_doc: Some(doc),
        })
    }

    pub fn kid(&self) -> KeyId {
        self.verkey.to_base58()
    }
}

/// Our side of a pipe: an identity whose private key is held by the bound packager
#[derive(Clone)]
pub struct OwnedIdentity {
    pub identity: Identity,
    packager: Arc<dyn Packager>,
}

impl std::fmt::Debug for OwnedIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedIdentity")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl OwnedIdentity {
    pub fn new(identity: Identity, packager: Arc<dyn Packager>) -> Self {
        Self { identity, packager }
    }

    pub fn packager(&self) -> &dyn Packager {
        &*self.packager
    }
}

// ANCHOR: secure-pipe-mbBook
/// Encrypt, decrypt, sign and verify between an owning side and a peer
///
/// A pipe without an owning side is *null*: it can only verify signatures.
#[derive(Clone, Debug, Default)]
pub struct SecurePipe {
    owning: Option<OwnedIdentity>,
    peer: Option<Identity>,
}
// ANCHOR_END: secure-pipe-mbBook

impl SecurePipe {
    pub fn new(owning: Option<OwnedIdentity>, peer: Option<Identity>) -> Self {
        Self { owning, peer }
    }

    pub fn null() -> Self {
        Self::default()
    }

    pub fn is_null(&self) -> bool {
        self.owning.is_none()
    }

    pub fn owning(&self) -> Option<&OwnedIdentity> {
        self.owning.as_ref()
    }

    pub fn peer(&self) -> Option<&Identity> {
        self.peer.as_ref()
    }

    fn owned(&self) -> Result<&OwnedIdentity, Error> {
        self.owning.as_ref().ok_or(Error::CryptoUnavailable)
    }

    /// Encrypt for the peer's recipient keys, adding a forward layer per routing key
    pub fn pack(&self, plaintext: &[u8]) -> Result<(PackedMessage, PublicVerificationKeyData), Error> {
        self.seal(None, plaintext)
    }

    /// Like [SecurePipe::pack], but always with [PackerKind::Authcrypt] so the
    /// recipient learns the sender key
    pub fn pack_authenticated(
        &self,
        plaintext: &[u8],
    ) -> Result<(PackedMessage, PublicVerificationKeyData), Error> {
        self.seal(Some(PackerKind::Authcrypt), plaintext)
    }

    fn seal(
        &self,
        kind: Option<PackerKind>,
        plaintext: &[u8],
    ) -> Result<(PackedMessage, PublicVerificationKeyData), Error> {
        let owned = self.owned()?;
        let peer = self.peer.as_ref().ok_or(Error::MissingField("peer"))?;

        let (recipients, routing_keys) = match &peer.did_doc {
            Some(doc) => (doc.recipient_keys()?, doc.routing_keys()?),
            None => (vec![peer.verkey], Vec::new()),
        };

        let sender = owned.identity.verkey;
        let envelope = Envelope {
            message: plaintext.to_vec(),
            from_key: Some(sender),
            to_keys: recipients.clone(),
        };
        let packed = match kind {
            Some(kind) => owned.packager.pack_with(kind, &envelope)?,
            None => owned.packager.pack(&envelope)?,
        };

        if routing_keys.is_empty() {
            return Ok((packed, sender));
        }

        trace!("wrapping message for {} routing hop(s)", routing_keys.len());
        let wrapped = ForwardRouter::new(owned.packager()).wrap(
            packed,
            &recipients[0],
            &routing_keys,
        )?;

        Ok((wrapped, sender))
    }

    /// Decrypt a message addressed to the owning side
    pub fn unpack(
        &self,
        ciphertext: &[u8],
    ) -> Result<(Vec<u8>, Option<PublicVerificationKeyData>), Error> {
        let envelope = self.owned()?.packager.unpack(ciphertext)?;

        Ok((envelope.message, envelope.from_key))
    }

    /// Sign with the owning side's key
    pub fn sign(&self, message: &[u8]) -> Result<(Vec<u8>, PublicVerificationKeyData), Error> {
        let owned = self.owned()?;
        let kid = owned.identity.kid();
        let signature = owned.packager.crypto().sign(&kid, message)?;

        Ok((signature, owned.identity.verkey))
    }

    /// Verify a signature with the peer's key, or with `embedded` when there is no peer
    pub fn verify(
        &self,
        message: &[u8],
        signature: &[u8],
        embedded: Option<&PublicVerificationKeyData>,
    ) -> Result<(bool, PublicVerificationKeyData), Error> {
        let verkey = match (&self.peer, embedded) {
            (Some(peer), _) => peer.verkey,
            (None, Some(key)) => *key,
            (None, None) => return Err(Error::MissingField("signer")),
        };

        let result = match &self.owning {
            Some(owned) => owned.packager.crypto().verify(&verkey, message, signature),
            None => verify_signature(&verkey, message, signature),
        };

        match result {
            Ok(()) => Ok((true, verkey)),
            Err(CryptoError::SignatureInvalid(_)) => Ok((false, verkey)),
            Err(e) => Err(e.into()),
        }
    }

    /// Endpoint of the peer, from its DID document
    pub fn peer_endpoint(&self) -> Result<Url, Error> {
        let peer = self.peer.as_ref().ok_or(Error::MissingField("peer"))?;

        let did = peer
            .did
            .as_deref()
            .or(peer.did_doc.as_ref().map(|doc| doc.id.as_str()))
            .ok_or_else(|| Error::UnknownDidMethod(peer.kid()))?;

        did::resolve(did, peer.did_doc.as_ref())?
            .endpoint()
            .cloned()
            .ok_or(Error::MissingField("serviceEndpoint"))
    }
}
