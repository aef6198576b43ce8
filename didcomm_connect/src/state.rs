use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, RwLock},
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use url::Url;

use crate::{
    Error,
    definitions::PublicVerificationKeyData,
    did::{self, DidDoc},
    handshake::{HandshakeState, Role, Version},
};

/// Persistence boundary: opaque bytes under string keys, upsert semantics
pub trait StateStore: Send + Sync {
    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), Error>;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error>;
}

/// State store kept in memory, exportable for durable snapshots
#[derive(Default, Clone, Debug)]
pub struct MemoryStateStore {
    entries: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Default::default()
    }

    /// Export all entries
    pub fn export(&self) -> Result<Vec<(String, Vec<u8>)>, Error> {
        Ok(self
            .entries
            .read()?
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    /// Import entries, replacing existing ones with the same key
    pub fn import(&self, entries: Vec<(String, Vec<u8>)>) -> Result<(), Error> {
        self.entries.write()?.extend(entries);

        Ok(())
    }
}

impl StateStore for MemoryStateStore {
    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), Error> {
        self.entries.write()?.insert(key.to_string(), value);

        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.entries.read()?.get(key).cloned())
    }
}

/// Identifies one handshake attempt of one side: our DID and the thread nonce
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateKey {
    pub owner_did: String,
    pub nonce: String,
}

impl StateKey {
    pub fn new(owner_did: &str, nonce: &str) -> Self {
        Self {
            owner_did: did::normalize(owner_did).to_string(),
            nonce: nonce.to_string(),
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner_did, self.nonce)
    }
}

/// One side of a pairwise relationship
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Party {
    pub did: String,
    pub verkey: Option<PublicVerificationKeyData>,
    pub endpoint: Option<Url>,
    pub is_mine: bool,
}

/// Persisted record of a relationship, built up over the handshake
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PairwiseRepresentative {
    pub state_key: StateKey,
    pub relationship_name: String,
    pub peer_label: String,
    pub caller: Party,
    pub callee: Party,
    pub version: Version,
    pub state: HandshakeState,
}

impl PairwiseRepresentative {
    /// Our role in this relationship
    pub fn role(&self) -> Role {
        if self.caller.is_mine {
            Role::Caller
        } else {
            Role::Callee
        }
    }

    pub fn mine(&self) -> &Party {
        if self.caller.is_mine {
            &self.caller
        } else {
            &self.callee
        }
    }

    pub fn theirs(&self) -> &Party {
        if self.caller.is_mine {
            &self.callee
        } else {
            &self.caller
        }
    }

    pub fn theirs_mut(&mut self) -> &mut Party {
        if self.caller.is_mine {
            &mut self.callee
        } else {
            &mut self.caller
        }
    }
}

/// Answer to a status query
#[derive(Clone, Debug, PartialEq)]
pub struct Status {
    pub state: HandshakeState,
    pub mine: Party,
    pub theirs: Party,
}

const RECORD_PREFIX: &str = "pairwise";
const OWN_KEY_PREFIX: &str = "did-by-key";
const THREAD_PREFIX: &str = "thread";
const PEER_DOC_PREFIX: &str = "peer-doc";
const INVITATION_PREFIX: &str = "invitation";

/// Typed access to the pairwise records and their indexes in a [StateStore]
#[derive(Clone)]
pub struct ProtocolStateTracker {
    store: Arc<dyn StateStore>,
}

impl fmt::Debug for ProtocolStateTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolStateTracker").finish_non_exhaustive()
    }
}

impl ProtocolStateTracker {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<(), Error> {
        self.store.put(key, serde_json::to_vec(value)?)
    }

    fn read<T: DeserializeOwned>(&self, key: &str, what: &'static str) -> Result<Option<T>, Error> {
        self.store
            .get(key)?
            .map(|bytes| serde_json::from_slice(&bytes).map_err(|_| Error::DecodeState(what)))
            .transpose()
    }

    /// Upsert a record under its state key
    pub fn put(&self, record: &PairwiseRepresentative) -> Result<(), Error> {
        let key = &record.state_key;

        self.write(
            &format!("{RECORD_PREFIX}/{}/{}", key.owner_did, key.nonce),
            record,
        )
    }

    pub fn get(&self, key: &StateKey) -> Result<Option<PairwiseRepresentative>, Error> {
        self.read(
            &format!("{RECORD_PREFIX}/{}/{}", key.owner_did, key.nonce),
            "pairwise record",
        )
    }

    pub fn status(&self, key: &StateKey) -> Result<Option<Status>, Error> {
        Ok(self.get(key)?.map(|record| Status {
            state: record.state,
            mine: record.mine().clone(),
            theirs: record.theirs().clone(),
        }))
    }

    /// Remember which of our DIDs a key belongs to
    pub fn index_own_key(&self, verkey: &PublicVerificationKeyData, did: &str) -> Result<(), Error> {
        self.write(
            &format!("{OWN_KEY_PREFIX}/{}", verkey.to_base58()),
            &did::normalize(did),
        )
    }

    pub fn own_did_by_key(&self, verkey: &PublicVerificationKeyData) -> Result<Option<String>, Error> {
        self.read(
            &format!("{OWN_KEY_PREFIX}/{}", verkey.to_base58()),
            "DID index",
        )
    }

    /// Remember the record created for a thread with a given peer
    pub fn index_thread(&self, thid: &str, peer_did: &str, key: &StateKey) -> Result<(), Error> {
        self.write(
            &format!("{THREAD_PREFIX}/{thid}/{}", did::normalize(peer_did)),
            key,
        )
    }

    pub fn by_thread(&self, thid: &str, peer_did: &str) -> Result<Option<StateKey>, Error> {
        self.read(
            &format!("{THREAD_PREFIX}/{thid}/{}", did::normalize(peer_did)),
            "thread index",
        )
    }

    /// Remember the invitation a recipient key was issued with
    pub fn index_invitation(
        &self,
        verkey: &PublicVerificationKeyData,
        invitation_id: &str,
    ) -> Result<(), Error> {
        self.write(
            &format!("{INVITATION_PREFIX}/{}", verkey.to_base58()),
            &invitation_id,
        )
    }

    pub fn invitation_by_key(
        &self,
        verkey: &PublicVerificationKeyData,
    ) -> Result<Option<String>, Error> {
        self.read(
            &format!("{INVITATION_PREFIX}/{}", verkey.to_base58()),
            "invitation index",
        )
    }

    /// Keep the peer's document of one relationship for routing later messages
    pub fn put_peer_doc(&self, key: &StateKey, doc: &DidDoc) -> Result<(), Error> {
        self.write(
            &format!("{PEER_DOC_PREFIX}/{}/{}", key.owner_did, key.nonce),
            doc,
        )
    }

    pub fn peer_doc(&self, key: &StateKey) -> Result<Option<DidDoc>, Error> {
        self.read(
            &format!("{PEER_DOC_PREFIX}/{}/{}", key.owner_did, key.nonce),
            "peer DID document",
        )
    }
}
