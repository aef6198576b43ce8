use aries_askar::{ErrorKind, StoreKeyMethod, entry::EntryOperation};
use async_trait::async_trait;

use crate::{
    Error,
    crypto::LocalKms,
    definitions::{KeyId, PRIVATE_SIGNING_KEY_SIZE, PrivateSigningKeyData},
    state::MemoryStateStore,
};

const STATE_CATEGORY: &str = "state";
const KEY_CATEGORY: &str = "key";

/// Everything an agent needs to resume: state entries and private keys
#[derive(Debug, Default)]
pub struct Snapshot {
    pub entries: Vec<(String, Vec<u8>)>,
    pub keys: Vec<(KeyId, PrivateSigningKeyData)>,
}

impl Snapshot {
    pub fn capture(store: &MemoryStateStore, kms: &LocalKms) -> Result<Self, Error> {
        Ok(Self {
            entries: store.export()?,
            keys: kms.export()?,
        })
    }

    pub fn restore(self, store: &MemoryStateStore, kms: &LocalKms) -> Result<(), Error> {
        store.import(self.entries)?;

        self.keys.iter().try_for_each(|(_, secret)| {
            kms.import_key(secret)?;
            Ok::<(), Error>(())
        })
    }
}

// ANCHOR: custom-secure-storage-mbBook
#[async_trait]
pub trait SecureStorage: Sized {
    /// Create a new secure storage
    async fn new(url: &str, password: &[u8]) -> Result<Self, Error>;

    /// Open an existing secure storage
    async fn open(url: &str, password: &[u8]) -> Result<Self, Error>;

    /// Write data from memory to secure storage
    async fn persist(&self, snapshot: Snapshot) -> Result<(), Error>;

    /// Read data from secure storage to memory
    async fn read(&self) -> Result<Snapshot, Error>;

    /// Close the secure storage
    async fn close(self) -> Result<(), Error>;

    /// Destroy the secure storage
    async fn destroy(self) -> Result<(), Error>;
}
// ANCHOR_END: custom-secure-storage-mbBook

/// An implementation of secure storage using Aries Askar
pub struct AskarStateStorage {
    inner: aries_askar::Store,
    url: String,
}

async fn upsert(
    conn: &mut aries_askar::Session,
    category: &str,
    name: &str,
    value: &[u8],
) -> Result<(), Error> {
    if let Err(e) = conn.insert(category, name, value, None, None).await {
        if e.kind() == ErrorKind::Duplicate {
            conn.update(
                EntryOperation::Replace,
                category,
                name,
                Some(value),
                None,
                None,
            )
            .await?;
        } else {
            Err(Error::from(e))?;
        }
    }

    Ok(())
}

#[async_trait]
impl SecureStorage for AskarStateStorage {
    async fn new(url: &str, password: &[u8]) -> Result<Self, Error> {
        let pass_key = aries_askar::Store::new_raw_key(Some(password))?;

        let inner =
            aries_askar::Store::provision(url, StoreKeyMethod::RawKey, pass_key, None, true)
                .await?;

        Ok(Self {
            inner,
            url: url.to_string(),
        })
    }

    async fn open(url: &str, password: &[u8]) -> Result<Self, Error> {
        let pass_key = aries_askar::Store::new_raw_key(Some(password))?;

        let inner =
            aries_askar::Store::open(url, Some(StoreKeyMethod::RawKey), pass_key, None).await?;

        Ok(Self {
            inner,
            url: url.to_string(),
        })
    }

    async fn persist(&self, snapshot: Snapshot) -> Result<(), Error> {
        let mut conn = self.inner.session(None).await?;

        for (kid, secret) in &snapshot.keys {
            upsert(&mut conn, KEY_CATEGORY, kid, secret.as_ref()).await?;
        }

        for (key, value) in &snapshot.entries {
            upsert(&mut conn, STATE_CATEGORY, key, value).await?;
        }

        conn.commit().await?;

        Ok(())
    }

    async fn read(&self) -> Result<Snapshot, Error> {
        let mut conn = self.inner.session(None).await?;

        let entries = conn
            .fetch_all(Some(STATE_CATEGORY), None, None, None, false, false)
            .await?
            .iter()
            .map(|item| (item.name.clone(), item.value.to_vec()))
            .collect();

        let keys = conn
            .fetch_all(Some(KEY_CATEGORY), None, None, None, false, false)
            .await?
            .iter()
            .map(|item| {
                let secret = <[u8; PRIVATE_SIGNING_KEY_SIZE]>::try_from(item.value.to_vec())
                    .map_err(|_| Error::DecodeState("could not decode private key"))?;

                Ok((item.name.clone(), PrivateSigningKeyData::from(secret)))
            })
            .collect::<Result<Vec<_>, Error>>()?;

        conn.commit().await?;

        Ok(Snapshot { entries, keys })
    }

    async fn close(self) -> Result<(), Error> {
        self.inner.close().await?;

        Ok(())
    }

    async fn destroy(self) -> Result<(), Error> {
        self.inner.close().await?;
        aries_askar::Store::remove(&self.url).await?;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::{
        crypto::KeyManager,
        definitions::PublicVerificationKeyData,
        state::{ProtocolStateTracker, StateStore},
    };

    #[tokio::test]
    async fn test_vault() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("state.sqlite").display());

        let kid = {
            let vault = AskarStateStorage::new(&url, b"password").await.unwrap();

            let store = MemoryStateStore::new();
            let kms = LocalKms::new();
            let key = kms.create_key().unwrap();

            let tracker = ProtocolStateTracker::new(Arc::new(store.clone()));
            tracker.index_own_key(&key.public_key, "D1").unwrap();

            vault
                .persist(Snapshot::capture(&store, &kms).unwrap())
                .await
                .unwrap();

            // persisting again replaces the entries
            store.put("extra", b"value".to_vec()).unwrap();
            vault
                .persist(Snapshot::capture(&store, &kms).unwrap())
                .await
                .unwrap();

            vault.close().await.unwrap();

            key.kid
        };

        {
            let vault = AskarStateStorage::open(&url, b"password").await.unwrap();
            let snapshot = vault.read().await.unwrap();
            assert_eq!(snapshot.keys.len(), 1);
            assert_eq!(snapshot.entries.len(), 2);

            let store = MemoryStateStore::new();
            let kms = LocalKms::new();
            snapshot.restore(&store, &kms).unwrap();

            assert!(kms.get(&kid).is_ok());
            assert_eq!(store.get("extra").unwrap(), Some(b"value".to_vec()));

            let verkey = PublicVerificationKeyData::from_base58(&kid).unwrap();
            let tracker = ProtocolStateTracker::new(Arc::new(store));
            assert_eq!(
                tracker.own_did_by_key(&verkey).unwrap().as_deref(),
                Some("D1")
            );

            vault.destroy().await.unwrap();
        }
    }
}
