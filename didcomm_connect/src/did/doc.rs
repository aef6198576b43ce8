use serde::{Deserialize, Serialize};
use url::Url;

use super::peer::did_key_to_verkey;
use crate::{Error, definitions::PublicVerificationKeyData};

const DID_CONTEXT: &str = "https://w3id.org/did/v1";
const KEY_TYPE: &str = "Ed25519VerificationKey2018";
const AUTHENTICATION_TYPE: &str = "Ed25519SignatureAuthentication2018";
const SERVICE_TYPE: &str = "IndyAgent";

/// DID document in the shape exchanged by pairwise connections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidDoc {
    #[serde(rename = "@context", default = "default_context")]
    pub context: serde_json::Value,
    pub id: String,
    #[serde(default)]
    pub public_key: Vec<PublicKeyEntry>,
    #[serde(default)]
    pub authentication: Vec<Authentication>,
    #[serde(default)]
    pub service: Vec<Service>,
}

fn default_context() -> serde_json::Value {
    serde_json::Value::String(DID_CONTEXT.to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub key_type: String,
    pub controller: String,
    pub public_key_base58: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authentication {
    #[serde(rename = "type")]
    pub auth_type: String,
    pub public_key: String,
}

/// Endpoint at which the DID subject receives messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub recipient_keys: Vec<String>,
    #[serde(default)]
    pub routing_keys: Vec<String>,
    pub service_endpoint: Url,
}

impl DidDoc {
    /// Document with a single Ed25519 key and one agent service
    pub fn new(
        did: &str,
        verkey: &PublicVerificationKeyData,
        endpoint: Url,
        routing_keys: &[PublicVerificationKeyData],
    ) -> Self {
        let mut doc = Self::key_only(did, verkey);

        doc.service.push(Service {
            id: format!("{did};indy"),
            service_type: SERVICE_TYPE.to_string(),
            priority: 0,
            recipient_keys: vec![verkey.to_base58()],
            routing_keys: routing_keys.iter().map(|k| k.to_base58()).collect(),
            service_endpoint: endpoint,
        });

        doc
    }

    /// Document listing `verkey` as the only key, without any service
    pub fn key_only(did: &str, verkey: &PublicVerificationKeyData) -> Self {
        let key_id = format!("{did}#1");

        Self {
            context: default_context(),
            id: did.to_string(),
            public_key: vec![PublicKeyEntry {
                id: key_id.clone(),
                key_type: KEY_TYPE.to_string(),
                controller: did.to_string(),
                public_key_base58: verkey.to_base58(),
            }],
            authentication: vec![Authentication {
                auth_type: AUTHENTICATION_TYPE.to_string(),
                public_key: key_id,
            }],
            service: Vec::new(),
        }
    }

    /// All valid Ed25519 keys listed in the document
    pub fn verkeys(&self) -> Vec<PublicVerificationKeyData> {
        self.public_key
            .iter()
            .filter_map(|entry| PublicVerificationKeyData::from_base58(&entry.public_key_base58))
            .collect()
    }

    /// The first listed key, which identifies the DID subject
    pub fn verkey(&self) -> Option<PublicVerificationKeyData> {
        self.verkeys().into_iter().next()
    }

    pub fn contains_key(&self, verkey: &PublicVerificationKeyData) -> bool {
        self.verkeys().contains(verkey)
            || self
                .service
                .iter()
                .flat_map(|s| s.recipient_keys.iter())
                .any(|k| self.key_reference(k).as_ref() == Some(verkey))
    }

    /// Preferred service (lowest priority value, first on ties)
    pub fn service(&self) -> Option<&Service> {
        self.service.iter().min_by_key(|s| s.priority)
    }

    pub fn endpoint(&self) -> Option<&Url> {
        self.service().map(|s| &s.service_endpoint)
    }

    /// Recipient keys of the preferred service, falling back to the listed keys
    pub fn recipient_keys(&self) -> Result<Vec<PublicVerificationKeyData>, Error> {
        match self.service() {
            Some(service) if !service.recipient_keys.is_empty() => {
                self.resolve_references(&service.recipient_keys)
            }
            _ => match self.verkey() {
                Some(key) => Ok(vec![key]),
                None => Err(Error::MissingField("publicKey")),
            },
        }
    }

    /// Routing keys of the preferred service, first hop first
    pub fn routing_keys(&self) -> Result<Vec<PublicVerificationKeyData>, Error> {
        match self.service() {
            Some(service) => self.resolve_references(&service.routing_keys),
            None => Ok(Vec::new()),
        }
    }

    fn resolve_references(&self, refs: &[String]) -> Result<Vec<PublicVerificationKeyData>, Error> {
        refs.iter()
            .map(|r| {
                self.key_reference(r).ok_or_else(|| {
                    Error::MalformedAttachment(format!("cannot resolve key reference '{r}'"))
                })
            })
            .collect()
    }

    /// A key is referenced either by `did:key`, by the id of a listed key, or as raw base58
    fn key_reference(&self, reference: &str) -> Option<PublicVerificationKeyData> {
        if reference.starts_with("did:key:") {
            return did_key_to_verkey(reference);
        }

        if let Some((_, fragment)) = reference.split_once('#') {
            return self
                .public_key
                .iter()
                .find(|entry| {
                    entry.id == reference || entry.id.rsplit('#').next() == Some(fragment)
                })
                .and_then(|entry| PublicVerificationKeyData::from_base58(&entry.public_key_base58));
        }

        PublicVerificationKeyData::from_base58(reference)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::did::verkey_to_did_key;

    fn key(byte: u8) -> PublicVerificationKeyData {
        PublicVerificationKeyData::from([byte; 32])
    }

    #[test]
    fn wire_shape() {
        let doc = DidDoc::new(
            "did:sov:abc",
            &key(1),
            "https://agent.example/in".parse().unwrap(),
            &[key(2)],
        );

        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["@context"], DID_CONTEXT);
        assert_eq!(json["publicKey"][0]["publicKeyBase58"], key(1).to_base58());
        assert_eq!(json["authentication"][0]["publicKey"], "did:sov:abc#1");
        assert_eq!(json["service"][0]["serviceEndpoint"], "https://agent.example/in");
        assert_eq!(json["service"][0]["routingKeys"][0], key(2).to_base58());

        let parsed: DidDoc = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn key_references() {
        let mut doc = DidDoc::new("abc", &key(1), "http://a.b/".parse().unwrap(), &[]);
        doc.service[0].recipient_keys = vec!["abc#1".to_string()];
        doc.service[0].routing_keys = vec![verkey_to_did_key(&key(5)), key(6).to_base58()];

        assert_eq!(doc.recipient_keys().unwrap(), vec![key(1)]);
        assert_eq!(doc.routing_keys().unwrap(), vec![key(5), key(6)]);
        assert!(doc.contains_key(&key(1)));
        assert!(!doc.contains_key(&key(5)));

        doc.service[0].recipient_keys = vec!["abc#7".to_string()];
        assert!(matches!(
            doc.recipient_keys(),
            Err(Error::MalformedAttachment(_))
        ));
    }

    #[test]
    fn service_priority() {
        let mut doc = DidDoc::new("abc", &key(1), "http://low.priority/".parse().unwrap(), &[]);
        doc.service[0].priority = 10;
        let mut preferred = doc.service[0].clone();
        preferred.priority = 1;
        preferred.service_endpoint = "http://preferred/".parse().unwrap();
        doc.service.push(preferred);

        assert_eq!(doc.endpoint().unwrap().as_str(), "http://preferred/");
    }

    #[test]
    fn lenient_parsing() {
        let doc: DidDoc = serde_json::from_str(
            r#"{"@context": ["https://w3id.org/did/v1"], "id": "xyz", "publicKey": []}"#,
        )
        .unwrap();

        assert!(doc.verkey().is_none());
        assert!(doc.endpoint().is_none());
        assert!(matches!(
            doc.recipient_keys(),
            Err(Error::MissingField("publicKey"))
        ));
    }
}
