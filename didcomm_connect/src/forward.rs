use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{
    Error,
    definitions::{PackedMessage, PublicVerificationKeyData},
    messages::{Header, MessageType},
    packer::{Envelope, Packager, PackerKind},
};

/// One onion layer: route `msg` on to `to`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forward {
    #[serde(flatten)]
    pub header: Header,
    pub to: String,
    pub msg: serde_json::Value,
}

impl Forward {
    pub fn new(to: &PublicVerificationKeyData, msg: &[u8]) -> Result<Self, Error> {
        Ok(Self {
            header: Header::new(MessageType::Forward),
            to: to.to_base58(),
            msg: serde_json::from_slice(msg)?,
        })
    }
}

/// Result of removing one layer
#[derive(Debug, Clone, PartialEq)]
pub enum Peeled {
    /// Deliver `msg` to `to`
    Forward { to: String, msg: PackedMessage },
    /// This hop was the final recipient
    Message(Envelope),
}

/// Adds and removes forward layers with one agent's packager
pub struct ForwardRouter<'a> {
    packager: &'a dyn Packager,
}

impl<'a> ForwardRouter<'a> {
    pub fn new(packager: &'a dyn Packager) -> Self {
        Self { packager }
    }

    /// Wrap `packed` (addressed to `recipient`) for delivery over `routing_keys`
    ///
    /// The routing keys are in travel order: the first key belongs to the
    /// first hop, so the outermost layer is encrypted to it.
    pub fn wrap(
        &self,
        packed: PackedMessage,
        recipient: &PublicVerificationKeyData,
        routing_keys: &[PublicVerificationKeyData],
    ) -> Result<PackedMessage, Error> {
        let mut destination = recipient;
        let mut message = packed;

        for routing_key in routing_keys.iter().rev() {
            let forward = Forward::new(destination, &message)?;

            message = self.packager.pack_with(
                PackerKind::Anoncrypt,
                &Envelope {
                    message: serde_json::to_vec(&forward)?,
                    from_key: None,
                    to_keys: vec![*routing_key],
                },
            )?;
            destination = routing_key;
        }

        Ok(message)
    }

    /// Remove a single layer addressed to this agent
    pub fn peel(&self, packed: &[u8]) -> Result<Peeled, Error> {
        let envelope = self.packager.unpack(packed)?;

        let is_forward = serde_json::from_slice::<serde_json::Value>(&envelope.message)
            .ok()
            .and_then(|value| {
                value
                    .get("@type")
                    .and_then(|t| t.as_str())
                    .and_then(MessageType::parse)
            })
            == Some(MessageType::Forward);

        if !is_forward {
            return Ok(Peeled::Message(envelope));
        }

        let forward: Forward = serde_json::from_slice(&envelope.message)?;
        trace!("peeled forward layer, next hop {}", forward.to);

        Ok(Peeled::Forward {
            to: forward.to,
            msg: serde_json::to_vec(&forward.msg)?,
        })
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::{
        crypto::{KeyManager, LocalKms},
        packer::PackerRegistry,
    };

    fn agent() -> (Arc<PackerRegistry>, PublicVerificationKeyData) {
        let kms = LocalKms::new();
        let key = kms.create_key().unwrap().public_key;

        (Arc::new(PackerRegistry::new(kms)), key)
    }

    #[test]
    fn peel_in_declared_order() {
        let (alice, alice_key) = agent();
        let (bob, bob_key) = agent();
        let routers = (0..3).map(|_| agent()).collect::<Vec<_>>();
        let routing_keys = routers.iter().map(|(_, key)| *key).collect::<Vec<_>>();

        let packed = alice
            .pack(&Envelope {
                message: b"through three hops".to_vec(),
                from_key: Some(alice_key),
                to_keys: vec![bob_key],
            })
            .unwrap();

        let mut message = ForwardRouter::new(&*alice)
            .wrap(packed, &bob_key, &routing_keys)
            .unwrap();

        let mut destinations = Vec::new();
        for (router, _) in &routers {
            match ForwardRouter::new(&**router).peel(&message).unwrap() {
                Peeled::Forward { to, msg } => {
                    destinations.push(to);
                    message = msg;
                }
                Peeled::Message(_) => panic!("router received a final message"),
            }
        }

        let mut expected = routing_keys[1..]
            .iter()
            .map(|k| k.to_base58())
            .collect::<Vec<_>>();
        expected.push(bob_key.to_base58());
        assert_eq!(destinations, expected);

        let Peeled::Message(envelope) = ForwardRouter::new(&*bob).peel(&message).unwrap() else {
            panic!("bob should receive the final message");
        };
        assert_eq!(envelope.message, b"through three hops");
        assert_eq!(envelope.from_key, Some(alice_key));
    }

    #[test]
    fn no_routing_keys() {
        let (alice, _) = agent();
        let (_, bob_key) = agent();

        let wrapped = ForwardRouter::new(&*alice)
            .wrap(b"{}".to_vec(), &bob_key, &[])
            .unwrap();
        assert_eq!(wrapped, b"{}");
    }

    #[test]
    fn layers_are_anonymous() {
        let (alice, _) = agent();
        let (router, router_key) = agent();
        let (_, bob_key) = agent();

        let wrapped = ForwardRouter::new(&*alice)
            .wrap(b"{\"inner\": true}".to_vec(), &bob_key, &[router_key])
            .unwrap();

        let envelope = router.unpack(&wrapped).unwrap();
        assert_eq!(envelope.from_key, None);

        // a router cannot peel a layer meant for somebody else
        let (other, _) = agent();
        assert!(ForwardRouter::new(&*other).peel(&wrapped).is_err());
    }
}
