use super::{
    Envelope, Packer, PackerKind,
    envelope::{self, JweEnvelope, ProtectedHeader, Recipient, RecipientHeader},
};
use crate::{
    crypto::{Crypto, CryptoError, KeyHandle, KeyManager},
    definitions::{PackedMessage, PublicVerificationKeyData},
};

/// Anonymous encryption: recipients learn nothing about the sender
#[derive(Debug, Default, Clone, Copy)]
pub struct Anoncrypt;

impl Packer for Anoncrypt {
    fn kind(&self) -> PackerKind {
        PackerKind::Anoncrypt
    }

    fn pack(
        &self,
        crypto: &dyn Crypto,
        payload: &[u8],
        _sender: Option<&KeyHandle>,
        recipients: &[PublicVerificationKeyData],
    ) -> Result<PackedMessage, CryptoError> {
        let cek = envelope::fresh_content_key();

        let recipients = recipients
            .iter()
            .map(|recipient| {
                let encrypted_key = crypto.encrypt(None, recipient, &cek[..])?;

                Ok(Recipient {
                    encrypted_key: envelope::encode(&encrypted_key),
                    header: RecipientHeader {
                        kid: recipient.to_base58(),
                        sender: None,
                    },
                })
            })
            .collect::<Result<Vec<_>, CryptoError>>()?;

        JweEnvelope::seal(self.kind(), recipients, &cek, payload)
    }

    fn unpack(
        &self,
        crypto: &dyn Crypto,
        kms: &dyn KeyManager,
        envelope: &JweEnvelope,
        header: &ProtectedHeader,
    ) -> Result<Envelope, CryptoError> {
        let (recipient, handle) = header.find_recipient(kms)?;

        let cek = crypto.decrypt(
            &handle.kid,
            None,
            &envelope::decode("encrypted_key", &recipient.encrypted_key)?,
        )?;

        Ok(Envelope {
            message: envelope.open(&cek)?,
            from_key: None,
            to_keys: vec![handle.public_key],
        })
    }
}
