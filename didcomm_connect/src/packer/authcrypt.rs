use super::{
    Envelope, Packer, PackerKind,
    envelope::{self, JweEnvelope, ProtectedHeader, Recipient, RecipientHeader},
};
use crate::{
    crypto::{Crypto, CryptoError, KeyHandle, KeyManager},
    definitions::{PackedMessage, PublicVerificationKeyData},
};

/// Authenticated encryption: every recipient learns (and can verify) the sender key
#[derive(Debug, Default, Clone, Copy)]
pub struct Authcrypt;

impl Packer for Authcrypt {
    fn kind(&self) -> PackerKind {
        PackerKind::Authcrypt
    }

    fn pack(
        &self,
        crypto: &dyn Crypto,
        payload: &[u8],
        sender: Option<&KeyHandle>,
        recipients: &[PublicVerificationKeyData],
    ) -> Result<PackedMessage, CryptoError> {
        let Some(sender) = sender else {
            return Err(CryptoError::EncryptionFailed(
                "authcrypt requires a sender key".into(),
            ));
        };

        let cek = envelope::fresh_content_key();

        let recipients = recipients
            .iter()
            .map(|recipient| {
                let encrypted_key = crypto.encrypt(Some(&sender.kid), recipient, &cek[..])?;
                let hidden_sender = crypto.encrypt(None, recipient, sender.kid.as_bytes())?;

                Ok(Recipient {
                    encrypted_key: envelope::encode(&encrypted_key),
                    header: RecipientHeader {
                        kid: recipient.to_base58(),
                        sender: Some(envelope::encode(&hidden_sender)),
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

        let Some(hidden_sender) = &recipient.header.sender else {
            return Err(CryptoError::DecryptionFailed(
                "authcrypt recipient without sender".into(),
            ));
        };

        let sender_kid = crypto.decrypt(
            &handle.kid,
            None,
            &envelope::decode("sender", hidden_sender)?,
        )?;
        let sender = std::str::from_utf8(&sender_kid)
            .ok()
            .and_then(PublicVerificationKeyData::from_base58)
            .ok_or_else(|| CryptoError::DecryptionFailed("invalid sender key".into()))?;

        let cek = crypto.decrypt(
            &handle.kid,
            Some(&sender),
            &envelope::decode("encrypted_key", &recipient.encrypted_key)?,
        )?;

        Ok(Envelope {
            message: envelope.open(&cek)?,
            from_key: Some(sender),
            to_keys: vec![handle.public_key],
        })
    }
}
