//! Credential decryption collaborator

use crate::Result;
use zeroize::Zeroizing;

/// Turns a stored device secret into the plaintext password.
///
/// Called at most once per digest-retried request. Implementations must not
/// cache plaintext and must report failures as [`Error::Decryption`](crate::Error::Decryption)
/// without cipher details.
pub trait SecretDecryptor: Send + Sync {
    fn decrypt(&self, encrypted_secret: &str) -> Result<Zeroizing<String>>;
}

impl<F> SecretDecryptor for F
where
    F: Fn(&str) -> Result<Zeroizing<String>> + Send + Sync,
{
    fn decrypt(&self, encrypted_secret: &str) -> Result<Zeroizing<String>> {
        self(encrypted_secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn closures_act_as_decryptors() {
        let decryptor = |secret: &str| -> Result<Zeroizing<String>> {
            secret
                .strip_prefix("enc:")
                .map(|p| Zeroizing::new(p.to_string()))
                .ok_or(Error::Decryption)
        };

        assert_eq!(decryptor.decrypt("enc:12345").unwrap().as_str(), "12345");
        assert_eq!(decryptor.decrypt("garbage"), Err(Error::Decryption));
    }
}
