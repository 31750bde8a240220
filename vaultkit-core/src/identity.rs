//! Builder and user identities.
//!
//! Every identity is an Ed25519 keypair addressed by a [`Did`] of the form
//! `did:vault:<hex public key>`. The builder keypair comes from configuration. User keypairs are
//! derived from the builder secret and the user's wallet address with HKDF-SHA256, so the same
//! address always maps to the same user identity and its records stay reachable across reloads.

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::{
    config::VaultConfig,
    error::{VaultKitError, VaultKitResult},
};

/// Method prefix of every vault DID.
pub const DID_PREFIX: &str = "did:vault:";

const USER_IDENTITY_SALT: &[u8] = b"vaultkit:user-identity";
const SECRET_KEY_LENGTH: usize = ed25519_dalek::SECRET_KEY_LENGTH;

/// Decentralized identifier of a vault identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Did(String);

impl Did {
    /// Builds the DID for a public key.
    #[must_use]
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        Self(format!("{DID_PREFIX}{}", hex::encode(key.as_bytes())))
    }

    /// Returns the DID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recovers the public key embedded in the DID, if it is well formed.
    #[must_use]
    pub fn verifying_key(&self) -> Option<VerifyingKey> {
        let encoded = self.0.strip_prefix(DID_PREFIX)?;
        let bytes: [u8; 32] = hex::decode(encoded).ok()?.try_into().ok()?;
        VerifyingKey::from_bytes(&bytes).ok()
    }

    /// Verifies `signature` over `message` against the embedded public key.
    #[must_use]
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        self.verifying_key()
            .is_some_and(|key| key.verify(message, signature).is_ok())
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Did> for String {
    fn from(did: Did) -> Self {
        did.0
    }
}

/// An Ed25519 keypair with its DID.
#[derive(Clone)]
pub struct Keypair {
    signing: SigningKey,
    did: Did,
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("did", &self.did)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl Keypair {
    /// Creates a keypair from raw secret key bytes.
    #[must_use]
    pub fn from_secret_bytes(secret: &[u8; SECRET_KEY_LENGTH]) -> Self {
        let signing = SigningKey::from_bytes(secret);
        let did = Did::from_verifying_key(&signing.verifying_key());
        Self { signing, did }
    }

    /// Parses a hex-encoded secret key (`0x` prefix optional).
    ///
    /// # Errors
    /// - [`VaultKitError::MissingPrivateKey`] if the input is blank.
    /// - [`VaultKitError::KeypairCreationFailed`] if it is not 32 bytes of valid hex.
    pub fn from_hex(encoded: &str) -> VaultKitResult<Self> {
        let trimmed = encoded.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if digits.is_empty() {
            return Err(VaultKitError::MissingPrivateKey);
        }

        let bytes = Zeroizing::new(hex::decode(digits).map_err(|err| {
            VaultKitError::KeypairCreationFailed {
                reason: format!("private key is not valid hex: {err}"),
            }
        })?);
        let secret: Zeroizing<[u8; SECRET_KEY_LENGTH]> = Zeroizing::new(
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| VaultKitError::KeypairCreationFailed {
                    reason: format!(
                        "private key must be {SECRET_KEY_LENGTH} bytes, got {}",
                        bytes.len()
                    ),
                })?,
        );
        Ok(Self::from_secret_bytes(&secret))
    }

    /// The DID for this keypair.
    #[must_use]
    pub const fn did(&self) -> &Did {
        &self.did
    }

    /// Signs `message`.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing.sign(message)
    }

    fn secret_bytes(&self) -> Zeroizing<[u8; SECRET_KEY_LENGTH]> {
        Zeroizing::new(self.signing.to_bytes())
    }
}

/// The service-side identity that administers collections and issues delegations.
#[derive(Debug, Clone)]
pub struct BuilderIdentity {
    keypair: Keypair,
}

impl BuilderIdentity {
    /// Derives the builder identity from the configured secret key.
    ///
    /// # Errors
    /// - [`VaultKitError::MissingPrivateKey`] if no key is configured.
    /// - [`VaultKitError::KeypairCreationFailed`] if the key is malformed.
    pub fn from_config(config: &VaultConfig) -> VaultKitResult<Self> {
        let key = config
            .builder_private_key
            .as_ref()
            .ok_or(VaultKitError::MissingPrivateKey)?;
        Ok(Self {
            keypair: Keypair::from_hex(key.expose_secret())?,
        })
    }

    /// Wraps an existing keypair.
    #[must_use]
    pub const fn from_keypair(keypair: Keypair) -> Self {
        Self { keypair }
    }

    /// The builder DID.
    #[must_use]
    pub const fn did(&self) -> &Did {
        self.keypair.did()
    }

    /// The builder keypair.
    #[must_use]
    pub const fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    /// Derives the user identity for `user_address`.
    ///
    /// # Errors
    /// Returns [`VaultKitError::KeypairCreationFailed`] if key expansion fails.
    pub fn derive_user(&self, user_address: &str) -> VaultKitResult<UserIdentity> {
        let builder_secret = self.keypair.secret_bytes();
        let hkdf = Hkdf::<Sha256>::new(Some(USER_IDENTITY_SALT), &builder_secret[..]);
        let mut okm = Zeroizing::new([0u8; SECRET_KEY_LENGTH]);
        hkdf.expand(user_address.as_bytes(), &mut okm[..])
            .map_err(|err| VaultKitError::KeypairCreationFailed {
                reason: format!("user key derivation failed: {err}"),
            })?;

        Ok(UserIdentity {
            keypair: Keypair::from_secret_bytes(&okm),
            address: user_address.to_string(),
        })
    }
}

/// The per-user identity that owns records.
#[derive(Debug, Clone)]
pub struct UserIdentity {
    keypair: Keypair,
    address: String,
}

impl UserIdentity {
    /// The user DID.
    #[must_use]
    pub const fn did(&self) -> &Did {
        self.keypair.did()
    }

    /// The user keypair.
    #[must_use]
    pub const fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    /// The wallet address this identity was derived for.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use test_case::test_case;

    use super::*;

    const KEY: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

    #[test]
    fn test_did_roundtrips_public_key() {
        let keypair = Keypair::from_hex(KEY).unwrap();
        assert!(keypair.did().as_str().starts_with(DID_PREFIX));
        assert_eq!(
            keypair.did().verifying_key().unwrap(),
            keypair.signing.verifying_key()
        );

        let signature = keypair.sign(b"hello");
        assert!(keypair.did().verify(b"hello", &signature));
        assert!(!keypair.did().verify(b"hullo", &signature));
    }

    #[test]
    fn test_prefix_is_optional() {
        let with_prefix = Keypair::from_hex(KEY).unwrap();
        let without = Keypair::from_hex(&KEY[2..]).unwrap();
        assert_eq!(with_prefix.did(), without.did());
    }

    #[test_case("" ; "empty")]
    #[test_case("   " ; "blank")]
    #[test_case("0x" ; "prefix only")]
    fn test_missing_key(input: &str) {
        assert_eq!(
            Keypair::from_hex(input).unwrap_err(),
            VaultKitError::MissingPrivateKey
        );
    }

    #[test_case("0xzz" ; "not hex")]
    #[test_case("0x1234" ; "too short")]
    #[test_case("0x111111111111111111111111111111111111111111111111111111111111111111" ; "too long")]
    fn test_malformed_key(input: &str) {
        let err = Keypair::from_hex(input).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::KeypairCreationFailed);
    }

    #[test]
    fn test_builder_from_config_requires_key() {
        let config = VaultConfig::new("https://vault.example.org", None);
        assert_eq!(
            BuilderIdentity::from_config(&config).unwrap_err(),
            VaultKitError::MissingPrivateKey
        );

        let config = VaultConfig::new(
            "https://vault.example.org",
            Some(SecretString::from(KEY.to_string())),
        );
        assert!(BuilderIdentity::from_config(&config).is_ok());
    }

    #[test]
    fn test_user_derivation_is_deterministic_and_distinct() {
        let builder = BuilderIdentity::from_keypair(Keypair::from_hex(KEY).unwrap());
        let alice = builder.derive_user("0xa11ce").unwrap();
        let alice_again = builder.derive_user("0xa11ce").unwrap();
        let bob = builder.derive_user("0xb0b").unwrap();

        assert_eq!(alice.did(), alice_again.did());
        assert_ne!(alice.did(), bob.did());
        assert_ne!(alice.did(), builder.did());
        assert_eq!(alice.address(), "0xa11ce");
    }

    #[test]
    fn test_debug_redacts_secret() {
        let keypair = Keypair::from_hex(KEY).unwrap();
        let rendered = format!("{keypair:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains(&KEY[2..]));
    }
}
