//! Signed capability tokens.
//!
//! A token is `base64url(header).base64url(claims).base64url(signature)` with an Ed25519
//! signature by the issuer over the first two segments. The builder's root credential covers
//! every command; delegations extend it to one audience and one command for a short time.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ed25519_dalek::Signature;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    config::DELEGATION_TTL_SECONDS,
    identity::{Did, Keypair},
    utils::unix_now,
};

/// Lifetime of a builder root credential.
pub const ROOT_CREDENTIAL_TTL_SECONDS: u64 = 3_600;

const TOKEN_HEADER: &str = r#"{"alg":"EdDSA","typ":"vaultkit+jwt"}"#;

/// Operation a token authorizes. Commands are paths; a command permits itself and every
/// command below it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, AsRefStr, Display,
)]
pub enum Command {
    /// Everything.
    #[strum(serialize = "/vault")]
    #[serde(rename = "/vault")]
    All,
    /// Listing and creating collections.
    #[strum(serialize = "/vault/collections")]
    #[serde(rename = "/vault/collections")]
    ManageCollections,
    /// Creating an owned record.
    #[strum(serialize = "/vault/data/create")]
    #[serde(rename = "/vault/data/create")]
    CreateRecord,
    /// Listing and reading owned records.
    #[strum(serialize = "/vault/data/read")]
    #[serde(rename = "/vault/data/read")]
    ReadRecord,
    /// Deleting an owned record.
    #[strum(serialize = "/vault/data/delete")]
    #[serde(rename = "/vault/data/delete")]
    DeleteRecord,
}

impl Command {
    /// Whether a token for `self` may be used for `other`.
    #[must_use]
    pub fn permits(self, other: Self) -> bool {
        let own = self.as_ref();
        let requested = other.as_ref();
        requested == own
            || requested
                .strip_prefix(own)
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// Errors raised while minting or checking tokens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// The token could not be encoded or decoded.
    #[error("malformed token: {0}")]
    Malformed(String),
    /// The signature does not match the issuer.
    #[error("invalid token signature")]
    BadSignature,
    /// The token is past its expiry.
    #[error("token expired at {expired_at}")]
    Expired {
        /// Expiry of the token, unix seconds.
        expired_at: u64,
    },
    /// The parent credential does not cover the requested command.
    #[error("command {requested} is not covered by {granted}")]
    NotPermitted {
        /// Command of the parent credential.
        granted: Command,
        /// Command that was requested.
        requested: Command,
    },
    /// The signer is not the holder of the parent credential.
    #[error("signer {signer} cannot extend a credential addressed to {audience}")]
    IssuerMismatch {
        /// DID of the signer.
        signer: String,
        /// Audience of the parent credential.
        audience: String,
    },
}

/// Claims carried by a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Signer.
    pub iss: Did,
    /// Holder allowed to present the token.
    pub aud: Did,
    /// Authorized command.
    pub cmd: Command,
    /// Issued at, unix seconds.
    pub iat: u64,
    /// Expires at, unix seconds.
    pub exp: u64,
    /// Random value making every token unique.
    pub nonce: String,
    /// SHA-256 of the parent credential, for delegations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prf: Option<String>,
}

/// A signed, encoded token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    claims: TokenClaims,
    encoded: String,
}

/// Builder credential from which delegations are derived.
pub type RootCredential = Token;
/// Short-lived credential handed to a user client for one command.
pub type DelegationToken = Token;

impl Token {
    /// Signs `claims` with `signer`.
    ///
    /// # Errors
    /// Returns [`TokenError::Malformed`] if the claims cannot be serialized.
    pub fn sign(signer: &Keypair, claims: TokenClaims) -> Result<Self, TokenError> {
        let payload =
            serde_json::to_vec(&claims).map_err(|err| TokenError::Malformed(err.to_string()))?;
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(TOKEN_HEADER),
            URL_SAFE_NO_PAD.encode(payload)
        );
        let signature = signer.sign(signing_input.as_bytes());
        let encoded = format!(
            "{signing_input}.{}",
            URL_SAFE_NO_PAD.encode(signature.to_bytes())
        );
        Ok(Self { claims, encoded })
    }

    /// Decodes a token and checks its signature against the issuer DID.
    ///
    /// Expiry is not checked here, see [`Token::verify`].
    ///
    /// # Errors
    /// [`TokenError::Malformed`] or [`TokenError::BadSignature`].
    pub fn decode(encoded: &str) -> Result<Self, TokenError> {
        let Some((signing_input, signature)) = encoded.rsplit_once('.') else {
            return Err(TokenError::Malformed("expected three segments".to_string()));
        };
        let Some((_header, payload)) = signing_input.split_once('.') else {
            return Err(TokenError::Malformed("expected three segments".to_string()));
        };
        if payload.contains('.') {
            return Err(TokenError::Malformed("expected three segments".to_string()));
        }

        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|err| TokenError::Malformed(err.to_string()))?;
        let claims: TokenClaims = serde_json::from_slice(&payload)
            .map_err(|err| TokenError::Malformed(err.to_string()))?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|err| TokenError::Malformed(err.to_string()))?;
        let signature = Signature::from_slice(&signature).map_err(|_| TokenError::BadSignature)?;

        if !claims.iss.verify(signing_input.as_bytes(), &signature) {
            return Err(TokenError::BadSignature);
        }

        Ok(Self {
            claims,
            encoded: encoded.to_string(),
        })
    }

    /// Decodes a token and rejects it if expired at `now`.
    ///
    /// # Errors
    /// See [`Token::decode`]; additionally [`TokenError::Expired`].
    pub fn verify(encoded: &str, now: u64) -> Result<Self, TokenError> {
        let token = Self::decode(encoded)?;
        if token.is_expired_at(now) {
            return Err(TokenError::Expired {
                expired_at: token.claims.exp,
            });
        }
        Ok(token)
    }

    /// The token's claims.
    #[must_use]
    pub const fn claims(&self) -> &TokenClaims {
        &self.claims
    }

    /// The encoded form presented to the vault.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    /// Audience of the token.
    #[must_use]
    pub const fn audience(&self) -> &Did {
        &self.claims.aud
    }

    /// Authorized command.
    #[must_use]
    pub const fn command(&self) -> Command {
        self.claims.cmd
    }

    /// Expiry, unix seconds.
    #[must_use]
    pub const fn expires_at(&self) -> u64 {
        self.claims.exp
    }

    /// Whether the token has expired at `now`.
    #[must_use]
    pub const fn is_expired_at(&self, now: u64) -> bool {
        now >= self.claims.exp
    }

    /// Hex SHA-256 of the encoded token.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.encoded.as_bytes()))
    }
}

/// Mints delegation and invocation tokens.
///
/// Delegations are never cached: every mutating record operation asks for a fresh one, so an
/// intercepted token is only useful for `ttl_seconds`.
#[derive(Debug, Clone, Copy)]
pub struct DelegationIssuer {
    ttl_seconds: u64,
}

impl Default for DelegationIssuer {
    fn default() -> Self {
        Self::new(DELEGATION_TTL_SECONDS)
    }
}

impl DelegationIssuer {
    /// Creates an issuer whose tokens live for `ttl_seconds`.
    #[must_use]
    pub const fn new(ttl_seconds: u64) -> Self {
        Self { ttl_seconds }
    }

    /// Lifetime of issued tokens.
    #[must_use]
    pub const fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    /// Mints a root credential for `signer`, covering every command.
    ///
    /// # Errors
    /// Returns [`TokenError::Malformed`] if signing fails.
    pub fn root_credential(
        signer: &Keypair,
        ttl_seconds: u64,
        now: u64,
    ) -> Result<RootCredential, TokenError> {
        Token::sign(
            signer,
            TokenClaims {
                iss: signer.did().clone(),
                aud: signer.did().clone(),
                cmd: Command::All,
                iat: now,
                exp: now.saturating_add(ttl_seconds),
                nonce: Uuid::new_v4().simple().to_string(),
                prf: None,
            },
        )
    }

    /// Extends `root` to `audience` for `command`, expiring `ttl_seconds` from now.
    ///
    /// # Errors
    /// See [`DelegationIssuer::issue_at`].
    pub fn issue(
        &self,
        root: &RootCredential,
        signer: &Keypair,
        audience: &Did,
        command: Command,
    ) -> Result<DelegationToken, TokenError> {
        Self::issue_at(root, signer, audience, command, self.ttl_seconds, unix_now())
    }

    /// Clock-injected form of [`DelegationIssuer::issue`].
    ///
    /// # Errors
    /// - [`TokenError::IssuerMismatch`] if `signer` does not hold `root`.
    /// - [`TokenError::NotPermitted`] if `root` does not cover `command`.
    /// - [`TokenError::Expired`] if `root` has expired at `now`.
    pub fn issue_at(
        root: &RootCredential,
        signer: &Keypair,
        audience: &Did,
        command: Command,
        ttl_seconds: u64,
        now: u64,
    ) -> Result<DelegationToken, TokenError> {
        if root.audience() != signer.did() {
            return Err(TokenError::IssuerMismatch {
                signer: signer.did().to_string(),
                audience: root.audience().to_string(),
            });
        }
        if !root.command().permits(command) {
            return Err(TokenError::NotPermitted {
                granted: root.command(),
                requested: command,
            });
        }
        if root.is_expired_at(now) {
            return Err(TokenError::Expired {
                expired_at: root.expires_at(),
            });
        }

        Token::sign(
            signer,
            TokenClaims {
                iss: signer.did().clone(),
                aud: audience.clone(),
                cmd: command,
                iat: now,
                exp: now.saturating_add(ttl_seconds),
                nonce: Uuid::new_v4().simple().to_string(),
                prf: Some(root.fingerprint()),
            },
        )
    }

    /// Mints a self-signed token a client presents for its own `command`.
    ///
    /// # Errors
    /// Returns [`TokenError::Malformed`] if signing fails.
    pub fn invoke(&self, signer: &Keypair, command: Command) -> Result<Token, TokenError> {
        let now = unix_now();
        Token::sign(
            signer,
            TokenClaims {
                iss: signer.did().clone(),
                aud: signer.did().clone(),
                cmd: command,
                iat: now,
                exp: now.saturating_add(self.ttl_seconds),
                nonce: Uuid::new_v4().simple().to_string(),
                prf: None,
            },
        )
    }
}
