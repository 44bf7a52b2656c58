//! Component identity keypairs.

use std::fmt;

use nkeys::{KeyPair, KeyPairType};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{IdentityError, IdentityResult};

/// Role tag carried in the key's prefix byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User credential (`U` public prefix), used by connecting clients
    User,
    /// Account (`A`)
    Account,
    /// Operator (`O`)
    Operator,
    /// Server (`N`)
    Server,
    /// Cluster (`C`)
    Cluster,
}

impl Role {
    fn key_pair_type(self) -> KeyPairType {
        match self {
            Role::User => KeyPairType::User,
            Role::Account => KeyPairType::Account,
            Role::Operator => KeyPairType::Operator,
            Role::Server => KeyPairType::Server,
            Role::Cluster => KeyPairType::Cluster,
        }
    }

    fn from_key_pair_type(kp_type: &KeyPairType) -> Option<Self> {
        match kp_type {
            KeyPairType::User => Some(Role::User),
            KeyPairType::Account => Some(Role::Account),
            KeyPairType::Operator => Some(Role::Operator),
            KeyPairType::Server => Some(Role::Server),
            KeyPairType::Cluster => Some(Role::Cluster),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::User => "user",
            Role::Account => "account",
            Role::Operator => "operator",
            Role::Server => "server",
            Role::Cluster => "cluster",
        };
        f.write_str(name)
    }
}

/// A keypair naming one component instance.
///
/// The public identifier is derived from the keypair at construction and
/// cached. Public-only identities (imported from a bare public key) carry
/// no seed and cannot sign.
pub struct Identity {
    pair: KeyPair,
    role: Role,
    public: String,
    seed: Option<Zeroizing<String>>,
}

impl Identity {
    /// Generate a fresh keypair for `role` from the OS entropy source.
    pub fn generate(role: Role) -> IdentityResult<Self> {
        let mut raw = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut raw)
            .map_err(|e| IdentityError::KeyGeneration(e.to_string()))?;

        let pair = KeyPair::new_from_raw(role.key_pair_type(), raw);
        raw.zeroize();
        let pair = pair.map_err(|e| IdentityError::KeyGeneration(e.to_string()))?;

        let seed = pair
            .seed()
            .map_err(|e| IdentityError::KeyGeneration(e.to_string()))?;

        tracing::debug!(%role, "generated identity keypair");

        Ok(Self {
            public: pair.public_key(),
            seed: Some(Zeroizing::new(seed)),
            pair,
            role,
        })
    }

    /// Load an identity from an encoded seed (`S...`) or public key.
    ///
    /// The key's role prefix must match `role`.
    pub fn from_existing(material: &str, role: Role) -> IdentityResult<Self> {
        let material = material.trim();
        if material.is_empty() {
            return Err(IdentityError::InvalidKey("key material is empty".to_string()));
        }

        let (pair, seed) = if material.starts_with('S') {
            let pair = KeyPair::from_seed(material)
                .map_err(|e| IdentityError::InvalidKey(e.to_string()))?;
            let seed = pair
                .seed()
                .map_err(|e| IdentityError::InvalidKey(e.to_string()))?;
            (pair, Some(Zeroizing::new(seed)))
        } else {
            let pair = KeyPair::from_public_key(material)
                .map_err(|e| IdentityError::InvalidKey(e.to_string()))?;
            (pair, None)
        };

        let actual = pair.key_pair_type();
        if Role::from_key_pair_type(&actual) != Some(role) {
            return Err(IdentityError::InvalidKey(format!(
                "expected {} key, got {:?}",
                role, actual
            )));
        }

        Ok(Self {
            public: pair.public_key(),
            pair,
            role,
            seed,
        })
    }

    /// Load a public-only identity. Seed material is rejected.
    pub fn from_public(material: &str, role: Role) -> IdentityResult<Self> {
        if material.trim_start().starts_with('S') {
            return Err(IdentityError::InvalidKey(
                "expected a public key, got seed material".to_string(),
            ));
        }
        Self::from_existing(material, role)
    }

    /// Encoded public identifier.
    pub fn public_key(&self) -> &str {
        &self.public
    }

    /// Encoded private seed, if this identity holds one.
    pub fn seed(&self) -> Option<&str> {
        self.seed.as_ref().map(|s| s.as_str())
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether this identity can sign.
    pub fn has_seed(&self) -> bool {
        self.seed.is_some()
    }

    /// Sign `input` with the private key.
    pub fn sign(&self, input: &[u8]) -> IdentityResult<Vec<u8>> {
        if !self.has_seed() {
            return Err(IdentityError::InvalidKey(
                "public-only identity cannot sign".to_string(),
            ));
        }
        self.pair
            .sign(input)
            .map_err(|e| IdentityError::InvalidKey(e.to_string()))
    }

    /// Verify `signature` over `input` against the public key.
    pub fn verify(&self, input: &[u8], signature: &[u8]) -> bool {
        self.pair.verify(input, signature).is_ok()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("role", &self.role)
            .field("public", &self.public)
            .field("seed", &self.seed.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
