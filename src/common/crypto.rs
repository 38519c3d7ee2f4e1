use ed25519_dalek::{ed25519::{self, signature::Signer}, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest as ShaDigest, Sha512};

pub type Digest = [u8; 64];

pub trait Hashable {
    fn hash(&self) -> Digest;
}

/// Incremental SHA-512 over length-prefixed fields, so that adjacent
/// variable-length fields cannot be shifted into each other.
pub struct DigestBuilder {
    hasher: Sha512,
}

impl DigestBuilder {
    pub fn new(domain: &[u8]) -> Self {
        let mut builder = DigestBuilder { hasher: Sha512::new() };
        builder.bytes(domain);
        builder
    }

    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.hasher.update((data.len() as u64).to_be_bytes());
        self.hasher.update(data);
        self
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.hasher.update(value.to_be_bytes());
        self
    }

    pub fn optional(&mut self, data: Option<&[u8]>) -> &mut Self {
        match data {
            Some(data) => {
                self.hasher.update([1u8]);
                self.bytes(data)
            }
            None => {
                self.hasher.update([0u8]);
                self
            }
        }
    }

    pub fn finish(&mut self) -> Digest {
        let result = std::mem::take(&mut self.hasher).finalize();
        let mut digest = [0u8; 64];
        digest.copy_from_slice(&result[..]);
        digest
    }
}

pub struct Keypair {
    pubkey: Pubkey,
    dalek_signer: SigningKey,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Pubkey {
    pub key: [u8; 32],
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Signature {
    pub signer: Pubkey,
    pub sig: [u8; 64],
}

impl Keypair {
    pub fn new_pair() -> Self {
        let mut csprng = OsRng;
        Self::from_signing_key(SigningKey::generate(&mut csprng))
    }

    /// Deterministic keypair, used by simulations that need reproducible keys.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(&seed))
    }

    fn from_signing_key(dalek_signer: SigningKey) -> Self {
        let pubkey = Pubkey::from(&dalek_signer.verifying_key().to_bytes());

        Keypair {
            pubkey,
            dalek_signer,
        }
    }

    pub fn sign(&self, digest: &Digest) -> Signature {
        let sig = self
            .dalek_signer
            .sign(digest)
            .to_bytes();

        Signature {
            signer: self.pubkey.clone(),
            sig,
        }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.pubkey.clone()
    }
}

impl From<&[u8; 32]> for Pubkey {
    fn from(bytes: &[u8; 32]) -> Self {
        Pubkey { key: *bytes }
    }
}

impl Signature {
    pub fn verify(&self, digest: &Digest) -> bool {
        let dalek_sig = ed25519::Signature::from_bytes(&self.sig);
        let Ok(dalek_pubkey) = VerifyingKey::from_bytes(&self.signer.key) else {
            return false;
        };
        dalek_pubkey
            .verify_strict(digest, &dalek_sig)
            .is_ok()
    }
}
