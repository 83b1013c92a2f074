//! Key material: raw private keys, mnemonic-derived keys and the key files
//! they are loaded from.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use alloy::primitives::{Address, B256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::local::coins_bip39::{English, Mnemonic};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use sha2::{Digest, Sha256};

use crate::error::{ClientError, Result};

const PRIVATE_KEY_LEN: usize = 32;

/// A secp256k1 signing identity.
///
/// The private key never leaves this type except through [`Identity::to_hex`].
#[derive(Clone)]
pub struct Identity {
    signer: PrivateKeySigner,
    public_key: [u8; 64],
}

impl Identity {
    /// Build an identity from the raw 32-byte private scalar.
    pub fn from_private_key(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(invalid("private key is empty"));
        }
        if bytes.len() != PRIVATE_KEY_LEN {
            return Err(invalid(format!(
                "private key must be {PRIVATE_KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let signer = PrivateKeySigner::from_slice(bytes)
            .map_err(|e| invalid(format!("private key is not a valid secp256k1 scalar: {e}")))?;
        Ok(Self::from_signer(signer))
    }

    /// Derive an identity from a BIP-39 phrase: seed (empty passphrase),
    /// then SHA-256 of the seed as the private key.
    pub fn from_mnemonic(phrase: &str) -> Result<Self> {
        let phrase = phrase.trim();
        if phrase.is_empty() {
            return Err(invalid("mnemonic is empty"));
        }
        let mnemonic = Mnemonic::<English>::new_from_phrase(phrase)
            .map_err(|e| invalid(format!("malformed mnemonic: {e}")))?;
        let seed = mnemonic
            .to_seed(None)
            .map_err(|e| invalid(format!("failed to derive mnemonic seed: {e}")))?;
        let key = Sha256::digest(seed);
        Self::from_private_key(key.as_slice())
    }

    /// Decode a private key written as hex (optionally `0x`-prefixed) or base64.
    pub fn from_key_text(text: &str) -> Result<Self> {
        let bytes = decode_key_text(text)?;
        Self::from_private_key(&bytes)
    }

    /// Fresh random identity.
    pub fn generate() -> Self {
        Self::from_signer(PrivateKeySigner::random())
    }

    fn from_signer(signer: PrivateKeySigner) -> Self {
        let encoded = signer
            .credential()
            .verifying_key()
            .as_affine()
            .to_encoded_point(false);
        // SEC1 uncompressed form is 0x04 || x || y.
        let mut public_key = [0u8; 64];
        public_key.copy_from_slice(&encoded.as_bytes()[1..]);
        Self { signer, public_key }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Uncompressed public key without the SEC1 tag byte.
    pub fn public_key(&self) -> &[u8; 64] {
        &self.public_key
    }

    pub fn private_key(&self) -> B256 {
        self.signer.to_bytes()
    }

    pub fn signer(&self) -> &PrivateKeySigner {
        &self.signer
    }

    /// `0x`-prefixed hex of the private key, the format key files are written in.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.private_key()))
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.public_key == other.public_key
    }
}

impl Eq for Identity {}

/// Where the session's key material comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    PrivateKeyFile(PathBuf),
    MnemonicFile(PathBuf),
}

impl KeySource {
    /// Pick the key file to use. The private key file wins when both exist.
    pub fn resolve(private_key_path: &Path, mnemonic_path: &Path) -> Result<Self> {
        if private_key_path.is_file() {
            Ok(KeySource::PrivateKeyFile(private_key_path.to_path_buf()))
        } else if mnemonic_path.is_file() {
            Ok(KeySource::MnemonicFile(mnemonic_path.to_path_buf()))
        } else {
            Err(invalid(format!(
                "neither {} nor {} exists",
                private_key_path.display(),
                mnemonic_path.display()
            )))
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            KeySource::PrivateKeyFile(path) | KeySource::MnemonicFile(path) => path,
        }
    }

    pub fn load(&self) -> Result<Identity> {
        let text = fs::read_to_string(self.path())
            .map_err(|e| invalid(format!("failed to read {}: {e}", self.path().display())))?;
        match self {
            KeySource::PrivateKeyFile(_) => Identity::from_key_text(&text),
            KeySource::MnemonicFile(_) => Identity::from_mnemonic(&text),
        }
    }
}

fn decode_key_text(text: &str) -> Result<Vec<u8>> {
    let text = text.trim();
    if text.is_empty() {
        return Err(invalid("private key is empty"));
    }
    let unprefixed = text.strip_prefix("0x").unwrap_or(text);
    match hex::decode(unprefixed) {
        Ok(bytes) if bytes.len() == PRIVATE_KEY_LEN => return Ok(bytes),
        _ => {}
    }
    BASE64
        .decode(text)
        .map_err(|_| invalid("private key is neither hex nor base64"))
}

fn invalid(reason: impl Into<String>) -> ClientError {
    ClientError::InvalidKeyMaterial(reason.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const ANVIL_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
    const ANVIL_ADDRESS: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";
    const PHRASE_A: &str = "test test test test test test test test test test test junk";
    const PHRASE_B: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn raw_key_derives_known_address() {
        let identity = Identity::from_key_text(ANVIL_KEY).unwrap();
        assert_eq!(identity.address(), ANVIL_ADDRESS.parse::<Address>().unwrap());
        assert_eq!(identity.to_hex(), ANVIL_KEY);
    }

    #[test]
    fn address_is_keccak_of_public_key() {
        let identity = Identity::generate();
        assert_eq!(
            Address::from_raw_public_key(identity.public_key()),
            identity.address()
        );
    }

    #[test]
    fn raw_key_derivation_is_deterministic() {
        let bytes = hex::decode(ANVIL_KEY.trim_start_matches("0x")).unwrap();
        let a = Identity::from_private_key(&bytes).unwrap();
        let b = Identity::from_private_key(&bytes).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.private_key().as_slice(), bytes.as_slice());
    }

    #[test]
    fn mnemonic_derivation_is_deterministic() {
        let a = Identity::from_mnemonic(PHRASE_A).unwrap();
        let b = Identity::from_mnemonic(&format!("  {PHRASE_A}\n")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn mnemonic_key_is_sha256_of_seed() {
        let seed = Mnemonic::<English>::new_from_phrase(PHRASE_B)
            .unwrap()
            .to_seed(None)
            .unwrap();
        let expected = Sha256::digest(seed);
        let identity = Identity::from_mnemonic(PHRASE_B).unwrap();
        assert_eq!(identity.private_key().as_slice(), expected.as_slice());
    }

    #[test]
    fn different_mnemonics_give_different_keys() {
        let a = Identity::from_mnemonic(PHRASE_A).unwrap();
        let b = Identity::from_mnemonic(PHRASE_B).unwrap();
        assert_ne!(a.address(), b.address());
    }

    #[test]
    fn out_of_range_scalars_are_rejected() {
        let zero = [0u8; 32];
        assert!(matches!(
            Identity::from_private_key(&zero),
            Err(ClientError::InvalidKeyMaterial(_))
        ));

        let order =
            hex::decode("fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364141").unwrap();
        assert!(matches!(
            Identity::from_private_key(&order),
            Err(ClientError::InvalidKeyMaterial(_))
        ));

        let max = [0xffu8; 32];
        assert!(Identity::from_private_key(&max).is_err());
    }

    #[test]
    fn empty_or_malformed_material_is_rejected() {
        assert!(Identity::from_private_key(&[]).is_err());
        assert!(Identity::from_private_key(&[1u8; 31]).is_err());
        assert!(Identity::from_key_text("   \n").is_err());
        assert!(Identity::from_key_text("not a key!").is_err());
        assert!(Identity::from_mnemonic("").is_err());
        assert!(Identity::from_mnemonic("these words are not a valid mnemonic phrase").is_err());
    }

    #[test]
    fn key_text_accepts_base64() {
        let bytes = hex::decode(ANVIL_KEY.trim_start_matches("0x")).unwrap();
        let encoded = BASE64.encode(&bytes);
        let identity = Identity::from_key_text(&encoded).unwrap();
        assert_eq!(identity.address(), ANVIL_ADDRESS.parse::<Address>().unwrap());
    }

    #[test]
    fn private_key_file_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("private_key");
        let mnemonic_path = dir.path().join("mnemonic");

        fs::write(&mnemonic_path, PHRASE_A).unwrap();
        let source = KeySource::resolve(&key_path, &mnemonic_path).unwrap();
        assert_eq!(source, KeySource::MnemonicFile(mnemonic_path.clone()));
        assert_eq!(
            source.load().unwrap(),
            Identity::from_mnemonic(PHRASE_A).unwrap()
        );

        let mut file = fs::File::create(&key_path).unwrap();
        writeln!(file, "{ANVIL_KEY}").unwrap();
        let source = KeySource::resolve(&key_path, &mnemonic_path).unwrap();
        assert_eq!(source, KeySource::PrivateKeyFile(key_path));
        assert_eq!(
            source.load().unwrap().address(),
            ANVIL_ADDRESS.parse::<Address>().unwrap()
        );
    }

    #[test]
    fn missing_key_files_are_invalid_material() {
        let dir = tempfile::tempdir().unwrap();
        let err = KeySource::resolve(&dir.path().join("a"), &dir.path().join("b")).unwrap_err();
        assert!(matches!(err, ClientError::InvalidKeyMaterial(_)));
    }

    #[test]
    fn debug_does_not_leak_private_key() {
        let identity = Identity::from_key_text(ANVIL_KEY).unwrap();
        let printed = format!("{identity:?}");
        assert!(!printed.contains(&ANVIL_KEY[2..]));
    }
}
