// riskgate/src/vault/crypto.rs
//
// Cipher construction for vault rows:
//   hashed_original    = SHA-256(original || salt), hex
//   key                = PBKDF2-HMAC-SHA256(master, salt, 100 000 iters, 32 B)
//   encrypted_original = base64(iv || AES-256-CBC(key, iv, PKCS#7(original)))
// The salt is 16 random bytes, hex-encoded, generated per token.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::GatewayError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const PBKDF2_ITERATIONS: u32 = 100_000;
const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;
const SALT_LEN: usize = 16;

/// 16 random bytes, hex-encoded.
pub fn generate_salt() -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    hex::encode(salt)
}

pub fn hash_original(original: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(original.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

fn derive_key(master_key: &str, salt: &str) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(master_key.as_bytes(), salt.as_bytes(), PBKDF2_ITERATIONS, &mut key);
    key
}

pub fn encrypt(master_key: &str, salt: &str, plaintext: &str) -> Result<String, GatewayError> {
    let key = derive_key(master_key, salt);
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    let cipher = Aes256CbcEnc::new_from_slices(&key, &iv)
        .map_err(|e| GatewayError::Vault(format!("cipher init: {e}")))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    let mut packed = Vec::with_capacity(IV_LEN + ciphertext.len());
    packed.extend_from_slice(&iv);
    packed.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(packed))
}

pub fn decrypt(master_key: &str, salt: &str, encoded: &str) -> Result<String, GatewayError> {
    let packed = BASE64
        .decode(encoded)
        .map_err(|e| GatewayError::Vault(format!("ciphertext decode: {e}")))?;
    if packed.len() <= IV_LEN {
        return Err(GatewayError::Vault("ciphertext too short".into()));
    }
    let (iv, ciphertext) = packed.split_at(IV_LEN);

    let key = derive_key(master_key, salt);
    let cipher = Aes256CbcDec::new_from_slices(&key, iv)
        .map_err(|e| GatewayError::Vault(format!("cipher init: {e}")))?;
    let plaintext = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| GatewayError::Vault("decryption failed (bad key or padding)".into()))?;

    String::from_utf8(plaintext).map_err(|e| GatewayError::Vault(format!("plaintext not utf-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn round_trip_reproduces_plaintext_bit_exactly() {
        let salt = generate_salt();
        for plaintext in [
            "john.doe@example.com",
            "",
            "exactly sixteen.",
            "héllo wörld ünïcode",
            &"x".repeat(10 * 1024),
        ] {
            let ct = encrypt(MASTER, &salt, plaintext).unwrap();
            assert_eq!(decrypt(MASTER, &salt, &ct).unwrap(), plaintext);
        }
    }

    #[test]
    fn fresh_iv_per_encryption() {
        let salt = generate_salt();
        let a = encrypt(MASTER, &salt, "same input").unwrap();
        let b = encrypt(MASTER, &salt, "same input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_salt_fails_decryption() {
        let ct = encrypt(MASTER, "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "secret").unwrap();
        let out = decrypt(MASTER, "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb", &ct);
        // CBC with the wrong key either fails padding or yields garbage that
        // is not the original; both count as failure here.
        match out {
            Err(_) => {}
            Ok(v) => assert_ne!(v, "secret"),
        }
    }

    #[test]
    fn wrong_master_key_fails_decryption() {
        let salt = generate_salt();
        let ct = encrypt(MASTER, &salt, "secret").unwrap();
        let out = decrypt("another-master-key-entirely!!!!!", &salt, &ct);
        match out {
            Err(_) => {}
            Ok(v) => assert_ne!(v, "secret"),
        }
    }

    #[test]
    fn salt_is_sixteen_hex_bytes() {
        let salt = generate_salt();
        assert_eq!(salt.len(), 32);
        assert!(hex::decode(&salt).is_ok());
    }

    #[test]
    fn hash_binds_value_and_salt() {
        let a = hash_original("v", "s1");
        let b = hash_original("v", "s2");
        let c = hash_original("w", "s1");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, hash_original("v", "s1"));
        assert_eq!(a.len(), 64);
    }
}
