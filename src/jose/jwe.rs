use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Oaep, Pkcs1v15Encrypt, RsaPrivateKey};
use sha2::{Digest, Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;

use super::{JoseError, Jwe, KeyIdentity};

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// Where the content key comes from.
pub enum DecryptionKey<'a> {
    /// Plugin private key, for RSA key transport.
    Server(&'a RsaPrivateKey),
    /// Client secret, for `dir`.
    ClientSecret { client_id: &'a str, secret: &'a str },
}

impl DecryptionKey<'_> {
    pub fn identity(&self) -> KeyIdentity {
        match self {
            DecryptionKey::Server(_) => KeyIdentity::ServerKey,
            DecryptionKey::ClientSecret { client_id, .. } => KeyIdentity::ClientSecret {
                client_id: client_id.to_string(),
            },
        }
    }
}

/// Load the plugin key from PEM, PKCS#1 or PKCS#8.
pub fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, JoseError> {
    RsaPrivateKey::from_pkcs1_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
        .map_err(|e| JoseError::KeyUnavailable(format!("server key: {}", e)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncryption {
    A128Gcm,
    A256Gcm,
    A128CbcHs256,
    A256CbcHs512,
}

impl ContentEncryption {
    pub fn from_header(enc: &str) -> Result<Self, JoseError> {
        match enc {
            "A128GCM" => Ok(Self::A128Gcm),
            "A256GCM" => Ok(Self::A256Gcm),
            "A128CBC-HS256" => Ok(Self::A128CbcHs256),
            "A256CBC-HS512" => Ok(Self::A256CbcHs512),
            other => Err(JoseError::UnsupportedAlgorithm(other.to_string())),
        }
    }

    pub fn key_len(&self) -> usize {
        match self {
            Self::A128Gcm => 16,
            Self::A256Gcm | Self::A128CbcHs256 => 32,
            Self::A256CbcHs512 => 64,
        }
    }
}

/// Decrypt a JWE and return the raw payload.
pub fn decrypt(jwe: &Jwe, key: &DecryptionKey<'_>) -> Result<Vec<u8>, JoseError> {
    if jwe.header.zip.is_some() {
        return Err(JoseError::UnsupportedAlgorithm("zip".into()));
    }
    let enc = jwe
        .header
        .enc
        .as_deref()
        .ok_or_else(|| JoseError::Malformed("missing enc".into()))?;
    let enc = ContentEncryption::from_header(enc)?;
    let cek = unwrap_content_key(&jwe.header.alg, &jwe.encrypted_key, key, enc)?;
    let aad = jwe.protected.as_bytes();

    match enc {
        ContentEncryption::A128Gcm | ContentEncryption::A256Gcm => {
            gcm_decrypt(&cek, &jwe.iv, &jwe.ciphertext, &jwe.tag, aad)
        }
        ContentEncryption::A128CbcHs256 | ContentEncryption::A256CbcHs512 => {
            cbc_hmac_decrypt(enc, &cek, &jwe.iv, &jwe.ciphertext, &jwe.tag, aad)
        }
    }
}

fn unwrap_content_key(
    alg: &str,
    encrypted_key: &[u8],
    key: &DecryptionKey<'_>,
    enc: ContentEncryption,
) -> Result<Vec<u8>, JoseError> {
    let cek = match (alg, key) {
        ("dir", DecryptionKey::ClientSecret { secret, .. }) => {
            if !encrypted_key.is_empty() {
                return Err(JoseError::Malformed("dir with an encrypted key".into()));
            }
            derive_secret_key(secret, enc.key_len())
        }
        ("RSA1_5", DecryptionKey::Server(private)) => {
            // A random key on padding failure keeps the error at the tag check.
            match private.decrypt(Pkcs1v15Encrypt, encrypted_key) {
                Ok(cek) if cek.len() == enc.key_len() => cek,
                _ => {
                    let mut cek = vec![0u8; enc.key_len()];
                    rand::rng().fill_bytes(&mut cek);
                    cek
                }
            }
        }
        ("RSA-OAEP", DecryptionKey::Server(private)) => private
            .decrypt(Oaep::new::<sha1::Sha1>(), encrypted_key)
            .map_err(|_| JoseError::Decryption)?,
        ("RSA-OAEP-256", DecryptionKey::Server(private)) => private
            .decrypt(Oaep::new::<Sha256>(), encrypted_key)
            .map_err(|_| JoseError::Decryption)?,
        ("dir" | "RSA1_5" | "RSA-OAEP" | "RSA-OAEP-256", _) => {
            return Err(JoseError::KeyUnavailable(format!("no key for {}", alg)));
        }
        (other, _) => return Err(JoseError::UnsupportedAlgorithm(other.to_string())),
    };

    if cek.len() != enc.key_len() {
        return Err(JoseError::Decryption);
    }
    Ok(cek)
}

/// Symmetric key from a client secret: the left-most bytes of its SHA-2 hash,
/// picking the smallest hash that covers the key length.
pub fn derive_secret_key(secret: &str, len: usize) -> Vec<u8> {
    let digest = if len <= 32 {
        Sha256::digest(secret.as_bytes()).to_vec()
    } else if len <= 48 {
        Sha384::digest(secret.as_bytes()).to_vec()
    } else {
        Sha512::digest(secret.as_bytes()).to_vec()
    };
    digest[..len].to_vec()
}

fn gcm_decrypt(cek: &[u8], iv: &[u8], ciphertext: &[u8], tag: &[u8], aad: &[u8]) -> Result<Vec<u8>, JoseError> {
    if iv.len() != 12 || tag.len() != 16 {
        return Err(JoseError::Decryption);
    }
    let mut msg = ciphertext.to_vec();
    msg.extend_from_slice(tag);
    let nonce = Nonce::from_slice(iv);
    let payload = Payload { msg: &msg, aad };

    let plaintext = match cek.len() {
        16 => Aes128Gcm::new_from_slice(cek)
            .map_err(|_| JoseError::Decryption)?
            .decrypt(nonce, payload),
        32 => Aes256Gcm::new_from_slice(cek)
            .map_err(|_| JoseError::Decryption)?
            .decrypt(nonce, payload),
        _ => return Err(JoseError::Decryption),
    };
    plaintext.map_err(|_| JoseError::Decryption)
}

/// AES-CBC with HMAC-SHA2 (RFC 7518 §5.2). The tag covers
/// `aad || iv || ciphertext || AL`, AL being the AAD bit length as a big-endian u64.
fn cbc_hmac_decrypt(
    enc: ContentEncryption,
    cek: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, JoseError> {
    if iv.len() != 16 {
        return Err(JoseError::Decryption);
    }
    let (mac_key, enc_key) = cek.split_at(cek.len() / 2);
    let al = ((aad.len() as u64) * 8).to_be_bytes();

    let full_tag = match enc {
        ContentEncryption::A128CbcHs256 => {
            let mut mac = <HmacSha256 as Mac>::new_from_slice(mac_key).map_err(|_| JoseError::Decryption)?;
            mac.update(aad);
            mac.update(iv);
            mac.update(ciphertext);
            mac.update(&al);
            mac.finalize().into_bytes().to_vec()
        }
        _ => {
            let mut mac = <HmacSha512 as Mac>::new_from_slice(mac_key).map_err(|_| JoseError::Decryption)?;
            mac.update(aad);
            mac.update(iv);
            mac.update(ciphertext);
            mac.update(&al);
            mac.finalize().into_bytes().to_vec()
        }
    };
    let expected = &full_tag[..mac_key.len()];
    if tag.len() != expected.len() || !bool::from(expected.ct_eq(tag)) {
        return Err(JoseError::Decryption);
    }

    match enc {
        ContentEncryption::A128CbcHs256 => cbc::Decryptor::<aes::Aes128>::new_from_slices(enc_key, iv)
            .map_err(|_| JoseError::Decryption)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| JoseError::Decryption),
        _ => cbc::Decryptor::<aes::Aes256>::new_from_slices(enc_key, iv)
            .map_err(|_| JoseError::Decryption)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| JoseError::Decryption),
    }
}
