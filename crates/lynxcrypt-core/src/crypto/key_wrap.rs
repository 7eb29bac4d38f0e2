#![forbid(unsafe_code)]

//! AES key wrapping per RFC 3394, used for the two master keys inside
//! `masterkey.cryptomator`.
//!
//! The algorithm runs six rounds of AES-256-ECB over 64-bit registers with
//! the fixed initial value `0xA6A6A6A6A6A6A6A6`. Unwrapping recovers the
//! initial value and compares it in constant time; a mismatch means the
//! wrong key-encryption key (in practice: a wrong password) or a tampered
//! artifact.

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes256;
use generic_array::{typenum::U16, GenericArray};
use secrecy::{ExposeSecret, SecretBox};
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::Zeroizing;

/// Initial value from RFC 3394 section 2.2.3.1.
const IV_3394: [u8; 8] = [0xA6; 8];

/// Errors that can occur while wrapping a key.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WrapError {
    /// The plaintext key must consist of whole 64-bit blocks.
    #[error("Key length must be a multiple of 8 bytes, got {0}")]
    InvalidKeyLength(usize),
}

/// Errors that can occur while unwrapping a key.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnwrapError {
    /// The ciphertext must consist of whole 64-bit blocks.
    #[error("Wrapped key length must be a multiple of 8 bytes")]
    InvalidCiphertextLength,

    /// The ciphertext must carry at least the integrity block plus one
    /// data block.
    #[error("Wrapped key too short")]
    CiphertextTooShort,

    /// The recovered initial value does not match RFC 3394.
    ///
    /// Indistinguishable causes: wrong key-encryption key (wrong password)
    /// or a tampered/corrupted wrapped key.
    #[error("Key unwrap integrity check failed")]
    InvalidIntegrityCheck,
}

/// Wrap `key` under `kek`, producing `key.len() + 8` bytes.
pub fn wrap_key(key: &[u8], kek: &SecretBox<[u8; 32]>) -> Result<Vec<u8>, WrapError> {
    if key.is_empty() || key.len() % 8 != 0 {
        return Err(WrapError::InvalidKeyLength(key.len()));
    }

    let cipher = Aes256::new(GenericArray::from_slice(kek.expose_secret()));
    let n = key.len() / 8;

    let mut a = IV_3394;
    let mut registers = Zeroizing::new(key.to_vec());
    let mut block: GenericArray<u8, U16> = GenericArray::default();

    for j in 0..6u64 {
        for (i, chunk) in registers.chunks_mut(8).enumerate() {
            // B = AES(K, A | R[i])
            block[..8].copy_from_slice(&a);
            block[8..].copy_from_slice(chunk);
            cipher.encrypt_block(&mut block);

            // A = MSB(64, B) ^ t   with t = n*j + i + 1
            let t = (n as u64) * j + (i as u64) + 1;
            a.copy_from_slice(&block[..8]);
            for (b, tb) in a.iter_mut().zip(t.to_be_bytes()) {
                *b ^= tb;
            }

            // R[i] = LSB(64, B)
            chunk.copy_from_slice(&block[8..]);
        }
    }

    let mut out = Vec::with_capacity(key.len() + 8);
    out.extend_from_slice(&a);
    out.extend_from_slice(&registers);
    Ok(out)
}

/// Unwrap `wrapped` under `kek`, recovering the original key bytes.
pub fn unwrap_key(
    wrapped: &[u8],
    kek: &SecretBox<[u8; 32]>,
) -> Result<Zeroizing<Vec<u8>>, UnwrapError> {
    if wrapped.len() % 8 != 0 {
        return Err(UnwrapError::InvalidCiphertextLength);
    }
    if wrapped.len() < 24 {
        return Err(UnwrapError::CiphertextTooShort);
    }

    let cipher = Aes256::new(GenericArray::from_slice(kek.expose_secret()));
    let n = wrapped.len() / 8 - 1;

    let mut a = [0u8; 8];
    a.copy_from_slice(&wrapped[..8]);
    let mut registers = Zeroizing::new(wrapped[8..].to_vec());
    let mut block: GenericArray<u8, U16> = GenericArray::default();

    for j in (0..6u64).rev() {
        for (i, chunk) in registers.chunks_mut(8).enumerate().rev() {
            // B = AES^-1(K, (A ^ t) | R[i])   with t = n*j + i + 1
            let t = (n as u64) * j + (i as u64) + 1;
            block[..8].copy_from_slice(&a);
            for (b, tb) in block[..8].iter_mut().zip(t.to_be_bytes()) {
                *b ^= tb;
            }
            block[8..].copy_from_slice(chunk);
            cipher.decrypt_block(&mut block);

            a.copy_from_slice(&block[..8]);
            chunk.copy_from_slice(&block[8..]);
        }
    }

    if a.ct_eq(&IV_3394).unwrap_u8() != 1 {
        return Err(UnwrapError::InvalidIntegrityCheck);
    }
    Ok(registers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn kek(bytes: [u8; 32]) -> SecretBox<[u8; 32]> {
        SecretBox::new(Box::new(bytes))
    }

    // RFC 3394 section 4.3: 128-bit key data with a 256-bit KEK.
    #[test]
    fn rfc3394_vector_128_key_256_kek() {
        let k = kek(hex!(
            "000102030405060708090A0B0C0D0E0F101112131415161718191A1B1C1D1E1F"
        ));
        let key_data = hex!("00112233445566778899AABBCCDDEEFF");
        let expected = hex!("64E8C3F9CE0F5BA263E9777905818A2A93C8191E7D6E8AE7");

        let wrapped = wrap_key(&key_data, &k).unwrap();
        assert_eq!(wrapped, expected);

        let unwrapped = unwrap_key(&wrapped, &k).unwrap();
        assert_eq!(unwrapped.as_slice(), key_data);
    }

    // RFC 3394 section 4.6: 256-bit key data with a 256-bit KEK, the shape
    // used for the vault master keys.
    #[test]
    fn rfc3394_vector_256_key_256_kek() {
        let k = kek(hex!(
            "000102030405060708090A0B0C0D0E0F101112131415161718191A1B1C1D1E1F"
        ));
        let key_data = hex!("00112233445566778899AABBCCDDEEFF000102030405060708090A0B0C0D0E0F");
        let expected = hex!(
            "28C9F404C4B810F4CBCCB35CFB87F8263F5786E2D80ED326CBC7F0E71A99F43BFB988B9B7A02DD21"
        );

        let wrapped = wrap_key(&key_data, &k).unwrap();
        assert_eq!(wrapped, expected);

        let unwrapped = unwrap_key(&wrapped, &k).unwrap();
        assert_eq!(unwrapped.as_slice(), key_data);
    }

    #[test]
    fn roundtrip_random_keys() {
        use rand::RngCore;
        let mut kek_bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut kek_bytes);
        let k = kek(kek_bytes);

        let mut key = [0u8; 32];
        rand::rng().fill_bytes(&mut key);

        let wrapped = wrap_key(&key, &k).unwrap();
        assert_eq!(wrapped.len(), 40);
        assert_eq!(unwrap_key(&wrapped, &k).unwrap().as_slice(), key);
    }

    #[test]
    fn tampering_any_byte_fails_unwrap() {
        let k = kek([3u8; 32]);
        let wrapped = wrap_key(&[5u8; 32], &k).unwrap();

        for i in 0..wrapped.len() {
            let mut mangled = wrapped.clone();
            mangled[i] ^= 0x01;
            assert_eq!(
                unwrap_key(&mangled, &k).unwrap_err(),
                UnwrapError::InvalidIntegrityCheck,
                "flipping byte {i} must break the integrity check"
            );
        }
    }

    #[test]
    fn wrong_kek_fails_unwrap() {
        let wrapped = wrap_key(&[5u8; 32], &kek([3u8; 32])).unwrap();
        assert_eq!(
            unwrap_key(&wrapped, &kek([4u8; 32])).unwrap_err(),
            UnwrapError::InvalidIntegrityCheck
        );
    }

    #[test]
    fn length_validation() {
        let k = kek([0u8; 32]);
        assert_eq!(
            wrap_key(&[0u8; 7], &k).unwrap_err(),
            WrapError::InvalidKeyLength(7)
        );
        assert_eq!(
            unwrap_key(&[0u8; 23], &k).unwrap_err(),
            UnwrapError::InvalidCiphertextLength
        );
        assert_eq!(
            unwrap_key(&[0u8; 16], &k).unwrap_err(),
            UnwrapError::CiphertextTooShort
        );
    }
}
