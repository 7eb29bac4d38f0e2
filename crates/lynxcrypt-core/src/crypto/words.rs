#![forbid(unsafe_code)]

//! Human-transcribable master-key export.
//!
//! Encodes the two 256-bit master keys plus a 16-bit checksum as 44 words
//! from a fixed 4096-word dictionary. Each word carries 12 bits; a pair of
//! words yields three bytes with the first word's index in the high bits.
//! The checksum is the first two little-endian bytes of `CRC32(PK || HK)`.

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;
use zeroize::Zeroizing;

/// Number of words in a valid dictionary.
pub const DICTIONARY_SIZE: usize = 4096;

/// Number of words in an encoded key pair (66 bytes / 3 * 2).
pub const KEY_WORD_COUNT: usize = 44;

#[derive(Debug, Error)]
pub enum WordCodecError {
    /// The dictionary file could not be read.
    #[error("Failed to read dictionary: {0}")]
    Io(#[from] std::io::Error),

    /// The dictionary does not contain exactly 4096 words.
    #[error("A dictionary of exactly {DICTIONARY_SIZE} words is required, got {0}")]
    BadDictionary(usize),

    /// A word is not part of the dictionary.
    #[error("Word \"{0}\" does not belong to the dictionary")]
    UnknownWord(String),

    /// The byte sequence is not a multiple of 24 bits.
    #[error("Byte sequence length must be a multiple of 3, got {0}")]
    UnalignedBytes(usize),

    /// An encoded key list has the wrong word count.
    #[error("Master keys must be encoded as {KEY_WORD_COUNT} words, got {0}")]
    BadWordCount(usize),

    /// The embedded checksum does not match the decoded keys.
    #[error("Bad master keys checksum")]
    BadChecksum,
}

/// Bidirectional 12-bit codec over a fixed word list.
#[derive(Debug)]
pub struct WordCodec {
    words: Vec<String>,
    index: HashMap<String, u16>,
}

impl WordCodec {
    /// Load a dictionary file with one word per line.
    pub fn load(path: &Path) -> Result<Self, WordCodecError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_lines(text.lines())
    }

    /// Build a codec from an iterator of words.
    pub fn from_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Self, WordCodecError> {
        let words: Vec<String> = lines
            .map(|w| w.trim().to_string())
            .filter(|w| !w.is_empty())
            .collect();
        if words.len() != DICTIONARY_SIZE {
            return Err(WordCodecError::BadDictionary(words.len()));
        }
        let index = words
            .iter()
            .enumerate()
            .map(|(i, w)| (w.clone(), i as u16))
            .collect();
        Ok(WordCodec { words, index })
    }

    /// Convert a 24-bit-aligned byte sequence into words.
    pub fn bytes_to_words(&self, bytes: &[u8]) -> Result<Vec<&str>, WordCodecError> {
        if bytes.len() % 3 != 0 {
            return Err(WordCodecError::UnalignedBytes(bytes.len()));
        }
        let mut words = Vec::with_capacity(bytes.len() / 3 * 2);
        for group in bytes.chunks_exact(3) {
            let n = u32::from(group[0]) << 16 | u32::from(group[1]) << 8 | u32::from(group[2]);
            words.push(self.words[(n >> 12) as usize].as_str());
            words.push(self.words[(n & 0xFFF) as usize].as_str());
        }
        Ok(words)
    }

    /// Convert a word list back into bytes. Words must come in pairs.
    pub fn words_to_bytes(&self, words: &[&str]) -> Result<Zeroizing<Vec<u8>>, WordCodecError> {
        if words.len() % 2 != 0 {
            return Err(WordCodecError::BadWordCount(words.len()));
        }
        let mut bytes = Zeroizing::new(Vec::with_capacity(words.len() / 2 * 3));
        for pair in words.chunks_exact(2) {
            let hi = self.word_index(pair[0])?;
            let lo = self.word_index(pair[1])?;
            let n = u32::from(hi) << 12 | u32::from(lo);
            bytes.extend_from_slice(&n.to_be_bytes()[1..]);
        }
        Ok(bytes)
    }

    /// Encode the master key pair as 44 words with an embedded checksum.
    pub fn encode_keys(&self, pk: &[u8; 32], hk: &[u8; 32]) -> Result<Vec<&str>, WordCodecError> {
        let mut blob = Zeroizing::new(Vec::with_capacity(66));
        blob.extend_from_slice(pk);
        blob.extend_from_slice(hk);
        let crc = crc32fast::hash(&blob);
        blob.extend_from_slice(&crc.to_le_bytes()[..2]);
        self.bytes_to_words(&blob)
    }

    /// Decode 44 words into the master key pair, verifying the checksum.
    pub fn decode_keys(
        &self,
        words: &[&str],
    ) -> Result<(Zeroizing<[u8; 32]>, Zeroizing<[u8; 32]>), WordCodecError> {
        if words.len() != KEY_WORD_COUNT {
            return Err(WordCodecError::BadWordCount(words.len()));
        }
        let bytes = self.words_to_bytes(words)?;
        debug_assert_eq!(bytes.len(), 66);

        let crc = crc32fast::hash(&bytes[..64]);
        if crc.to_le_bytes()[..2] != bytes[64..] {
            return Err(WordCodecError::BadChecksum);
        }

        let mut pk = Zeroizing::new([0u8; 32]);
        let mut hk = Zeroizing::new([0u8; 32]);
        pk.copy_from_slice(&bytes[..32]);
        hk.copy_from_slice(&bytes[32..64]);
        Ok((pk, hk))
    }

    fn word_index(&self, word: &str) -> Result<u16, WordCodecError> {
        self.index
            .get(word)
            .copied()
            .ok_or_else(|| WordCodecError::UnknownWord(word.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_codec() -> WordCodec {
        let words: Vec<String> = (0..DICTIONARY_SIZE).map(|i| format!("w{i:04}")).collect();
        WordCodec::from_lines(words.iter().map(String::as_str)).unwrap()
    }

    #[test]
    fn rejects_wrong_dictionary_size() {
        let words: Vec<String> = (0..100).map(|i| format!("w{i}")).collect();
        let err = WordCodec::from_lines(words.iter().map(String::as_str)).unwrap_err();
        assert!(matches!(err, WordCodecError::BadDictionary(100)));
    }

    #[test]
    fn three_bytes_make_two_words_high_bits_first() {
        let codec = test_codec();
        // 0xABCDEF -> high word 0xABC, low word 0xDEF
        let words = codec.bytes_to_words(&[0xAB, 0xCD, 0xEF]).unwrap();
        assert_eq!(words, vec!["w2748", "w3567"]); // 0xABC = 2748, 0xDEF = 3567
        let bytes = codec.words_to_bytes(&words).unwrap();
        assert_eq!(bytes.as_slice(), &[0xAB, 0xCD, 0xEF]);
    }

    #[test]
    fn keys_roundtrip() {
        let codec = test_codec();
        let pk = [0x11u8; 32];
        let hk = [0x22u8; 32];
        let words = codec.encode_keys(&pk, &hk).unwrap();
        assert_eq!(words.len(), KEY_WORD_COUNT);

        let (pk2, hk2) = codec.decode_keys(&words).unwrap();
        assert_eq!(*pk2, pk);
        assert_eq!(*hk2, hk);
    }

    #[test]
    fn corrupted_word_breaks_checksum() {
        let codec = test_codec();
        let mut words = codec.encode_keys(&[1u8; 32], &[2u8; 32]).unwrap();
        // swap the first word for another valid one
        words[0] = if words[0] == "w0000" { "w0001" } else { "w0000" };
        assert!(matches!(
            codec.decode_keys(&words).unwrap_err(),
            WordCodecError::BadChecksum
        ));
    }

    #[test]
    fn unknown_word_is_rejected() {
        let codec = test_codec();
        let err = codec.words_to_bytes(&["nope", "w0000"]).unwrap_err();
        assert!(matches!(err, WordCodecError::UnknownWord(w) if w == "nope"));
    }

    #[test]
    fn wrong_word_count_is_rejected() {
        let codec = test_codec();
        let words = vec!["w0000"; 42];
        assert!(matches!(
            codec.decode_keys(&words).unwrap_err(),
            WordCodecError::BadWordCount(42)
        ));
    }
}
