//! Stream encryption for the supported cipher transforms.
//!
//! Transforms are named the way the asset loader names them
//! (`ALGORITHM/MODE/PADDING`). The AES variant follows the key length.

use std::fmt;
use std::str::FromStr;

use aes::cipher::consts::U16;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncryptMut, KeyIvInit, StreamCipher};
use aes::{Aes128, Aes192, Aes256};
use cbc::cipher::block_padding::{Padding, Pkcs7};
use rand::RngCore;

use crate::context::SecretKey;
use crate::error::{EngineError, EngineResult};

/// AES block size, and the IV length of every supported mode.
pub const BLOCK_SIZE: usize = 16;

/// A parsed cipher transform name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherTransform {
    /// `AES/CBC/PKCS5Padding`
    AesCbcPkcs5,
    /// `AES/CTR/NoPadding`
    AesCtr,
}

impl CipherTransform {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AesCbcPkcs5 => "AES/CBC/PKCS5Padding",
            Self::AesCtr => "AES/CTR/NoPadding",
        }
    }

    /// Size of the ciphertext produced for `plaintext_len` input bytes.
    pub fn ciphertext_len(&self, plaintext_len: u64) -> u64 {
        match self {
            Self::AesCbcPkcs5 => (plaintext_len / BLOCK_SIZE as u64 + 1) * BLOCK_SIZE as u64,
            Self::AesCtr => plaintext_len,
        }
    }

    /// Fail unless `key` has a length AES accepts.
    pub fn check_key(&self, key: &SecretKey) -> EngineResult<()> {
        match key.len() {
            16 | 24 | 32 => Ok(()),
            other => Err(EngineError::Cipher(format!(
                "{} needs a 16, 24 or 32 byte key, got {} bytes",
                self.name(),
                other
            ))),
        }
    }

    /// Start encrypting a new stream with a freshly generated IV.
    pub fn encryptor(&self, key: &SecretKey) -> EngineResult<StreamEncryptor> {
        let mut iv = [0u8; BLOCK_SIZE];
        rand::thread_rng().fill_bytes(&mut iv);
        self.encryptor_with_iv(key, &iv)
    }

    pub(crate) fn encryptor_with_iv(&self, key: &SecretKey, iv: &[u8]) -> EngineResult<StreamEncryptor> {
        self.check_key(key)?;
        let key = key.as_bytes();
        let invalid = |_| EngineError::Cipher(format!("invalid key or IV length for {}", self.name()));

        let mode = match (self, key.len()) {
            (Self::AesCbcPkcs5, 16) => Mode::Cbc128(cbc::Encryptor::new_from_slices(key, iv).map_err(invalid)?),
            (Self::AesCbcPkcs5, 24) => Mode::Cbc192(cbc::Encryptor::new_from_slices(key, iv).map_err(invalid)?),
            (Self::AesCbcPkcs5, _) => Mode::Cbc256(cbc::Encryptor::new_from_slices(key, iv).map_err(invalid)?),
            (Self::AesCtr, 16) => Mode::Ctr128(ctr::Ctr128BE::new_from_slices(key, iv).map_err(invalid)?),
            (Self::AesCtr, 24) => Mode::Ctr192(ctr::Ctr128BE::new_from_slices(key, iv).map_err(invalid)?),
            (Self::AesCtr, _) => Mode::Ctr256(ctr::Ctr128BE::new_from_slices(key, iv).map_err(invalid)?),
        };

        Ok(StreamEncryptor {
            mode,
            iv: iv.to_vec(),
            pending: Vec::with_capacity(BLOCK_SIZE),
        })
    }
}

impl FromStr for CipherTransform {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<String> = s.split('/').map(|p| p.trim().to_ascii_uppercase()).collect();
        let parts: Vec<&str> = parts.iter().map(String::as_str).collect();
        match parts.as_slice() {
            ["AES", "CBC", "PKCS5PADDING" | "PKCS7PADDING"] => Ok(Self::AesCbcPkcs5),
            ["AES", "CTR", "NOPADDING"] => Ok(Self::AesCtr),
            _ => Err(EngineError::Cipher(format!("unsupported cipher transform '{}'", s))),
        }
    }
}

impl fmt::Display for CipherTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

enum Mode {
    Cbc128(cbc::Encryptor<Aes128>),
    Cbc192(cbc::Encryptor<Aes192>),
    Cbc256(cbc::Encryptor<Aes256>),
    Ctr128(ctr::Ctr128BE<Aes128>),
    Ctr192(ctr::Ctr128BE<Aes192>),
    Ctr256(ctr::Ctr128BE<Aes256>),
}

impl Mode {
    fn is_block_mode(&self) -> bool {
        matches!(self, Self::Cbc128(_) | Self::Cbc192(_) | Self::Cbc256(_))
    }

    /// Encrypt `buf` in place. Block modes require whole blocks.
    fn apply(&mut self, buf: &mut [u8]) {
        match self {
            Self::Cbc128(c) => encrypt_blocks(c, buf),
            Self::Cbc192(c) => encrypt_blocks(c, buf),
            Self::Cbc256(c) => encrypt_blocks(c, buf),
            Self::Ctr128(c) => c.apply_keystream(buf),
            Self::Ctr192(c) => c.apply_keystream(buf),
            Self::Ctr256(c) => c.apply_keystream(buf),
        }
    }
}

fn encrypt_blocks<C: BlockEncryptMut>(cipher: &mut C, buf: &mut [u8]) {
    for block in buf.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
    }
}

/// Incremental encryptor over one stream.
///
/// Feed plaintext with `update`, then call `finish` exactly once; both append
/// ciphertext to the caller's buffer.
pub struct StreamEncryptor {
    mode: Mode,
    iv: Vec<u8>,
    pending: Vec<u8>,
}

impl StreamEncryptor {
    /// The IV this encryptor generated.
    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    pub fn update(&mut self, input: &[u8], out: &mut Vec<u8>) {
        if !self.mode.is_block_mode() {
            let start = out.len();
            out.extend_from_slice(input);
            self.mode.apply(&mut out[start..]);
            return;
        }

        self.pending.extend_from_slice(input);
        let whole = self.pending.len() - self.pending.len() % BLOCK_SIZE;
        if whole == 0 {
            return;
        }
        let start = out.len();
        out.extend(self.pending.drain(..whole));
        self.mode.apply(&mut out[start..]);
    }

    /// Flush the final (PKCS#5 padded) block, if the mode has one.
    pub fn finish(mut self, out: &mut Vec<u8>) {
        if !self.mode.is_block_mode() {
            return;
        }
        let mut block = GenericArray::<u8, U16>::default();
        block[..self.pending.len()].copy_from_slice(&self.pending);
        Pkcs7::pad(&mut block, self.pending.len());

        let start = out.len();
        out.extend_from_slice(&block);
        self.mode.apply(&mut out[start..]);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use aes::cipher::BlockDecryptMut;

    /// Test-only inverse of `StreamEncryptor`.
    pub(crate) fn decrypt(transform: CipherTransform, key: &[u8], iv: &[u8], data: &[u8]) -> Vec<u8> {
        let mut buf = data.to_vec();
        match transform {
            CipherTransform::AesCtr => {
                match key.len() {
                    16 => ctr::Ctr128BE::<Aes128>::new_from_slices(key, iv).unwrap().apply_keystream(&mut buf),
                    24 => ctr::Ctr128BE::<Aes192>::new_from_slices(key, iv).unwrap().apply_keystream(&mut buf),
                    _ => ctr::Ctr128BE::<Aes256>::new_from_slices(key, iv).unwrap().apply_keystream(&mut buf),
                }
                buf
            }
            CipherTransform::AesCbcPkcs5 => {
                assert_eq!(buf.len() % BLOCK_SIZE, 0, "CBC ciphertext must be block aligned");
                match key.len() {
                    16 => decrypt_blocks(&mut cbc::Decryptor::<Aes128>::new_from_slices(key, iv).unwrap(), &mut buf),
                    24 => decrypt_blocks(&mut cbc::Decryptor::<Aes192>::new_from_slices(key, iv).unwrap(), &mut buf),
                    _ => decrypt_blocks(&mut cbc::Decryptor::<Aes256>::new_from_slices(key, iv).unwrap(), &mut buf),
                }
                let last = buf.len().checked_sub(BLOCK_SIZE).expect("empty CBC output");
                let kept = Pkcs7::unpad(GenericArray::<u8, U16>::from_slice(&buf[last..]))
                    .expect("bad padding")
                    .len();
                buf.truncate(last + kept);
                buf
            }
        }
    }

    fn decrypt_blocks<C: BlockDecryptMut>(cipher: &mut C, buf: &mut [u8]) {
        for block in buf.chunks_exact_mut(BLOCK_SIZE) {
            cipher.decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
    }

    fn encrypt_in_chunks(transform: CipherTransform, key: &SecretKey, data: &[u8], chunk: usize) -> (Vec<u8>, Vec<u8>) {
        let mut enc = transform.encryptor(key).expect("Failed to build encryptor");
        let iv = enc.iv().to_vec();
        let mut out = Vec::new();
        for piece in data.chunks(chunk.max(1)) {
            enc.update(piece, &mut out);
        }
        enc.finish(&mut out);
        (iv, out)
    }

    #[test]
    fn test_parse_transform_names() {
        assert_eq!("AES/CBC/PKCS5Padding".parse::<CipherTransform>().unwrap(), CipherTransform::AesCbcPkcs5);
        assert_eq!("aes/ctr/nopadding".parse::<CipherTransform>().unwrap(), CipherTransform::AesCtr);
        assert!("DES/ECB/NoPadding".parse::<CipherTransform>().is_err());
        assert!("AES".parse::<CipherTransform>().is_err());
    }

    #[test]
    fn test_cbc_round_trip_across_chunk_boundaries() {
        let key = SecretKey::from_bytes(vec![1u8; 16]);
        let data: Vec<u8> = (0..1000u32).map(|i| (i * 7 % 251) as u8).collect();
        for chunk in [1, 15, 16, 17, 999, 4096] {
            let (iv, out) = encrypt_in_chunks(CipherTransform::AesCbcPkcs5, &key, &data, chunk);
            assert_eq!(out.len() as u64, CipherTransform::AesCbcPkcs5.ciphertext_len(data.len() as u64));
            let plain = decrypt(CipherTransform::AesCbcPkcs5, key.as_bytes(), &iv, &out);
            assert_eq!(plain, data, "chunk size {}", chunk);
        }
    }

    #[test]
    fn test_cbc_empty_input_is_one_padding_block() {
        let key = SecretKey::from_bytes(vec![2u8; 32]);
        let (iv, out) = encrypt_in_chunks(CipherTransform::AesCbcPkcs5, &key, b"", 16);
        assert_eq!(out.len(), BLOCK_SIZE);
        assert!(decrypt(CipherTransform::AesCbcPkcs5, key.as_bytes(), &iv, &out).is_empty());
    }

    #[test]
    fn test_cbc_full_block_gets_a_whole_padding_block() {
        let key = SecretKey::from_bytes(vec![5u8; 16]);
        let data = [9u8; BLOCK_SIZE];
        let (iv, out) = encrypt_in_chunks(CipherTransform::AesCbcPkcs5, &key, &data, 7);
        assert_eq!(out.len(), 2 * BLOCK_SIZE);

        let mut tail = out.clone();
        decrypt_blocks(&mut cbc::Decryptor::<Aes128>::new_from_slices(key.as_bytes(), &iv).unwrap(), &mut tail);
        assert_eq!(&tail[BLOCK_SIZE..], &[BLOCK_SIZE as u8; BLOCK_SIZE]);
    }

    #[test]
    fn test_ctr_round_trip_keeps_length() {
        let key = SecretKey::from_bytes(vec![3u8; 24]);
        let data = b"counter mode keeps the plaintext length".to_vec();
        let (iv, out) = encrypt_in_chunks(CipherTransform::AesCtr, &key, &data, 5);
        assert_eq!(out.len(), data.len());
        assert_ne!(out, data);
        assert_eq!(decrypt(CipherTransform::AesCtr, key.as_bytes(), &iv, &out), data);
    }

    #[test]
    fn test_each_encryptor_gets_a_fresh_iv() {
        let key = SecretKey::from_bytes(vec![4u8; 16]);
        let a = CipherTransform::AesCbcPkcs5.encryptor(&key).unwrap();
        let b = CipherTransform::AesCbcPkcs5.encryptor(&key).unwrap();
        assert_eq!(a.iv().len(), BLOCK_SIZE);
        assert_ne!(a.iv(), b.iv());
    }

    #[test]
    fn test_bad_key_length_is_cipher_error() {
        let key = SecretKey::from_bytes(vec![0u8; 10]);
        let result = CipherTransform::AesCtr.encryptor(&key);
        assert!(matches!(result, Err(EngineError::Cipher(_))));
    }
}
