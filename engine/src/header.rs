//! Fixed header preceding the ciphertext of every encrypted file.
//!
//! Layout: magic, plaintext length (u64, big-endian), IV length (u8), IV.
//! There is no version field; the magic alone identifies the format variant.

use std::io::{self, Read, Write};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionHeader {
    pub magic: Vec<u8>,
    pub plaintext_len: u64,
    pub iv: Vec<u8>,
}

impl EncryptionHeader {
    pub fn new(magic: &[u8], plaintext_len: u64, iv: &[u8]) -> EngineResult<Self> {
        if iv.len() > u8::MAX as usize {
            return Err(EngineError::Cipher(format!(
                "IV of {} bytes does not fit the header",
                iv.len()
            )));
        }
        Ok(EncryptionHeader {
            magic: magic.to_vec(),
            plaintext_len,
            iv: iv.to_vec(),
        })
    }

    /// Number of bytes `write_to` produces.
    pub fn encoded_len(&self) -> usize {
        self.magic.len() + 8 + 1 + self.iv.len()
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(&self.magic)?;
        out.write_all(&self.plaintext_len.to_be_bytes())?;
        out.write_all(&[self.iv.len() as u8])?;
        out.write_all(&self.iv)
    }

    /// Parse a header, checking it starts with `magic`.
    pub fn read_from<R: Read>(input: &mut R, magic: &[u8]) -> EngineResult<Self> {
        let truncated = |e: io::Error| EngineError::InvalidHeader(format!("truncated header: {}", e));

        let mut found = vec![0u8; magic.len()];
        input.read_exact(&mut found).map_err(truncated)?;
        if found != magic {
            return Err(EngineError::InvalidHeader(format!(
                "magic mismatch: expected {:?}, found {:?}",
                String::from_utf8_lossy(magic),
                String::from_utf8_lossy(&found)
            )));
        }

        let mut len = [0u8; 8];
        input.read_exact(&mut len).map_err(truncated)?;

        let mut iv_len = [0u8; 1];
        input.read_exact(&mut iv_len).map_err(truncated)?;
        let mut iv = vec![0u8; iv_len[0] as usize];
        input.read_exact(&mut iv).map_err(truncated)?;

        Ok(EncryptionHeader {
            magic: found,
            plaintext_len: u64::from_be_bytes(len),
            iv,
        })
    }
}
