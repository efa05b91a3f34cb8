use std::mem;

use aes::Aes256;
use bytes::Bytes;
use cbc::cipher::{
    BlockDecryptMut, BlockEncryptMut, KeyIvInit,
    block_padding::{Padding, Pkcs7},
    consts::U16,
    generic_array::GenericArray,
};

use super::{PipelineError, Transform};
use crate::derive::EncryptionMaterial;

const BLOCK_LEN: usize = 16;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// AES-256-CBC encryption with PKCS#7 padding.
///
/// Emits every complete block as soon as it is available; only the trailing
/// partial block is buffered until [`Transform::finish`] pads it.
pub struct CbcEncrypt {
    cipher: Aes256CbcEnc,
    pending: Vec<u8>,
}

impl CbcEncrypt {
    pub fn new(material: &EncryptionMaterial) -> Self {
        Self {
            cipher: Aes256CbcEnc::new(
                GenericArray::from_slice(material.key()),
                GenericArray::from_slice(material.iv()),
            ),
            pending: Vec::with_capacity(BLOCK_LEN),
        }
    }
}

impl Transform for CbcEncrypt {
    fn update(&mut self, chunk: &[u8]) -> Result<Bytes, PipelineError> {
        self.pending.extend_from_slice(chunk);
        let ready = self.pending.len() - self.pending.len() % BLOCK_LEN;
        let rest = self.pending.split_off(ready);
        let mut out = mem::replace(&mut self.pending, rest);

        for block in out.chunks_exact_mut(BLOCK_LEN) {
            self.cipher
                .encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        Ok(Bytes::from(out))
    }

    fn finish(&mut self) -> Result<Bytes, PipelineError> {
        let pos = self.pending.len();
        let mut block = GenericArray::<u8, U16>::default();
        block[..pos].copy_from_slice(&self.pending);
        self.pending.clear();

        <Pkcs7 as Padding<U16>>::pad(&mut block, pos);
        self.cipher.encrypt_block_mut(&mut block);
        Ok(Bytes::copy_from_slice(&block))
    }
}

/// AES-256-CBC decryption, inverse of [`CbcEncrypt`].
///
/// The last complete block is held back until the input ends so that its
/// padding can be verified. Bad padding or a ciphertext that is not a whole
/// number of blocks fails with [`PipelineError::Decrypt`].
pub struct CbcDecrypt {
    cipher: Aes256CbcDec,
    pending: Vec<u8>,
}

impl CbcDecrypt {
    pub fn new(material: &EncryptionMaterial) -> Self {
        Self {
            cipher: Aes256CbcDec::new(
                GenericArray::from_slice(material.key()),
                GenericArray::from_slice(material.iv()),
            ),
            pending: Vec::with_capacity(2 * BLOCK_LEN),
        }
    }
}

impl Transform for CbcDecrypt {
    fn update(&mut self, chunk: &[u8]) -> Result<Bytes, PipelineError> {
        self.pending.extend_from_slice(chunk);
        let keep = match self.pending.len() % BLOCK_LEN {
            0 => BLOCK_LEN.min(self.pending.len()),
            partial => partial,
        };
        let ready = self.pending.len() - keep;
        let rest = self.pending.split_off(ready);
        let mut out = mem::replace(&mut self.pending, rest);

        for block in out.chunks_exact_mut(BLOCK_LEN) {
            self.cipher
                .decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        Ok(Bytes::from(out))
    }

    fn finish(&mut self) -> Result<Bytes, PipelineError> {
        if self.pending.len() != BLOCK_LEN {
            return Err(PipelineError::Decrypt);
        }

        let block = GenericArray::<u8, U16>::from_mut_slice(&mut self.pending);
        self.cipher.decrypt_block_mut(block);
        let plaintext =
            <Pkcs7 as Padding<U16>>::unpad(block).map_err(|_| PipelineError::Decrypt)?;
        Ok(Bytes::copy_from_slice(plaintext))
    }
}
