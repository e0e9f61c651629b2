//! AES-256 in CBC mode, chained by hand on top of the
//! `aes` block cipher (NIST SP 800-38A, section 6.2).
//! Chunk payloads are always block aligned and go through
//! the unpadded functions, metadata blobs use PKCS#7.
use super::{Iv, Key};

use aes::{
    cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit},
    Aes256,
};
use thiserror::Error;

/// Always 128 bits by definition
pub const AES_BLOCK_SIZE: usize = 16;

type Block = [u8; AES_BLOCK_SIZE];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CbcError {
    #[error("data length {0} is not a multiple of the AES block size")]
    Unaligned(usize),
    #[error("invalid PKCS#7 padding")]
    BadPadding,
}

/// Keeps the expanded AES key schedule around,
/// so a context can be reused for every chunk of a node.
#[derive(Debug)]
pub struct CbcContext {
    cipher: Aes256,
}

fn xor_inplace(dst: &mut [u8], other: &[u8]) {
    for (dst, &src) in dst.iter_mut().zip(other.iter()) {
        *dst ^= src
    }
}

impl CbcContext {
    pub fn new(key: &Key) -> Self {
        Self {
            cipher: Aes256::new(GenericArray::from_slice(key.as_slice())),
        }
    }

    /// Encrypts block aligned `data` in place.
    pub fn encrypt_blocks(&self, data: &mut [u8], iv: &Iv) -> Result<(), CbcError> {
        if data.len() % AES_BLOCK_SIZE != 0 {
            return Err(CbcError::Unaligned(data.len()));
        }
        self.chain_encrypt(data, iv);
        Ok(())
    }

    /// CBC over the whole blocks of `data`; any trailing partial block is
    /// left untouched.
    fn chain_encrypt(&self, data: &mut [u8], iv: &Iv) {
        let mut prev: Block = *iv.as_ref();
        for block in data.chunks_exact_mut(AES_BLOCK_SIZE) {
            xor_inplace(block, &prev);
            self.cipher.encrypt_block(GenericArray::from_mut_slice(block));
            prev.copy_from_slice(block);
        }
    }

    /// Decrypts block aligned `data` in place.
    pub fn decrypt_blocks(&self, data: &mut [u8], iv: &Iv) -> Result<(), CbcError> {
        if data.len() % AES_BLOCK_SIZE != 0 {
            return Err(CbcError::Unaligned(data.len()));
        }
        let mut prev: Block = *iv.as_ref();
        for block in data.chunks_exact_mut(AES_BLOCK_SIZE) {
            let mut cipher_block: Block = [0; AES_BLOCK_SIZE];
            cipher_block.copy_from_slice(block);
            self.cipher.decrypt_block(GenericArray::from_mut_slice(block));
            xor_inplace(block, &prev);
            prev = cipher_block;
        }
        Ok(())
    }

    pub fn encrypt_padded(&self, plaintext: &[u8], iv: &Iv) -> Vec<u8> {
        let pad = AES_BLOCK_SIZE - plaintext.len() % AES_BLOCK_SIZE;
        let mut data = Vec::with_capacity(plaintext.len() + pad);
        data.extend_from_slice(plaintext);
        data.resize(plaintext.len() + pad, pad as u8);
        self.chain_encrypt(&mut data, iv);
        data
    }

    pub fn decrypt_padded(&self, ciphertext: &[u8], iv: &Iv) -> Result<Vec<u8>, CbcError> {
        if ciphertext.is_empty() {
            return Err(CbcError::BadPadding);
        }
        let mut data = ciphertext.to_vec();
        self.decrypt_blocks(&mut data, iv)?;
        let pad = data[data.len() - 1] as usize;
        if pad == 0 || pad > AES_BLOCK_SIZE || data[data.len() - pad..].iter().any(|&b| b as usize != pad) {
            return Err(CbcError::BadPadding);
        }
        data.truncate(data.len() - pad);
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::super::get_random_bytes;
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_nist_sp800_38a_cbc_aes256() {
        let key = Key::from(hex!(
            "603deb1015ca71be2b73aef0857d77811f352c073b6108d72d9810a30914dff4"
        ));
        let iv = Iv::from(hex!("000102030405060708090a0b0c0d0e0f"));
        let plaintext = hex!(
            "6bc1bee22e409f96e93d7e117393172a
             ae2d8a571e03ac9c9eb76fac45af8e51
             30c81c46a35ce411e5fbc1191a0a52ef
             f69f2445df4f9b17ad2b417be66c3710"
        );
        let ciphertext = hex!(
            "f58c4c04d6e5f1ba779eabfb5f7bfbd6
             9cfc4e967edb808d679f777bc6702c7d
             39f23369a9d9bacfa530e26304231461
             b2eb05e2c39be9fcda6c19078c6a9d1b"
        );
        let ctx = CbcContext::new(&key);
        let mut data = plaintext;
        ctx.encrypt_blocks(&mut data, &iv).unwrap();
        assert_eq!(data, ciphertext);
        ctx.decrypt_blocks(&mut data, &iv).unwrap();
        assert_eq!(data, plaintext);
    }

    #[test]
    fn test_encrypt_decrypt_blocks() {
        let plaintext = get_random_bytes::<1024>();
        let ctx = CbcContext::new(&Key::random());
        let iv = Iv::random();
        let mut data = plaintext;
        ctx.encrypt_blocks(&mut data, &iv).unwrap();
        assert_ne!(&data, &plaintext);
        ctx.decrypt_blocks(&mut data, &iv).unwrap();
        assert_eq!(&data, &plaintext);
    }

    #[test]
    fn test_padded_lengths() {
        let ctx = CbcContext::new(&Key::random());
        let iv = Iv::random();
        for len in [0, 1, 15, 16, 17, 100] {
            let plaintext = vec![0xA5; len];
            let cipher = ctx.encrypt_padded(&plaintext, &iv);
            assert_eq!(cipher.len(), (len / AES_BLOCK_SIZE + 1) * AES_BLOCK_SIZE);
            assert_eq!(ctx.decrypt_padded(&cipher, &iv).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_rejects_unaligned_and_empty() {
        let ctx = CbcContext::new(&Key::random());
        let iv = Iv::random();
        let mut data = [0; 17];
        assert_eq!(ctx.encrypt_blocks(&mut data, &iv), Err(CbcError::Unaligned(17)));
        assert_eq!(ctx.decrypt_padded(&[], &iv), Err(CbcError::BadPadding));
    }

    #[test]
    fn test_wrong_key_breaks_padding_or_plaintext() {
        let iv = Iv::random();
        let cipher = CbcContext::new(&Key::random()).encrypt_padded(b"secret", &iv);
        let result = CbcContext::new(&Key::random()).decrypt_padded(&cipher, &iv);
        assert!(result.map(|p| p != b"secret").unwrap_or(true));
    }
}
