//! Single fault XOR parity over groups of chunk ciphertexts.
//!
//! `parity[b] = XOR of every member's byte b`, members zero padded to the
//! parity width. Any one member can be rebuilt from the parity and the
//! other members; two lost members in the same group cannot.
use tracing::trace;

use crate::error::{medium_error, ErrorKind, Result};
use crate::medium::Medium;
use crate::path::NodeFiles;

fn xor_into(dst: &mut [u8], src: &[u8]) {
    for (dst, &src) in dst.iter_mut().zip(src.iter()) {
        *dst ^= src;
    }
}

pub fn compute_xor_parity<C: AsRef<[u8]>>(chunks: &[C], width: usize) -> Vec<u8> {
    let mut parity = vec![0; width];
    for chunk in chunks {
        xor_into(&mut parity, chunk.as_ref());
    }
    parity
}

/// Rebuilds the single missing member from `parity` and every surviving
/// member of the group.
pub fn recover_chunk<C: AsRef<[u8]>>(parity: &[u8], others: &[C]) -> Vec<u8> {
    let mut recovered = parity.to_vec();
    for chunk in others {
        xor_into(&mut recovered, chunk.as_ref());
    }
    recovered
}

pub fn write_parity<M: Medium>(
    medium: &mut M,
    files: &NodeFiles,
    group: u32,
    parity: &[u8],
) -> Result<()> {
    let name = files.parity(group);
    trace!("Writing parity record {name}");
    medium
        .write(&name, parity)
        .map_err(|e| medium_error(ErrorKind::WriteError, format!("writing {name}"), e))
}

/// Returns `None` when the record is missing or not `width` bytes long.
pub fn read_parity<M: Medium>(medium: &M, files: &NodeFiles, group: u32, width: usize) -> Option<Vec<u8>> {
    let name = files.parity(group);
    match medium.read(&name) {
        Ok(parity) if parity.len() == width => Some(parity),
        Ok(parity) => {
            trace!("Parity record {name} has {} bytes, expected {width}", parity.len());
            None
        }
        Err(_) => None,
    }
}

/// Removes the parity records of `groups`, skipping ones that are absent.
pub fn remove_parity<M: Medium>(
    medium: &mut M,
    files: &NodeFiles,
    groups: std::ops::Range<u32>,
) -> Result<()> {
    for group in groups {
        let name = files.parity(group);
        if medium.exists(&name) {
            medium
                .remove(&name)
                .map_err(|e| medium_error(ErrorKind::DeleteError, format!("removing {name}"), e))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::get_random_bytes;

    #[test]
    fn test_parity_of_known_bytes() {
        let parity = compute_xor_parity(&[[0x0Fu8, 0xF0], [0xFF, 0x00], [0x01, 0x01]], 2);
        assert_eq!(parity, [0xF1, 0x11]);
    }

    #[test]
    fn test_short_members_are_zero_padded() {
        let parity = compute_xor_parity(&[vec![1u8, 2, 3, 4], vec![1, 2]], 4);
        assert_eq!(parity, [0, 0, 3, 4]);
        let empty: [&[u8]; 0] = [];
        assert_eq!(compute_xor_parity(&empty, 3), [0, 0, 0]);
    }

    #[test]
    fn test_recover_any_single_member() {
        let group: Vec<[u8; 64]> = (0..4).map(|_| get_random_bytes()).collect();
        let parity = compute_xor_parity(&group, 64);
        for missing in 0..group.len() {
            let others: Vec<&[u8]> = group
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != missing)
                .map(|(_, c)| c.as_slice())
                .collect();
            assert_eq!(recover_chunk(&parity, &others), group[missing]);
        }
    }

    #[test]
    fn test_two_losses_are_not_recoverable() {
        let group: Vec<[u8; 32]> = (0..4).map(|_| get_random_bytes()).collect();
        let parity = compute_xor_parity(&group, 32);
        let recovered = recover_chunk(&parity, &group[2..]);
        assert_ne!(recovered, group[0]);
        assert_ne!(recovered, group[1]);
    }
}
