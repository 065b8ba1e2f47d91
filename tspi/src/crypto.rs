// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Hash, HMAC, MGF1 and RSA helpers used by the authorization engine

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::{BigUint, Oaep, RsaPublicKey};
use sha1::{Digest as _, Sha1};
use subtle::ConstantTimeEq;

use crate::error::{Result, TspiError};
use crate::types::{Digest, Nonce};

type HmacSha1 = Hmac<Sha1>;

/// Default RSA public exponent used when a key carries an empty exponent
pub const DEFAULT_EXPONENT: [u8; 3] = [0x01, 0x00, 0x01];

/// OAEP label the TPM expects on TakeOwnership secrets
const OAEP_LABEL: &str = "TCPA";

/// SHA-1 over the concatenation of `parts`
pub fn sha1(parts: &[&[u8]]) -> Digest {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// HMAC-SHA1 keyed with `key` over the concatenation of `parts`
pub fn hmac_sha1(key: &[u8], parts: &[&[u8]]) -> Result<Digest> {
    let mut mac = HmacSha1::new_from_slice(key)
        .map_err(|e| TspiError::Internal(format!("hmac key: {e}")))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// MGF1 mask generation with SHA-1 (PKCS#1 v2.1, B.2.1)
pub fn mgf1_sha1(seed: &[u8], len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len + 20);
    let mut counter: u32 = 0;
    while out.len() < len {
        out.extend_from_slice(&sha1(&[seed, &counter.to_be_bytes()]));
        counter = counter.wrapping_add(1);
    }
    out.truncate(len);
    out
}

/// Byte-wise XOR of `data` with `mask`, which must be at least as long
pub fn xor_in_place(data: &mut [u8], mask: &[u8]) {
    for (d, m) in data.iter_mut().zip(mask) {
        *d ^= m;
    }
}

/// Constant-time equality of two digests
pub fn digest_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

pub fn random_nonce() -> Nonce {
    let mut nonce = [0u8; 20];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// RSA-OAEP (SHA-1, MGF1, label "TCPA") encryption under a raw modulus
pub fn rsa_encrypt_oaep_tcpa(modulus: &[u8], exponent: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let exponent = if exponent.is_empty() {
        &DEFAULT_EXPONENT[..]
    } else {
        exponent
    };
    let key = RsaPublicKey::new(
        BigUint::from_bytes_be(modulus),
        BigUint::from_bytes_be(exponent),
    )
    .map_err(|e| TspiError::BadBlob(format!("rsa public key: {e}")))?;
    let padding = Oaep::new_with_label::<Sha1, _>(OAEP_LABEL);
    key.encrypt(&mut OsRng, padding, data)
        .map_err(|e| TspiError::Internal(format!("rsa encrypt: {e}")))
}

/// Secret derived from a popup passphrase.
///
/// The passphrase is encoded as UTF-16LE; `with_nul` appends the terminating
/// NUL before hashing.
pub fn hash_popup_secret(passphrase: &str, with_nul: bool) -> Digest {
    let mut encoded: Vec<u8> = passphrase
        .encode_utf16()
        .flat_map(|unit| unit.to_le_bytes())
        .collect();
    if with_nul {
        encoded.extend_from_slice(&[0, 0]);
    }
    let digest = sha1(&[&encoded]);
    zeroize::Zeroize::zeroize(&mut encoded);
    digest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha1_known_vector() {
        assert_eq!(
            hex::encode(sha1(&[b"ab", b"c"])),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_hmac_rfc2202_case2() {
        let mac = hmac_sha1(b"Jefe", &[b"what do ya want ", b"for nothing?"]).unwrap();
        assert_eq!(
            hex::encode(mac),
            "effcdf6ae5eb2fa2d27416d5f184df9c259a7c79"
        );
    }

    #[test]
    fn test_mgf1_prefix_property() {
        let long = mgf1_sha1(b"seed", 50);
        let short = mgf1_sha1(b"seed", 20);
        assert_eq!(long.len(), 50);
        assert_eq!(&long[..20], &short[..]);
        assert_eq!(short, sha1(&[b"seed", &[0, 0, 0, 0]]).to_vec());
    }

    #[test]
    fn test_popup_nul_changes_digest() {
        assert_ne!(
            hash_popup_secret("pass", true),
            hash_popup_secret("pass", false)
        );
        // "a" in UTF-16LE is 61 00
        assert_eq!(hash_popup_secret("a", false), sha1(&[&[0x61, 0x00]]));
    }

    #[test]
    fn test_digest_eq() {
        assert!(digest_eq(&[1, 2, 3], &[1, 2, 3]));
        assert!(!digest_eq(&[1, 2, 3], &[1, 2, 4]));
        assert!(!digest_eq(&[1, 2], &[1, 2, 3]));
    }

    #[test]
    fn test_oaep_encrypt_roundtrips_with_private_key() {
        use rsa::traits::PublicKeyParts;
        use rsa::RsaPrivateKey;

        let private = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let n = private.n().to_bytes_be();
        let e = private.e().to_bytes_be();
        let ct = rsa_encrypt_oaep_tcpa(&n, &e, &[7u8; 20]).unwrap();
        let pt = private
            .decrypt(Oaep::new_with_label::<Sha1, _>(OAEP_LABEL), &ct)
            .unwrap();
        assert_eq!(pt, vec![7u8; 20]);
    }
}
