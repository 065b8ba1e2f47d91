// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! TPM 1.2 authorization protocol primitives
//!
//! Digest and HMAC construction for OIAP/OSAP authorization sessions:
//!
//! - `inParamDigest  = SHA1(ordinal || params)`
//! - `outParamDigest = SHA1(returnCode || ordinal || params)`
//! - `authHMAC       = HMAC(key, paramDigest || nonceEven || nonceOdd || continue)`
//! - OSAP shared secret `= HMAC(entitySecret, nonceEvenOSAP || nonceOddOSAP)`
//! - ADIP `encAuth = newSecret XOR SHA1(sharedSecret || nonceEven)`
//! - XOR keystream `= MGF1(nonceEven || nonceOdd || "XOR" || sessionKey)`

use crate::crypto::{digest_eq, hmac_sha1, mgf1_sha1, sha1, xor_in_place};
use crate::error::Result;
use crate::marshal::BlobWriter;
use crate::types::{Digest, Nonce};

/// Authorization block sent with a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmAuth {
    pub auth_handle: u32,
    pub nonce_odd: Nonce,
    pub continue_session: bool,
    pub hmac: Digest,
}

/// Authorization block returned with a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseAuth {
    pub nonce_even: Nonce,
    pub continue_session: bool,
    pub hmac: Digest,
}

/// Nonces bound into one authorization HMAC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoncePair {
    pub nonce_even: Nonce,
    pub nonce_odd: Nonce,
}

/// Builder for command and response parameter digests
#[derive(Debug)]
pub struct ParamDigest {
    buf: BlobWriter,
}

impl ParamDigest {
    /// Command digest input: starts with the ordinal
    pub fn command(ordinal: u32) -> Self {
        let mut buf = BlobWriter::with_capacity(256);
        buf.put_u32(ordinal);
        Self { buf }
    }

    /// Response digest input: return code then ordinal
    pub fn response(return_code: u32, ordinal: u32) -> Self {
        let mut buf = BlobWriter::with_capacity(256);
        buf.put_u32(return_code);
        buf.put_u32(ordinal);
        Self { buf }
    }

    pub fn u16(mut self, v: u16) -> Self {
        self.buf.put_u16(v);
        self
    }

    pub fn u32(mut self, v: u32) -> Self {
        self.buf.put_u32(v);
        self
    }

    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.buf.put_bytes(data);
        self
    }

    /// 4-byte size followed by the data
    pub fn sized(mut self, data: &[u8]) -> Self {
        self.buf.put_sized(data);
        self
    }

    pub fn finish(self) -> Digest {
        sha1(&[self.buf.as_bytes()])
    }
}

/// HMAC over a parameter digest and the session nonce pair
pub fn auth_hmac(
    key: &[u8],
    param_digest: &Digest,
    nonces: &NoncePair,
    continue_session: bool,
) -> Result<Digest> {
    hmac_sha1(
        key,
        &[
            param_digest,
            &nonces.nonce_even,
            &nonces.nonce_odd,
            &[continue_session as u8],
        ],
    )
}

/// Recompute a response HMAC and compare in constant time
pub fn verify_auth_hmac(
    key: &[u8],
    param_digest: &Digest,
    nonces: &NoncePair,
    continue_session: bool,
    returned: &Digest,
) -> Result<bool> {
    let expected = auth_hmac(key, param_digest, nonces, continue_session)?;
    Ok(digest_eq(&expected, returned))
}

/// OSAP session shared secret
pub fn osap_shared_secret(
    entity_secret: &[u8],
    nonce_even_osap: &Nonce,
    nonce_odd_osap: &Nonce,
) -> Result<Digest> {
    hmac_sha1(entity_secret, &[nonce_even_osap, nonce_odd_osap])
}

/// ADIP encryption of new authorization data.
///
/// XOR is its own inverse, so the same call decrypts.
pub fn adip_encrypt(new_secret: &Digest, shared_secret: &[u8], nonce_even: &Nonce) -> Digest {
    let pad = sha1(&[shared_secret, nonce_even]);
    let mut out = *new_secret;
    xor_in_place(&mut out, &pad);
    out
}

/// Keystream for XOR masking of sensitive payloads
pub fn xor_keystream(session_key: &[u8], nonces: &NoncePair, len: usize) -> Vec<u8> {
    let mut seed = Vec::with_capacity(20 + 20 + 3 + session_key.len());
    seed.extend_from_slice(&nonces.nonce_even);
    seed.extend_from_slice(&nonces.nonce_odd);
    seed.extend_from_slice(b"XOR");
    seed.extend_from_slice(session_key);
    let stream = mgf1_sha1(&seed, len);
    zeroize::Zeroize::zeroize(&mut seed);
    stream
}

/// XOR `data` with the keystream for `session_key` and `nonces`
pub fn xor_mask(session_key: &[u8], nonces: &NoncePair, data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    let stream = xor_keystream(session_key, nonces, data.len());
    xor_in_place(&mut out, &stream);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nonces() -> NoncePair {
        NoncePair {
            nonce_even: [0x11; 20],
            nonce_odd: [0x22; 20],
        }
    }

    #[test]
    fn test_param_digest_layout() {
        let d = ParamDigest::command(0x41).sized(&[1, 2]).finish();
        assert_eq!(d, sha1(&[&[0, 0, 0, 0x41, 0, 0, 0, 2, 1, 2]]));
        let r = ParamDigest::response(0, 0x41).finish();
        assert_eq!(r, sha1(&[&[0, 0, 0, 0, 0, 0, 0, 0x41]]));
    }

    #[test]
    fn test_auth_hmac_binds_every_input() {
        let key = [5u8; 20];
        let digest = [9u8; 20];
        let base = auth_hmac(&key, &digest, &nonces(), true).unwrap();
        assert_ne!(base, auth_hmac(&key, &digest, &nonces(), false).unwrap());
        let mut swapped = nonces();
        std::mem::swap(&mut swapped.nonce_even, &mut swapped.nonce_odd);
        assert_ne!(base, auth_hmac(&key, &digest, &swapped, true).unwrap());
        assert_ne!(base, auth_hmac(&[6u8; 20], &digest, &nonces(), true).unwrap());
        assert!(verify_auth_hmac(&key, &digest, &nonces(), true, &base).unwrap());
    }

    #[test]
    fn test_adip_is_involution() {
        let secret = [0x42u8; 20];
        let ss = [0x07u8; 20];
        let ne = [0x99u8; 20];
        let enc = adip_encrypt(&secret, &ss, &ne);
        assert_ne!(enc, secret);
        assert_eq!(adip_encrypt(&enc, &ss, &ne), secret);
    }

    #[test]
    fn test_xor_mask_is_involution() {
        let key = b"session key";
        for len in [0usize, 1, 19, 20, 21, 64, 257] {
            let m: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
            let c = xor_mask(key, &nonces(), &m);
            assert_eq!(c.len(), m.len());
            assert_eq!(xor_mask(key, &nonces(), &c), m);
        }
    }

    #[test]
    fn test_osap_shared_secret_depends_on_nonces() {
        let a = osap_shared_secret(&[1; 20], &[2; 20], &[3; 20]).unwrap();
        let b = osap_shared_secret(&[1; 20], &[3; 20], &[2; 20]).unwrap();
        assert_ne!(a, b);
    }
}
