//! Firmware signature verification: ECDSA/P-256 over the full, untruncated
//! SHA-512 digest of the UPDATE segment (spec.md §4.5 "Post-transfer"),
//! matching `mbedtls_ecdsa_read_signature`'s prehash semantics in
//! `examples/original_source/src/cups.c` (`cups_verifySig`) rather than the
//! SHA-256 prehash ECDSA/P-256 normally expects.

use ecdsa::signature::hazmat::PrehashVerifier;
use p256::ecdsa::{Signature, VerifyingKey};
use p256::EncodedPoint;
use station_config::SigKeyStore;

#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// A configured key's raw (X, Y) coordinates do not lie on the curve.
    BadKey(usize),
    /// The wire signature is not a well-formed ASN.1 DER ECDSA signature.
    BadSignature,
    /// No configured key's verification succeeded.
    NoKeyMatched,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

impl std::error::Error for Error {}

fn verifying_key(raw: &[u8; 64]) -> Option<VerifyingKey> {
    let point = EncodedPoint::from_affine_coordinates(raw[..32].into(), raw[32..].into(), false);
    VerifyingKey::from_encoded_point(&point).ok()
}

/// Try every key in `keys`, in order, against `der_signature` and `digest`.
/// Returns the index of the first key that verifies (`cups_verifySig` stops
/// at the first match rather than requiring a specific key).
pub fn verify(keys: &SigKeyStore, key_crc: u32, digest: &[u8; 64], der_signature: &[u8]) -> Result<usize, Error> {
    let signature = Signature::from_der(der_signature).map_err(|_| Error::BadSignature)?;

    // The key CRC narrows the search to the one key it names when it matches
    // any configured key; a CRC of zero (or one matching nothing) falls back
    // to trying every key, mirroring the original's lenient `keycrc` lookup.
    let named = (0..keys.keys().len()).find(|&i| keys.crc(i) == key_crc);
    let order: Vec<usize> = match named {
        Some(i) => std::iter::once(i).chain((0..keys.keys().len()).filter(move |&j| j != i)).collect(),
        None => (0..keys.keys().len()).collect(),
    };

    for idx in order {
        let raw = &keys.keys()[idx];
        let Some(vk) = verifying_key(raw) else {
            tracing::warn!(idx, "signing key does not lie on P-256");
            continue;
        };
        if vk.verify_prehash(digest, &signature).is_ok() {
            return Ok(idx);
        }
    }
    Err(Error::NoKeyMatched)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_malformed_der() {
        let keys = SigKeyStore::empty();
        let digest = [0u8; 64];
        let err = verify(&keys, 0, &digest, b"not-der").unwrap_err();
        assert!(matches!(err, Error::BadSignature));
    }

    #[test]
    fn no_keys_configured_means_no_match() {
        let sk = p256::ecdsa::SigningKey::from_bytes(&[7u8; 32].into()).unwrap();
        let digest = [1u8; 64];
        let sig: Signature = {
            use ecdsa::signature::hazmat::PrehashSigner;
            sk.sign_prehash(&digest).unwrap()
        };
        let keys = SigKeyStore::empty();
        let err = verify(&keys, 0, &digest, sig.to_der().as_bytes()).unwrap_err();
        assert!(matches!(err, Error::NoKeyMatched));
    }
}
