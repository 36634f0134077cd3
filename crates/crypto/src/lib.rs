//! Scalar and point arithmetic over secp256k1 for ceremony aggregation.
//!
//! Everything here operates on public aggregates only — nonce commitments,
//! combined blinds, the final `(r, s)`. Guardian shares never reach this
//! process, so none of these operations need to be constant-time.
//!
//! Scalars travel as big-endian hex without a `0x` prefix (1 to 32 bytes)
//! and are reduced mod the curve order `n` on input. Points travel as
//! 33-byte compressed SEC1 encodings (66 hex chars).

use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{Signature, VerifyingKey};
use k256::elliptic_curve::ff::Field;
use k256::elliptic_curve::group::Group;
use k256::elliptic_curve::ops::Reduce;
use k256::elliptic_curve::scalar::IsHigh;
use k256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use k256::{AffinePoint, EncodedPoint, FieldBytes, U256};
use num_bigint::BigUint;
use quorum_types::{Error, Result};

pub use k256::{ProjectivePoint, Scalar};

/// Parse a hex scalar, reducing mod `n`. Zero is allowed.
pub fn parse_scalar_hex(s: &str) -> Result<Scalar> {
    if s.is_empty() || s.len() > 64 {
        return Err(Error::InvalidPayload(format!(
            "scalar must be 1..=32 bytes of hex, got {} chars",
            s.len()
        )));
    }
    // Tolerate an odd number of digits by treating the value numerically.
    let padded = if s.len() % 2 == 1 {
        format!("0{}", s)
    } else {
        s.to_string()
    };
    let bytes = hex::decode(&padded)
        .map_err(|e| Error::InvalidPayload(format!("scalar is not valid hex: {}", e)))?;

    let mut repr = [0u8; 32];
    repr[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(<Scalar as Reduce<U256>>::reduce_bytes(FieldBytes::from_slice(
        &repr,
    )))
}

/// Parse a hex scalar and require it to be in `[1, n)` after reduction.
pub fn parse_nonzero_scalar_hex(s: &str) -> Result<Scalar> {
    let scalar = parse_scalar_hex(s)?;
    if bool::from(scalar.is_zero()) {
        return Err(Error::InvalidPayload(
            "scalar must be nonzero mod the curve order".to_string(),
        ));
    }
    Ok(scalar)
}

/// Render a scalar as minimal big-endian hex (at least one byte).
pub fn scalar_to_hex(scalar: &Scalar) -> String {
    let bytes = scalar.to_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(31);
    hex::encode(&bytes[first..])
}

/// Render a scalar as a decimal string.
pub fn scalar_to_decimal(scalar: &Scalar) -> String {
    BigUint::from_bytes_be(&scalar.to_bytes()).to_str_radix(10)
}

/// Parse a 64-hex-char message hash `z`.
pub fn parse_message_hash(s: &str) -> Result<[u8; 32]> {
    if s.len() != 64 {
        return Err(Error::InvalidPayload(format!(
            "message hash must be 64 hex chars, got {}",
            s.len()
        )));
    }
    let bytes = hex::decode(s)
        .map_err(|e| Error::InvalidPayload(format!("message hash is not valid hex: {}", e)))?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Decode a 33-byte compressed secp256k1 point.
pub fn parse_point_hex(s: &str) -> Result<ProjectivePoint> {
    if s.len() != 66 {
        return Err(Error::InvalidPayload(format!(
            "compressed point must be 66 hex chars, got {}",
            s.len()
        )));
    }
    let bytes = hex::decode(s)
        .map_err(|e| Error::InvalidPayload(format!("point is not valid hex: {}", e)))?;
    if bytes[0] != 0x02 && bytes[0] != 0x03 {
        return Err(Error::InvalidPayload(format!(
            "compressed point must start with 02 or 03, got {:02x}",
            bytes[0]
        )));
    }
    let encoded = EncodedPoint::from_bytes(&bytes)
        .map_err(|e| Error::InvalidPayload(format!("malformed point encoding: {}", e)))?;
    let affine: Option<AffinePoint> = AffinePoint::from_encoded_point(&encoded).into();
    affine
        .map(ProjectivePoint::from)
        .ok_or_else(|| Error::InvalidPayload("point is not on the curve".to_string()))
}

/// Compressed hex encoding of a point. The identity has no affine form.
pub fn point_to_hex(point: &ProjectivePoint) -> Result<String> {
    if bool::from(point.is_identity()) {
        return Err(Error::AggregationFailure(
            "point at infinity has no compressed encoding".to_string(),
        ));
    }
    Ok(hex::encode(point.to_affine().to_encoded_point(true).as_bytes()))
}

/// `Σ k_i mod n`.
pub fn sum_scalars<'a, I: IntoIterator<Item = &'a Scalar>>(scalars: I) -> Scalar {
    scalars.into_iter().fold(Scalar::ZERO, |acc, s| acc + s)
}

/// `Σ R_i` in the group.
pub fn sum_points<'a, I: IntoIterator<Item = &'a ProjectivePoint>>(points: I) -> ProjectivePoint {
    points
        .into_iter()
        .fold(ProjectivePoint::IDENTITY, |acc, p| acc + p)
}

/// Affine x-coordinate reduced mod `n`.
///
/// Fails on the point at infinity and on the (astronomically unlikely)
/// `x ≡ 0 mod n`.
pub fn x_coordinate_mod_n(point: &ProjectivePoint) -> Result<Scalar> {
    if bool::from(point.is_identity()) {
        return Err(Error::AggregationFailure(
            "aggregate nonce commitment is the point at infinity".to_string(),
        ));
    }
    let encoded = point.to_affine().to_encoded_point(false);
    let x = encoded
        .x()
        .ok_or_else(|| Error::AggregationFailure("point has no x-coordinate".to_string()))?;
    let r = <Scalar as Reduce<U256>>::reduce_bytes(FieldBytes::from_slice(x));
    if bool::from(r.is_zero()) {
        return Err(Error::AggregationFailure(
            "r reduced to zero mod the curve order".to_string(),
        ));
    }
    Ok(r)
}

/// Modular inverse mod `n`. Only zero has none.
pub fn mod_inverse(scalar: &Scalar) -> Result<Scalar> {
    let inv: Option<Scalar> = scalar.invert().into();
    inv.ok_or_else(|| Error::AggregationFailure("zero has no modular inverse".to_string()))
}

/// Canonical low-s form: flip `s` to `n - s` when it sits in the upper
/// half. Rejects zero.
pub fn normalize_s(s: Scalar) -> Result<Scalar> {
    if bool::from(s.is_zero()) {
        return Err(Error::AggregationFailure(
            "aggregate signature scalar is zero".to_string(),
        ));
    }
    if bool::from(s.is_high()) {
        Ok(-s)
    } else {
        Ok(s)
    }
}

/// Verify `(r, s)` against a compressed master public key and a 32-byte
/// message hash. `Ok(false)` means a well-formed but invalid signature.
pub fn verify_signature(
    master_public_key_hex: &str,
    message_hash_hex: &str,
    r: &Scalar,
    s: &Scalar,
) -> Result<bool> {
    let key_bytes = hex::decode(master_public_key_hex)
        .map_err(|e| Error::InvalidPayload(format!("public key is not valid hex: {}", e)))?;
    let verifying_key = VerifyingKey::from_sec1_bytes(&key_bytes)
        .map_err(|e| Error::InvalidPayload(format!("malformed public key: {}", e)))?;
    let z = parse_message_hash(message_hash_hex)?;
    let signature = Signature::from_scalars(r.to_bytes(), s.to_bytes())
        .map_err(|e| Error::InvalidPayload(format!("malformed signature scalars: {}", e)))?;
    Ok(verifying_key.verify_prehash(&z, &signature).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;
    use rand::rngs::OsRng;

    const GENERATOR_HEX: &str =
        "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

    #[test]
    fn test_scalar_hex_round_trip() {
        let scalar = parse_scalar_hex("2a").unwrap();
        assert_eq!(scalar, Scalar::from(42u64));
        assert_eq!(scalar_to_hex(&scalar), "2a");
        assert_eq!(scalar_to_decimal(&scalar), "42");
    }

    #[test]
    fn test_scalar_hex_odd_length_and_reduction() {
        // 0xf2a == 3882
        let scalar = parse_scalar_hex("f2a").unwrap();
        assert_eq!(scalar, Scalar::from(3882u64));

        // n + 1 reduces to 1
        let n_plus_one = "fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364142";
        assert_eq!(parse_scalar_hex(n_plus_one).unwrap(), Scalar::ONE);
    }

    #[test]
    fn test_scalar_hex_rejects_garbage() {
        assert!(parse_scalar_hex("").is_err());
        assert!(parse_scalar_hex(&"ff".repeat(33)).is_err());
        assert!(parse_scalar_hex("zz").is_err());
        // n reduces to zero, so the nonzero parser must reject it
        let n = "fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364141";
        assert!(parse_nonzero_scalar_hex(n).is_err());
    }

    #[test]
    fn test_point_decompression_of_generator() {
        let g = parse_point_hex(GENERATOR_HEX).unwrap();
        assert_eq!(g, ProjectivePoint::GENERATOR);
        assert_eq!(point_to_hex(&g).unwrap(), GENERATOR_HEX);
    }

    #[test]
    fn test_point_rejects_bad_encodings() {
        assert!(parse_point_hex("04abcd").is_err());
        let uncompressed_prefix = format!("04{}", &GENERATOR_HEX[2..]);
        assert!(parse_point_hex(&uncompressed_prefix).is_err());
        // x = 0 is not on the curve
        let off_curve = format!("02{}", "00".repeat(32));
        assert!(parse_point_hex(&off_curve).is_err());
    }

    #[test]
    fn test_sum_of_inverse_points_is_identity() {
        let k = Scalar::random(&mut OsRng);
        let p = ProjectivePoint::GENERATOR * k;
        let sum = sum_points([&p, &(-p)]);
        assert!(bool::from(sum.is_identity()));
        assert!(x_coordinate_mod_n(&sum).is_err());
        assert!(point_to_hex(&sum).is_err());
    }

    #[test]
    fn test_mod_inverse() {
        let a = Scalar::random(&mut OsRng);
        let inv = mod_inverse(&a).unwrap();
        assert_eq!(a * inv, Scalar::ONE);
        assert!(mod_inverse(&Scalar::ZERO).is_err());
    }

    #[test]
    fn test_normalize_s_flips_high_values() {
        let s = Scalar::random(&mut OsRng);
        let normalized = normalize_s(s).unwrap();
        assert!(!bool::from(normalized.is_high()));
        // Normalizing twice is a no-op.
        assert_eq!(normalize_s(normalized).unwrap(), normalized);
        assert!(normalize_s(Scalar::ZERO).is_err());
    }

    #[test]
    fn test_verify_signature_against_k256() {
        use k256::ecdsa::signature::hazmat::PrehashSigner;
        use sha2::{Digest, Sha256};

        let signing_key = SigningKey::random(&mut OsRng);
        let z: [u8; 32] = Sha256::digest(b"ceremony test message").into();
        let signature: Signature = signing_key.sign_prehash(&z).unwrap();
        let signature = signature.normalize_s().unwrap_or(signature);

        let pubkey_hex = hex::encode(
            signing_key
                .verifying_key()
                .to_encoded_point(true)
                .as_bytes(),
        );
        let z_hex = hex::encode(z);
        let r = parse_scalar_hex(&hex::encode(signature.r().to_bytes())).unwrap();
        let s = parse_scalar_hex(&hex::encode(signature.s().to_bytes())).unwrap();

        assert!(verify_signature(&pubkey_hex, &z_hex, &r, &s).unwrap());
        // Tampered hash must not verify.
        let wrong = hex::encode([0u8; 32]);
        assert!(!verify_signature(&pubkey_hex, &wrong, &r, &s).unwrap());
    }
}
