// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Polynomials over the BLS12-381 scalar field and their commitments,
//! the building blocks of verifiable secret sharing. A share for index `i`
//! is the evaluation at `x = i + 1`; evaluating at zero would hand out the
//! free coefficient, which is the secret.

use crate::Error;
use blstrs::{G1Projective, G2Projective, Scalar};
use ff::Field;
use group::Group as _;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Maps a share index to the field element the polynomial is evaluated at.
fn x_coord(index: u32) -> Scalar {
    Scalar::from(u64::from(index) + 1)
}

/// A secret polynomial. The constant term is the shared secret.
#[derive(Clone, Serialize, Deserialize)]
pub struct PrivatePoly {
    #[serde(with = "scalar_vec")]
    coeffs: Vec<Scalar>,
}

impl PrivatePoly {
    /// A random polynomial of the given degree.
    pub fn random<R: RngCore>(degree: usize, rng: &mut R) -> Self {
        let coeffs = (0..=degree).map(|_| Scalar::random(&mut *rng)).collect();
        Self { coeffs }
    }

    /// A random polynomial of the given degree with a fixed constant term.
    /// Used when re-sharing an existing secret.
    pub fn with_constant<R: RngCore>(secret: Scalar, degree: usize, rng: &mut R) -> Self {
        let mut poly = Self::random(degree, rng);
        poly.coeffs[0] = secret;
        poly
    }

    pub fn degree(&self) -> usize {
        self.coeffs.len() - 1
    }

    pub fn secret(&self) -> &Scalar {
        &self.coeffs[0]
    }

    /// Evaluates the polynomial at the x coordinate of `index`.
    pub fn eval(&self, index: u32) -> Scalar {
        let x = x_coord(index);
        self.coeffs
            .iter()
            .rev()
            .fold(Scalar::ZERO, |acc, c| acc * x + c)
    }

    /// Commits every coefficient to G1.
    pub fn commit(&self) -> PublicPoly {
        PublicPoly {
            coeffs: self
                .coeffs
                .iter()
                .map(|c| G1Projective::generator() * c)
                .collect(),
        }
    }
}

/// A committed polynomial: the coefficients of a [`PrivatePoly`] multiplied
/// into G1. Anyone holding it can check a share against the commitment
/// without learning the secret.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PublicPoly {
    #[serde(with = "crate::bytes::g1_vec")]
    coeffs: Vec<G1Projective>,
}

impl PublicPoly {
    pub fn new(coeffs: Vec<G1Projective>) -> Self {
        Self { coeffs }
    }

    pub fn zero(degree: usize) -> Self {
        Self {
            coeffs: vec![G1Projective::identity(); degree + 1],
        }
    }

    pub fn degree(&self) -> usize {
        self.coeffs.len() - 1
    }

    pub fn coeffs(&self) -> &[G1Projective] {
        &self.coeffs
    }

    /// The commitment of the secret (the evaluation at zero).
    pub fn free_coeff(&self) -> G1Projective {
        self.coeffs[0]
    }

    pub fn eval(&self, index: u32) -> G1Projective {
        let x = x_coord(index);
        self.coeffs
            .iter()
            .rev()
            .fold(G1Projective::identity(), |acc, c| acc * x + c)
    }

    /// Coefficient-wise addition. Shorter polynomials are padded with the
    /// identity.
    pub fn add(&mut self, other: &PublicPoly) {
        if other.coeffs.len() > self.coeffs.len() {
            self.coeffs
                .resize(other.coeffs.len(), G1Projective::identity());
        }
        for (c, o) in self.coeffs.iter_mut().zip(other.coeffs.iter()) {
            *c += o;
        }
    }

    /// Coefficient-wise scaling, used by the re-sharing combine step.
    pub fn scale(&self, factor: &Scalar) -> PublicPoly {
        PublicPoly {
            coeffs: self.coeffs.iter().map(|c| c * factor).collect(),
        }
    }
}

/// Checks that a dealt share matches the dealer's commitment at the holder's
/// index.
pub fn share_correct(index: u32, share: &Scalar, public: &PublicPoly) -> bool {
    G1Projective::generator() * share == public.eval(index)
}

/// Lagrange coefficients at zero for the given set of share indices.
/// Fails on duplicate indices.
pub fn lagrange_coefficients(indices: &[u32]) -> Result<Vec<Scalar>, Error> {
    let mut coefficients = Vec::with_capacity(indices.len());
    for (i, idx) in indices.iter().enumerate() {
        let xi = x_coord(*idx);
        let mut num = Scalar::ONE;
        let mut den = Scalar::ONE;
        for (j, other) in indices.iter().enumerate() {
            if i == j {
                continue;
            }
            if idx == other {
                return Err(Error::DuplicateIndex(*idx));
            }
            let xj = x_coord(*other);
            num *= xj;
            den *= xj - xi;
        }
        let inv = Option::<Scalar>::from(den.invert()).ok_or(Error::DuplicateIndex(*idx))?;
        coefficients.push(num * inv);
    }
    Ok(coefficients)
}

/// Recovers the secret from `threshold` scalar shares by Lagrange
/// interpolation at zero.
pub fn recover_secret(shares: &[(u32, Scalar)], threshold: usize) -> Result<Scalar, Error> {
    if shares.len() < threshold {
        return Err(Error::NotEnoughShares(shares.len(), threshold));
    }
    let shares = &shares[..threshold];
    let indices: Vec<u32> = shares.iter().map(|(i, _)| *i).collect();
    let lambdas = lagrange_coefficients(&indices)?;
    Ok(shares
        .iter()
        .zip(lambdas.iter())
        .fold(Scalar::ZERO, |acc, ((_, s), l)| acc + s * l))
}

/// Recovers a G2 group element (e.g. a full BLS signature) from `threshold`
/// partial evaluations.
pub fn recover_g2(parts: &[(u32, G2Projective)], threshold: usize) -> Result<G2Projective, Error> {
    if parts.len() < threshold {
        return Err(Error::NotEnoughShares(parts.len(), threshold));
    }
    let parts = &parts[..threshold];
    let indices: Vec<u32> = parts.iter().map(|(i, _)| *i).collect();
    let lambdas = lagrange_coefficients(&indices)?;
    Ok(parts
        .iter()
        .zip(lambdas.iter())
        .fold(G2Projective::identity(), |acc, ((_, p), l)| acc + p * l))
}

mod scalar_vec {
    use crate::bytes::{decode_scalar, encode_scalar};
    use blstrs::Scalar;
    use serde::de::Error as _;
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[Scalar], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(v.len()))?;
        for s in v {
            seq.serialize_element(&serde_bytes::ByteBuf::from(encode_scalar(s).to_vec()))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Scalar>, D::Error> {
        let bufs: Vec<serde_bytes::ByteBuf> = Deserialize::deserialize(deserializer)?;
        bufs.iter()
            .map(|b| decode_scalar(b).ok_or_else(|| D::Error::custom("invalid scalar encoding")))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn shares_match_commitment() {
        let poly = PrivatePoly::random(3, &mut OsRng);
        let commits = poly.commit();
        for index in 0..6 {
            assert!(share_correct(index, &poly.eval(index), &commits));
        }
        assert!(!share_correct(1, &poly.eval(2), &commits));
    }

    #[test]
    fn recovers_secret_from_any_quorum() {
        let threshold = 3;
        let poly = PrivatePoly::random(threshold - 1, &mut OsRng);
        let shares: Vec<(u32, Scalar)> = (0..5u32).map(|i| (i, poly.eval(i))).collect();

        let from_first = recover_secret(&shares[..3], threshold).unwrap();
        let from_last = recover_secret(&shares[2..], threshold).unwrap();
        assert_eq!(&from_first, poly.secret());
        assert_eq!(&from_last, poly.secret());
    }

    #[test]
    fn recover_needs_threshold_shares() {
        let poly = PrivatePoly::random(2, &mut OsRng);
        let shares: Vec<(u32, Scalar)> = (0..2u32).map(|i| (i, poly.eval(i))).collect();
        assert!(matches!(
            recover_secret(&shares, 3),
            Err(Error::NotEnoughShares(2, 3))
        ));
    }

    #[test]
    fn lagrange_rejects_duplicates() {
        assert!(lagrange_coefficients(&[1, 2, 1]).is_err());
    }

    #[test]
    fn constant_term_survives_resharing_poly() {
        let secret = Scalar::from(42u64);
        let poly = PrivatePoly::with_constant(secret, 2, &mut OsRng);
        assert_eq!(poly.secret(), &secret);
        let shares: Vec<(u32, Scalar)> = (0..3u32).map(|i| (i, poly.eval(i))).collect();
        assert_eq!(recover_secret(&shares, 3).unwrap(), secret);
    }
}
