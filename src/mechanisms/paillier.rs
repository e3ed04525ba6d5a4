//! Paillier cryptosystem: additively homomorphic public-key encryption.
//!
//! With `g = n + 1`, the product of two ciphertexts modulo n² decrypts to
//! the sum of their plaintexts modulo n. The key manager keeps the secret
//! key to itself; the aggregation path only ever receives the
//! [`PublicContext`] and a [`Decryptor`] handle for the final result.

use log::{debug, info};
use num_bigint::{BigInt, BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand::Rng;

use crate::errors::{QueryError, QueryResult};

/// Smallest modulus accepted by key generation.
pub const MIN_KEY_BITS: u64 = 128;

const SMALL_PRIMES: [u32; 25] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67,
    71, 73, 79, 83, 89, 97,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ciphertext(BigUint);

/// Public parameters: everything needed to encrypt and to add ciphertexts.
#[derive(Debug, Clone)]
pub struct PublicContext {
    n: BigUint,
    n_squared: BigUint,
    key_bits: u64,
}

impl PublicContext {
    fn new(n: BigUint) -> Self {
        let key_bits = n.bits();
        let n_squared = &n * &n;
        Self {
            n,
            n_squared,
            key_bits,
        }
    }

    pub fn modulus(&self) -> &BigUint {
        &self.n
    }

    pub fn key_bits(&self) -> u64 {
        self.key_bits
    }

    /// Encrypts a plaintext in `[0, n)`.
    pub fn encrypt<R: Rng + ?Sized>(
        &self,
        plaintext: &BigUint,
        rng: &mut R,
    ) -> QueryResult<Ciphertext> {
        if plaintext >= &self.n {
            return Err(QueryError::Encryption(
                "plaintext does not fit in the key modulus".to_string(),
            ));
        }
        let r = rng.gen_biguint_range(&BigUint::one(), &self.n);
        // g^m = (1 + n)^m = 1 + m·n (mod n²)
        let gm = (BigUint::one() + plaintext * &self.n) % &self.n_squared;
        let rn = r.modpow(&self.n, &self.n_squared);
        Ok(Ciphertext(gm * rn % &self.n_squared))
    }

    /// Ciphertext of the sum of the two plaintexts.
    pub fn add(&self, a: &Ciphertext, b: &Ciphertext) -> Ciphertext {
        Ciphertext(&a.0 * &b.0 % &self.n_squared)
    }

    /// Deterministic encryption of zero, the neutral element of `add`.
    pub fn zero(&self) -> Ciphertext {
        Ciphertext(BigUint::one())
    }

    /// Maps a signed integer into `[0, n)`. Magnitudes must stay below n/2.
    pub fn encode_signed(&self, value: &BigInt) -> QueryResult<BigUint> {
        let n = BigInt::from(self.n.clone());
        if value.magnitude() * 2u32 >= self.n {
            return Err(QueryError::Encryption(format!(
                "value {value} is too large for a {}-bit key",
                self.key_bits
            )));
        }
        let encoded = ((value % &n) + &n) % &n;
        encoded.to_biguint().ok_or_else(|| {
            QueryError::Internal("negative residue after reduction".to_string())
        })
    }

    /// Inverse of [`encode_signed`](Self::encode_signed): residues above
    /// n/2 are negative.
    pub fn decode_signed(&self, residue: &BigUint) -> BigInt {
        if residue * 2u32 > self.n {
            BigInt::from(residue.clone()) - BigInt::from(self.n.clone())
        } else {
            BigInt::from(residue.clone())
        }
    }
}

/// Hands out the public context and decrypts final results. Implementors
/// never expose their secret key.
pub trait Decryptor {
    fn public_context(&self) -> &PublicContext;

    fn decrypt(&self, ciphertext: &Ciphertext) -> QueryResult<BigUint>;
}

struct SecretKey {
    lambda: BigUint,
    mu: BigUint,
}

/// Generates and holds a Paillier key pair.
pub struct PaillierKeyManager {
    public: PublicContext,
    secret: SecretKey,
}

impl std::fmt::Debug for PaillierKeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaillierKeyManager")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

impl PaillierKeyManager {
    /// Generates a key with a `key_bits`-bit modulus from two random
    /// probable primes, each tested with `rounds` Miller-Rabin witnesses.
    pub fn generate<R: Rng + ?Sized>(
        key_bits: u64,
        rounds: usize,
        rng: &mut R,
    ) -> QueryResult<Self> {
        if key_bits < MIN_KEY_BITS || key_bits % 2 != 0 {
            return Err(QueryError::Encryption(format!(
                "key size must be an even number of bits >= {MIN_KEY_BITS}, \
                 got {key_bits}"
            )));
        }
        let prime_bits = key_bits / 2;
        let p = random_prime(prime_bits, rounds, rng);
        let q = loop {
            let q = random_prime(prime_bits, rounds, rng);
            if q != p {
                break q;
            }
        };

        let n = &p * &q;
        let lambda = (&p - 1u32) * (&q - 1u32);
        let mu = lambda.modinv(&n).ok_or_else(|| {
            QueryError::Encryption(
                "phi(n) is not invertible modulo n".to_string(),
            )
        })?;

        let public = PublicContext::new(n);
        info!("Generated {}-bit Paillier key", public.key_bits());
        Ok(Self {
            public,
            secret: SecretKey { lambda, mu },
        })
    }
}

impl Decryptor for PaillierKeyManager {
    fn public_context(&self) -> &PublicContext {
        &self.public
    }

    fn decrypt(&self, ciphertext: &Ciphertext) -> QueryResult<BigUint> {
        let PublicContext { n, n_squared, .. } = &self.public;
        if ciphertext.0.is_zero() || &ciphertext.0 >= n_squared {
            return Err(QueryError::Encryption(
                "ciphertext outside of Z*_{n^2}".to_string(),
            ));
        }
        let u = ciphertext.0.modpow(&self.secret.lambda, n_squared);
        // L(u) = (u - 1) / n
        let l = (u - 1u32) / n;
        Ok(l * &self.secret.mu % n)
    }
}

fn random_prime<R: Rng + ?Sized>(
    bits: u64,
    rounds: usize,
    rng: &mut R,
) -> BigUint {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let mut candidate = rng.gen_biguint(bits);
        // Two top bits set so that p·q has exactly 2·bits bits.
        candidate |= (BigUint::from(3u32) << (bits - 2)) | BigUint::one();
        if is_probable_prime(&candidate, rounds, rng) {
            debug!("Found {bits}-bit prime after {attempts} candidates");
            return candidate;
        }
    }
}

/// Miller-Rabin with a small-prime sieve.
pub fn is_probable_prime<R: Rng + ?Sized>(
    n: &BigUint,
    rounds: usize,
    rng: &mut R,
) -> bool {
    for p in SMALL_PRIMES {
        let p = BigUint::from(p);
        if n == &p {
            return true;
        }
        if (n % &p).is_zero() {
            return false;
        }
    }
    if n < &BigUint::from(2u32) {
        return false;
    }

    let n_minus_one = n - 1u32;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;
    let two = BigUint::from(2u32);

    'witness: for _ in 0..rounds {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = a.modpow(&d, n);
        if x.is_one() || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}
