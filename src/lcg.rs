// src/lcg.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cheap, correlated, full-period linear-congruential permutation
//! generator. Ported from `original_source/lib/src/lcg.h`.
//!
//! `m` is always a power of two, so `next`/`skip` use masking instead of
//! a real modulo. `skip` advances in O(log k) via fast exponentiation
//! mod `m` (power-of-two fast path) and mod `(a-1)*m` (generic, since
//! that modulus need not be a power of two).

use rand_mt::Mt19937GenRand32;

fn mod_pow2(x: i64, m: i64) -> i32 {
    debug_assert!(m > 0 && (m & (m - 1)) == 0);
    (x & (m - 1)) as i32
}

fn mod_generic(x: i64, m: i64) -> i32 {
    debug_assert!(m > 0);
    let r = x.rem_euclid(m);
    r as i32
}

fn pow_mod_pow2(mut base: i64, mut exp: i64, m: i64) -> i64 {
    let mut result: i64 = 1;
    base = mod_pow2(base, m) as i64;
    while exp > 0 {
        if exp & 1 == 1 {
            result = mod_pow2(result * base, m) as i64;
        }
        base = mod_pow2(base * base, m) as i64;
        exp >>= 1;
    }
    result
}

fn pow_mod_generic(mut base: i64, mut exp: i64, m: i64) -> i64 {
    let mut result: i64 = 1;
    base = mod_generic(base, m) as i64;
    while exp > 0 {
        if exp & 1 == 1 {
            result = mod_generic(result * base, m) as i64;
        }
        base = mod_generic(base * base, m) as i64;
        exp >>= 1;
    }
    result
}

/// Full-period LCG state: `element <- (a * element + c) mod m`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LcgState {
    pub a: i32,
    pub c: i32,
    pub m: i32,
    pub element: i32,
}

impl LcgState {
    /// Validate the Hull–Dobell-for-power-of-two-`m` conditions this state
    /// must satisfy at every step.
    pub fn check(&self) {
        debug_assert!(self.m & (self.m - 1) == 0, "m must be a power of two: {}", self.m);
        debug_assert!(self.m >= 4, "m too small: {}", self.m);
        debug_assert!(self.a > 0 && self.c > 0, "a: {}, c: {}", self.a, self.c);
        debug_assert!((self.a - 1) % 4 == 0, "a - 1 must be divisible by 4: {}", self.a);
        debug_assert!(self.c % 2 == 1, "c must be odd: {}", self.c);
        debug_assert!(self.element >= 0 && self.element <= self.m, "{}", self.element);
        debug_assert!(self.m <= (1 << 15), "m too large: {}", self.m);
    }

    /// Advance one step.
    pub fn next(&mut self) {
        self.check();
        let a = self.a as i64;
        let c = self.c as i64;
        let m = self.m as i64;
        self.element = mod_pow2(self.element as i64 * a + c, m);
        self.check();
    }

    /// Advance `num_steps` steps in O(log num_steps).
    pub fn skip(&mut self, num_steps: i64) {
        debug_assert!(num_steps > 0 && num_steps <= self.m as i64);
        self.check();

        let a = self.a as i64;
        let c = self.c as i64;
        let m = self.m as i64;
        let element = self.element as i64;

        self.element = if a == 1 {
            mod_pow2(element + c * num_steps, m)
        } else {
            let a_minus_1 = a - 1;
            let term1 = mod_pow2(pow_mod_pow2(a, num_steps, m) * element, m) as i64;
            let term2 = (pow_mod_generic(a, num_steps, a_minus_1 * m) - 1) / a_minus_1 * c;
            mod_pow2(term1 + term2, m)
        };
        self.check();
    }
}

/// Produces fresh, full-period `LcgState`s for a fixed `permutation_size`
/// (the block's `num_batches_in_block`), drawing `(a, c, element)` from a
/// per-worker seeded 32-bit Mersenne Twister — grounded on the original's
/// `std::mt19937` usage in `LCGPermutationGenerator`.
pub struct PermutationGenerator {
    permutation_size: i64,
    rng: Mt19937GenRand32,
}

impl PermutationGenerator {
    pub fn new(permutation_size: i64, seed: u32) -> Self {
        debug_assert!(permutation_size & (permutation_size - 1) == 0);
        Self {
            permutation_size,
            rng: Mt19937GenRand32::new(seed),
        }
    }

    pub fn start_new_permutation(&mut self) -> LcgState {
        let m = self.permutation_size;
        let c = 2 * ((self.rng.next_u32() as i64) % (m / 2 - 1)) + 1;
        let a = 4 * ((self.rng.next_u32() as i64) % (m / 4)) + 1;
        let element = (self.rng.next_u32() as i64) % m;

        let state = LcgState {
            a: a as i32,
            c: c as i32,
            m: m as i32,
            element: element as i32,
        };
        state.check();
        state
    }
}
