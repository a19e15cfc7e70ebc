//! PQ factorization for the first handshake step.
//!
//! The server hands out a composite below 2^63 made of two primes of similar
//! size, so a Fermat search starting at `ceil(sqrt(pq))` usually finishes in
//! a few thousand steps. When the factors are far apart the search is cut
//! off and Pollard-rho (Brent variant) takes over.

/// Fermat steps tried before switching to Pollard-rho.
const FERMAT_STEPS: u32 = 1 << 18;

/// Factorize `pq` into `(p, q)` with `p < q` and `p * q == pq`.
///
/// Returns `None` for primes, perfect squares, and anything else that has no
/// split into two distinct factors greater than one.
pub fn factorize(pq: u64) -> Option<(u64, u64)> {
    if pq < 6 || is_prime(pq) {
        return None;
    }
    if pq % 2 == 0 {
        let q = pq / 2;
        return (q != 2).then_some((2.min(q), 2.max(q)));
    }
    fermat(pq, FERMAT_STEPS).or_else(|| pollard_brent(pq))
}

fn fermat(pq: u64, max_steps: u32) -> Option<(u64, u64)> {
    let n = u128::from(pq);
    let mut a = n.isqrt();
    if a * a < n {
        a += 1;
    }
    // b2 = a^2 - n, advanced incrementally: (a+1)^2 - a^2 = 2a + 1
    let mut b2 = a * a - n;

    for _ in 0..max_steps {
        if could_be_square(b2) {
            let b = b2.isqrt();
            if b * b == b2 {
                if b == 0 || a + b >= n {
                    return None;
                }
                return Some(((a - b) as u64, (a + b) as u64));
            }
        }
        b2 += 2 * a + 1;
        a += 1;
    }
    None
}

/// Quadratic residues mod 64 filter out most non-squares without a sqrt.
fn could_be_square(x: u128) -> bool {
    const RESIDUES: u64 = {
        let mut mask = 0u64;
        let mut i = 0u64;
        while i < 64 {
            mask |= 1 << ((i * i) % 64);
            i += 1;
        }
        mask
    };
    RESIDUES >> (x % 64) & 1 == 1
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn mul_mod(a: u128, b: u128, m: u128) -> u128 {
    // a, b < m < 2^64, so the product fits in u128.
    a * b % m
}

fn pow_mod(mut base: u128, mut exp: u128, m: u128) -> u128 {
    let mut result = 1;
    base %= m;
    while exp > 0 {
        if exp & 1 == 1 {
            result = mul_mod(result, base, m);
        }
        base = mul_mod(base, base, m);
        exp >>= 1;
    }
    result
}

/// Deterministic Miller-Rabin for every `u64`.
fn is_prime(n: u64) -> bool {
    const WITNESSES: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];
    if n < 2 {
        return false;
    }
    for p in WITNESSES {
        if n % p == 0 {
            return n == p;
        }
    }
    let n128 = u128::from(n);
    let mut d = n128 - 1;
    let mut r = 0;
    while d % 2 == 0 {
        d /= 2;
        r += 1;
    }
    'witness: for a in WITNESSES {
        let mut x = pow_mod(u128::from(a), d, n128);
        if x == 1 || x == n128 - 1 {
            continue;
        }
        for _ in 1..r {
            x = mul_mod(x, x, n128);
            if x == n128 - 1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

fn abs_diff(a: u128, b: u128) -> u128 { a.max(b) - a.min(b) }

fn brent_with(pq: u128, c: u128) -> u128 {
    let f = |y: u128| (mul_mod(y, y, pq) + c) % pq;
    let m = 128u128;

    let mut y = 2u128;
    let mut g = 1u128;
    let mut r = 1u128;
    let mut q = 1u128;
    let mut x = y;
    let mut ys = y;

    while g == 1 {
        x = y;
        for _ in 0..r {
            y = f(y);
        }
        let mut k = 0;
        while k < r && g == 1 {
            ys = y;
            for _ in 0..m.min(r - k) {
                y = f(y);
                q = mul_mod(q, abs_diff(x, y), pq);
            }
            g = gcd(q, pq);
            k += m;
        }
        r *= 2;
    }

    if g == pq {
        loop {
            ys = f(ys);
            g = gcd(abs_diff(x, ys), pq);
            if g > 1 {
                break;
            }
        }
    }
    g
}

fn pollard_brent(pq: u64) -> Option<(u64, u64)> {
    let n = u128::from(pq);
    for c in [1u128, 3, 5, 7, 11, 13] {
        let g = brent_with(n, c);
        if g != 1 && g != n {
            let (p, q) = (g as u64, (n / g) as u64);
            return (p != q).then_some((p.min(q), p.max(q)));
        }
    }
    None
}
