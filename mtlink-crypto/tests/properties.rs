use mtlink_crypto::{factorize, generate_key_data_from_nonce, ige};
use proptest::prelude::*;

fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    let mut d = 2;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 1;
    }
    true
}

fn next_prime(mut n: u64) -> u64 {
    while !is_prime(n) {
        n += 1;
    }
    n
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn ige_round_trips_aligned_input(
        blocks in 1usize..16,
        seed in any::<u8>(),
        key in any::<[u8; 32]>(),
        iv in any::<[u8; 32]>(),
    ) {
        let plain: Vec<u8> = (0..blocks * 16).map(|i| (i as u8).wrapping_mul(seed)).collect();
        let mut buf = plain.clone();
        ige::encrypt_in_place(&mut buf, &key, &iv);
        ige::decrypt_in_place(&mut buf, &key, &iv);
        prop_assert_eq!(buf, plain);
    }

    #[test]
    fn ige_checked_round_trip_keeps_prefix(
        plain in proptest::collection::vec(any::<u8>(), 1..200),
        key in any::<[u8; 32]>(),
        iv in any::<[u8; 32]>(),
    ) {
        let ct = ige::encrypt(&plain, &key, &iv).unwrap();
        prop_assert_eq!(ct.len() % 16, 0);
        prop_assert!(ct.len() >= plain.len());
        let back = ige::decrypt(&ct, &key, &iv).unwrap();
        prop_assert_eq!(&back[..plain.len()], plain.as_slice());
    }

    #[test]
    fn factorize_recovers_prime_pairs(a in 1_000u64..1 << 31, b in 1_000u64..1 << 31) {
        let (p, q) = (next_prime(a), next_prime(b));
        prop_assume!(p != q);
        let (lo, hi) = (p.min(q), p.max(q));
        prop_assert_eq!(factorize(p * q), Some((lo, hi)));
    }

    #[test]
    fn nonce_key_material_is_deterministic(
        server_nonce in any::<[u8; 16]>(),
        new_nonce in any::<[u8; 32]>(),
    ) {
        let a = generate_key_data_from_nonce(&server_nonce, &new_nonce);
        let b = generate_key_data_from_nonce(&server_nonce, &new_nonce);
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(&a.iv[28..], &new_nonce[..4]);
    }
}
