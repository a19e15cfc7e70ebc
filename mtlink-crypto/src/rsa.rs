//! RSA_PAD encryption of `p_q_inner_data` and the server key ring.

use num_bigint::BigUint;

use crate::{ige, sha256};

/// Largest payload RSA_PAD accepts.
pub const MAX_PAYLOAD: usize = 144;

/// An RSA public key (n, e).
#[derive(Clone, Debug)]
pub struct Key {
    n: BigUint,
    e: BigUint,
}

impl Key {
    /// Parse decimal `n` and `e` strings.
    pub fn new(n: &str, e: &str) -> Option<Self> {
        Some(Self {
            n: BigUint::parse_bytes(n.as_bytes(), 10)?,
            e: BigUint::parse_bytes(e.as_bytes(), 10)?,
        })
    }

    /// Construct from big-endian modulus and exponent bytes.
    pub fn from_be_bytes(n: &[u8], e: &[u8]) -> Self {
        Self { n: BigUint::from_bytes_be(n), e: BigUint::from_bytes_be(e) }
    }
}

/// Big-endian increment with wrap-around.
fn increment(data: &mut [u8]) {
    for byte in data.iter_mut().rev() {
        let (n, overflow) = byte.overflowing_add(1);
        *byte = n;
        if !overflow {
            break;
        }
    }
}

/// RSA-encrypt `data` using the RSA_PAD scheme.
///
/// `random_bytes` supplies 192 - `data.len()` bytes of padding followed by
/// the 32-byte temporary AES key. Returns `None` if `data` is longer than
/// [`MAX_PAYLOAD`].
pub fn encrypt_hashed(data: &[u8], key: &Key, random_bytes: &[u8; 224]) -> Option<Vec<u8>> {
    if data.len() > MAX_PAYLOAD {
        return None;
    }

    let mut data_with_padding = Vec::with_capacity(192);
    data_with_padding.extend_from_slice(data);
    data_with_padding.extend_from_slice(&random_bytes[..192 - data.len()]);

    let data_pad_reversed: Vec<u8> = data_with_padding.iter().rev().copied().collect();

    let mut temp_key = [0u8; 32];
    temp_key.copy_from_slice(&random_bytes[192..]);

    let key_aes_encrypted = loop {
        let mut data_with_hash = Vec::with_capacity(224);
        data_with_hash.extend_from_slice(&data_pad_reversed);
        data_with_hash.extend_from_slice(&sha256!(&temp_key, &data_with_padding));

        ige::encrypt_in_place(&mut data_with_hash, &temp_key, &[0u8; 32]);

        let hash = sha256!(&data_with_hash);
        let mut temp_key_xor = temp_key;
        temp_key_xor.iter_mut().zip(hash).for_each(|(a, b)| *a ^= b);

        let mut candidate = Vec::with_capacity(256);
        candidate.extend_from_slice(&temp_key_xor);
        candidate.extend_from_slice(&data_with_hash);

        if BigUint::from_bytes_be(&candidate) < key.n {
            break candidate;
        }
        increment(&mut temp_key);
    };

    let encrypted = BigUint::from_bytes_be(&key_aes_encrypted).modpow(&key.e, &key.n);
    let raw = encrypted.to_bytes_be();
    let mut block = vec![0u8; 256usize.saturating_sub(raw.len())];
    block.extend_from_slice(&raw);
    Some(block)
}

/// Selects a server public key by fingerprint and encrypts with it.
pub trait PublicKeyRing: Send + Sync {
    /// Encrypt `data` under the first key in `fingerprints` this ring knows.
    ///
    /// Returns the chosen fingerprint and the ciphertext, or `None` when no
    /// offered fingerprint is known.
    fn encrypt(&self, fingerprints: &[i64], data: &[u8], random: &[u8; 224]) -> Option<(i64, Vec<u8>)>;
}

/// A fixed set of RSA keys indexed by fingerprint.
#[derive(Clone, Debug, Default)]
pub struct ServerKeys {
    keys: Vec<(i64, Key)>,
}

impl ServerKeys {
    /// Ring with an explicit set of `(fingerprint, key)` pairs.
    pub fn new(keys: Vec<(i64, Key)>) -> Self {
        Self { keys }
    }

    /// The production and test data centre keys.
    #[allow(clippy::unreadable_literal)]
    pub fn builtin() -> Self {
        let known = [
            // production
            (
                -3414540481677951611,
                "29379598170669337022986177149456128565388431120058863768162556424047512191330847455146576344487764408661701890505066208632169112269581063774293102577308490531282748465986139880977280302242772832972539403531316010870401287642763009136156734339538042419388722777357134487746169093539093850251243897188928735903389451772730245253062963384108812842079887538976360465290946139638691491496062099570836476454855996319192747663615955633778034897140982517446405334423701359108810182097749467210509584293428076654573384828809574217079944388301239431309115013843331317877374435868468779972014486325557807783825502498215169806323",
            ),
            // test
            (
                -5595554452916591101,
                "25342889448840415564971689590713473206898847759084779052582026594546022463853940585885215951168491965708222649399180603818074200620463776135424884632162512403163793083921641631564740959529419359595852941166848940585952337613333022396096584117954892216031229237302943701877588456738335398602461675225081791820393153757504952636234951323237820036543581047826906120927972487366805292115792231423684261262330394324750785450942589751755390156647751460719351439969059949569615302809050721500330239005077889855323917509948255722081644689442127297605422579707142646660768825302832201908302295573257427896031830742328565032949",
            ),
        ];
        Self {
            keys: known
                .into_iter()
                .filter_map(|(fp, n)| Some((fp, Key::new(n, "65537")?)))
                .collect(),
        }
    }

    /// Key registered under `fingerprint`.
    pub fn get(&self, fingerprint: i64) -> Option<&Key> {
        self.keys.iter().find(|(fp, _)| *fp == fingerprint).map(|(_, k)| k)
    }
}

impl PublicKeyRing for ServerKeys {
    fn encrypt(&self, fingerprints: &[i64], data: &[u8], random: &[u8; 224]) -> Option<(i64, Vec<u8>)> {
        let (fp, key) = fingerprints.iter().find_map(|&fp| Some((fp, self.get(fp)?)))?;
        Some((fp, encrypt_hashed(data, key, random)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_carries() {
        let mut v = [0x00, 0xff, 0xff];
        increment(&mut v);
        assert_eq!(v, [0x01, 0x00, 0x00]);
        let mut w = [0xff; 2];
        increment(&mut w);
        assert_eq!(w, [0x00, 0x00]);
    }

    #[test]
    fn builtin_ring_knows_both_keys() {
        let ring = ServerKeys::builtin();
        assert!(ring.get(-3414540481677951611).is_some());
        assert!(ring.get(-5595554452916591101).is_some());
        assert!(ring.get(1).is_none());
    }

    #[test]
    fn ring_picks_first_known_fingerprint() {
        let ring = ServerKeys::builtin();
        let (fp, block) = ring.encrypt(&[7, -5595554452916591101], &[1, 2, 3], &[0x33; 224]).unwrap();
        assert_eq!(fp, -5595554452916591101);
        assert_eq!(block.len(), 256);
        assert!(ring.encrypt(&[7, 8], &[1], &[0; 224]).is_none());
    }

    #[test]
    fn oversized_payload_is_refused() {
        let key = Key::from_be_bytes(&[0xff; 256], &[1, 0, 1]);
        assert!(encrypt_hashed(&[0; MAX_PAYLOAD + 1], &key, &[0; 224]).is_none());
    }

    #[test]
    fn identity_exponent_exposes_padded_block() {
        // With e = 1 the "ciphertext" is the padded block itself, which lets
        // us unwind RSA_PAD and find the payload again.
        let key = Key::from_be_bytes(&[0xff; 256], &[1]);
        let random = [0x5c; 224];
        let block = encrypt_hashed(b"payload", &key, &random).unwrap();

        let mut temp_key = [0u8; 32];
        temp_key.copy_from_slice(&block[..32]);
        let hash = sha256!(&block[32..]);
        temp_key.iter_mut().zip(hash).for_each(|(a, b)| *a ^= b);

        let mut data_with_hash = block[32..].to_vec();
        ige::decrypt_in_place(&mut data_with_hash, &temp_key, &[0u8; 32]);
        let reversed: Vec<u8> = data_with_hash[..192].iter().rev().copied().collect();
        assert_eq!(&reversed[..7], b"payload");
    }
}
