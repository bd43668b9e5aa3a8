//! The store-flavoured base32 codec.
//!
//! The alphabet omits `e`, `o`, `u` and `t`, and bytes are encoded in
//! reverse chunk order, so this is not interchangeable with RFC 4648.

use thiserror::Error;

const BASE32_CHARS: [u8; 32] = *b"0123456789abcdfghijklmnpqrsvwxyz";
const BASE32_CHARS_REVERSE: [u8; 256] = {
    let mut ret = [0xFFu8; 256];
    let mut idx = 0u8;
    while idx < 32 {
        ret[BASE32_CHARS[idx as usize] as usize] = idx;
        idx += 1;
    }
    ret
};

#[derive(Error, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
#[error("invalid base-32 string")]
pub struct BadBase32;

pub const fn encode_len(len: usize) -> usize {
    (8 * len + 4) / 5
}

pub const fn decode_len(len: usize) -> usize {
    5 * len / 8
}

/// Encode `input` into `output`, which must be exactly `encode_len`
/// bytes long.
pub fn encode_into(input: &[u8], output: &mut [u8]) {
    assert_eq!(output.len(), encode_len(input.len()));
    input
        .chunks(5)
        .zip(output.rchunks_mut(8))
        .for_each(|(input, output)| {
            let mut x = 0u64;
            for (i, b) in input.iter().enumerate() {
                x |= u64::from(*b) << (8 * i);
            }
            for (i, out) in output.iter_mut().rev().enumerate() {
                *out = BASE32_CHARS[(x >> (5 * i) & 0x1f) as usize];
            }
        });
}

pub fn encode(input: &[u8]) -> String {
    let mut output = vec![0u8; encode_len(input.len())];
    encode_into(input, &mut output);
    // The alphabet is ASCII.
    String::from_utf8(output).unwrap()
}

pub fn decode(input: &str) -> Result<Vec<u8>, BadBase32> {
    let input = input.as_bytes();
    // Lengths where the trailing bits can't fit in the last chunk never
    // come out of the encoder.
    if input.len() * 5 % 8 >= 5 {
        return Err(BadBase32);
    }
    let mut output = vec![0u8; decode_len(input.len())];
    for (input, output) in input.rchunks(8).zip(output.chunks_mut(5)) {
        let mut x = 0u64;
        for (i, c) in input.iter().rev().enumerate() {
            let y = BASE32_CHARS_REVERSE[*c as usize];
            if y >= 1 << 5 {
                return Err(BadBase32);
            }
            x |= u64::from(y) << (5 * i);
        }
        for (i, out) in output.iter_mut().enumerate() {
            *out = (x >> (8 * i) & 0xff) as u8;
        }
    }
    let trail = 5 * input.len() % 8;
    if trail != 0 {
        let mask = ((1u8 << trail) - 1) << (5 - trail);
        if BASE32_CHARS_REVERSE[input[0] as usize] & mask != 0 {
            return Err(BadBase32);
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use pretty_assertions::assert_eq;
    use ::proptest::{prop_assert_eq, proptest};
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::empty("", &[])]
    #[case::one("0z", &hex!("1f"))]
    #[case::two("0bqz", &hex!("1f2f"))]
    #[case::three("gy003", &hex!("0300 ff"))]
    #[case::four("0s14004", &hex!("0400 1234"))]
    #[case::five("aqs14005", &hex!("0500 1234 56"))]
    #[case::twenty("x0xf8v9fxf3jk8zln1cwlsrmhqvp0f88", &hex!("0839 7037 8635 6bca 59b0 f4a3 2987 eb2e 6de4 3ae8"))]
    #[case::sha256("1b8m03r63zqhnjf7l5wnldhh7c134ap5vpj0850ymkq1iyzicy5s", &hex!("ba78 16bf 8f01 cfea 4141 40de 5dae 2223 b003 61a3 9617 7a9c b410 ff61 f200 15ad"))]
    fn test_encode(#[case] expected: &str, #[case] data: &[u8]) {
        assert_eq!(encode(data), expected);
    }

    #[rstest]
    #[case::empty("", &[])]
    #[case::one("0z", &hex!("1f"))]
    #[case::two("0bqz", &hex!("1f2f"))]
    #[case::three("gy003", &hex!("0300 ff"))]
    #[case::twenty("x0xf8v9fxf3jk8zln1cwlsrmhqvp0f88", &hex!("0839 7037 8635 6bca 59b0 f4a3 2987 eb2e 6de4 3ae8"))]
    #[case::sha256("1b8m03r63zqhnjf7l5wnldhh7c134ap5vpj0850ymkq1iyzicy5s", &hex!("ba78 16bf 8f01 cfea 4141 40de 5dae 2223 b003 61a3 9617 7a9c b410 ff61 f200 15ad"))]
    fn test_decode(#[case] data: &str, #[case] expected: &[u8]) {
        assert_eq!(decode(data), Ok(expected.to_vec()));
    }

    #[rstest]
    #[case::bad_symbol("!pcd173cq987hw957sx6m0868wv3x6d9")]
    #[case::excluded_letter("epcd173cq987hw957sx6m0868wv3x6d9")]
    #[case::bad_trailer("zz")]
    #[case::bad_length("abc")]
    fn test_decode_fail(#[case] data: &str) {
        assert_eq!(decode(data), Err(BadBase32));
    }

    proptest! {
        #[test]
        fn proptest_roundtrip(data: Vec<u8>) {
            let encoded = encode(&data);
            prop_assert_eq!(decode(&encoded), Ok(data));
        }
    }
}
