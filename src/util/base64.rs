use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::engine::Engine;

/// Decode base64 the way the original's table-based decoder did: ignore any
/// byte that isn't in the alphabet instead of rejecting the whole string, and
/// tolerate missing padding.
pub fn decode_lenient(input: &str) -> Vec<u8> {
    let filtered: String = input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '+' || *c == '/')
        .collect();
    STANDARD_NO_PAD.decode(filtered.as_bytes()).unwrap_or_default()
}

/// Encode with standard `=` padding to a multiple of 4, matching the
/// original's `b64encode` (base64.c) — the server expects padded opResponse
/// fields in the upload POST.
pub fn encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let encoded = encode(data);
        assert_eq!(decode_lenient(&encoded), data);
    }

    #[test]
    fn ignores_whitespace_and_junk_bytes() {
        let data = b"hello";
        let encoded = encode(data);
        let noisy: String = encoded.chars().collect::<Vec<_>>().chunks(2).map(|c| {
            let mut s: String = c.iter().collect();
            s.push('\n');
            s
        }).collect();
        assert_eq!(decode_lenient(&noisy), data);
    }

    #[test]
    fn empty_input_decodes_empty() {
        assert_eq!(decode_lenient(""), Vec::<u8>::new());
    }

    #[test]
    fn encode_output_is_padded_to_a_multiple_of_four() {
        for data in [&b""[..], &b"a"[..], &b"ab"[..], &b"abc"[..], &b"abcd"[..]] {
            let encoded = encode(data);
            assert_eq!(encoded.len() % 4, 0, "encoded {:?} -> {:?}", data, encoded);
        }
        assert_eq!(encode(b"a"), "YQ==");
    }
}
