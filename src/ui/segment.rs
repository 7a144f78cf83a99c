//! Character-offset arithmetic over UTF-8 text.
//!
//! Entity offsets delivered with a status count characters, not bytes, so
//! every substitution has to translate them through here first.

/// Byte length of the UTF-8 sequence introduced by `lead`.
///
/// Continuation or invalid lead bytes count as one so a scan always advances.
#[inline]
pub fn codepoint_len(lead: u8) -> usize {
    match lead {
        0x00..=0x7f => 1,
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf7 => 4,
        _ => 1,
    }
}

/// Number of characters in `text`.
pub fn char_len(text: &str) -> usize {
    let bytes = text.as_bytes();
    let mut count = 0;
    let mut i = 0;
    while i < bytes.len() {
        i += codepoint_len(bytes[i]);
        count += 1;
    }
    count
}

/// Byte offset of character index `n`, clamped to the end of `text`.
pub fn byte_offset(text: &str, n: usize) -> usize {
    let bytes = text.as_bytes();
    let mut i = 0;
    for _ in 0..n {
        if i >= bytes.len() {
            break;
        }
        i += codepoint_len(bytes[i]);
    }
    i.min(bytes.len())
}

/// Split at character index `n`.
pub fn split_at_char(text: &str, n: usize) -> (&str, &str) {
    text.split_at(byte_offset(text, n))
}

/// Cut `text` at each character offset, in order.
///
/// Offsets must be non-decreasing; out-of-range offsets clamp to the end.
/// The pieces always concatenate back to `text`.
pub fn split_at_chars<'a>(text: &'a str, offsets: &[usize]) -> Vec<&'a str> {
    let mut pieces = Vec::with_capacity(offsets.len() + 1);
    let mut rest = text;
    let mut consumed = 0;
    for &offset in offsets {
        let (head, tail) = split_at_char(rest, offset.saturating_sub(consumed));
        consumed += char_len(head);
        pieces.push(head);
        rest = tail;
    }
    pieces.push(rest);
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_codepoint_len() {
        assert_eq!(codepoint_len(b'a'), 1);
        assert_eq!(codepoint_len("é".as_bytes()[0]), 2);
        assert_eq!(codepoint_len("あ".as_bytes()[0]), 3);
        assert_eq!(codepoint_len("😀".as_bytes()[0]), 4);
        assert_eq!(codepoint_len(0x80), 1);
    }

    #[test]
    fn test_char_len_matches_chars() {
        let s = "aあé😀ｶ";
        assert_eq!(char_len(s), s.chars().count());
    }

    #[test]
    fn test_split_at_char_multibyte() {
        let (a, b) = split_at_char("あいう", 1);
        assert_eq!(a, "あ");
        assert_eq!(b, "いう");
    }

    #[test]
    fn test_split_at_char_clamps() {
        let (a, b) = split_at_char("abc", 10);
        assert_eq!(a, "abc");
        assert_eq!(b, "");
    }

    #[test]
    fn test_split_at_chars_pieces() {
        let pieces = split_at_chars("今日は #晴れ です", &[4, 7]);
        assert_eq!(pieces, vec!["今日は ", "#晴れ", " です"]);
    }

    proptest! {
        #[test]
        fn prop_split_then_rejoin_is_identity(
            text in "\\PC{0,40}",
            mut offsets in proptest::collection::vec(0usize..50, 0..6),
        ) {
            offsets.sort_unstable();
            let pieces = split_at_chars(&text, &offsets);
            prop_assert_eq!(pieces.concat(), text);
        }

        #[test]
        fn prop_byte_offset_agrees_with_char_indices(text in "\\PC{0,40}", n in 0usize..45) {
            let expected = text
                .char_indices()
                .nth(n)
                .map(|(i, _)| i)
                .unwrap_or(text.len());
            prop_assert_eq!(byte_offset(&text, n), expected);
        }
    }
}
