//! Character substitutions applied before wrapping.

use std::borrow::Cow;

fn is_private_use(c: char) -> bool {
    matches!(c as u32, 0xe000..=0xf8ff | 0xf0000..=0xffffd | 0x100000..=0x10fffd)
}

/// Characters without a faithful mapping in the legacy Japanese codesets.
fn legacy_substitute(c: char) -> Option<char> {
    match c {
        '\u{ff5e}' => Some('\u{301c}'),
        '\u{ff0d}' => Some('\u{2212}'),
        '\u{2022}' => Some('\u{30fb}'),
        _ => None,
    }
}

/// Show private-use characters as `<U+XXXX>` and, when an output codeset
/// override is active, remap characters that do not survive it.
pub fn prefilter<'a>(text: &'a str, output_codeset: Option<&str>) -> Cow<'a, str> {
    let legacy = output_codeset.is_some_and(|c| !c.is_empty());
    let needs_work = text
        .chars()
        .any(|c| is_private_use(c) || (legacy && legacy_substitute(c).is_some()));
    if !needs_work {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        if is_private_use(c) {
            out.push_str(&format!("<U+{:X}>", c as u32));
        } else if let Some(sub) = legacy.then(|| legacy_substitute(c)).flatten() {
            out.push(sub);
        } else {
            out.push(c);
        }
    }
    Cow::Owned(out)
}
