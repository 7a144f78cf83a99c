//! Indentation and width-aware line wrapping of colorized text.

/// Columns per indentation level.
pub const INDENT_COLS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escape {
    None,
    /// Just saw ESC.
    Start,
    /// Inside `ESC [`, until a final byte.
    Csi,
    /// `ESC (` or `ESC )`, one designator byte follows.
    Charset,
}

impl Escape {
    fn next(self, c: char) -> Escape {
        match self {
            Escape::None => Escape::None,
            Escape::Start => match c {
                '[' => Escape::Csi,
                '(' | ')' => Escape::Charset,
                _ => Escape::None,
            },
            Escape::Csi if ('\x40'..='\x7e').contains(&c) => Escape::None,
            Escape::Csi => Escape::Csi,
            Escape::Charset => Escape::None,
        }
    }
}

/// Half-width forms that occupy one cell despite being multi-byte.
fn is_halfwidth(c: char) -> bool {
    matches!(c as u32, 0xff61..=0xffdc | 0xffe8..=0xffee)
}

/// Terminal cells taken by `c`.
pub fn char_cols(c: char) -> usize {
    if (c as u32) < 0x80 || is_halfwidth(c) {
        1
    } else {
        2
    }
}

/// Left margin in columns for a record at recursion `depth`.
pub fn indent_cols(depth: usize) -> usize {
    INDENT_COLS * (depth + 1)
}

/// Indentation as a cursor-forward sequence, so images drawn relative to
/// the cursor land in the same column as the text.
pub fn indent(depth: usize) -> String {
    format!("\x1b[{}C", indent_cols(depth))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wrapper {
    screen_cols: usize,
}

impl Wrapper {
    /// `screen_cols == 0` means the width is unknown and disables wrapping.
    pub fn new(screen_cols: usize) -> Self {
        Self { screen_cols }
    }

    /// Wrap `text` that is about to be printed right after the indentation
    /// for `depth`. Every line break, literal or inserted, is followed by
    /// that indentation again.
    pub fn wrap(&self, text: &str, depth: usize) -> String {
        if self.screen_cols == 0 {
            return text.to_string();
        }

        let prefix = indent(depth);
        let left = indent_cols(depth);
        let mut out = String::with_capacity(text.len() + 32);
        let mut x = left;
        let mut state = Escape::None;
        // A full line breaks lazily, so a literal newline right after it
        // does not produce an empty line.
        let mut pending = false;

        for c in text.chars() {
            if state != Escape::None {
                out.push(c);
                state = state.next(c);
                continue;
            }
            if c == '\x1b' {
                out.push(c);
                state = Escape::Start;
                continue;
            }
            if c == '\n' {
                out.push('\n');
                out.push_str(&prefix);
                x = left;
                pending = false;
                continue;
            }

            if pending {
                out.push('\n');
                out.push_str(&prefix);
                x = left;
                pending = false;
            }

            let cols = char_cols(c);
            if cols == 2 && x > left && x > self.screen_cols.saturating_sub(2) {
                out.push('\n');
                out.push_str(&prefix);
                x = left;
            }
            out.push(c);
            x += cols;

            if x > self.screen_cols.saturating_sub(1) {
                pending = true;
            }
        }
        out
    }
}

/// Remove every escape sequence, leaving only printable text and newlines.
pub fn strip_escapes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut state = Escape::None;
    for c in text.chars() {
        if state != Escape::None {
            state = state.next(c);
        } else if c == '\x1b' {
            state = Escape::Start;
        } else {
            out.push(c);
        }
    }
    out
}
