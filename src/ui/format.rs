//! Turn a status body into colorized text plus the list of images to show.

use crate::twitter_message::{HashtagSpan, Tweet, UrlEntity};
use crate::ui::color::{Palette, Role};
use crate::ui::segment;
use regex::{Captures, Regex};
use scraper::Html;
use std::sync::LazyLock;

/// Width used for direct links to image files.
pub const LINKED_IMAGE_WIDTH: u32 = 120;

static MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|[^A-Za-z0-9])(@[A-Za-z0-9_]+)").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaInfo {
    pub display_url: String,
    pub target_url: String,
    /// Requested pixel width; `None` keeps the service's own size.
    pub width: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedText {
    pub text: String,
    pub media: Vec<MediaInfo>,
}

/// Format the body of `status`.
///
/// Hashtags are resolved first, while character offsets still refer to
/// the untouched text; every later step changes lengths.
pub fn format_status(status: &Tweet, palette: &Palette, image_size: u32) -> FormattedText {
    let mut media = Vec::new();

    let text = colorize_hashtags(&status.text, &status.hashtags, palette);
    let text = unescape_html(&text);
    let mut text = colorize_mentions(&text, palette);

    for u in &status.urls {
        // a trailing link to the quoted status is shown as the quote itself
        if is_quote_link(status, u) {
            if let Some(rest) = text.strip_suffix(u.url.as_str()) {
                text = rest.trim_end().to_string();
                continue;
            }
        }
        text = text.replace(&u.url, &palette.paint(Role::Url, &u.display_url));
        if let Some(info) = external_image(&u.expanded_url, &u.display_url) {
            media.push(info);
        }
    }

    for m in &status.media {
        text = text.replace(&m.url, &palette.paint(Role::Url, &m.display_url));
        // Scale by the long edge so portrait and landscape look alike.
        let width = if m.height > m.width {
            (f64::from(m.width) / f64::from(m.height) * f64::from(image_size)) as u32
        } else {
            image_size
        };
        media.push(MediaInfo {
            display_url: m.display_url.clone(),
            target_url: format!("{}:small", m.media_url),
            width: Some(width),
        });
    }

    FormattedText { text, media }
}

/// Paint hashtag spans. Spans that overlap or fall outside the text are
/// dropped rather than guessed at.
pub fn colorize_hashtags(text: &str, spans: &[HashtagSpan], palette: &Palette) -> String {
    let len = segment::char_len(text);
    let mut sorted: Vec<HashtagSpan> = spans.to_vec();
    sorted.sort_by_key(|s| s.start);

    let mut offsets = Vec::with_capacity(sorted.len() * 2);
    let mut last_end = 0;
    for span in sorted {
        if span.start < last_end || span.start > span.end || span.end > len {
            continue;
        }
        offsets.push(span.start);
        offsets.push(span.end);
        last_end = span.end;
    }

    let mut out = String::with_capacity(text.len() + offsets.len() * 8);
    for (i, piece) in segment::split_at_chars(text, &offsets).into_iter().enumerate() {
        if i % 2 == 1 {
            out.push_str(&palette.paint(Role::Tag, piece));
        } else {
            out.push_str(piece);
        }
    }
    out
}

/// Decode `&amp;`, `&lt;` and `&gt;`; quotes are delivered unescaped.
pub fn unescape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let (decoded, skip) = if tail.starts_with("&amp;") {
            ('&', 5)
        } else if tail.starts_with("&lt;") {
            ('<', 4)
        } else if tail.starts_with("&gt;") {
            ('>', 4)
        } else {
            ('&', 1)
        };
        out.push(decoded);
        rest = &tail[skip..];
    }
    out.push_str(rest);
    out
}

/// Paint `@name` unless it is glued to a preceding alphanumeric, as in
/// an e-mail address.
pub fn colorize_mentions(text: &str, palette: &Palette) -> String {
    MENTION
        .replace_all(text, |caps: &Captures| {
            format!("{}{}", &caps[1], palette.paint(Role::UserId, &caps[2]))
        })
        .into_owned()
}

fn is_quote_link(status: &Tweet, u: &UrlEntity) -> bool {
    match (&status.quoted_status, status.quoted_status_id.as_deref()) {
        (Some(_), Some(qid)) if !qid.is_empty() => u.expanded_url.contains(qid),
        _ => false,
    }
}

/// Recognize links to external image hosts and direct image files.
pub fn external_image(expanded_url: &str, display_url: &str) -> Option<MediaInfo> {
    static TWITPIC: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"twitpic\.com/(\w+)").unwrap());
    static MOVAPIC: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"movapic\.com/(pic/)?(\w+)").unwrap());
    static TWIPPLE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"p\.twipple\.jp/(\w+)").unwrap());
    static INSTAGRAM: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(.*instagram\.com/p/[\w\-]+)/?").unwrap());
    static IMAGE_FILE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\.(jpg|png|gif)$").unwrap());

    let service = |target: String| MediaInfo {
        display_url: display_url.to_string(),
        target_url: target,
        width: None,
    };

    if let Some(c) = TWITPIC.captures(expanded_url) {
        return Some(service(format!("http://twitpic.com/show/mini/{}", &c[1])));
    }
    if let Some(c) = MOVAPIC.captures(expanded_url) {
        return Some(service(format!("http://image.movapic.com/pic/t_{}.jpeg", &c[2])));
    }
    if let Some(c) = TWIPPLE.captures(expanded_url) {
        return Some(service(format!("http://p.twpl.jp/show/thumb/{}", &c[1])));
    }
    if let Some(c) = INSTAGRAM.captures(expanded_url) {
        return Some(service(format!("{}/media/?size=t", &c[1])));
    }
    if IMAGE_FILE.is_match(expanded_url) {
        return Some(MediaInfo {
            display_url: display_url.to_string(),
            target_url: expanded_url.to_string(),
            width: Some(LINKED_IMAGE_WIDTH),
        });
    }
    None
}

/// Client name from the `source` field, which is usually an `<a>` element.
pub fn client_name(source: &str) -> String {
    let fragment = Html::parse_fragment(source);
    let text: String = fragment.root_element().text().collect();
    text.trim().to_string()
}
