use serde::{Deserialize, Serialize};

const BOLD: &str = "1";
const UNDERSCORE: &str = "4";
const STRIKE: &str = "9";
const GREEN: &str = "32";
const BROWN: &str = "33";
const BLUE: &str = "34";
const CYAN: &str = "36";
const GRAY: &str = "90";

/// What a painted span means; the palette decides how it looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Username,
    UserId,
    Time,
    Source,
    Retweet,
    Favorite,
    Url,
    Tag,
    Verified,
    Protected,
    Ng,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Background {
    #[default]
    Dark,
    Light,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    Mono,
    Ansi16,
    Ansi256,
}

impl ColorMode {
    pub fn from_depth(colors: u32) -> Self {
        match colors {
            0..=2 => ColorMode::Mono,
            3..=16 => ColorMode::Ansi16,
            _ => ColorMode::Ansi256,
        }
    }

    pub fn depth(self) -> u32 {
        match self {
            ColorMode::Mono => 2,
            ColorMode::Ansi16 => 16,
            ColorMode::Ansi256 => 256,
        }
    }
}

fn join(a: &str, b: &str) -> String {
    match (a.is_empty(), b.is_empty()) {
        (true, _) => b.to_string(),
        (_, true) => a.to_string(),
        _ => format!("{};{}", a, b),
    }
}

#[derive(Debug, Clone)]
pub struct Palette {
    enabled: bool,
    username: String,
    userid: String,
    time: String,
    retweet: String,
    favorite: String,
    url: String,
    verified: String,
    ng: String,
}

impl Palette {
    pub fn new(mode: ColorMode, background: Background, no_color: bool) -> Self {
        let light = background == Background::Light;
        let (blue, username, green, fav, verified) = match mode {
            // Only the user name stands out in monochrome.
            ColorMode::Mono => ("", BOLD, "", "", ""),
            ColorMode::Ansi16 => (if light { BLUE } else { CYAN }, BROWN, GREEN, BROWN, CYAN),
            ColorMode::Ansi256 => (
                if light { BLUE } else { CYAN },
                if light { "38;5;28" } else { BROWN },
                "38;5;28",
                if light { "38;5;184" } else { BROWN },
                CYAN,
            ),
        };
        let gray = if mode == ColorMode::Mono { "" } else { GRAY };

        Self {
            enabled: !no_color,
            username: username.to_string(),
            userid: blue.to_string(),
            time: gray.to_string(),
            retweet: join(BOLD, green),
            favorite: join(BOLD, fav),
            url: join(UNDERSCORE, blue),
            verified: verified.to_string(),
            ng: join(STRIKE, gray),
        }
    }

    fn sgr(&self, role: Role) -> &str {
        match role {
            Role::Username => &self.username,
            Role::UserId | Role::Tag => &self.userid,
            Role::Time | Role::Source | Role::Protected => &self.time,
            Role::Retweet => &self.retweet,
            Role::Favorite => &self.favorite,
            Role::Url => &self.url,
            Role::Verified => &self.verified,
            Role::Ng => &self.ng,
        }
    }

    /// Wrap `text` in the SGR sequence for `role`.
    pub fn paint(&self, role: Role, text: &str) -> String {
        let sgr = self.sgr(role);
        if !self.enabled || sgr.is_empty() {
            return text.to_string();
        }
        format!("\x1b[{}m{}\x1b[0m", sgr, text)
    }
}
