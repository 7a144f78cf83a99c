//! NG-word rules: text patterns, client patterns, and weekly time windows
//! during which matching statuses are suppressed.

use crate::twitter_message::{Tweet, User};
use crate::ui::clock::LocalZone;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc, Weekday};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

const MINUTES_PER_DAY: u32 = 24 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("{0}: missing field")]
    MissingField(&'static str),
    #[error("bad weekday {0:?}")]
    Weekday(String),
    #[error("bad time {0:?}")]
    Time(String),
    #[error("bad delay {0:?}")]
    Delay(String),
}

/// A weekly window; `end2` is the part that spills into the next day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveWindow {
    pub weekday: Weekday,
    pub start: u32,
    pub end1: u32,
    pub end2: Option<u32>,
}

impl LiveWindow {
    /// Parse `<weekday>,<HH:MM>,<HH:MM>[,comment]`.
    ///
    /// An end past 24:00, or earlier than the start, continues on the
    /// following day. The end is exclusive.
    pub fn parse(fields: &str) -> Result<Self, RuleError> {
        let mut it = fields.splitn(4, ',');
        let wday = it.next().ok_or(RuleError::MissingField("weekday"))?;
        let start = it.next().ok_or(RuleError::MissingField("start"))?;
        let end = it.next().ok_or(RuleError::MissingField("end"))?;

        let weekday = wday
            .trim()
            .parse::<Weekday>()
            .map_err(|_| RuleError::Weekday(wday.to_string()))?;
        let start = parse_hhmm(start)?;
        let mut end = parse_hhmm(end)?;
        if start >= MINUTES_PER_DAY {
            return Err(RuleError::Time(fields.to_string()));
        }
        if end < start {
            end += MINUTES_PER_DAY;
        }
        if end > 2 * MINUTES_PER_DAY {
            return Err(RuleError::Time(fields.to_string()));
        }

        let (end1, end2) = if end > MINUTES_PER_DAY {
            (MINUTES_PER_DAY, Some(end - MINUTES_PER_DAY))
        } else {
            (end, None)
        };
        Ok(Self {
            weekday,
            start,
            end1,
            end2,
        })
    }

    pub fn contains(&self, weekday: Weekday, minute: u32) -> bool {
        if weekday == self.weekday && self.start <= minute && minute < self.end1 {
            return true;
        }
        match self.end2 {
            Some(end2) => weekday == self.weekday.succ() && minute < end2,
            None => false,
        }
    }
}

fn parse_hhmm(s: &str) -> Result<u32, RuleError> {
    let bad = || RuleError::Time(s.to_string());
    let (h, m) = s.trim().split_once(':').ok_or_else(bad)?;
    let h: u32 = h.parse().map_err(|_| bad())?;
    let m: u32 = m.parse().map_err(|_| bad())?;
    if m >= 60 || h >= 48 {
        return Err(bad());
    }
    Ok(h * 60 + m)
}

/// Regular expression, or the literal text when it does not compile.
#[derive(Debug, Clone)]
enum Pattern {
    Regex(Regex),
    Literal(String),
}

impl Pattern {
    fn new(src: &str) -> Self {
        match Regex::new(src) {
            Ok(re) => Pattern::Regex(re),
            Err(_) => Pattern::Literal(src.to_string()),
        }
    }

    fn is_match(&self, haystack: &str) -> bool {
        match self {
            Pattern::Regex(re) => re.is_match(haystack),
            Pattern::Literal(s) => haystack.contains(s.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
enum Directive {
    Live(LiveWindow),
    Delay { hours: i64, pattern: Pattern },
    Source(Pattern),
    Text(Pattern),
    /// A directive that failed to parse.
    Never,
}

impl Directive {
    fn parse(text: &str) -> Result<Self, RuleError> {
        if let Some(rest) = text.strip_prefix("%LIVE,") {
            return LiveWindow::parse(rest).map(Directive::Live);
        }
        if let Some(rest) = text.strip_prefix("%DELAY,") {
            let (amount, pattern) = rest
                .split_once(',')
                .ok_or(RuleError::MissingField("pattern"))?;
            let bad = || RuleError::Delay(amount.to_string());
            let hours = match amount.strip_suffix('d') {
                Some(days) => days.parse::<i64>().map_err(|_| bad())? * 24,
                None => amount.parse::<i64>().map_err(|_| bad())?,
            };
            return Ok(Directive::Delay {
                hours,
                pattern: Pattern::new(pattern),
            });
        }
        if let Some(rest) = text.strip_prefix("%SOURCE,") {
            return Ok(Directive::Source(Pattern::new(rest)));
        }
        Ok(Directive::Text(Pattern::new(text)))
    }
}

/// Inputs that are not part of the status itself.
#[derive(Debug, Clone, Copy)]
pub struct MatchContext {
    pub now: DateTime<Utc>,
    pub zone: LocalZone,
}

/// The one user a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserScope {
    Id(u64),
    /// Screen name without the `@`, compared case-insensitively.
    ScreenName(String),
}

impl UserScope {
    fn is_valid(&self) -> bool {
        match self {
            UserScope::Id(uid) => *uid > 1,
            UserScope::ScreenName(name) => !name.is_empty(),
        }
    }

    pub fn contains(&self, user: &User) -> bool {
        match self {
            UserScope::Id(uid) => user.id == *uid,
            UserScope::ScreenName(name) => user.screen_name.eq_ignore_ascii_case(name),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NgRule {
    pub id: i64,
    pub text: String,
    /// Only statuses by this user are checked; ids of 0 and 1 mean unscoped.
    pub scope: Option<UserScope>,
    directive: Directive,
}

impl NgRule {
    pub fn new(id: i64, text: &str, scope: Option<UserScope>) -> Self {
        let directive = Directive::parse(text).unwrap_or_else(|e| {
            warn!("ngword {}: {:?}: {}; rule disabled", id, text, e);
            Directive::Never
        });
        Self {
            id,
            text: text.to_string(),
            scope: scope.filter(UserScope::is_valid),
            directive,
        }
    }

    fn directive_matches(&self, status: &Tweet, ctx: &MatchContext) -> bool {
        match &self.directive {
            Directive::Live(window) => {
                let (weekday, minute) = ctx.zone.weekday_minute(status.created_at);
                window.contains(weekday, minute)
            }
            Directive::Delay { hours, pattern } => {
                pattern.is_match(&status.text)
                    && ctx.now < status.created_at + Duration::hours(*hours)
            }
            Directive::Source(pattern) => pattern.is_match(&status.source),
            Directive::Text(pattern) => pattern.is_match(&status.text),
            Directive::Never => false,
        }
    }

    /// The user this rule matched `status` through, if it matched.
    fn matches<'s>(&self, status: &'s Tweet, ctx: &MatchContext) -> Option<&'s User> {
        match &self.scope {
            None => {
                if self.directive_matches(status, ctx) {
                    return Some(&status.user);
                }
            }
            Some(scope) => {
                if scope.contains(&status.user) && self.directive_matches(status, ctx) {
                    return Some(&status.user);
                }
                if let Some(rt) = &status.retweeted_status {
                    if scope.contains(&rt.user) && self.directive_matches(rt, ctx) {
                        return Some(&rt.user);
                    }
                }
            }
        }

        // a quote is judged by whoever quoted it
        let quoter_in_scope = self
            .scope
            .as_ref()
            .is_none_or(|scope| scope.contains(&status.user));
        match &status.quoted_status {
            Some(q) if quoter_in_scope && self.directive_matches(q, ctx) => Some(&status.user),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NgMatch {
    pub rule: String,
    pub user: User,
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    ngword_list: Option<Vec<RawRule>>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    #[serde(default)]
    id: i64,
    ngword: String,
    #[serde(default)]
    user: Value,
}

/// `42`, `"42"`, `"id:42"` or `"@name"`.
fn parse_scope(user: &Value) -> Option<UserScope> {
    match user {
        Value::Number(n) => n.as_u64().map(UserScope::Id),
        Value::String(s) => match s.strip_prefix('@') {
            Some(name) => Some(UserScope::ScreenName(name.to_string())),
            None => s
                .strip_prefix("id:")
                .unwrap_or(s)
                .parse()
                .ok()
                .map(UserScope::Id),
        },
        _ => None,
    }
}

/// Rules in configured order; the first match wins.
#[derive(Debug, Clone, Default)]
pub struct NgWordList {
    rules: Vec<NgRule>,
}

impl NgWordList {
    pub fn new(rules: Vec<NgRule>) -> Self {
        Self { rules }
    }

    /// Load `{"ngword_list": [...]}`. A missing or empty file has no rules.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading ngword file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("ngword file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let file: RuleFile = serde_json::from_str(text)?;
        let raw = file
            .ngword_list
            .ok_or_else(|| anyhow!("ngword file broken: no ngword_list"))?;
        let rules = raw
            .into_iter()
            .map(|r| NgRule::new(r.id, &r.ngword, parse_scope(&r.user)))
            .collect();
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[NgRule] {
        &self.rules
    }

    pub fn find_match(&self, status: &Tweet, ctx: &MatchContext) -> Option<NgMatch> {
        self.rules.iter().find_map(|rule| {
            rule.matches(status, ctx).map(|user| NgMatch {
                rule: rule.text.clone(),
                user: user.clone(),
            })
        })
    }
}
