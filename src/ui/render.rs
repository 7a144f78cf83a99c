//! One rendering pass per stream event: filters, layout, images.

use crate::feeds::StreamHandler;
use crate::filter::{MatchContext, MuteSet, NgWordList};
use crate::twitter_message::{StreamEvent, Tweet, User};
use crate::twitter_parser;
use crate::ui::charset;
use crate::ui::clock::{format_time, LocalZone};
use crate::ui::color::{ColorMode, Palette, Role};
use crate::ui::format::{self, client_name, unescape_html};
use crate::ui::image::{CacheKey, ImageCache, ImageRequest};
use crate::ui::wrap::{indent, Wrapper, INDENT_COLS};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::io::Write;
use tracing::debug;

const CSI: &str = "\x1b[";
const SAVE_CURSOR: &str = "\x1b7";
const RESTORE_CURSOR: &str = "\x1b8";

#[derive(Debug, Clone)]
pub struct RenderSettings {
    /// 0 disables wrapping.
    pub screen_cols: usize,
    pub icon_size: u32,
    pub image_size: u32,
    pub color_mode: ColorMode,
    pub output_codeset: Option<String>,
    pub hide_protected: bool,
    pub max_concurrent_images: usize,
    pub zone: LocalZone,
}

/// Who retweeted or favorited the status being shown, and when.
struct Attribution<'a> {
    role: Role,
    verb: &'static str,
    user: &'a User,
    at: DateTime<Utc>,
}

pub struct RenderSession<W> {
    settings: RenderSettings,
    palette: Palette,
    wrapper: Wrapper,
    mutes: MuteSet,
    ngwords: NgWordList,
    images: ImageCache,
    out: W,
    connected: bool,
}

impl<W: Write + Send> RenderSession<W> {
    pub fn new(
        settings: RenderSettings,
        palette: Palette,
        mutes: MuteSet,
        ngwords: NgWordList,
        images: ImageCache,
        out: W,
    ) -> Self {
        let wrapper = Wrapper::new(settings.screen_cols);
        Self {
            settings,
            palette,
            wrapper,
            mutes,
            ngwords,
            images,
            out,
            connected: false,
        }
    }

    pub fn mutes(&self) -> &MuteSet {
        &self.mutes
    }

    pub fn into_output(self) -> W {
        self.out
    }

    pub async fn render_event(&mut self, event: StreamEvent) -> Result<()> {
        self.render_event_at(event, Utc::now()).await
    }

    /// Render `event` as of `now`; `now` decides `%DELAY` rules and whether
    /// timestamps show a date.
    pub async fn render_event_at(&mut self, event: StreamEvent, now: DateTime<Utc>) -> Result<()> {
        match event {
            StreamEvent::Tweet(status) | StreamEvent::Retweet(status) | StreamEvent::Quote(status) => {
                self.render_root(&status, None, now).await
            }
            StreamEvent::Favorite {
                source,
                target_object,
                created_at,
            } => {
                let by = Attribution {
                    role: Role::Favorite,
                    verb: "favorited",
                    user: &source,
                    at: created_at,
                };
                self.render_root(&target_object, Some(by), now).await
            }
            StreamEvent::Follow {
                source,
                target,
                created_at,
            } => self.render_follow(&source, &target, created_at, now),
            StreamEvent::Mute { target } => {
                debug!("mute @{} ({})", target.screen_name, target.id);
                self.mutes.insert(&target);
                Ok(())
            }
            StreamEvent::Unmute { target } => {
                debug!("unmute @{} ({})", target.screen_name, target.id);
                self.mutes.remove(target.id);
                Ok(())
            }
            StreamEvent::FriendsList | StreamEvent::Unknown => Ok(()),
        }
    }

    fn emit(&mut self, s: &str) -> Result<()> {
        self.out.write_all(s.as_bytes())?;
        Ok(())
    }

    /// Indent, filter and wrap one block of text for `depth`.
    fn line(&mut self, text: &str, depth: usize) -> Result<()> {
        let filtered = charset::prefilter(text, self.settings.output_codeset.as_deref());
        let wrapped = self.wrapper.wrap(&filtered, depth);
        self.emit(&indent(depth))?;
        self.emit(&wrapped)?;
        self.emit("\n")
    }

    fn time(&self, t: DateTime<Utc>, now: DateTime<Utc>) -> String {
        format_time(t, now, self.settings.zone)
    }

    fn identity(&self, user: &User) -> String {
        format!(
            "{} {}",
            self.palette.paint(Role::Username, &unescape_html(&user.name)),
            self.palette
                .paint(Role::UserId, &format!("@{}", unescape_html(&user.screen_name)))
        )
    }

    async fn render_root(
        &mut self,
        outer: &Tweet,
        favorited: Option<Attribution<'_>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.mutes.hides(outer) {
            debug!("muted: status {} by @{}", outer.id, outer.user.screen_name);
            return Ok(());
        }

        let ctx = MatchContext {
            now,
            zone: self.settings.zone,
        };
        if let Some(m) = self.ngwords.find_match(outer, &ctx) {
            debug!("ngword {:?} matched status {}", m.rule, outer.id);
            let redacted = format!(
                "{} @{} {}",
                unescape_html(&m.user.name),
                unescape_html(&m.user.screen_name),
                self.time(outer.effective().created_at, now)
            );
            let redacted = self.palette.paint(Role::Ng, &redacted);
            self.line(&redacted, 0)?;
            self.emit("\n")?;
            self.out.flush()?;
            return Ok(());
        }

        self.render_status(outer.effective(), 0, now).await?;

        let retweeted = outer.is_retweet().then(|| Attribution {
            role: Role::Retweet,
            verb: "retweeted",
            user: &outer.user,
            at: outer.created_at,
        });
        for by in retweeted.into_iter().chain(favorited) {
            let text = format!(
                "{} {} @{} {}",
                self.time(by.at, now),
                unescape_html(&by.user.name),
                unescape_html(&by.user.screen_name),
                by.verb
            );
            let text = self.palette.paint(by.role, &text);
            self.line(&text, 0)?;
        }

        self.emit("\n")?;
        self.out.flush()?;
        Ok(())
    }

    /// Avatar, header, body, images, quoted status, footer.
    fn render_status<'a>(
        &'a mut self,
        status: &'a Tweet,
        depth: usize,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            self.render_avatar(&status.user, depth).await?;

            let mut header = self.identity(&status.user);
            if status.user.verified {
                header.push_str(&self.palette.paint(Role::Verified, " ●"));
            }
            if status.user.protected {
                header.push_str(&self.palette.paint(Role::Protected, " ■"));
            }
            self.line(&header, depth)?;

            if self.settings.hide_protected && status.user.protected {
                let notice = self
                    .palette
                    .paint(Role::Protected, "(tweet from a protected account not shown)");
                self.line(&notice, depth)?;
            } else {
                let body = format::format_status(status, &self.palette, self.settings.image_size);
                self.line(&body.text, depth)?;

                let mode = self.settings.color_mode;
                let requests: Vec<ImageRequest> = body
                    .media
                    .iter()
                    .map(|m| ImageRequest {
                        key: CacheKey::photo(&m.target_url, m.width, mode),
                        url: m.target_url.clone(),
                        width: m.width,
                    })
                    .collect();
                let images = self
                    .images
                    .load_many(&requests, self.settings.max_concurrent_images)
                    .await;
                for image in images {
                    self.emit(&indent(depth))?;
                    if let Some(bytes) = image {
                        self.out.write_all(&bytes)?;
                    }
                    self.emit("\r")?;
                }
            }

            if let Some(quoted) = &status.quoted_status {
                self.emit("\n")?;
                self.render_status(quoted, depth + 1, now).await?;
            }

            let mut footer = format!(
                "{} {}",
                self.palette.paint(Role::Time, &self.time(status.created_at, now)),
                self.palette.paint(Role::Source, &client_name(&status.source))
            );
            if status.retweet_count > 0 {
                let rt = format!(" {}RT", status.retweet_count);
                footer.push_str(&self.palette.paint(Role::Retweet, &rt));
            }
            if status.favorite_count > 0 {
                let fav = format!(" {}Fav", status.favorite_count);
                footer.push_str(&self.palette.paint(Role::Favorite, &fav));
            }
            self.line(&footer, depth)
        }
        .boxed()
    }

    /// Draw the avatar in the margin left of the header, then put the
    /// cursor back at the start of the header line.
    async fn render_avatar(&mut self, user: &User, depth: usize) -> Result<()> {
        // scroll first so restoring the saved position stays valid
        self.emit(&format!("\n\n\n{}3A{}", CSI, SAVE_CURSOR))?;
        if depth > 0 {
            self.emit(&format!("{}{}C", CSI, INDENT_COLS * depth))?;
        }

        let icon = match &user.avatar_url {
            Some(url) => {
                let key = CacheKey::icon(
                    user,
                    url,
                    self.settings.icon_size,
                    self.settings.color_mode,
                );
                self.images
                    .load(&key, url, Some(self.settings.icon_size))
                    .await
            }
            None => None,
        };

        match icon {
            Some(bytes) => {
                self.out.write_all(&bytes)?;
                self.emit(&format!("\r{}3A{}", CSI, RESTORE_CURSOR))
            }
            None => self.emit(" *\r"),
        }
    }

    fn render_follow(
        &mut self,
        source: &User,
        target: &User,
        at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let text = format!(
            "{} followed {}",
            self.identity(source),
            self.identity(target)
        );
        self.line(&text, 0)?;
        let stamp = format!(
            "{} {}",
            self.palette.paint(Role::Time, &self.time(at, now)),
            self.palette.paint(Role::Source, "notice")
        );
        self.line(&stamp, 0)?;
        self.emit("\n")?;
        self.out.flush()?;
        Ok(())
    }
}

#[async_trait]
impl<W: Write + Send> StreamHandler for RenderSession<W> {
    async fn on_header(&mut self) -> Result<()> {
        if !self.connected {
            self.connected = true;
            self.emit("Connected.\n")?;
            self.out.flush()?;
        }
        Ok(())
    }

    async fn on_event(&mut self, raw: Value) -> Result<()> {
        let event = twitter_parser::classify(&raw);
        self.render_event(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::image::ImageFetcher;
    use crate::filter::NgRule;
    use crate::ui::color::Background;
    use crate::ui::image::TerminalGraphics;
    use crate::ui::wrap::strip_escapes;
    use chrono::TimeZone;
    use chrono_tz::Tz;
    use serde_json::json;
    use std::sync::Arc;

    struct EchoFetcher;

    #[async_trait]
    impl ImageFetcher for EchoFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            Ok(url.as_bytes().to_vec())
        }
    }

    struct Tagged;

    #[async_trait]
    impl TerminalGraphics for Tagged {
        async fn convert(&self, image: Vec<u8>, _width: Option<u32>) -> Result<Vec<u8>> {
            let mut out = b"<IMG ".to_vec();
            out.extend(image);
            out.push(b'>');
            Ok(out)
        }
    }

    fn session(
        dir: &std::path::Path,
        cols: usize,
        ngwords: NgWordList,
    ) -> RenderSession<Vec<u8>> {
        let settings = RenderSettings {
            screen_cols: cols,
            icon_size: 36,
            image_size: 120,
            color_mode: ColorMode::Ansi256,
            output_codeset: None,
            hide_protected: false,
            max_concurrent_images: 2,
            zone: LocalZone::Named(Tz::UTC),
        };
        let images = ImageCache::new(
            dir.to_path_buf(),
            Arc::new(EchoFetcher),
            Some(Arc::new(Tagged)),
        )
        .unwrap();
        RenderSession::new(
            settings,
            Palette::new(ColorMode::Ansi256, Background::Dark, true),
            MuteSet::new(),
            ngwords,
            images,
            Vec::new(),
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn user(id: u64, screen_name: &str) -> Value {
        json!({
            "id_str": id.to_string(),
            "screen_name": screen_name,
            "name": format!("{} name", screen_name),
            "profile_image_url_https": format!("https://pbs.example/{}_normal.png", screen_name),
        })
    }

    fn photo_retweet() -> Value {
        let body = "a".repeat(200);
        json!({
            "id_str": "20",
            "text": format!("RT @alice: {}", body),
            "timestamp_ms": "1714564800000",
            "user": user(2, "bob"),
            "source": "web",
            "retweeted_status": {
                "id_str": "10",
                "text": format!("{} https://t.co/p1", body),
                "timestamp_ms": "1714561200000",
                "user": user(1, "alice"),
                "source": "<a href=\"https://example.com\">client</a>",
                "retweet_count": 3,
                "entities": {"hashtags": [], "urls": []},
                "extended_entities": {"media": [
                    {"url": "https://t.co/p1", "display_url": "pic.example/p1",
                     "media_url_https": "https://pbs.example/one.jpg",
                     "sizes": {"small": {"w": 600, "h": 400}}},
                    {"url": "https://t.co/p1", "display_url": "pic.example/p1",
                     "media_url_https": "https://pbs.example/two.jpg",
                     "sizes": {"small": {"w": 400, "h": 800}}}
                ]}
            }
        })
    }

    fn position(out: &str, needle: &str) -> usize {
        out.find(needle)
            .unwrap_or_else(|| panic!("{:?} not in output:\n{}", needle, out))
    }

    #[tokio::test]
    async fn test_retweet_with_two_photos() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path(), 80, NgWordList::default());
        let event = twitter_parser::classify(&photo_retweet());
        s.render_event_at(event, now()).await.unwrap();
        let out = String::from_utf8(s.into_output()).unwrap();

        let avatar = position(&out, "<IMG https://pbs.example/alice_normal.png>");
        let header = position(&out, "alice name @alice");
        let body = position(&out, "aaaa");
        let first = position(&out, "<IMG https://pbs.example/one.jpg:small>");
        let second = position(&out, "<IMG https://pbs.example/two.jpg:small>");
        let footer = position(&out, "11:00:00 client 3RT");
        let attribution = position(&out, "12:00:00 bob name @bob retweeted");
        assert!(avatar < header);
        assert!(header < body);
        assert!(body < first);
        assert!(first < second);
        assert!(second < footer);
        assert!(footer < attribution);
        assert!(out.ends_with("retweeted\n\n"));
        assert!(!out.contains("\n\n\n\n"));

        // the body is wrapped to the screen, after the 6-column indent
        let plain = strip_escapes(&out);
        let body_lines: Vec<&str> = plain
            .lines()
            .filter(|l| l.starts_with('a'))
            .collect();
        assert!(body_lines.len() >= 3);
        for l in body_lines {
            assert!(l.chars().count() <= 80 - 6, "{:?}", l);
        }
    }

    #[tokio::test]
    async fn test_no_cached_zero_byte_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path(), 80, NgWordList::default());
        let event = twitter_parser::classify(&photo_retweet());
        s.render_event_at(event, now()).await.unwrap();

        for entry in std::fs::read_dir(dir.path()).unwrap() {
            let meta = entry.unwrap().metadata().unwrap();
            assert!(meta.len() > 0);
        }
    }

    #[tokio::test]
    async fn test_mute_and_unmute_events() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path(), 0, NgWordList::default());
        let tweet = json!({
            "id_str": "5",
            "text": "hello there",
            "timestamp_ms": "1714564800000",
            "user": user(7, "carol"),
        });

        let mute = twitter_parser::classify(&json!({"event": "mute", "target": user(7, "carol")}));
        s.render_event_at(mute, now()).await.unwrap();
        assert!(s.mutes().contains(7));
        s.render_event_at(twitter_parser::classify(&tweet), now())
            .await
            .unwrap();

        let unmute =
            twitter_parser::classify(&json!({"event": "unmute", "target": user(7, "carol")}));
        s.render_event_at(unmute, now()).await.unwrap();
        assert!(!s.mutes().contains(7));
        s.render_event_at(twitter_parser::classify(&tweet), now())
            .await
            .unwrap();

        let out = String::from_utf8(s.into_output()).unwrap();
        assert_eq!(out.matches("hello there").count(), 1);
    }

    #[tokio::test]
    async fn test_muted_retweet_target_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path(), 80, NgWordList::default());
        s.mutes.insert(&User {
            id: 1,
            ..User::default()
        });
        let event = twitter_parser::classify(&photo_retweet());
        s.render_event_at(event, now()).await.unwrap();
        assert!(s.into_output().is_empty());
    }

    #[tokio::test]
    async fn test_reply_to_muted_user_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path(), 80, NgWordList::default());
        s.mutes.insert(&User {
            id: 3,
            ..User::default()
        });
        let reply = json!({
            "id_str": "30",
            "text": "@carol agreed",
            "timestamp_ms": "1714564800000",
            "user": user(2, "bob"),
            "source": "web",
            "in_reply_to_user_id_str": "3",
        });
        s.render_event_at(twitter_parser::classify(&reply), now())
            .await
            .unwrap();
        assert!(s.into_output().is_empty());
    }

    #[tokio::test]
    async fn test_ngword_redacts_record() {
        let dir = tempfile::tempdir().unwrap();
        let rules = NgWordList::new(vec![NgRule::new(1, "spoiler", None)]);
        let mut s = session(dir.path(), 80, rules);
        let tweet = json!({
            "id_str": "5",
            "text": "big spoiler ahead",
            "timestamp_ms": "1714564800000",
            "user": user(7, "carol"),
        });
        s.render_event_at(twitter_parser::classify(&tweet), now())
            .await
            .unwrap();

        let out = String::from_utf8(s.into_output()).unwrap();
        assert!(!out.contains("spoiler"));
        assert_eq!(strip_escapes(&out), "carol name @carol 12:00:00\n\n");
    }

    #[tokio::test]
    async fn test_favorite_attribution() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path(), 0, NgWordList::default());
        let event = twitter_parser::classify(&json!({
            "event": "favorite",
            "timestamp_ms": "1714564800000",
            "source": user(9, "dave"),
            "target": user(7, "carol"),
            "target_object": {
                "id_str": "5",
                "text": "nice",
                "timestamp_ms": "1714561200000",
                "user": user(7, "carol"),
                "favorite_count": 2,
            }
        }));
        s.render_event_at(event, now()).await.unwrap();

        let out = strip_escapes(&String::from_utf8(s.into_output()).unwrap());
        assert!(out.contains("11:00:00  2Fav\n"));
        assert!(out.ends_with("12:00:00 dave name @dave favorited\n\n"));
    }

    #[tokio::test]
    async fn test_quoted_status_is_indented() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path(), 80, NgWordList::default());
        let event = twitter_parser::classify(&json!({
            "id_str": "5",
            "text": "look",
            "timestamp_ms": "1714564800000",
            "user": user(7, "carol"),
            "quoted_status": {
                "id_str": "4",
                "text": "original words",
                "timestamp_ms": "1714561200000",
                "user": user(1, "alice"),
            }
        }));
        s.render_event_at(event, now()).await.unwrap();

        let out = String::from_utf8(s.into_output()).unwrap();
        assert!(out.contains("\x1b[12Coriginal words\n"));
        assert!(out.contains("\x1b[6Clook\n"));
        assert!(position(&out, "original words") < position(&out, "12:00:00"));
    }

    #[tokio::test]
    async fn test_hide_protected_body() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path(), 0, NgWordList::default());
        s.settings.hide_protected = true;
        let mut author = user(7, "carol");
        author["protected"] = json!(true);
        let event = twitter_parser::classify(&json!({
            "id_str": "5",
            "text": "private stuff",
            "timestamp_ms": "1714564800000",
            "user": author,
        }));
        s.render_event_at(event, now()).await.unwrap();

        let out = String::from_utf8(s.into_output()).unwrap();
        assert!(!out.contains("private stuff"));
        assert!(out.contains("carol name @carol ■"));
        assert!(out.contains("protected account"));
    }

    #[tokio::test]
    async fn test_follow_event() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path(), 0, NgWordList::default());
        let event = twitter_parser::classify(&json!({
            "event": "follow",
            "timestamp_ms": "1714564800000",
            "source": user(9, "dave"),
            "target": user(7, "carol"),
        }));
        s.render_event_at(event, now()).await.unwrap();

        let out = strip_escapes(&String::from_utf8(s.into_output()).unwrap());
        assert_eq!(
            out,
            "dave name @dave followed carol name @carol\n12:00:00 notice\n\n"
        );
    }

    #[tokio::test]
    async fn test_connected_printed_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path(), 0, NgWordList::default());
        s.on_header().await.unwrap();
        s.on_header().await.unwrap();
        s.on_event(json!({"friends": [1, 2]})).await.unwrap();
        assert_eq!(s.into_output(), b"Connected.\n".to_vec());
    }
}
