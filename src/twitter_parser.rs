use crate::twitter_message::{HashtagSpan, MediaEntity, StreamEvent, Tweet, UrlEntity, User};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct RawUser {
    id: Option<u64>,
    id_str: Option<String>,
    screen_name: Option<String>,
    name: Option<String>,
    verified: Option<bool>,
    protected: Option<bool>,
    profile_image_url_https: Option<String>,
    profile_image_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawEntities {
    #[serde(default)]
    hashtags: Vec<RawHashtag>,
    #[serde(default)]
    urls: Vec<RawUrl>,
    #[serde(default)]
    media: Vec<RawMedia>,
    #[serde(default)]
    user_mentions: Vec<RawMention>,
}

#[derive(Debug, Deserialize)]
struct RawHashtag {
    #[serde(default)]
    indices: Vec<usize>,
}

#[derive(Debug, Deserialize)]
struct RawMention {
    id: Option<u64>,
    id_str: Option<String>,
    #[serde(default)]
    indices: Vec<usize>,
}

#[derive(Debug, Deserialize)]
struct RawUrl {
    url: Option<String>,
    display_url: Option<String>,
    expanded_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMedia {
    url: Option<String>,
    display_url: Option<String>,
    media_url: Option<String>,
    media_url_https: Option<String>,
    sizes: Option<RawSizes>,
}

#[derive(Debug, Deserialize)]
struct RawSizes {
    small: Option<RawSize>,
    medium: Option<RawSize>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct RawSize {
    w: u32,
    h: u32,
}

#[derive(Debug, Deserialize)]
struct RawExtendedEntities {
    #[serde(default)]
    media: Vec<RawMedia>,
}

#[derive(Debug, Deserialize)]
struct RawExtendedTweet {
    full_text: Option<String>,
    entities: Option<RawEntities>,
    display_text_range: Option<Vec<usize>>,
}

#[derive(Debug, Deserialize)]
struct RawStatus {
    id: Option<u64>,
    id_str: Option<String>,
    text: Option<String>,
    full_text: Option<String>,
    created_at: Option<String>,
    timestamp_ms: Option<Value>,
    user: RawUser,
    source: Option<String>,
    entities: Option<RawEntities>,
    extended_entities: Option<RawExtendedEntities>,
    extended_tweet: Option<RawExtendedTweet>,
    retweeted_status: Option<Box<RawStatus>>,
    quoted_status: Option<Box<RawStatus>>,
    quoted_status_id_str: Option<String>,
    in_reply_to_user_id: Option<u64>,
    in_reply_to_user_id_str: Option<String>,
    display_text_range: Option<Vec<usize>>,
    retweet_count: Option<u64>,
    favorite_count: Option<u64>,
}

/// Decode one raw stream object into exactly one [`StreamEvent`].
///
/// Anything malformed or unrecognized becomes `Unknown`; this never fails.
pub fn classify(value: &Value) -> StreamEvent {
    match try_classify(value) {
        Ok(event) => event,
        Err(e) => {
            debug!("ignoring malformed object: {:#}", e);
            StreamEvent::Unknown
        }
    }
}

fn try_classify(value: &Value) -> Result<StreamEvent> {
    let Some(obj) = value.as_object() else {
        return Ok(StreamEvent::Unknown);
    };

    if let Some(event) = obj.get("event").and_then(Value::as_str) {
        return classify_event(event, value);
    }
    if obj.contains_key("friends") || obj.contains_key("friends_str") {
        return Ok(StreamEvent::FriendsList);
    }
    if obj.contains_key("text") || obj.contains_key("full_text") {
        let tweet = parse_status(value)?;
        return Ok(if tweet.retweeted_status.is_some() {
            StreamEvent::Retweet(tweet)
        } else if tweet.quoted_status.is_some() {
            StreamEvent::Quote(tweet)
        } else {
            StreamEvent::Tweet(tweet)
        });
    }
    Ok(StreamEvent::Unknown)
}

fn classify_event(event: &str, value: &Value) -> Result<StreamEvent> {
    match event {
        "favorite" => {
            let source = parse_user(value.get("source"))?;
            let target_object = value
                .get("target_object")
                .ok_or_else(|| anyhow!("favorite without target_object"))?;
            Ok(StreamEvent::Favorite {
                source,
                target_object: Box::new(parse_status(target_object)?),
                created_at: object_time(value)?,
            })
        }
        "follow" => Ok(StreamEvent::Follow {
            source: parse_user(value.get("source"))?,
            target: parse_user(value.get("target"))?,
            created_at: object_time(value)?,
        }),
        "mute" => Ok(StreamEvent::Mute {
            target: parse_user(value.get("target"))?,
        }),
        "unmute" => Ok(StreamEvent::Unmute {
            target: parse_user(value.get("target"))?,
        }),
        _ => Ok(StreamEvent::Unknown),
    }
}

/// Decode a status object (tweet, retweet or quote) into a [`Tweet`].
pub fn parse_status(value: &Value) -> Result<Tweet> {
    let raw = RawStatus::deserialize(value).context("decoding status")?;
    convert_status(raw)
}

fn parse_user(value: Option<&Value>) -> Result<User> {
    let value = value.ok_or_else(|| anyhow!("missing user object"))?;
    let raw = RawUser::deserialize(value).context("decoding user")?;
    convert_user(raw)
}

fn convert_user(raw: RawUser) -> Result<User> {
    let id = match (raw.id_str.as_deref(), raw.id) {
        (Some(s), _) => s
            .parse::<u64>()
            .with_context(|| format!("bad user id_str {:?}", s))?,
        (None, Some(id)) => id,
        (None, None) => return Err(anyhow!("user without id")),
    };
    Ok(User {
        id,
        screen_name: raw.screen_name.unwrap_or_default(),
        name: raw.name.unwrap_or_default(),
        verified: raw.verified.unwrap_or(false),
        protected: raw.protected.unwrap_or(false),
        avatar_url: raw.profile_image_url_https.or(raw.profile_image_url),
    })
}

fn convert_status(raw: RawStatus) -> Result<Tweet> {
    let created_at = status_time(raw.timestamp_ms.as_ref(), raw.created_at.as_deref())?;

    // extended_tweet carries the untruncated text together with its own entities
    let (text, entities, media, text_range) = match raw.extended_tweet {
        Some(RawExtendedTweet {
            full_text: Some(full_text),
            entities,
            display_text_range,
        }) => {
            let mut entities = entities.unwrap_or_default();
            let media = std::mem::take(&mut entities.media);
            (full_text, entities, media, display_text_range)
        }
        _ => {
            let text = raw
                .full_text
                .or(raw.text)
                .ok_or_else(|| anyhow!("status without text"))?;
            let entities = raw.entities.unwrap_or_default();
            let media = raw.extended_entities.map(|e| e.media).unwrap_or_default();
            (text, entities, media, raw.display_text_range)
        }
    };

    let user = convert_user(raw.user)?;
    let reply_to = raw
        .in_reply_to_user_id_str
        .and_then(|s| s.parse().ok())
        .or(raw.in_reply_to_user_id);
    let replies = reply_targets(
        user.id,
        reply_to,
        &entities.user_mentions,
        text_range.as_deref(),
    );

    let hashtags = entities
        .hashtags
        .iter()
        .filter_map(|h| match h.indices.as_slice() {
            [start, end] if start <= end => Some(HashtagSpan {
                start: *start,
                end: *end,
            }),
            _ => None,
        })
        .collect();

    let urls = entities
        .urls
        .into_iter()
        .filter_map(|u| {
            Some(UrlEntity {
                url: u.url?,
                display_url: u.display_url.unwrap_or_default(),
                expanded_url: u.expanded_url.unwrap_or_default(),
            })
        })
        .collect();

    let media = media
        .into_iter()
        .filter_map(|m| {
            let size = m.sizes.and_then(|s| s.small.or(s.medium));
            Some(MediaEntity {
                url: m.url?,
                display_url: m.display_url.unwrap_or_default(),
                media_url: m.media_url_https.or(m.media_url)?,
                width: size.map(|s| s.w).unwrap_or(0),
                height: size.map(|s| s.h).unwrap_or(0),
            })
        })
        .collect();

    let id = raw
        .id_str
        .or_else(|| raw.id.map(|id| id.to_string()))
        .unwrap_or_default();

    Ok(Tweet {
        id,
        text,
        created_at,
        user,
        source: raw.source.unwrap_or_default(),
        hashtags,
        urls,
        media,
        retweeted_status: raw
            .retweeted_status
            .map(|s| convert_status(*s).map(Box::new))
            .transpose()?,
        quoted_status: raw
            .quoted_status
            .map(|s| convert_status(*s).map(Box::new))
            .transpose()?,
        quoted_status_id: raw.quoted_status_id_str,
        replies,
        retweet_count: raw.retweet_count.unwrap_or(0),
        favorite_count: raw.favorite_count.unwrap_or(0),
    })
}

/// Users a status is addressed to: the reply target plus the mentions
/// placed before the displayed text, without the author.
fn reply_targets(
    author: u64,
    reply_to: Option<u64>,
    mentions: &[RawMention],
    text_range: Option<&[usize]>,
) -> Vec<u64> {
    let text_start = text_range.and_then(|r| r.first().copied()).unwrap_or(0);
    let leading = mentions
        .iter()
        .filter(|m| m.indices.first().is_some_and(|&start| start < text_start))
        .filter_map(|m| {
            m.id_str
                .as_deref()
                .and_then(|s| s.parse().ok())
                .or(m.id)
        });

    let mut targets: Vec<u64> = Vec::new();
    for uid in reply_to.into_iter().chain(leading) {
        if uid != author && !targets.contains(&uid) {
            targets.push(uid);
        }
    }
    targets
}

fn object_time(value: &Value) -> Result<DateTime<Utc>> {
    status_time(
        value.get("timestamp_ms"),
        value.get("created_at").and_then(Value::as_str),
    )
}

/// `timestamp_ms` wins when present (string or number), else `created_at`.
fn status_time(timestamp_ms: Option<&Value>, created_at: Option<&str>) -> Result<DateTime<Utc>> {
    let millis = match timestamp_ms {
        Some(Value::String(s)) => s.parse::<i64>().ok(),
        Some(Value::Number(n)) => n.as_i64(),
        _ => None,
    };
    if let Some(ms) = millis {
        return DateTime::<Utc>::from_timestamp_millis(ms)
            .ok_or_else(|| anyhow!("timestamp_ms out of range: {}", ms));
    }
    let created_at = created_at.ok_or_else(|| anyhow!("object without timestamp"))?;
    parse_twitter_time(created_at)
}

/// Parse `Wed Nov 18 18:54:12 +0000 2009` as UTC.
///
/// The offset field is ignored; every observed value is `+0000`.
pub fn parse_twitter_time(s: &str) -> Result<DateTime<Utc>> {
    let fields: Vec<&str> = s.split_whitespace().collect();
    let [wday, month, mday, time, _offset, year] = fields.as_slice() else {
        return Err(anyhow!("unexpected created_at format: {:?}", s));
    };
    let joined = format!("{} {} {} {} {}", wday, month, mday, time, year);
    let naive = NaiveDateTime::parse_from_str(&joined, "%a %b %d %H:%M:%S %Y")
        .with_context(|| format!("unexpected created_at format: {:?}", s))?;
    Ok(naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn user_json(id: &str, screen: &str) -> Value {
        json!({
            "id_str": id,
            "screen_name": screen,
            "name": format!("{} name", screen),
            "verified": null,
            "protected": false,
            "profile_image_url_https": format!("https://pbs.twimg.com/profile_images/{}/a_normal.jpg", id),
        })
    }

    fn status_json(id: &str, text: &str) -> Value {
        json!({
            "id_str": id,
            "text": text,
            "created_at": "Wed Nov 18 18:54:12 +0000 2009",
            "user": user_json("100", "alice"),
            "source": "<a href=\"http://example.com\">web</a>",
            "retweet_count": 3,
            "favorite_count": 0,
        })
    }

    #[test]
    fn test_parse_twitter_time() {
        let t = parse_twitter_time("Wed Nov 18 18:54:12 +0000 2009").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2009, 11, 18, 18, 54, 12).unwrap());
    }

    #[test]
    fn test_parse_twitter_time_ignores_offset() {
        let t = parse_twitter_time("Wed Nov 18 18:54:12 +0900 2009").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2009, 11, 18, 18, 54, 12).unwrap());
    }

    #[test]
    fn test_parse_twitter_time_rejects_garbage() {
        assert!(parse_twitter_time("yesterday").is_err());
    }

    #[test]
    fn test_timestamp_ms_wins_over_created_at() {
        let mut v = status_json("1", "hi");
        v["timestamp_ms"] = json!("1000");
        let t = parse_status(&v).unwrap();
        assert_eq!(t.created_at, DateTime::<Utc>::from_timestamp(1, 0).unwrap());
    }

    #[test]
    fn test_classify_plain_tweet() {
        let ev = classify(&status_json("1", "hello"));
        match ev {
            StreamEvent::Tweet(t) => {
                assert_eq!(t.id, "1");
                assert_eq!(t.user.id, 100);
                assert_eq!(t.user.screen_name, "alice");
                assert!(!t.user.verified);
                assert_eq!(t.retweet_count, 3);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_classify_retweet_and_quote() {
        let mut rt = status_json("2", "RT @alice: hello");
        rt["retweeted_status"] = status_json("1", "hello");
        assert!(matches!(classify(&rt), StreamEvent::Retweet(_)));

        let mut qt = status_json("3", "look");
        qt["quoted_status"] = status_json("1", "hello");
        qt["quoted_status_id_str"] = json!("1");
        match classify(&qt) {
            StreamEvent::Quote(t) => assert_eq!(t.quoted_status_id.as_deref(), Some("1")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_classify_events() {
        let fav = json!({
            "event": "favorite",
            "created_at": "Wed Nov 18 18:54:12 +0000 2009",
            "source": user_json("5", "bob"),
            "target": user_json("100", "alice"),
            "target_object": status_json("1", "hello"),
        });
        match classify(&fav) {
            StreamEvent::Favorite {
                source,
                target_object,
                ..
            } => {
                assert_eq!(source.screen_name, "bob");
                assert_eq!(target_object.id, "1");
            }
            other => panic!("unexpected {:?}", other),
        }

        let mute = json!({"event": "mute", "target": user_json("9", "carol")});
        assert!(matches!(classify(&mute), StreamEvent::Mute { target } if target.id == 9));

        let unmute = json!({"event": "unmute", "target": user_json("9", "carol")});
        assert!(matches!(classify(&unmute), StreamEvent::Unmute { .. }));

        let follow = json!({
            "event": "follow",
            "created_at": "Wed Nov 18 18:54:12 +0000 2009",
            "source": user_json("5", "bob"),
            "target": user_json("100", "alice"),
        });
        assert!(matches!(classify(&follow), StreamEvent::Follow { .. }));
    }

    #[test]
    fn test_classify_is_total() {
        assert_eq!(classify(&json!({"friends": [1, 2, 3]})), StreamEvent::FriendsList);
        assert_eq!(classify(&json!({"delete": {"status": {}}})), StreamEvent::Unknown);
        assert_eq!(classify(&json!({"event": "list_created"})), StreamEvent::Unknown);
        assert_eq!(classify(&json!([1, 2])), StreamEvent::Unknown);
        assert_eq!(classify(&json!({"text": "no user"})), StreamEvent::Unknown);
    }

    #[test]
    fn test_entities_are_decoded() {
        let mut v = status_json("1", "#tag http://t.co/x");
        v["entities"] = json!({
            "hashtags": [{"text": "tag", "indices": [0, 4]}, {"indices": [1]}],
            "urls": [{"url": "http://t.co/x", "display_url": "example.com", "expanded_url": "http://example.com"}],
        });
        v["extended_entities"] = json!({
            "media": [{
                "url": "http://t.co/m",
                "display_url": "pic.twitter.com/m",
                "media_url": "http://pbs.twimg.com/media/m.jpg",
                "sizes": {"small": {"w": 680, "h": 383}},
            }],
        });
        let t = parse_status(&v).unwrap();
        assert_eq!(t.hashtags, vec![HashtagSpan { start: 0, end: 4 }]);
        assert_eq!(t.urls[0].display_url, "example.com");
        assert_eq!(t.media[0].width, 680);
        assert_eq!(t.media[0].height, 383);
    }

    #[test]
    fn test_extended_tweet_full_text() {
        let mut v = status_json("1", "truncated…");
        v["extended_tweet"] = json!({
            "full_text": "the whole text #x",
            "entities": {
                "hashtags": [{"indices": [15, 17]}],
                "media": [{
                    "url": "http://t.co/m",
                    "display_url": "pic.twitter.com/m",
                    "media_url_https": "https://pbs.twimg.com/media/m.jpg",
                }],
            },
        });
        let t = parse_status(&v).unwrap();
        assert_eq!(t.text, "the whole text #x");
        assert_eq!(t.hashtags.len(), 1);
        assert_eq!(t.media[0].media_url, "https://pbs.twimg.com/media/m.jpg");
    }

    #[test]
    fn test_reply_targets() {
        let mut v = status_json("1", "@bob @alice @carol thanks @dave");
        v["in_reply_to_user_id_str"] = json!("5");
        v["display_text_range"] = json!([19, 31]);
        v["entities"] = json!({
            "user_mentions": [
                {"id_str": "5", "indices": [0, 4]},
                {"id_str": "100", "indices": [5, 11]},
                {"id_str": "7", "indices": [12, 18]},
                {"id_str": "8", "indices": [26, 31]},
            ],
        });
        let t = parse_status(&v).unwrap();
        // author (100) and the mention inside the text (8) are not targets
        assert_eq!(t.replies, vec![5, 7]);
    }

    #[test]
    fn test_no_reply_targets_without_text_range() {
        let mut v = status_json("1", "@bob hi");
        v["in_reply_to_user_id_str"] = json!(null);
        v["entities"] = json!({"user_mentions": [{"id_str": "5", "indices": [0, 4]}]});
        assert!(parse_status(&v).unwrap().replies.is_empty());

        v["in_reply_to_user_id"] = json!(5);
        assert_eq!(parse_status(&v).unwrap().replies, vec![5]);
    }

    #[test]
    fn test_reply_targets_from_extended_tweet() {
        let mut v = status_json("1", "@bob trunc…");
        v["extended_tweet"] = json!({
            "full_text": "@bob the whole reply",
            "display_text_range": [5, 20],
            "entities": {"user_mentions": [{"id": 5, "indices": [0, 4]}]},
        });
        assert_eq!(parse_status(&v).unwrap().replies, vec![5]);
    }
}
