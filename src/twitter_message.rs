use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct User {
    pub id: u64,
    pub screen_name: String,
    pub name: String,
    pub verified: bool,
    pub protected: bool,
    pub avatar_url: Option<String>,
}

/// Hashtag span in character offsets over the original text, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashtagSpan {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlEntity {
    pub url: String,
    pub display_url: String,
    pub expanded_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaEntity {
    pub url: String,
    pub display_url: String,
    pub media_url: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tweet {
    pub id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub user: User,
    /// Client tag as delivered, usually wrapped in an `<a>` element.
    pub source: String,
    pub hashtags: Vec<HashtagSpan>,
    pub urls: Vec<UrlEntity>,
    pub media: Vec<MediaEntity>,
    pub retweeted_status: Option<Box<Tweet>>,
    pub quoted_status: Option<Box<Tweet>>,
    pub quoted_status_id: Option<String>,
    /// Users this status is addressed to (reply target and leading
    /// mentions), excluding the author.
    pub replies: Vec<u64>,
    pub retweet_count: u64,
    pub favorite_count: u64,
}

impl Tweet {
    /// The status actually shown: the retweet target if any, else this one.
    pub fn effective(&self) -> &Tweet {
        self.retweeted_status.as_deref().unwrap_or(self)
    }

    pub fn is_retweet(&self) -> bool {
        self.retweeted_status.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Tweet(Tweet),
    /// Outer status whose `retweeted_status` is set.
    Retweet(Tweet),
    /// Status whose `quoted_status` is set.
    Quote(Tweet),
    Follow {
        source: User,
        target: User,
        created_at: DateTime<Utc>,
    },
    Favorite {
        source: User,
        target_object: Box<Tweet>,
        created_at: DateTime<Utc>,
    },
    Mute {
        target: User,
    },
    Unmute {
        target: User,
    },
    FriendsList,
    Unknown,
}
