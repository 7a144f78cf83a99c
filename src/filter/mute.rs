use crate::twitter_message::{Tweet, User};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Users whose statuses are dropped before rendering.
#[derive(Debug, Clone, Default)]
pub struct MuteSet {
    users: HashMap<u64, String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MuteFile {
    List(Vec<MuteEntry>),
    Map(HashMap<String, String>),
}

#[derive(Debug, Deserialize)]
struct MuteEntry {
    id: u64,
    #[serde(default)]
    name: String,
}

impl MuteSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the initial set. A missing file is an empty set.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading mute list {}", path.display()))?;
        if text.trim().is_empty() {
            return Ok(Self::new());
        }
        let file: MuteFile = serde_json::from_str(&text)
            .with_context(|| format!("parsing mute list {}", path.display()))?;

        let users = match file {
            MuteFile::List(entries) => entries.into_iter().map(|e| (e.id, e.name)).collect(),
            MuteFile::Map(map) => map
                .into_iter()
                .filter_map(|(id, name)| id.parse().ok().map(|id| (id, name)))
                .collect(),
        };
        Ok(Self { users })
    }

    pub fn insert(&mut self, user: &User) {
        self.users.insert(user.id, user.name.clone());
    }

    pub fn remove(&mut self, user_id: u64) -> Option<String> {
        self.users.remove(&user_id)
    }

    pub fn contains(&self, user_id: u64) -> bool {
        self.users.contains_key(&user_id)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// True when a muted user wrote the status or is one it replies to,
    /// checked again for the retweeted status.
    pub fn hides(&self, status: &Tweet) -> bool {
        self.hides_one(status)
            || status
                .retweeted_status
                .as_ref()
                .is_some_and(|rt| self.hides_one(rt))
    }

    fn hides_one(&self, status: &Tweet) -> bool {
        self.contains(status.user.id) || status.replies.iter().any(|&uid| self.contains(uid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::io::Write;

    fn user(id: u64) -> User {
        User {
            id,
            name: format!("user{}", id),
            ..User::default()
        }
    }

    fn status(uid: u64, replies: Vec<u64>) -> Tweet {
        Tweet {
            id: "1".to_string(),
            text: "hello".to_string(),
            created_at: Utc::now(),
            user: user(uid),
            source: String::new(),
            hashtags: Vec::new(),
            urls: Vec::new(),
            media: Vec::new(),
            retweeted_status: None,
            quoted_status: None,
            quoted_status_id: None,
            replies,
            retweet_count: 0,
            favorite_count: 0,
        }
    }

    #[test]
    fn test_hides_author_and_reply_targets() {
        let mut set = MuteSet::new();
        set.insert(&user(7));
        assert!(set.hides(&status(7, Vec::new())));
        assert!(set.hides(&status(1, vec![3, 7])));
        assert!(!set.hides(&status(1, vec![3])));
    }

    #[test]
    fn test_hides_retweet_of_reply_to_muted() {
        let mut set = MuteSet::new();
        set.insert(&user(7));
        let mut rt = status(1, Vec::new());
        rt.retweeted_status = Some(Box::new(status(2, vec![7])));
        assert!(set.hides(&rt));

        rt.retweeted_status = Some(Box::new(status(7, Vec::new())));
        assert!(set.hides(&rt));

        rt.retweeted_status = Some(Box::new(status(2, vec![3])));
        assert!(!set.hides(&rt));
    }

    #[test]
    fn test_insert_remove() {
        let mut set = MuteSet::new();
        set.insert(&user(7));
        assert!(set.contains(7));
        assert_eq!(set.remove(7), Some("user7".to_string()));
        assert!(!set.contains(7));
        assert!(set.is_empty());
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let set = MuteSet::load(&dir.path().join("none.json")).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_load_list_and_map_forms() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"[{{"id": 1, "name": "a"}}, {{"id": 2}}]"#).unwrap();
        let set = MuteSet::load(f.path()).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains(2));

        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{"3": "c", "bogus": "x"}}"#).unwrap();
        let set = MuteSet::load(f.path()).unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.contains(3));
    }

    #[test]
    fn test_load_broken_file_is_error() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "not json").unwrap();
        assert!(MuteSet::load(f.path()).is_err());
    }
}
