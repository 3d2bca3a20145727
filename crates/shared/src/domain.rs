use std::{collections::HashMap, fmt};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(TeamId);
id_newtype!(ChannelId);
id_newtype!(PostId);

/// Milliseconds since the Unix epoch, the resolution the message store uses for `create_at`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    pub fn as_millis(self) -> i64 {
        self.0
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.0).single()
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value.timestamp_millis())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub team_id: TeamId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub total_msg_count: u64,
    /// Non-zero once the channel has been archived.
    #[serde(default)]
    pub delete_at: Timestamp,
}

impl Channel {
    pub fn is_archived(&self) -> bool {
        self.delete_at.0 != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMembership {
    pub channel_id: ChannelId,
    pub user_id: UserId,
    #[serde(default)]
    pub mention_count: u64,
    #[serde(default)]
    pub msg_count: u64,
    #[serde(default)]
    pub last_viewed_at: Timestamp,
}

impl ChannelMembership {
    /// Membership stand-in used when the store has no record for the pair.
    pub fn empty(channel_id: ChannelId, user_id: UserId) -> Self {
        Self {
            channel_id,
            user_id,
            mention_count: 0,
            msg_count: 0,
            last_viewed_at: Timestamp::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub channel_id: ChannelId,
    pub create_at: Timestamp,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub message: String,
}

/// One page of posts as returned by the message store: ids in display order plus the bodies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostPage {
    #[serde(default)]
    pub order: Vec<PostId>,
    #[serde(default)]
    pub posts: HashMap<PostId, Post>,
}

impl PostPage {
    pub fn from_posts(posts: impl IntoIterator<Item = Post>) -> Self {
        let mut page = Self::default();
        for post in posts {
            page.push(post);
        }
        page
    }

    pub fn push(&mut self, post: Post) {
        if !self.posts.contains_key(&post.id) {
            self.order.push(post.id.clone());
        }
        self.posts.insert(post.id.clone(), post);
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn max_create_at(&self) -> Option<Timestamp> {
        self.posts.values().map(|post| post.create_at).max()
    }

    /// Union with `other`; ids already present keep their position in `order`.
    pub fn merge(&mut self, other: &PostPage) {
        for id in &other.order {
            if let Some(post) = other.posts.get(id) {
                self.push(post.clone());
            }
        }
        for (id, post) in &other.posts {
            if !self.posts.contains_key(id) {
                self.push(post.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(id: &str, create_at: i64) -> Post {
        Post {
            id: PostId::new(id),
            channel_id: ChannelId::new("channel-id"),
            create_at: Timestamp(create_at),
            user_id: None,
            message: String::new(),
        }
    }

    #[test]
    fn merge_deduplicates_post_ids() {
        let mut page = PostPage::from_posts([post("a", 1), post("b", 2)]);
        page.merge(&PostPage::from_posts([post("b", 2), post("c", 3)]));

        assert_eq!(page.len(), 3);
        assert_eq!(
            page.order,
            vec![PostId::new("a"), PostId::new("b"), PostId::new("c")]
        );
        assert_eq!(page.max_create_at(), Some(Timestamp(3)));
    }

    #[test]
    fn empty_membership_has_zero_counts() {
        let member = ChannelMembership::empty("channel-id".into(), "current-user-id".into());
        assert_eq!(member.mention_count, 0);
        assert_eq!(member.msg_count, 0);
        assert_eq!(member.last_viewed_at, Timestamp(0));
    }

    #[test]
    fn timestamp_converts_from_datetime() {
        let at: DateTime<Utc> = "2024-01-01T00:00:00Z".parse().expect("timestamp");
        let ts = Timestamp::from(at);
        assert_eq!(ts.to_datetime(), Some(at));
    }
}
