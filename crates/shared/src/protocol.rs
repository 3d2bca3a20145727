use serde::{Deserialize, Serialize};

use crate::domain::{Channel, ChannelId, ChannelMembership, PostPage, TeamId, Timestamp};

/// A typed state change accepted by the local state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Transition {
    SelectChannel {
        channel_id: ChannelId,
        channel: Channel,
        member: ChannelMembership,
        team_id: TeamId,
    },
    ReceivedChannel {
        channel: Channel,
    },
    /// A full page for the channel; `recent` marks it as the newest (head) page.
    ReceivedPostsInChannel {
        channel_id: ChannelId,
        page: PostPage,
        recent: bool,
    },
    ReceivedPostsSince {
        channel_id: ChannelId,
        page: PostPage,
    },
    ReceivedPostsBefore {
        channel_id: ChannelId,
        page: PostPage,
    },
    ReceivedPostsForChannelAtTime {
        channel_id: ChannelId,
        time: Timestamp,
    },
    /// Posts for the global post cache, possibly spanning many channels.
    ReceivedPosts {
        page: PostPage,
    },
    MarkChannelViewed {
        channel_id: ChannelId,
        at: Timestamp,
    },
    MarkChannelRead {
        channel_id: ChannelId,
    },
    ConnectionReestablished {
        at: Timestamp,
    },
}

impl Transition {
    pub fn kind(&self) -> TransitionKind {
        match self {
            Self::SelectChannel { .. } => TransitionKind::SelectChannel,
            Self::ReceivedChannel { .. } => TransitionKind::ReceivedChannel,
            Self::ReceivedPostsInChannel { .. } => TransitionKind::ReceivedPostsInChannel,
            Self::ReceivedPostsSince { .. } => TransitionKind::ReceivedPostsSince,
            Self::ReceivedPostsBefore { .. } => TransitionKind::ReceivedPostsBefore,
            Self::ReceivedPostsForChannelAtTime { .. } => {
                TransitionKind::ReceivedPostsForChannelAtTime
            }
            Self::ReceivedPosts { .. } => TransitionKind::ReceivedPosts,
            Self::MarkChannelViewed { .. } => TransitionKind::MarkChannelViewed,
            Self::MarkChannelRead { .. } => TransitionKind::MarkChannelRead,
            Self::ConnectionReestablished { .. } => TransitionKind::ConnectionReestablished,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionKind {
    SelectChannel,
    ReceivedChannel,
    ReceivedPostsInChannel,
    ReceivedPostsSince,
    ReceivedPostsBefore,
    ReceivedPostsForChannelAtTime,
    ReceivedPosts,
    MarkChannelViewed,
    MarkChannelRead,
    ConnectionReestablished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchLabel {
    SwitchChannel,
    ReceiveChannel,
    LoadPostsInChannel,
    LoadOlderPosts,
    LoadUnreadChannelPosts,
    MarkViewed,
    MarkRead,
    Reconnect,
}

/// An ordered group of transitions the store applies as one indivisible update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionBatch {
    pub label: BatchLabel,
    pub transitions: Vec<Transition>,
}

impl TransitionBatch {
    pub fn new(label: BatchLabel) -> Self {
        Self {
            label,
            transitions: Vec::new(),
        }
    }

    pub fn single(label: BatchLabel, transition: Transition) -> Self {
        Self {
            label,
            transitions: vec![transition],
        }
    }

    pub fn push(&mut self, transition: Transition) {
        self.transitions.push(transition);
    }

    pub fn extend(&mut self, transitions: impl IntoIterator<Item = Transition>) {
        self.transitions.extend(transitions);
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn count(&self, kind: TransitionKind) -> usize {
        self.transitions
            .iter()
            .filter(|transition| transition.kind() == kind)
            .count()
    }

    pub fn find(&self, kind: TransitionKind) -> Option<&Transition> {
        self.transitions
            .iter()
            .find(|transition| transition.kind() == kind)
    }
}
