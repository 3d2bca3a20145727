use super::*;
use crate::test_support::{
    fake_page, fast_retry, seeded_state, with_unread_channel, FakePostSource, SourceCall,
    CURRENT_CHANNEL_ID,
};
use shared::{
    domain::{ChannelId, Timestamp},
    protocol::TransitionKind,
};
use storage::StoreState;

const UNREAD: [&str; 3] = ["unread-a", "unread-b", "unread-c"];

fn coordinator(source: &Arc<FakePostSource>) -> UnreadSweepCoordinator {
    UnreadSweepCoordinator::new(Arc::new(PostSyncEngine::new(source.clone(), fast_retry())))
}

fn three_unread() -> StoreState {
    UNREAD
        .iter()
        .fold(seeded_state(), |state, id| with_unread_channel(state, id))
}

#[tokio::test]
async fn no_unread_channels_means_no_requests() {
    let source = Arc::new(FakePostSource::new());

    let batch = coordinator(&source)
        .sync_all_unread(&StateSnapshot::new(seeded_state()))
        .await;

    assert!(batch.is_empty());
    assert_eq!(batch.label, BatchLabel::LoadUnreadChannelPosts);
    assert!(source.calls().await.is_empty());
}

#[tokio::test]
async fn active_channel_is_not_swept() {
    let source = Arc::new(FakePostSource::new());
    let state = with_unread_channel(seeded_state(), CURRENT_CHANNEL_ID);

    let batch = coordinator(&source)
        .sync_all_unread(&StateSnapshot::new(state))
        .await;

    assert!(batch.is_empty());
    assert!(source.calls().await.is_empty());
}

#[tokio::test]
async fn never_loaded_channels_get_full_fetch() {
    let source = Arc::new(FakePostSource::new());

    let batch = coordinator(&source)
        .sync_all_unread(&StateSnapshot::new(three_unread()))
        .await;

    let mut calls = source.calls().await;
    calls.sort_by_key(|call| format!("{call:?}"));
    assert_eq!(
        calls,
        UNREAD
            .iter()
            .map(|id| SourceCall::Recent(ChannelId::new(*id)))
            .collect::<Vec<_>>()
    );

    assert_eq!(batch.len(), 2 * UNREAD.len() + 1);
    assert_eq!(batch.count(TransitionKind::ReceivedPostsInChannel), 3);
    assert_eq!(batch.count(TransitionKind::ReceivedPostsForChannelAtTime), 3);
    match batch.transitions.last() {
        Some(Transition::ReceivedPosts { page }) => assert_eq!(page.len(), 180),
        other => panic!("unexpected trailing transition: {other:?}"),
    }
}

#[tokio::test]
async fn reconnect_after_last_fetch_syncs_since_epoch() {
    let source = Arc::new(FakePostSource::new());
    let cursor = Timestamp::now();
    let epoch = Timestamp(cursor.0 + 60_000);
    let state = UNREAD
        .iter()
        .fold(three_unread(), |state, id| {
            let channel_id = ChannelId::new(*id);
            state
                .with_posts(channel_id.clone(), fake_page(&channel_id, 2).posts.into_values())
                .with_sync_cursor(channel_id, cursor)
        })
        .with_connection_epoch(epoch);

    let batch = coordinator(&source)
        .sync_all_unread(&StateSnapshot::new(state))
        .await;

    let calls = source.calls().await;
    assert_eq!(calls.len(), 3);
    for id in UNREAD {
        assert!(calls.contains(&SourceCall::Since(ChannelId::new(id), epoch)));
    }
    assert_eq!(batch.len(), 7);
    assert_eq!(batch.count(TransitionKind::ReceivedPostsSince), 3);
    assert_eq!(batch.count(TransitionKind::ReceivedPosts), 1);
}

#[tokio::test]
async fn failing_channel_is_left_out() {
    let source = Arc::new(FakePostSource::new().failing("unread-b", usize::MAX));

    let batch = coordinator(&source)
        .sync_all_unread(&StateSnapshot::new(three_unread()))
        .await;

    assert_eq!(batch.len(), 5);
    let failed = ChannelId::new("unread-b");
    assert!(batch.transitions.iter().all(|transition| match transition {
        Transition::ReceivedPostsInChannel { channel_id, .. }
        | Transition::ReceivedPostsForChannelAtTime { channel_id, .. } => channel_id != &failed,
        _ => true,
    }));
    let retried = source
        .calls()
        .await
        .into_iter()
        .filter(|call| call == &SourceCall::Recent(failed.clone()))
        .count();
    assert_eq!(retried, 3);
}

#[tokio::test]
async fn all_channels_failing_yields_empty_batch() {
    let source = Arc::new(
        UNREAD
            .iter()
            .fold(FakePostSource::new(), |source, id| source.failing(id, usize::MAX)),
    );

    let batch = coordinator(&source)
        .sync_all_unread(&StateSnapshot::new(three_unread()))
        .await;

    assert!(batch.is_empty());
}
