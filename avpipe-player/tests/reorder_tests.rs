//! Display-order reassembly tests
//!
//! Frames are injected in decode order and the loopback manifestor records
//! the order in which they were shown.

mod helpers;

use avpipe_common::policy::{Policy, POLICY_VALUE_APPLY};
use avpipe_player::loopback::LoopbackFrame;
use helpers::{in_order, wait_for_manifested, wait_until, TestPlayback};
use std::time::Duration;

// ================================================================================================
// Reordering
// ================================================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_b_frames_shown_in_display_order() {
    let test = TestPlayback::new();
    let (stream, loopback) = test.add_stream().await;

    test.inject(stream, &[(0, 0), (1, 2), (2, 3), (3, 1)]).await;
    assert!(wait_for_manifested(&loopback, 4).await);

    assert_eq!(loopback.manifestor.manifested_display_indices(), vec![0, 1, 2, 3]);
    let stats = test.player.stream_statistics(stream).unwrap();
    assert_eq!(stats.reordering_failures, 0);
    assert_eq!(stats.frames_manifested, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_display_indices_never_decrease() {
    let test = TestPlayback::new();
    let (stream, loopback) = test.add_stream().await;

    // I P B B P B B ...
    let mut frames = vec![(0, 0)];
    let mut decode = 1;
    for group in 0..6u32 {
        let anchor = 3 * group + 3;
        for display in [anchor, anchor - 2, anchor - 1] {
            frames.push((decode, display));
            decode += 1;
        }
    }
    test.inject(stream, &frames).await;
    test.player.drain_stream(stream, false, None).await.unwrap();

    let shown = loopback.manifestor.manifested_display_indices();
    assert_eq!(shown.len(), frames.len());
    assert!(shown.windows(2).all(|pair| pair[0] <= pair[1]), "{:?}", shown);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_held_frames_released_by_drain() {
    let test = TestPlayback::new();
    let (stream, loopback) = test.add_stream().await;

    // Display index 1 never arrives
    test.inject(stream, &[(0, 0), (1, 2), (2, 3)]).await;
    assert!(wait_for_manifested(&loopback, 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(loopback.manifestor.manifested_display_indices(), vec![0]);

    test.player.drain_stream(stream, false, None).await.unwrap();
    assert_eq!(loopback.manifestor.manifested_display_indices(), vec![0, 2, 3]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disable_reordering_shows_decode_order() {
    let test = TestPlayback::new();
    let (stream, loopback) = test.add_stream().await;
    test.player
        .set_policy(Some(test.playback), Some(stream), Policy::DisableReordering, POLICY_VALUE_APPLY)
        .unwrap();

    test.inject(stream, &[(0, 0), (1, 2), (2, 3), (3, 1)]).await;
    assert!(wait_for_manifested(&loopback, 4).await);

    assert_eq!(loopback.manifestor.manifested_display_indices(), vec![0, 2, 3, 1]);
    assert_eq!(test.player.stream_statistics(stream).unwrap().reordering_failures, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_frames_without_display_index_pass_straight_through() {
    let test = TestPlayback::new();
    let (stream, loopback) = test.add_stream().await;

    let unindexed = LoopbackFrame {
        decode_index: 1,
        ..LoopbackFrame::default()
    };
    test.inject_frames(stream, &[LoopbackFrame::new(0, 0), unindexed, LoopbackFrame::new(2, 1)])
        .await;
    assert!(wait_for_manifested(&loopback, 3).await);

    let shown: Vec<Option<u32>> = loopback
        .manifestor
        .manifested()
        .iter()
        .map(|f| f.display_index)
        .collect();
    assert_eq!(shown, vec![Some(0), None, Some(1)]);
}

// ================================================================================================
// Frames dropped before decode
// ================================================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_frame_leaves_no_hole() {
    let test = TestPlayback::new();
    let (stream, loopback) = test.add_stream().await;
    loopback.output_timer.drop_before_decode(2);

    test.inject(stream, &in_order(5)).await;
    assert!(wait_for_manifested(&loopback, 4).await);

    assert_eq!(loopback.manifestor.manifested_display_indices(), vec![0, 1, 3, 4]);
    let stats = test.player.stream_statistics(stream).unwrap();
    assert_eq!(stats.non_decoded_frames, 1);
    assert_eq!(loopback.codec.frames_decoded(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_collapse_holes_releases_early() {
    let test = TestPlayback::new();
    let (stream, loopback) = test.add_stream().await;

    let mut jump = LoopbackFrame::new(1, 10);
    jump.collapse_holes = true;
    test.inject_frames(stream, &[LoopbackFrame::new(0, 0), jump, LoopbackFrame::new(2, 11)])
        .await;

    assert!(wait_until(Duration::from_secs(2), || loopback.manifestor.manifested().len() == 3).await);
    assert_eq!(loopback.manifestor.manifested_display_indices(), vec![0, 10, 11]);
}

// ================================================================================================
// Sequence numbering through reordering
// ================================================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_manifested_sequence_numbers_do_not_decrease() {
    let test = TestPlayback::new();
    let (stream, loopback) = test.add_stream().await;

    test.inject(stream, &[(0, 0), (1, 2), (2, 1), (3, 4), (4, 3)]).await;
    test.player.drain_stream(stream, false, None).await.unwrap();

    let sequences: Vec<u64> = loopback.manifestor.manifested().iter().map(|f| f.sequence).collect();
    assert_eq!(sequences.len(), 5);
    assert!(sequences.windows(2).all(|pair| pair[0] <= pair[1]), "{:?}", sequences);
}
