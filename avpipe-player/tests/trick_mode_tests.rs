//! Speed, pause, single-step and retime tests

mod helpers;

use avpipe_common::policy::{Policy, POLICY_VALUE_APPLY};
use avpipe_common::PlayDirection;
use avpipe_player::components::PresentationInterval;
use avpipe_player::Error;
use helpers::{in_order, wait_for_manifested, wait_until, TestPlayback};
use std::time::Duration;

// ================================================================================================
// Pause and step
// ================================================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_paused_stream_shows_one_frame_per_step() {
    let test = TestPlayback::new();
    let (stream, loopback) = test.add_stream().await;
    test.player
        .set_playback_speed(test.playback, 0.0, PlayDirection::Forward)
        .unwrap();

    test.inject(stream, &in_order(3)).await;
    assert!(wait_until(Duration::from_secs(2), || loopback.codec.frames_decoded() == 3).await);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(loopback.manifestor.manifested().is_empty());

    test.player.stream_step(stream).unwrap();
    assert!(wait_for_manifested(&loopback, 1).await);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(loopback.manifestor.manifested_display_indices(), vec![0]);

    test.player
        .set_playback_speed(test.playback, 1.0, PlayDirection::Forward)
        .unwrap();
    assert!(wait_for_manifested(&loopback, 3).await);
    assert_eq!(loopback.manifestor.manifested_display_indices(), vec![0, 1, 2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_first_frame_early_while_paused() {
    let test = TestPlayback::new();
    let (stream, loopback) = test.add_stream().await;
    test.player
        .set_policy(Some(test.playback), None, Policy::ManifestFirstFrameEarly, POLICY_VALUE_APPLY)
        .unwrap();
    test.player
        .set_playback_speed(test.playback, 0.0, PlayDirection::Forward)
        .unwrap();

    test.inject(stream, &in_order(2)).await;
    assert!(wait_for_manifested(&loopback, 1).await);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(loopback.manifestor.manifested_display_indices(), vec![0]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_discarding_drain_releases_paused_frames() {
    let test = TestPlayback::new();
    let (stream, loopback) = test.add_stream().await;
    test.player
        .set_playback_speed(test.playback, 0.0, PlayDirection::Forward)
        .unwrap();

    test.inject(stream, &in_order(3)).await;
    assert!(wait_until(Duration::from_secs(2), || loopback.codec.frames_decoded() == 3).await);
    test.player
        .drain_stream_with_policy(stream, false, Policy::PlayoutAlwaysDiscard, false)
        .await
        .unwrap();

    assert!(loopback.manifestor.manifested().is_empty());
}

// ================================================================================================
// Speed changes
// ================================================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_speed_reaches_coordinator() {
    let test = TestPlayback::new();
    let (_stream, _loopback) = test.add_stream().await;

    test.player
        .set_playback_speed(test.playback, 2.0, PlayDirection::Backward)
        .unwrap();
    assert_eq!(test.coordinator.speed(), (2.0, PlayDirection::Backward));
    assert_eq!(
        test.player.playback_speed(test.playback).unwrap(),
        (2.0, PlayDirection::Backward)
    );

    for speed in [-1.0, f64::NAN, f64::INFINITY] {
        let result = test.player.set_playback_speed(test.playback, speed, PlayDirection::Forward);
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_speed_change_retimes_queued_frames() {
    let test = TestPlayback::new();
    let (stream, loopback) = test.add_stream().await;
    loopback.manifestor.set_hold(true);

    test.inject(stream, &in_order(3)).await;
    assert!(wait_until(Duration::from_secs(2), || loopback.manifestor.queued() == 3).await);

    test.player
        .set_playback_speed(test.playback, 2.0, PlayDirection::Forward)
        .unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || {
            test.player.stream_statistics(stream).unwrap().frames_retimed == 3
        })
        .await
    );
    assert_eq!(loopback.manifestor.queued(), 3);

    // New frames wait behind the retimed ones
    test.inject(stream, &[(3, 3)]).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(loopback.manifestor.queued(), 3);

    loopback.manifestor.set_hold(false);
    assert_eq!(loopback.manifestor.present_all().unwrap(), 3);
    assert!(wait_for_manifested(&loopback, 4).await);
    assert_eq!(loopback.manifestor.manifested_display_indices(), vec![0, 1, 2, 3]);
}

// ================================================================================================
// Presentation interval
// ================================================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_frames_outside_interval_not_shown() {
    let test = TestPlayback::new();
    let (stream, loopback) = test.add_stream().await;
    test.player
        .set_presentation_interval(
            test.playback,
            None,
            PresentationInterval {
                start: Some(40_000),
                end: Some(80_000),
            },
        )
        .unwrap();

    test.inject(stream, &in_order(5)).await;
    test.player.drain_stream(stream, false, None).await.unwrap();

    assert_eq!(loopback.manifestor.manifested_display_indices(), vec![1, 2]);
    let stats = test.player.stream_statistics(stream).unwrap();
    assert_eq!(stats.frames_discarded[2], 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stream_interval_overrides_playback() {
    let test = TestPlayback::new();
    let (stream, loopback) = test.add_stream().await;
    test.player
        .set_presentation_interval(
            test.playback,
            None,
            PresentationInterval {
                start: None,
                end: Some(0),
            },
        )
        .unwrap();
    test.player
        .set_presentation_interval(
            test.playback,
            Some(stream),
            PresentationInterval {
                start: Some(120_000),
                end: None,
            },
        )
        .unwrap();

    test.inject(stream, &in_order(5)).await;
    test.player.drain_stream(stream, false, None).await.unwrap();
    assert_eq!(loopback.manifestor.manifested_display_indices(), vec![3, 4]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_last_native_time_follows_manifestation() {
    let test = TestPlayback::new();
    let (stream, loopback) = test.add_stream().await;
    assert_eq!(test.player.last_native_time(test.playback).unwrap(), None);

    test.inject(stream, &in_order(3)).await;
    test.player.drain_stream(stream, false, None).await.unwrap();
    assert_eq!(loopback.manifestor.manifested().len(), 3);
    assert_eq!(test.player.last_native_time(test.playback).unwrap(), Some(80_000));
}
