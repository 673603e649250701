//! Stream switch tests: collaborator replacement behind a drain marker

mod helpers;

use avpipe_common::events::EventCode;
use avpipe_common::policy::{Policy, POLICY_VALUE_PLAYOUT};
use avpipe_common::PlayDirection;
use avpipe_player::components::SwitchComponents;
use avpipe_player::loopback::{LoopbackCodec, LoopbackFrameParser, LoopbackOutputTimer};
use avpipe_player::Error;
use helpers::{in_order, wait_for_manifested, wait_until, TestPlayback};
use std::sync::Arc;
use std::time::Duration;

// ================================================================================================
// Completed switches
// ================================================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_switch_replaces_codec_and_parser() {
    let test = TestPlayback::new();
    let (stream, loopback) = test.add_stream().await;
    test.player
        .set_policy(Some(test.playback), Some(stream), Policy::PlayoutOnSwitch, POLICY_VALUE_PLAYOUT)
        .unwrap();

    test.inject(stream, &in_order(3)).await;

    let parser = Arc::new(LoopbackFrameParser::new());
    let codec = Arc::new(LoopbackCodec::new(loopback.manifestor.pool(), 0));
    let targets = SwitchComponents {
        frame_parser: Some(parser.clone()),
        codec: Some(codec.clone()),
        output_timer: None,
    };
    test.player.switch_stream(stream, targets, false, None).await.unwrap();

    assert_eq!(loopback.manifestor.manifested_display_indices(), vec![0, 1, 2]);
    assert!(loopback.codec.is_halted());
    assert!(loopback.frame_parser.is_halted());
    assert_eq!(loopback.codec.reference_releases(), 1);

    test.inject(stream, &[(3, 3), (4, 4)]).await;
    assert!(wait_for_manifested(&loopback, 5).await);
    assert_eq!(parser.frames_parsed(), 2);
    assert_eq!(codec.frames_decoded(), 2);
    assert_eq!(loopback.codec.frames_decoded(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_switch_output_timer_registers_coordinator() {
    let test = TestPlayback::new();
    let (stream, loopback) = test.add_stream().await;

    let timer = Arc::new(LoopbackOutputTimer::new());
    let targets = SwitchComponents {
        output_timer: Some(timer.clone()),
        ..SwitchComponents::default()
    };
    test.player.switch_stream(stream, targets, false, Some(21)).await.unwrap();

    assert!(timer.has_coordinator());
    assert!(loopback.output_timer.is_halted());
    let record = tokio::time::timeout(
        Duration::from_secs(2),
        test.player
            .get_event_record(Some(test.playback), Some(stream), EventCode::StreamSwitched.mask(), false),
    )
    .await
    .expect("switch event")
    .unwrap();
    assert_eq!(record.user_data, 21);

    test.inject(stream, &in_order(2)).await;
    assert!(wait_for_manifested(&loopback, 2).await);
    assert_eq!(timer.timings_generated(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_discarding_switch_drops_queued_frames() {
    let test = TestPlayback::new();
    let (stream, loopback) = test.add_stream().await;
    loopback.manifestor.set_hold(true);

    test.inject(stream, &in_order(4)).await;
    assert!(wait_until(Duration::from_secs(2), || loopback.manifestor.queued() == 4).await);

    // PlayoutOnSwitch defaults to discard
    let codec = Arc::new(LoopbackCodec::new(loopback.manifestor.pool(), 0));
    let targets = SwitchComponents {
        codec: Some(codec.clone()),
        ..SwitchComponents::default()
    };
    test.player.switch_stream(stream, targets, false, None).await.unwrap();

    assert_eq!(loopback.manifestor.queued(), 0);
    assert!(loopback.manifestor.manifested().is_empty());

    loopback.manifestor.set_hold(false);
    test.inject(stream, &[(4, 4)]).await;
    assert!(wait_for_manifested(&loopback, 1).await);
    assert_eq!(codec.frames_decoded(), 1);
}

// ================================================================================================
// Concurrent switches
// ================================================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_switch_is_busy() {
    let test = TestPlayback::new();
    let (stream, loopback) = test.add_stream().await;
    test.player
        .set_policy(Some(test.playback), Some(stream), Policy::PlayoutOnSwitch, POLICY_VALUE_PLAYOUT)
        .unwrap();

    // Paused with a frame waiting, so the marker cannot pass Decode→Manifest
    test.player
        .set_playback_speed(test.playback, 0.0, PlayDirection::Forward)
        .unwrap();
    test.inject(stream, &in_order(1)).await;
    assert!(wait_until(Duration::from_secs(2), || loopback.codec.frames_decoded() == 1).await);

    let first = SwitchComponents {
        output_timer: Some(Arc::new(LoopbackOutputTimer::new())),
        ..SwitchComponents::default()
    };
    test.player.switch_stream(stream, first, true, Some(1)).await.unwrap();

    let second = SwitchComponents {
        output_timer: Some(Arc::new(LoopbackOutputTimer::new())),
        ..SwitchComponents::default()
    };
    let result = test.player.switch_stream(stream, second, true, Some(2)).await;
    assert!(matches!(result, Err(Error::Busy(_))));

    test.player
        .set_playback_speed(test.playback, 1.0, PlayDirection::Forward)
        .unwrap();
    let record = tokio::time::timeout(
        Duration::from_secs(2),
        test.player
            .get_event_record(None, Some(stream), EventCode::StreamSwitched.mask(), false),
    )
    .await
    .expect("switch completes")
    .unwrap();
    assert_eq!(record.user_data, 1);
    assert_eq!(loopback.manifestor.manifested_display_indices(), vec![0]);

    // A new switch is accepted once the first has finished
    test.player
        .switch_stream(stream, SwitchComponents::default(), false, None)
        .await
        .unwrap();
}
