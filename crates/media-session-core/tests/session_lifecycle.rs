//! Stream lifecycle scenarios driven through `MediaSessionCore`

mod common;

use std::sync::Arc;

use common::*;
use media_session_core::config::MediaSessionConfig;
use media_session_core::description::{MediaDescription, PayloadType, StreamDescription};
use media_session_core::device::DeviceArbiter;
use media_session_core::engine::{EngineEvent, IoDescriptor, IoResource};
use media_session_core::error::MediaError;
use media_session_core::ports::PortRange;
use media_session_core::security::EncryptionScheme;
use media_session_core::session::MediaSessionCore;
use media_session_core::types::{CallState, Generation, MediaKind, StreamDirection, StreamState};

#[tokio::test]
async fn test_plain_audio_and_video_both_run() {
    init_tracing();
    let mut h = harness(MediaSessionConfig::default());

    h.session.initialize_streams().await.unwrap();
    h.session
        .start_streams(audio_video_answer(), CallState::StreamsRunning)
        .await
        .unwrap();

    for index in [0, 1] {
        assert_eq!(h.session.stream_state(index), Some(StreamState::Running));
        assert_eq!(h.session.security_context(index).unwrap().scheme, EncryptionScheme::None);
    }
    assert_eq!(h.session.port_config(0).unwrap().rtp_port, 7078);
    assert_eq!(h.session.port_config(1).unwrap().rtp_port, 9078);
    assert_eq!(h.log().count("encrypt"), 0);
    assert!(!h.session.is_encrypted());
    assert_eq!(h.listener.stream_errors(), 0);
}

#[tokio::test]
async fn test_audio_starts_before_video() {
    let mut h = harness(MediaSessionConfig::default());
    // video listed first in the description
    let answer = MediaDescription::new("192.0.2.10")
        .with_stream(video_line(9078))
        .with_stream(audio_line(7078));

    h.session.start_streams(answer, CallState::StreamsRunning).await.unwrap();

    let audio = h.log().position("start:1").unwrap();
    let video = h.log().position("start:0").unwrap();
    assert!(audio < video);
    assert_eq!(h.session.main_stream_index(MediaKind::Audio), Some(1));
    assert_eq!(h.session.main_stream_index(MediaKind::Video), Some(0));
}

#[tokio::test]
async fn test_inactive_video_stops_only_video() {
    let mut h = harness(MediaSessionConfig::default());
    h.session
        .start_streams(audio_video_answer(), CallState::StreamsRunning)
        .await
        .unwrap();
    let audio_ports = h.session.port_config(0).unwrap();

    let update = MediaDescription::new("192.0.2.10")
        .with_stream(audio_line(7078))
        .with_stream(video_line(9078).with_direction(StreamDirection::Inactive));
    h.session.update_streams(update, CallState::StreamsRunning).await.unwrap();

    assert_eq!(h.session.stream_state(0), Some(StreamState::Running));
    assert_eq!(h.session.port_config(0), Some(audio_ports));
    assert_eq!(h.session.stream_state(1), Some(StreamState::Stopped));
    assert!(h.session.port_config(1).is_none());
    assert!(h.session.stream(1).unwrap().ports().is_none());
    assert_eq!(h.log().count("stop:0"), 0);
    assert_eq!(h.log().count("stop:1"), 1);
}

#[tokio::test]
async fn test_random_ports_survive_bind_conflicts() {
    let mut config = MediaSessionConfig::default();
    config.audio.port_range = PortRange::new(40000, 49999);
    config.video.enabled = false;
    let flaky = Arc::new(FlakyPorts::failing(3));
    let factory = Arc::new(MockFactory::default());

    let mut session = MediaSessionCore::builder("call-d")
        .config(config)
        .engine_factory(factory.clone())
        .bind_check(flaky.clone())
        .build()
        .unwrap();
    session.initialize_streams().await.unwrap();

    let ports = session.port_config(0).unwrap();
    assert_eq!(ports.rtp_port % 2, 0);
    assert!((40000..=49999).contains(&ports.rtp_port));
    assert_eq!(ports.rtcp_port, ports.rtp_port + 1);
    assert_eq!(ports.generation, Generation(1));

    let tried = flaky.tried.lock().clone();
    assert_eq!(tried.len(), 5);
    assert_eq!(tried[3], ports.rtp_port);
    assert_eq!(factory.log.count("create"), 1);
}

#[tokio::test]
async fn test_busy_fixed_port_without_fallback_is_fatal_for_audio() {
    let mut config = MediaSessionConfig::default();
    config.video.enabled = false;
    let factory = Arc::new(MockFactory::default());
    *factory.bind_failures.lock() = u32::MAX;
    let mut h = harness_with(config, factory);

    let err = h.session.initialize_streams().await.unwrap_err();
    assert!(err.is_bind_failure());
    assert_eq!(h.session.stream_state(0), Some(StreamState::Failed));
    assert!(h.session.port_config(0).is_none());
}

#[tokio::test]
async fn test_every_line_ends_running_or_failed() {
    let mut h = harness(MediaSessionConfig::default());
    let answer = MediaDescription::new("192.0.2.10")
        .with_stream(audio_line(7078))
        .with_stream(video_line(9078))
        .with_stream(StreamDescription::new(MediaKind::Text, 0))
        .with_stream(
            StreamDescription::new(MediaKind::Video, 9080)
                .with_payload(PayloadType::new(101, "telephone-event", 8000)),
        );

    h.session.start_streams(answer, CallState::StreamsRunning).await.unwrap();

    assert_eq!(h.session.stream_indices(), vec![0, 1, 2, 3]);
    assert_eq!(h.session.stream_state(0), Some(StreamState::Running));
    assert_eq!(h.session.stream_state(1), Some(StreamState::Running));
    // port zero: declined line, nothing started
    assert_eq!(h.session.stream_state(2), Some(StreamState::Unconfigured));
    assert_eq!(h.session.stream_state(3), Some(StreamState::Failed));
    assert!(matches!(
        h.session.stream(3).unwrap().last_error(),
        Some(MediaError::NoUsablePayload { index: 3 })
    ));
    assert_eq!(h.listener.stream_errors(), 1);
}

#[tokio::test]
async fn test_initialize_twice_allocates_once() {
    let mut h = harness(MediaSessionConfig::default());

    h.session.initialize_streams().await.unwrap();
    let first = (h.session.port_config(0), h.session.port_config(1));
    h.session.initialize_streams().await.unwrap();

    assert_eq!(h.session.stream_indices(), vec![0, 1]);
    assert_eq!(h.log().count("create"), 2);
    assert_eq!((h.session.port_config(0), h.session.port_config(1)), first);

    // the bound engines are the ones that start
    h.session
        .start_streams(audio_video_answer(), CallState::StreamsRunning)
        .await
        .unwrap();
    assert_eq!(h.log().count("create"), 2);
    assert_eq!(h.session.generation(0), Some(Generation(1)));
}

#[tokio::test]
async fn test_trivial_update_keeps_ports_and_generations() {
    let mut h = harness(MediaSessionConfig::default());
    h.session
        .start_streams(audio_video_answer(), CallState::StreamsRunning)
        .await
        .unwrap();
    let before = (h.session.port_config(0), h.session.port_config(1));

    let mut update = audio_video_answer();
    update.session_version += 1;
    h.session.update_streams(update, CallState::StreamsRunning).await.unwrap();

    assert_eq!((h.session.port_config(0), h.session.port_config(1)), before);
    assert_eq!(h.log().count("stop"), 0);
    assert_eq!(h.log().count("create"), 2);
    assert_eq!(h.log().count("reconfigure"), 0);
}

#[tokio::test]
async fn test_codec_change_reconfigures_in_place() {
    let mut h = harness(MediaSessionConfig::default());
    h.session
        .start_streams(audio_video_answer(), CallState::StreamsRunning)
        .await
        .unwrap();

    let update = MediaDescription::new("192.0.2.10")
        .with_stream(
            StreamDescription::new(MediaKind::Audio, 7078)
                .with_payload(PayloadType::new(8, "PCMA", 8000))
                .with_payload(pcmu()),
        )
        .with_stream(video_line(9078).with_bandwidth(512));
    h.session.update_streams(update, CallState::StreamsRunning).await.unwrap();

    assert!(h.log().position("reconfigure:0:pt8").is_some());
    assert_eq!(h.log().count("reconfigure:1"), 1);
    assert_eq!(h.session.generation(0), Some(Generation(1)));
    assert_eq!(h.session.generation(1), Some(Generation(1)));
    assert_eq!(h.session.stream(0).unwrap().params().unwrap().payload_type, 8);
}

#[tokio::test]
async fn test_address_change_restarts_on_new_generation() {
    let mut h = harness(MediaSessionConfig::default());
    h.session
        .start_streams(audio_video_answer(), CallState::StreamsRunning)
        .await
        .unwrap();

    let update = MediaDescription::new("192.0.2.10")
        .with_stream(audio_line(7078).with_address("198.51.100.7"))
        .with_stream(video_line(9078));
    h.session.update_streams(update, CallState::StreamsRunning).await.unwrap();

    assert_eq!(h.session.stream_state(0), Some(StreamState::Running));
    assert_eq!(h.session.generation(0), Some(Generation(2)));
    assert_eq!(h.session.generation(1), Some(Generation(1)));
    assert_eq!(h.session.start_count(MediaKind::Audio), 2);
    assert_eq!(h.session.start_count(MediaKind::Video), 1);

    let stop = h.log().position("stop:0").unwrap();
    let recreate = h.log().position("create:0:7078:g2").unwrap();
    assert!(stop < recreate);
}

#[tokio::test]
async fn test_removed_line_is_dropped() {
    let mut h = harness(MediaSessionConfig::default());
    h.session
        .start_streams(audio_video_answer(), CallState::StreamsRunning)
        .await
        .unwrap();

    let update = MediaDescription::new("192.0.2.10").with_stream(audio_line(7078));
    h.session.update_streams(update, CallState::StreamsRunning).await.unwrap();

    assert_eq!(h.session.stream_indices(), vec![0]);
    assert!(h.session.port_config(1).is_none());
    assert_eq!(h.log().count("stop:1"), 1);
}

#[tokio::test]
async fn test_failed_video_leaves_audio_running() {
    let factory = Arc::new(MockFactory::default());
    factory.fail_start.lock().push(MediaKind::Video);
    let mut h = harness_with(MediaSessionConfig::default(), factory);

    h.session
        .start_streams(audio_video_answer(), CallState::StreamsRunning)
        .await
        .unwrap();

    assert_eq!(h.session.stream_state(0), Some(StreamState::Running));
    assert_eq!(h.session.stream_state(1), Some(StreamState::Failed));
    assert!(h.session.port_config(1).is_none());
    assert_eq!(h.listener.stream_errors(), 1);
}

#[tokio::test]
async fn test_failed_main_audio_is_fatal() {
    let factory = Arc::new(MockFactory::default());
    factory.fail_start.lock().push(MediaKind::Audio);
    let mut h = harness_with(MediaSessionConfig::default(), factory);

    let err = h
        .session
        .start_streams(audio_video_answer(), CallState::StreamsRunning)
        .await
        .unwrap_err();

    assert!(matches!(err, MediaError::MainStreamFailed { index: 0, .. }));
    // siblings were still started
    assert_eq!(h.session.stream_state(1), Some(StreamState::Running));
}

#[tokio::test]
async fn test_only_stream_failing_is_fatal() {
    let factory = Arc::new(MockFactory::default());
    factory.fail_start.lock().push(MediaKind::Video);
    let mut h = harness_with(MediaSessionConfig::default(), factory);

    let answer = MediaDescription::new("192.0.2.10").with_stream(video_line(9078));
    let err = h
        .session
        .start_streams(answer, CallState::StreamsRunning)
        .await
        .unwrap_err();
    assert!(matches!(err, MediaError::MainStreamFailed { index: 0, .. }));
}

#[tokio::test]
async fn test_pause_releases_devices_and_resume_claims_them() {
    let mut h = harness(MediaSessionConfig::default());
    h.session
        .start_streams(audio_video_answer(), CallState::StreamsRunning)
        .await
        .unwrap();
    assert!(h.session.holds_sound_devices());
    assert!(h.log().io.lock()[&0].uses_soundcard());
    assert_eq!(h.listener.take(), vec![Notification::SoundNeeded]);

    h.session.pause().await.unwrap();
    assert_eq!(h.session.stream_state(0), Some(StreamState::Paused));
    assert_eq!(h.session.stream_state(1), Some(StreamState::Paused));
    assert_eq!(h.log().io.lock()[&0], IoDescriptor::disabled());
    assert!(!h.session.holds_sound_devices());
    assert_eq!(h.listener.take(), vec![Notification::SoundReleased]);

    h.session.resumed().await.unwrap();
    assert_eq!(h.session.stream_state(0), Some(StreamState::Running));
    assert_eq!(h.session.stream_state(1), Some(StreamState::Running));
    assert!(h.log().io.lock()[&0].uses_soundcard());
    assert_eq!(h.listener.take(), vec![Notification::SoundNeeded]);
    // hold never restarts the transport
    assert_eq!(h.session.generation(0), Some(Generation(1)));
}

#[tokio::test]
async fn test_hold_file_plays_on_hold_but_not_for_transfer() {
    let mut config = MediaSessionConfig::default();
    config.sound.hold_file = Some("/usr/share/sounds/hold.wav".into());
    config.sound.keep_hold_file_playing = true;
    let mut h = harness(config);
    h.session
        .start_streams(audio_video_answer(), CallState::StreamsRunning)
        .await
        .unwrap();

    h.session.pause().await.unwrap();
    assert_eq!(
        h.log().io.lock()[&0].input,
        IoResource::File(Some("/usr/share/sounds/hold.wav".into()))
    );

    h.session.resumed().await.unwrap();
    h.session.pause_for_transfer().await.unwrap();
    assert_eq!(h.log().io.lock()[&0], IoDescriptor::disabled());
}

#[tokio::test]
async fn test_busy_sound_devices_fall_back_to_files() {
    let arbiter = DeviceArbiter::new();
    assert!(arbiter.acquire("call-0", true, true));

    let factory = Arc::new(MockFactory::default());
    let listener = Arc::new(RecordingListener::default());
    let mut session = MediaSessionCore::builder("call-1")
        .engine_factory(factory.clone())
        .listener(listener.clone())
        .device_arbiter(arbiter.clone())
        .bind_check(Arc::new(OpenPorts))
        .build()
        .unwrap();

    session
        .start_streams(audio_video_answer(), CallState::StreamsRunning)
        .await
        .unwrap();

    let io = factory.log.io.lock()[&0].clone();
    assert_eq!(io, IoDescriptor::new(IoResource::File(None), IoResource::File(None)));
    assert!(!session.holds_sound_devices());
    assert!(!listener.contains(&Notification::SoundNeeded));
    assert!(arbiter.holds_any("call-0"));
}

#[tokio::test]
async fn test_dropped_session_gives_devices_back() {
    let arbiter = DeviceArbiter::new();
    let mut session = MediaSessionCore::builder("call-1")
        .engine_factory(Arc::new(MockFactory::default()))
        .device_arbiter(arbiter.clone())
        .bind_check(Arc::new(OpenPorts))
        .build()
        .unwrap();
    session
        .start_streams(audio_video_answer(), CallState::StreamsRunning)
        .await
        .unwrap();
    assert!(session.holds_sound_devices());
    assert!(!arbiter.is_available("call-2", true, true));

    // error path: the call is abandoned without terminate
    drop(session);

    assert!(!arbiter.holds_any("call-1"));
    assert!(arbiter.is_available("call-2", true, true));
    assert!(arbiter.acquire("call-2", true, true));
}

#[tokio::test]
async fn test_remote_hold_restarts_with_new_direction() {
    let mut h = harness(MediaSessionConfig::default());
    h.session
        .start_streams(audio_video_answer(), CallState::StreamsRunning)
        .await
        .unwrap();

    let held = MediaDescription::new("192.0.2.10")
        .with_stream(audio_line(7078).with_direction(StreamDirection::RecvOnly))
        .with_stream(video_line(9078).with_direction(StreamDirection::RecvOnly));
    h.session.paused_by_remote(held).await.unwrap();

    assert_eq!(h.session.call_state(), Some(CallState::PausedByRemote));
    assert_eq!(h.session.stream(0).unwrap().direction(), StreamDirection::RecvOnly);
    assert_eq!(h.log().io.lock()[&0].input, IoResource::Disabled);

    h.session.resume(audio_video_answer()).await.unwrap();
    assert_eq!(h.session.call_state(), Some(CallState::StreamsRunning));
    assert_eq!(h.session.stream(0).unwrap().direction(), StreamDirection::SendRecv);
}

#[tokio::test]
async fn test_echo_canceller_state_carries_over_restart() {
    let mut h = harness(MediaSessionConfig::default());
    h.session
        .start_streams(audio_video_answer(), CallState::StreamsRunning)
        .await
        .unwrap();
    assert_eq!(h.log().processing.lock()[&0].echo_canceller_state, None);

    let update = MediaDescription::new("192.0.2.10")
        .with_stream(audio_line(7080))
        .with_stream(video_line(9078));
    h.session.update_streams(update, CallState::StreamsRunning).await.unwrap();

    assert_eq!(h.session.echo_canceller_state(), Some("ec-state-1"));
    assert_eq!(
        h.log().processing.lock()[&0].echo_canceller_state.as_deref(),
        Some("ec-state-1")
    );
}

#[tokio::test]
async fn test_microphone_mute_reaches_audio_engines() {
    let mut h = harness(MediaSessionConfig::default());
    h.session.set_microphone_muted(true);
    h.session
        .start_streams(audio_video_answer(), CallState::StreamsRunning)
        .await
        .unwrap();
    assert_eq!(h.log().muted.lock().get(&0), Some(&true));
    assert_eq!(h.log().muted.lock().get(&1), None);

    h.session.set_microphone_muted(false);
    assert_eq!(h.log().muted.lock().get(&0), Some(&false));
}

#[tokio::test]
async fn test_ice_gathering_binds_then_releases_idle_streams() {
    let mut h = harness(MediaSessionConfig::default());

    h.session.prepare_for_ice_gathering(false).await.unwrap();
    assert!(h.session.port_config(0).is_some());
    assert!(h.session.port_config(1).is_none());

    h.session.stop_streams_for_ice_gathering().await;
    assert!(h.session.port_config(0).is_none());
    assert_eq!(h.session.stream_state(0), Some(StreamState::Stopped));

    // a later start binds again on the next generation
    h.session
        .start_streams(audio_video_answer(), CallState::StreamsRunning)
        .await
        .unwrap();
    assert_eq!(h.session.stream_state(0), Some(StreamState::Running));
    assert_eq!(h.session.generation(0), Some(Generation(2)));
}

#[tokio::test]
async fn test_terminate_releases_everything_once() {
    let mut h = harness(MediaSessionConfig::default());
    h.session
        .start_streams(audio_video_answer(), CallState::StreamsRunning)
        .await
        .unwrap();
    h.listener.take();

    h.session.terminate().await;
    assert!(h.session.is_terminated());
    assert!(h.session.stream_indices().is_empty());
    assert!(h.session.port_config(0).is_none());
    assert!(h.session.descriptions().result().is_none());
    assert_eq!(h.session.call_state(), Some(CallState::End));
    assert_eq!(h.log().count("stop"), 2);
    assert_eq!(h.listener.take(), vec![Notification::SoundReleased]);

    h.session.terminate().await;
    assert_eq!(h.log().count("stop"), 2);
    assert!(h.listener.take().is_empty());

    let err = h
        .session
        .start_streams(audio_video_answer(), CallState::StreamsRunning)
        .await
        .unwrap_err();
    assert!(matches!(err, MediaError::InvalidState { .. }));
}

#[tokio::test]
async fn test_statistics_come_from_main_stream() {
    let mut h = harness(MediaSessionConfig::default());
    assert!(h.session.statistics(MediaKind::Audio).is_none());

    h.session
        .start_streams(audio_video_answer(), CallState::StreamsRunning)
        .await
        .unwrap();
    let stats = h.session.statistics(MediaKind::Audio).unwrap();
    assert_eq!(stats.packets_sent, 50);
    assert!(h.session.statistics(MediaKind::Text).is_none());
}

#[tokio::test]
async fn test_accept_moves_early_media_off_ringback() {
    let mut h = harness(MediaSessionConfig::default());
    *h.listener.ringback.lock() = true;
    h.session
        .start_streams(audio_video_answer(), CallState::EarlyMedia)
        .await
        .unwrap();
    assert_eq!(h.log().io.lock()[&0].input, IoResource::File(None));

    *h.listener.ringback.lock() = false;
    h.session.accept(audio_video_answer()).await.unwrap();

    assert_eq!(h.session.call_state(), Some(CallState::StreamsRunning));
    assert_eq!(h.log().count("set_io:0"), 1);
    assert_eq!(h.log().count("set_io:1"), 0);
    assert!(h.log().io.lock()[&0].input.is_soundcard());
    assert_eq!(h.session.generation(0), Some(Generation(1)));
}

#[tokio::test]
async fn test_process_next_event_waits_for_engines() {
    let mut h = harness(MediaSessionConfig::default());
    h.session
        .start_streams(audio_video_answer(), CallState::StreamsRunning)
        .await
        .unwrap();

    h.log().emit(0, EngineEvent::TelephoneEvent { code: 11 });
    assert!(h.session.process_next_event().await);
    assert!(h.listener.contains(&Notification::Dtmf(0, '#')));
}
