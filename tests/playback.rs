use myy_playback::core::{Bitmap, PlayerConfig, PlayerEvent, TransportState};
use myy_playback::player::synthetic::frame_index;
use myy_playback::player::{
    DisplayPoller, DisplaySurface, PlaybackManager, SyntheticBackend, SyntheticMedia,
    VirtualAudioDevice,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const CLIP: &str = "clip.mp4";

fn manager(media: SyntheticMedia, device: VirtualAudioDevice) -> PlaybackManager {
    let config = PlayerConfig {
        latency_offset: 0.0,
        ..small_surface()
    };
    manager_with_config(config, media, device)
}

fn small_surface() -> PlayerConfig {
    PlayerConfig {
        surface_width: 64,
        surface_height: 36,
        ..PlayerConfig::default()
    }
}

fn manager_with_config(
    config: PlayerConfig,
    media: SyntheticMedia,
    device: VirtualAudioDevice,
) -> PlaybackManager {
    let _ = env_logger::builder().is_test(true).try_init();
    let backend = SyntheticBackend::new().with_media(CLIP, media);
    PlaybackManager::new(config, Arc::new(backend), Arc::new(device))
}

/// 关键帧间隔 4s，每帧解码 5ms：seek 需要先解码几十个包才能到达目标
fn long_gop_media() -> SyntheticMedia {
    let mut media = SyntheticMedia::new(60.0, 30.0);
    media.gop = 120;
    media.decode_cost = Duration::from_millis(5);
    media
}

fn first_presented(
    poller: &DisplayPoller,
    surface: &mut RecordingSurface,
) -> Option<f64> {
    let mut first = None;
    wait_for(Duration::from_secs(3), || {
        first = poller.poll(surface);
        first.is_some()
    });
    first
}

fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[derive(Default)]
struct RecordingSurface {
    presented: Vec<Option<u64>>,
}

impl DisplaySurface for RecordingSurface {
    fn present(&mut self, bitmap: &Bitmap, width: u32, height: u32) {
        assert_eq!(bitmap.data.len(), (width * height * 4) as usize);
        self.presented.push(frame_index(bitmap));
    }
}

#[test]
fn test_two_seconds_of_playback_tracks_wall_clock() {
    let manager = manager(SyntheticMedia::new(10.0, 30.0), VirtualAudioDevice::new());
    manager.load(CLIP).unwrap();
    assert!(manager.has_audio());

    let poller = manager.display_poller();
    let mut surface = RecordingSurface::default();
    manager.play().unwrap();

    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(2) {
        poller.poll(&mut surface);
        thread::sleep(Duration::from_millis(5));
    }

    let now = manager.get_current_time();
    assert!((now - 2.0).abs() < 0.15, "current time = {}", now);
    assert!(manager.is_playing());
    assert!(surface.presented.len() > 30, "presented {}", surface.presented.len());
    manager.cleanup();
}

#[test]
fn test_seek_while_paused_presents_target_frame_first() {
    let manager = manager(SyntheticMedia::new(60.0, 30.0), VirtualAudioDevice::new());
    manager.load(CLIP).unwrap();
    let poller = manager.display_poller();

    manager.play().unwrap();
    thread::sleep(Duration::from_millis(100));
    manager.pause().unwrap();

    manager.seek(42.0).unwrap();
    assert_eq!(manager.state(), TransportState::Paused);
    assert_eq!(manager.get_current_time(), 42.0);

    manager.play().unwrap();
    let mut first = None;
    let mut surface = RecordingSurface::default();
    assert!(wait_for(Duration::from_secs(2), || {
        first = poller.poll(&mut surface);
        first.is_some()
    }));

    let pts = first.unwrap();
    assert!((42.0..=42.034).contains(&pts), "first pts = {}", pts);
    assert_eq!(surface.presented[0], Some(1260));
    manager.cleanup();
}

#[test]
fn test_seek_target_frame_shown_with_default_latency_offset() {
    let manager = manager_with_config(
        small_surface(),
        SyntheticMedia::new(60.0, 30.0),
        VirtualAudioDevice::new(),
    );
    assert_eq!(manager.config().latency_offset, 1.5);
    manager.load(CLIP).unwrap();
    let poller = manager.display_poller();
    let mut surface = RecordingSurface::default();

    manager.seek(42.0).unwrap();
    manager.play().unwrap();
    let pts = first_presented(&poller, &mut surface).unwrap();
    assert!((42.0..=42.034).contains(&pts), "first pts = {}", pts);
    assert_eq!(surface.presented[0], Some(1260));

    // 播放中 seek 同样先显示目标帧
    manager.seek(23.0).unwrap();
    let pts = first_presented(&poller, &mut surface).unwrap();
    assert!((23.0..=23.034).contains(&pts), "first pts = {}", pts);
    manager.cleanup();
}

#[test]
fn test_seek_target_frame_shown_after_slow_preroll() {
    let manager = manager(long_gop_media(), VirtualAudioDevice::new());
    manager.load(CLIP).unwrap();
    let poller = manager.display_poller();
    let mut surface = RecordingSurface::default();

    manager.seek(42.0).unwrap();
    manager.play().unwrap();
    let pts = first_presented(&poller, &mut surface).unwrap();
    assert!((42.0..=42.034).contains(&pts), "first pts = {}", pts);
    assert_eq!(surface.presented[0], Some(1260));

    manager.seek(23.0).unwrap();
    let pts = first_presented(&poller, &mut surface).unwrap();
    assert!((23.0..=23.034).contains(&pts), "first pts = {}", pts);

    // 主时钟从目标处开始计时，之后的帧照常显示
    let before = surface.presented.len();
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(500) {
        poller.poll(&mut surface);
        thread::sleep(Duration::from_millis(5));
    }
    assert!(surface.presented.len() - before > 8, "presented {}", surface.presented.len() - before);
    let now = manager.get_current_time();
    assert!((23.0..23.7).contains(&now), "current time = {}", now);
    manager.cleanup();
}

#[test]
fn test_seek_past_end_of_shorter_audio_track() {
    let mut media = SyntheticMedia::new(10.0, 30.0);
    media.audio_duration = Some(4.0);
    let manager = manager(media, VirtualAudioDevice::new());
    manager.load(CLIP).unwrap();
    assert!(manager.has_audio());
    let poller = manager.display_poller();
    let mut surface = RecordingSurface::default();

    manager.seek(7.0).unwrap();
    manager.play().unwrap();
    let pts = first_presented(&poller, &mut surface).unwrap();
    assert!((7.0..=7.034).contains(&pts), "first pts = {}", pts);

    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(500) {
        poller.poll(&mut surface);
        thread::sleep(Duration::from_millis(5));
    }
    assert!(surface.presented.len() > 8, "presented {}", surface.presented.len());
    let now = manager.get_current_time();
    assert!((now - 7.5).abs() < 0.15, "current time = {}", now);
    manager.cleanup();
}

#[test]
fn test_audio_open_failure_plays_video_at_wall_clock_rate() {
    let manager = manager(SyntheticMedia::new(10.0, 30.0), VirtualAudioDevice::failing_open());
    let events = manager.subscribe();
    manager.load(CLIP).unwrap();
    manager.play().unwrap();
    assert!(!manager.has_audio());
    assert!(events.try_iter().any(|e| matches!(e, PlayerEvent::AudioDegraded(_))));

    let poller = manager.display_poller();
    let mut surface = RecordingSurface::default();
    let mut last_pts = 0.0;
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(1) {
        if let Some(pts) = poller.poll(&mut surface) {
            last_pts = pts;
        }
        thread::sleep(Duration::from_millis(5));
    }

    assert!((last_pts - 1.0).abs() < 0.15, "last pts = {}", last_pts);
    assert!(surface.presented.len() >= 20, "presented {}", surface.presented.len());
    assert!(manager.is_playing());
    manager.cleanup();
}

#[test]
fn test_unavailable_device_still_plays() {
    let manager = manager(SyntheticMedia::new(10.0, 30.0), VirtualAudioDevice::unavailable());
    manager.load(CLIP).unwrap();
    manager.play().unwrap();
    thread::sleep(Duration::from_millis(500));
    let now = manager.get_current_time();
    assert!((now - 0.5).abs() < 0.15, "current time = {}", now);
    manager.cleanup();
}

#[test]
fn test_rapid_scrubbing_resolves() {
    let manager = manager(SyntheticMedia::new(30.0, 30.0), VirtualAudioDevice::new());
    manager.load(CLIP).unwrap();
    manager.play().unwrap();

    for i in 0..60 {
        manager.seek((i * 7 % 29) as f64 + 0.5).unwrap();
        if i % 20 == 10 {
            manager.pause().unwrap();
            manager.play().unwrap();
        }
        thread::sleep(Duration::from_millis(2));
    }
    manager.seek(12.0).unwrap();

    assert!(wait_for(Duration::from_secs(3), || {
        manager.state() == TransportState::Playing
    }));
    assert!(manager.get_current_time() >= 12.0);

    let start = Instant::now();
    manager.cleanup();
    assert!(start.elapsed() < Duration::from_secs(3));
    assert_eq!(manager.state(), TransportState::Idle);
}

#[test]
fn test_queues_stay_bounded_without_a_display() {
    let manager = manager(SyntheticMedia::new(10.0, 30.0), VirtualAudioDevice::new());
    manager.load(CLIP).unwrap();
    manager.play().unwrap();

    let display = manager.display_queue();
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(800) {
        assert!(manager.frame_queue_len() <= 30);
        assert!(display.len() <= 3);
        thread::sleep(Duration::from_millis(10));
    }
    assert!(manager.stats().display_full_drops > 0);
    manager.cleanup();
}

#[test]
fn test_presentation_order_is_increasing() {
    let manager = manager(SyntheticMedia::new(10.0, 30.0), VirtualAudioDevice::new());
    manager.load(CLIP).unwrap();
    let display = manager.display_queue();
    manager.play().unwrap();

    let mut last = f64::NEG_INFINITY;
    let mut count = 0;
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(1) {
        if let Ok(frame) = display.recv_timeout(Duration::from_millis(100)) {
            assert!(frame.pts > last, "{} after {}", frame.pts, last);
            last = frame.pts;
            count += 1;
        }
    }
    assert!(count > 15);
    manager.cleanup();
}

#[test]
fn test_end_of_stream_keeps_transport_playing() {
    let manager = manager(SyntheticMedia::new(0.5, 30.0), VirtualAudioDevice::new());
    let events = manager.subscribe();
    manager.load(CLIP).unwrap();
    manager.play().unwrap();

    let poller = manager.display_poller();
    let mut surface = RecordingSurface::default();
    let mut ended = false;
    assert!(wait_for(Duration::from_secs(3), || {
        poller.poll(&mut surface);
        ended |= events.try_iter().any(|e| e == PlayerEvent::EndOfStream);
        ended
    }));
    assert_eq!(manager.state(), TransportState::Playing);

    // 末尾之后仍可 seek 回去继续播放
    manager.seek(0.1).unwrap();
    assert!(wait_for(Duration::from_secs(2), || {
        manager.state() == TransportState::Playing
    }));
    manager.cleanup();
}

#[test]
fn test_cleanup_from_another_thread_and_reload() {
    let manager = Arc::new(manager(SyntheticMedia::new(10.0, 30.0), VirtualAudioDevice::new()));
    manager.load(CLIP).unwrap();
    manager.play().unwrap();
    thread::sleep(Duration::from_millis(100));

    let remote = manager.clone();
    thread::spawn(move || remote.cleanup()).join().unwrap();
    assert_eq!(manager.state(), TransportState::Idle);
    manager.cleanup();

    manager.load(CLIP).unwrap();
    assert_eq!(manager.state(), TransportState::Loaded);
    assert_eq!(manager.get_current_time(), 0.0);
    manager.play().unwrap();
    assert!(wait_for(Duration::from_secs(2), || manager.stats().presented_frames > 0));
    manager.cleanup();
}

#[test]
fn test_events_report_state_transitions() {
    let manager = manager(SyntheticMedia::new(10.0, 30.0), VirtualAudioDevice::new());
    let events = manager.subscribe();
    manager.load(CLIP).unwrap();
    manager.play().unwrap();
    manager.pause().unwrap();
    manager.cleanup();

    let states: Vec<TransportState> = events
        .try_iter()
        .filter_map(|e| match e {
            PlayerEvent::StateChanged(state) => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            TransportState::Loaded,
            TransportState::Playing,
            TransportState::Paused,
            TransportState::Idle
        ]
    );
}
