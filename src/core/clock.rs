use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Instant;

/// 主时钟接口 - 渲染引擎据此计算漂移
pub trait MasterClock: Send + Sync {
    /// 当前播放位置（秒）
    fn now(&self) -> f64;
}

/// 播放时钟 - 墙钟计时（音频不可用时作为主时钟）
#[derive(Clone)]
pub struct PlaybackClock {
    inner: Arc<Mutex<ClockInner>>,
}

struct ClockInner {
    base_pts: f64,              // 基准位置（秒）
    base_instant: Instant,      // 基准时刻
    playback_rate: f64,         // 播放速率（1.0 = 正常）
    paused: bool,
    paused_at: f64,             // 暂停时的位置
}

impl ClockInner {
    fn now(&self) -> f64 {
        if self.paused {
            self.paused_at
        } else {
            let elapsed = self.base_instant.elapsed().as_secs_f64();
            self.base_pts + elapsed * self.playback_rate
        }
    }
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockInner {
                base_pts: 0.0,
                base_instant: Instant::now(),
                playback_rate: 1.0,
                paused: true,
                paused_at: 0.0,
            })),
        }
    }

    /// 获取当前播放时间（秒）
    pub fn now(&self) -> f64 {
        self.inner.lock().now()
    }

    /// 设置播放位置
    pub fn set_time(&self, pts: f64) {
        let mut inner = self.inner.lock();
        inner.base_pts = pts;
        inner.base_instant = Instant::now();
        inner.paused_at = pts;
    }

    /// 开始播放
    pub fn play(&self) {
        let mut inner = self.inner.lock();
        if inner.paused {
            inner.base_pts = inner.paused_at;
            inner.base_instant = Instant::now();
            inner.paused = false;
        }
    }

    /// 暂停播放
    pub fn pause(&self) {
        let mut inner = self.inner.lock();
        if !inner.paused {
            inner.paused_at = inner.now();
            inner.paused = true;
        }
    }

    /// 设置播放速率
    pub fn set_rate(&self, rate: f64) {
        let mut inner = self.inner.lock();
        if !inner.paused {
            let current_time = inner.now();
            inner.base_pts = current_time;
            inner.base_instant = Instant::now();
        }
        inner.playback_rate = rate;
    }

    /// 是否暂停
    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MasterClock for PlaybackClock {
    fn now(&self) -> f64 {
        PlaybackClock::now(self)
    }
}

/// 同步时钟 - 音频可用时以音频为主时钟，否则回退到墙钟
#[derive(Clone)]
pub struct SyncClock {
    audio: Arc<RwLock<Option<Arc<dyn MasterClock>>>>,
    wall: PlaybackClock,
}

impl SyncClock {
    pub fn new(wall: PlaybackClock) -> Self {
        Self {
            audio: Arc::new(RwLock::new(None)),
            wall,
        }
    }

    pub fn set_audio(&self, clock: Option<Arc<dyn MasterClock>>) {
        *self.audio.write() = clock;
    }

    pub fn is_audio_master(&self) -> bool {
        self.audio.read().is_some()
    }

    pub fn wall(&self) -> &PlaybackClock {
        &self.wall
    }
}

impl MasterClock for SyncClock {
    fn now(&self) -> f64 {
        match self.audio.read().as_ref() {
            Some(audio) => audio.now(),
            None => self.wall.now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_paused_clock_does_not_advance() {
        let clock = PlaybackClock::new();
        clock.set_time(5.0);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(clock.now(), 5.0);
        assert!(clock.is_paused());
    }

    #[test]
    fn test_clock_advances_with_rate() {
        let clock = PlaybackClock::new();
        clock.set_rate(2.0);
        clock.play();
        thread::sleep(Duration::from_millis(100));
        let now = clock.now();
        assert!(now > 0.15 && now < 0.4, "now = {}", now);
        clock.pause();
        let frozen = clock.now();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(clock.now(), frozen);
    }

    struct Fixed(f64);

    impl MasterClock for Fixed {
        fn now(&self) -> f64 {
            self.0
        }
    }

    #[test]
    fn test_sync_clock_prefers_audio() {
        let wall = PlaybackClock::new();
        wall.set_time(1.0);
        let clock = SyncClock::new(wall);
        assert_eq!(MasterClock::now(&clock), 1.0);

        clock.set_audio(Some(Arc::new(Fixed(7.5))));
        assert!(clock.is_audio_master());
        assert_eq!(MasterClock::now(&clock), 7.5);

        clock.set_audio(None);
        assert_eq!(MasterClock::now(&clock), 1.0);
    }
}
