use crate::core::{DecodedFrame, DriftSample, MasterClock, PlayerConfig, PlayerEvent};
use crate::player::backend::DisplaySurface;
use crate::player::control::{join_with_timeout, ControlFlags, WaitOutcome};
use crate::player::events::EventBus;
use crate::player::log_ctx;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{debug, error, info};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// 时间变化事件的最小间隔（按 PTS 计）
const TIME_EVENT_INTERVAL: f64 = 0.25;

/// 同步阈值（秒）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncThresholds {
    pub latency_offset: f64,
    pub max_behind: f64,
    pub max_ahead: f64,
    pub wait_ceiling: f64,
    pub seek_sanity: f64,
}

impl From<&PlayerConfig> for SyncThresholds {
    fn from(config: &PlayerConfig) -> Self {
        Self {
            latency_offset: config.latency_offset,
            max_behind: config.max_behind,
            max_ahead: config.max_ahead,
            wait_ceiling: config.wait_ceiling,
            seek_sanity: config.seek_sanity,
        }
    }
}

/// 丢帧原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// 落后于主时钟
    Late,
    /// 超前过多，视为 seek 残留
    TooEarly,
}

/// 单帧同步决策
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncDecision {
    Present,
    Wait(Duration),
    Drop(DropReason),
}

/// 漂移 = 主时钟 - 帧 PTS + 延迟补偿；正值表示帧落后
pub fn compute_drift(clock: f64, pts: f64, latency_offset: f64) -> f64 {
    clock - pts + latency_offset
}

/// 根据漂移决定丢弃、等待或显示
pub fn decide(drift: f64, thresholds: &SyncThresholds) -> SyncDecision {
    if drift > thresholds.max_behind {
        return SyncDecision::Drop(DropReason::Late);
    }
    if drift < -thresholds.max_ahead {
        let wait = -drift - thresholds.max_ahead;
        if wait > thresholds.wait_ceiling {
            return SyncDecision::Drop(DropReason::TooEarly);
        }
        return SyncDecision::Wait(Duration::from_secs_f64(wait));
    }
    SyncDecision::Present
}

/// 渲染统计
#[derive(Debug, Default)]
pub struct RenderStats {
    pub presented: AtomicU64,
    pub late_drops: AtomicU64,
    pub early_drops: AtomicU64,
    pub display_full_drops: AtomicU64,
    pub stale_drops: AtomicU64,
}

/// 漂移采样环形缓冲
pub struct DriftHistory {
    samples: Mutex<VecDeque<DriftSample>>,
    capacity: usize,
    origin: Instant,
}

impl DriftHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            origin: Instant::now(),
        }
    }

    pub fn record(&self, audio_clock: f64, frame_pts: f64, drift: f64) {
        let mut samples = self.samples.lock();
        if samples.len() >= self.capacity {
            samples.pop_front();
        }
        samples.push_back(DriftSample {
            at: self.origin.elapsed().as_secs_f64(),
            audio_clock,
            frame_pts,
            drift,
        });
    }

    pub fn snapshot(&self) -> Vec<DriftSample> {
        self.samples.lock().iter().copied().collect()
    }

    pub fn clear(&self) {
        self.samples.lock().clear();
    }
}

/// 渲染线程运行所需的共享资源
#[derive(Clone)]
pub struct RenderContext {
    pub flags: Arc<ControlFlags>,
    pub clock: Arc<dyn MasterClock>,
    pub frame_rx: Receiver<DecodedFrame>,
    pub display_tx: Sender<DecodedFrame>,
    /// 显示区域尺寸缓存
    pub surface_size: Arc<Mutex<(u32, u32)>>,
    pub thresholds: SyncThresholds,
    pub poll: Duration,
    pub stats: Arc<RenderStats>,
    pub drift: Arc<DriftHistory>,
    pub events: Arc<EventBus>,
}

/// 音视频同步渲染引擎
pub struct SyncRenderer {
    handle: Option<JoinHandle<()>>,
}

impl SyncRenderer {
    pub fn start(ctx: RenderContext) -> Self {
        let handle = thread::Builder::new()
            .name("av-sync-render".to_string())
            .spawn(move || RenderLoop::new(ctx).run())
            .ok();
        if handle.is_none() {
            error!("{} ❌ 无法创建渲染线程", log_ctx());
        }
        Self { handle }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    pub fn join(&mut self, timeout: Duration) -> bool {
        match self.handle.take() {
            Some(handle) => join_with_timeout(handle, timeout, "渲染线程"),
            None => true,
        }
    }
}

struct RenderLoop {
    ctx: RenderContext,
    /// 暂停打断等待时保留的帧，恢复后重新判定
    pending: Option<DecodedFrame>,
    /// 上一帧所属的代数；新代数的第一帧是 seek/起播的目标帧
    last_epoch: Option<u64>,
    last_pts: f64,
    last_time_event: f64,
}

impl RenderLoop {
    fn new(ctx: RenderContext) -> Self {
        Self {
            last_epoch: None,
            ctx,
            pending: None,
            last_pts: f64::NEG_INFINITY,
            last_time_event: f64::NEG_INFINITY,
        }
    }

    fn run(mut self) {
        info!("{} 🖼️ 渲染线程启动", log_ctx());
        let flags = self.ctx.flags.clone();

        while !flags.should_stop() {
            if flags.is_paused() {
                flags.wait_while_paused();
                continue;
            }

            let frame = match self.pending.take() {
                Some(frame) => frame,
                None => match self.ctx.frame_rx.recv_timeout(self.ctx.poll) {
                    Ok(frame) => frame,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
            };

            if !self.handle_frame(frame) {
                break;
            }
        }

        info!(
            "{} 🖼️ 渲染线程结束: 显示 {} 帧, 落后丢弃 {} 帧, 超前丢弃 {} 帧",
            log_ctx(),
            self.ctx.stats.presented.load(Ordering::Relaxed),
            self.ctx.stats.late_drops.load(Ordering::Relaxed),
            self.ctx.stats.early_drops.load(Ordering::Relaxed)
        );
    }

    /// 处理一帧；显示队列断开时返回 false
    fn handle_frame(&mut self, frame: DecodedFrame) -> bool {
        let epoch = self.ctx.flags.epoch();
        if frame.epoch != epoch {
            self.ctx.stats.stale_drops.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        let fresh_epoch = self.last_epoch != Some(epoch);
        if fresh_epoch {
            self.last_epoch = Some(epoch);
            self.last_pts = f64::NEG_INFINITY;
        }

        let thresholds = self.ctx.thresholds;
        let clock = self.ctx.clock.now();
        let drift = compute_drift(clock, frame.pts, thresholds.latency_offset);
        self.ctx.drift.record(clock, frame.pts, drift);

        // seek 之后与主时钟相差得离谱的帧来自旧位置，不显示
        let offset = clock - frame.pts;
        if fresh_epoch && offset.abs() > thresholds.seek_sanity {
            debug!("{} 🖼️ 丢弃 seek 残留帧: PTS={:.3}s, 漂移={:.3}s", log_ctx(), frame.pts, drift);
            self.ctx.stats.stale_drops.fetch_add(1, Ordering::Relaxed);
            self.last_epoch = None;
            return true;
        }

        let decision = match decide(drift, &thresholds) {
            // 主时钟停在目标处等待首帧，延迟补偿不应让目标帧被当作落后帧丢掉
            SyncDecision::Drop(DropReason::Late) if fresh_epoch && offset <= thresholds.max_behind => {
                debug!("{} 🖼️ 显示 seek 目标帧: PTS={:.3}s, 漂移={:.3}s", log_ctx(), frame.pts, drift);
                SyncDecision::Present
            }
            decision => decision,
        };

        match decision {
            SyncDecision::Drop(DropReason::Late) => {
                self.ctx.stats.late_drops.fetch_add(1, Ordering::Relaxed);
                true
            }
            SyncDecision::Drop(DropReason::TooEarly) => {
                self.ctx.stats.early_drops.fetch_add(1, Ordering::Relaxed);
                true
            }
            SyncDecision::Wait(wait) => {
                match self.ctx.flags.sleep(wait) {
                    // 等待结束或被暂停：保留该帧重新判定
                    WaitOutcome::Elapsed | WaitOutcome::Paused => self.pending = Some(frame),
                    WaitOutcome::Seek => {
                        self.ctx.stats.stale_drops.fetch_add(1, Ordering::Relaxed);
                    }
                    WaitOutcome::Stop => {}
                }
                true
            }
            SyncDecision::Present => self.present(frame),
        }
    }

    /// 缩放到显示尺寸并放入显示队列；队列满则丢弃新帧
    fn present(&mut self, frame: DecodedFrame) -> bool {
        let (width, height) = *self.ctx.surface_size.lock();
        let pts = frame.pts;
        if pts < self.last_pts {
            debug!("{} 🖼️ PTS 回退: {:.3}s < {:.3}s", log_ctx(), pts, self.last_pts);
        }
        let scaled = DecodedFrame {
            bitmap: frame.bitmap.scale_to_fit(width, height),
            ..frame
        };

        match self.ctx.display_tx.try_send(scaled) {
            Ok(()) => {
                self.last_pts = pts;
                self.ctx.stats.presented.fetch_add(1, Ordering::Relaxed);
                if (pts - self.last_time_event).abs() >= TIME_EVENT_INTERVAL {
                    self.last_time_event = pts;
                    self.ctx.events.publish(PlayerEvent::TimeChanged(pts));
                }
                true
            }
            Err(TrySendError::Full(_)) => {
                self.ctx.stats.display_full_drops.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// 显示端轮询器：在显示表面自己的节奏中取帧并呈现
#[derive(Clone)]
pub struct DisplayPoller {
    rx: Receiver<DecodedFrame>,
    epoch: Arc<AtomicU64>,
}

impl DisplayPoller {
    /// `epoch` 是跨会话共享的 seek 代数计数器
    pub fn new(rx: Receiver<DecodedFrame>, epoch: Arc<AtomicU64>) -> Self {
        Self { rx, epoch }
    }

    /// 取出一帧并呈现，返回其 PTS；没有新帧时返回 None
    pub fn poll(&self, surface: &mut dyn DisplaySurface) -> Option<f64> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        while let Ok(frame) = self.rx.try_recv() {
            // 跳过 seek 之前渲染的帧
            if frame.epoch != epoch {
                continue;
            }
            surface.present(&frame.bitmap, frame.bitmap.width, frame.bitmap.height);
            return Some(frame.pts);
        }
        None
    }

    /// 当前排队等待显示的帧数
    pub fn queued(&self) -> usize {
        self.rx.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Bitmap;
    use crossbeam_channel::bounded;

    fn thresholds() -> SyncThresholds {
        SyncThresholds {
            latency_offset: 0.0,
            max_behind: 0.1,
            max_ahead: 0.02,
            wait_ceiling: 1.0,
            seek_sanity: 2.0,
        }
    }

    #[test]
    fn test_decide() {
        let t = thresholds();
        assert_eq!(decide(0.0, &t), SyncDecision::Present);
        assert_eq!(decide(0.1, &t), SyncDecision::Present);
        assert_eq!(decide(0.11, &t), SyncDecision::Drop(DropReason::Late));
        assert_eq!(decide(-0.02, &t), SyncDecision::Present);
        match decide(-0.52, &t) {
            SyncDecision::Wait(d) => assert!((d.as_secs_f64() - 0.5).abs() < 1e-6),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(decide(-1.5, &t), SyncDecision::Drop(DropReason::TooEarly));
    }

    #[test]
    fn test_latency_offset_shifts_drift() {
        assert!((compute_drift(10.0, 11.5, 1.5) - 0.0).abs() < 1e-12);
        assert!((compute_drift(10.0, 10.0, 0.0)).abs() < 1e-12);
    }

    #[test]
    fn test_burst_is_thinned_until_drift_in_range() {
        // 瞬时积压 N 帧，主时钟在 2.0s：落后的帧全部丢弃
        let t = thresholds();
        let clock = 2.0;
        let burst: Vec<f64> = (0..90).map(|i| i as f64 / 30.0).collect();
        let presented: Vec<f64> = burst
            .iter()
            .copied()
            .filter(|pts| decide(compute_drift(clock, *pts, 0.0), &t) != SyncDecision::Drop(DropReason::Late))
            .collect();
        assert!(!presented.is_empty());
        for pts in &presented {
            let drift = compute_drift(clock, *pts, 0.0);
            assert!(drift <= t.max_behind);
        }
        assert!(presented[0] >= clock - t.max_behind - 1e-9);
    }

    #[test]
    fn test_drift_history_is_bounded() {
        let history = DriftHistory::new(4);
        for i in 0..10 {
            history.record(i as f64, i as f64, 0.0);
        }
        let samples = history.snapshot();
        assert_eq!(samples.len(), 4);
        assert_eq!(samples[0].audio_clock, 6.0);
    }

    struct ManualClock(Mutex<f64>);

    impl MasterClock for ManualClock {
        fn now(&self) -> f64 {
            *self.0.lock()
        }
    }

    fn frame(pts: f64, seq: u64, epoch: u64) -> DecodedFrame {
        DecodedFrame {
            bitmap: Bitmap::solid(8, 4, [1, 2, 3, 255]),
            pts,
            seq,
            epoch,
        }
    }

    #[test]
    fn test_render_loop_drops_stale_and_presents_in_order() {
        let flags = Arc::new(ControlFlags::new());
        flags.set_paused(false);
        let (frame_tx, frame_rx) = bounded(64);
        let (display_tx, display_rx) = bounded(3);
        let clock = Arc::new(ManualClock(Mutex::new(2.0)));
        let stats = Arc::new(RenderStats::default());
        let ctx = RenderContext {
            flags: flags.clone(),
            clock: clock.clone(),
            frame_rx,
            display_tx,
            surface_size: Arc::new(Mutex::new((4, 4))),
            thresholds: thresholds(),
            poll: Duration::from_millis(10),
            stats: stats.clone(),
            drift: Arc::new(DriftHistory::new(64)),
            events: Arc::new(EventBus::new()),
        };

        let epoch = flags.epoch();
        // 上一代数的帧
        frame_tx.send(frame(2.0, 99, epoch.wrapping_sub(1))).unwrap();
        // 积压：0..2s 的旧帧 + 2.0s 附近的帧
        for i in 0..63u64 {
            frame_tx.send(frame(i as f64 / 30.0, i, epoch)).unwrap();
        }

        let mut renderer = SyncRenderer::start(ctx);
        let mut shown = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        while shown.len() < 3 && Instant::now() < deadline {
            if let Ok(f) = display_rx.recv_timeout(Duration::from_millis(50)) {
                assert_eq!((f.bitmap.width, f.bitmap.height), (4, 2));
                shown.push(f.pts);
                // 时钟跟着显示推进
                *clock.0.lock() = f.pts + 1.0 / 30.0;
            }
        }

        flags.request_stop();
        assert!(renderer.join(Duration::from_secs(2)));

        assert!(shown.len() >= 2, "shown = {:?}", shown);
        assert!(shown.windows(2).all(|w| w[0] <= w[1]));
        for pts in &shown {
            assert!(2.0 - pts <= 0.1 + 1e-9, "stale frame {} presented", pts);
        }
        assert!(stats.late_drops.load(Ordering::Relaxed) >= 50);
        assert_eq!(stats.stale_drops.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_target_frame_survives_latency_offset() {
        let flags = Arc::new(ControlFlags::new());
        flags.set_paused(false);
        let (frame_tx, frame_rx) = bounded(16);
        let (display_tx, display_rx) = bounded(3);
        let stats = Arc::new(RenderStats::default());
        let ctx = RenderContext {
            flags: flags.clone(),
            // 主时钟停在 seek 目标处
            clock: Arc::new(ManualClock(Mutex::new(42.0))),
            frame_rx,
            display_tx,
            surface_size: Arc::new(Mutex::new((8, 4))),
            thresholds: SyncThresholds {
                latency_offset: 1.5,
                ..thresholds()
            },
            poll: Duration::from_millis(10),
            stats: stats.clone(),
            drift: Arc::new(DriftHistory::new(16)),
            events: Arc::new(EventBus::new()),
        };
        let epoch = flags.epoch();
        for i in 0..3u64 {
            frame_tx.send(frame(42.0 + i as f64 / 30.0, i, epoch)).unwrap();
        }

        let mut renderer = SyncRenderer::start(ctx);
        let first = display_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while !frame_tx.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        thread::sleep(Duration::from_millis(30));
        flags.request_stop();
        assert!(renderer.join(Duration::from_secs(2)));

        assert_eq!(first.pts, 42.0);
        // 之后的帧按补偿后的漂移正常判定
        assert_eq!(stats.presented.load(Ordering::Relaxed), 1);
        assert_eq!(stats.late_drops.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_display_queue_full_drops_new_frame() {
        let flags = Arc::new(ControlFlags::new());
        flags.set_paused(false);
        let (frame_tx, frame_rx) = bounded(16);
        let (display_tx, display_rx) = bounded(3);
        let stats = Arc::new(RenderStats::default());
        let ctx = RenderContext {
            flags: flags.clone(),
            clock: Arc::new(ManualClock(Mutex::new(1.0))),
            frame_rx,
            display_tx,
            surface_size: Arc::new(Mutex::new((8, 4))),
            thresholds: thresholds(),
            poll: Duration::from_millis(10),
            stats: stats.clone(),
            drift: Arc::new(DriftHistory::new(16)),
            events: Arc::new(EventBus::new()),
        };
        let epoch = flags.epoch();
        for i in 0..6u64 {
            frame_tx.send(frame(1.0 + i as f64 * 0.001, i, epoch)).unwrap();
        }

        let mut renderer = SyncRenderer::start(ctx);
        let deadline = Instant::now() + Duration::from_secs(2);
        while !frame_tx.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        thread::sleep(Duration::from_millis(30));
        flags.request_stop();
        assert!(renderer.join(Duration::from_secs(2)));

        assert_eq!(display_rx.len(), 3);
        assert_eq!(stats.presented.load(Ordering::Relaxed), 3);
        assert_eq!(stats.display_full_drops.load(Ordering::Relaxed), 3);
    }

    struct CountingSurface(Vec<(u32, u32)>);

    impl DisplaySurface for CountingSurface {
        fn present(&mut self, _bitmap: &Bitmap, width: u32, height: u32) {
            self.0.push((width, height));
        }
    }

    #[test]
    fn test_display_poller_skips_previous_epoch() {
        let flags = Arc::new(ControlFlags::new());
        let (tx, rx) = bounded(3);
        let old = flags.epoch();
        let new = flags.request_seek(1.0);
        tx.send(frame(0.5, 0, old)).unwrap();
        tx.send(frame(1.0, 1, new)).unwrap();

        let poller = DisplayPoller::new(rx, flags.epoch_handle());
        let mut surface = CountingSurface(Vec::new());
        assert_eq!(poller.poll(&mut surface), Some(1.0));
        assert_eq!(poller.poll(&mut surface), None);
        assert_eq!(surface.0, vec![(8, 4)]);
    }
}
