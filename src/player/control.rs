use crate::player::log_ctx;
use log::warn;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// 解码线程和渲染线程共享的控制信号
///
/// 标志位用原子量，便于在每个包/帧上廉价检查；
/// 修改标志时持有 `gate` 并唤醒条件变量，等待方不会丢失唤醒。
/// 每个会话一份，只有 seek 代数计数器跨会话共享。
pub struct ControlFlags {
    paused: AtomicBool,
    stop: AtomicBool,
    seek_pending: AtomicBool,
    epoch: Arc<AtomicU64>,
    gate: Mutex<SeekSlot>,
    cond: Condvar,
}

#[derive(Default)]
struct SeekSlot {
    /// (目标, 发起时的代数)
    target: Option<(f64, u64)>,
}

/// 可中断等待的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Elapsed,
    Paused,
    Seek,
    Stop,
}

impl ControlFlags {
    pub fn new() -> Self {
        Self::from_counter(Arc::new(AtomicU64::new(0)))
    }

    /// 新会话：沿用共享的代数计数器并推进一代，旧会话的帧全部过期
    pub fn with_epoch(epoch: Arc<AtomicU64>) -> Self {
        epoch.fetch_add(1, Ordering::SeqCst);
        Self::from_counter(epoch)
    }

    fn from_counter(epoch: Arc<AtomicU64>) -> Self {
        Self {
            paused: AtomicBool::new(true),
            stop: AtomicBool::new(false),
            seek_pending: AtomicBool::new(false),
            epoch,
            gate: Mutex::new(SeekSlot::default()),
            cond: Condvar::new(),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn seek_pending(&self) -> bool {
        self.seek_pending.load(Ordering::SeqCst)
    }

    /// 当前 seek 代数
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// 共享的代数计数器（显示端据此跳过过期帧）
    pub fn epoch_handle(&self) -> Arc<AtomicU64> {
        self.epoch.clone()
    }

    /// 暂停/停止/seek 任一触发，循环都应立即返回
    pub fn interrupted(&self) -> bool {
        self.is_paused() || self.should_stop() || self.seek_pending()
    }

    pub fn set_paused(&self, paused: bool) {
        let _gate = self.gate.lock();
        self.paused.store(paused, Ordering::SeqCst);
        self.cond.notify_all();
    }

    pub fn request_stop(&self) {
        let _gate = self.gate.lock();
        self.stop.store(true, Ordering::SeqCst);
        self.cond.notify_all();
    }

    /// 发起 seek：记录目标（覆盖未处理的旧目标）并推进代数，返回新代数
    pub fn request_seek(&self, target: f64) -> u64 {
        let mut slot = self.gate.lock();
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        slot.target = Some((target, epoch));
        self.seek_pending.store(true, Ordering::SeqCst);
        self.cond.notify_all();
        epoch
    }

    /// 取出最新的 seek 目标及其代数
    pub fn take_seek(&self) -> Option<(f64, u64)> {
        let mut slot = self.gate.lock();
        let request = slot.target.take()?;
        self.seek_pending.store(false, Ordering::SeqCst);
        Some(request)
    }

    /// 暂停期间阻塞等待，直到恢复或停止
    pub fn wait_while_paused(&self) {
        let mut gate = self.gate.lock();
        while self.is_paused() && !self.should_stop() {
            self.cond.wait(&mut gate);
        }
    }

    /// 文件末尾等待：直到停止或有 seek 请求
    pub fn wait_for_seek_or_stop(&self) {
        let mut gate = self.gate.lock();
        while !self.should_stop() && !self.seek_pending() {
            self.cond.wait(&mut gate);
        }
    }

    /// 可中断睡眠
    pub fn sleep(&self, duration: Duration) -> WaitOutcome {
        let deadline = Instant::now() + duration;
        let mut gate = self.gate.lock();
        loop {
            if self.should_stop() {
                return WaitOutcome::Stop;
            }
            if self.seek_pending() {
                return WaitOutcome::Seek;
            }
            if self.is_paused() {
                return WaitOutcome::Paused;
            }
            if self.cond.wait_until(&mut gate, deadline).timed_out() {
                return WaitOutcome::Elapsed;
            }
        }
    }
}

impl Default for ControlFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// 限时等待线程结束，超时则放弃 join（线程被分离）
pub fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration, name: &str) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!("{} ⚠️ {} 在 {:?} 内未退出，放弃等待", log_ctx(), name, timeout);
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
    if handle.join().is_err() {
        warn!("{} ⚠️ {} 异常退出", log_ctx(), name);
    }
    true
}
