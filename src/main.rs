use anyhow::{bail, Result};
use clap::Parser;
use log::{info, warn};
use myy_playback::core::{Bitmap, PlayerConfig, PlayerEvent};
use myy_playback::player::{
    AudioDevice, CodecBackend, DisplaySurface, PlaybackManager, SyntheticBackend, SyntheticMedia,
    VirtualAudioDevice,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// 显示端刷新间隔（约 60Hz）
const DISPLAY_INTERVAL: Duration = Duration::from_millis(16);

/// 无界面显示表面：只统计并周期性打印
struct LogSurface {
    presented: u64,
    last_report: Instant,
}

impl DisplaySurface for LogSurface {
    fn present(&mut self, bitmap: &Bitmap, width: u32, height: u32) {
        self.presented += 1;
        if self.last_report.elapsed() >= Duration::from_secs(1) {
            self.last_report = Instant::now();
            info!(
                "🖼️ 已显示 {} 帧 (当前 {}x{}, {} 字节)",
                self.presented,
                width,
                height,
                bitmap.data.len()
            );
        }
    }
}

/// 无界面播放演示：按音频主时钟同步显示视频帧
#[derive(Parser, Debug)]
#[command(name = "myy_playback")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 媒体文件路径（--synthetic 模式下只作为名字）
    path: PathBuf,

    /// 播放时长（秒）
    #[arg(default_value_t = 10.0)]
    seconds: f64,

    /// 使用合成媒体和虚拟音频设备，不依赖 FFmpeg 和声卡
    #[arg(long)]
    synthetic: bool,

    /// JSON 配置文件
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[cfg(feature = "ffmpeg")]
fn codec_backend() -> Result<Arc<dyn CodecBackend>> {
    let backend = myy_playback::player::FfmpegBackend::new()
        .map_err(|e| anyhow::anyhow!("FFmpeg 初始化失败: {}", e))?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "ffmpeg"))]
fn codec_backend() -> Result<Arc<dyn CodecBackend>> {
    bail!("未启用 ffmpeg 特性，只能使用 --synthetic 模式")
}

#[cfg(feature = "cpal")]
fn audio_device() -> Arc<dyn AudioDevice> {
    Arc::new(myy_playback::player::CpalAudioDevice::new())
}

#[cfg(not(feature = "cpal"))]
fn audio_device() -> Arc<dyn AudioDevice> {
    warn!("⚠️ 未启用 cpal 特性，使用虚拟音频设备");
    Arc::new(VirtualAudioDevice::new())
}

fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("🎬 MYY Playback - 无界面版本启动");

    let args = Args::parse();
    let config = match &args.config {
        Some(file) => PlayerConfig::from_json_file(file)?,
        None => PlayerConfig::default(),
    };

    let (backend, device): (Arc<dyn CodecBackend>, Arc<dyn AudioDevice>) = if args.synthetic {
        let media = SyntheticMedia::new(args.seconds.max(1.0) + 1.0, 30.0);
        (
            Arc::new(SyntheticBackend::new().with_media(&args.path, media)),
            Arc::new(VirtualAudioDevice::new()),
        )
    } else {
        (codec_backend()?, audio_device())
    };

    let manager = PlaybackManager::new(config, backend, device);
    let events = manager.subscribe();
    let info = manager.load(&args.path)?;
    info!("媒体信息: {:?}", info);

    let poller = manager.display_poller();
    let mut surface = LogSurface {
        presented: 0,
        last_report: Instant::now(),
    };

    manager.play()?;
    let deadline = Instant::now() + Duration::from_secs_f64(args.seconds.max(0.0));
    let mut finished = false;
    while Instant::now() < deadline && !finished {
        poller.poll(&mut surface);
        for event in events.try_iter() {
            match event {
                PlayerEvent::EndOfStream => {
                    info!("🏁 播放到文件末尾");
                    finished = true;
                }
                PlayerEvent::AudioDegraded(reason) => warn!("⚠️ 音频降级: {}", reason),
                PlayerEvent::Error(message) => {
                    manager.cleanup();
                    bail!("播放失败: {}", message);
                }
                PlayerEvent::TimeChanged(_) => {}
                other => info!("事件: {:?}", other),
            }
        }
        thread::sleep(DISPLAY_INTERVAL);
    }

    info!(
        "⏱️ 结束位置 {:.3}s / {:.3}s, 统计: {:?}",
        manager.get_current_time(),
        manager.get_duration(),
        manager.stats()
    );
    manager.cleanup();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_synthetic_run() {
        let args = Args::try_parse_from(["myy_playback", "--synthetic", "clip.mp4", "3.5"]).unwrap();
        assert!(args.synthetic);
        assert_eq!(args.path, PathBuf::from("clip.mp4"));
        assert_eq!(args.seconds, 3.5);
        assert!(args.config.is_none());
    }

    #[test]
    fn test_parse_defaults_and_config() {
        let args = Args::try_parse_from(["myy_playback", "--config", "player.json", "movie.mkv"]).unwrap();
        assert!(!args.synthetic);
        assert_eq!(args.seconds, 10.0);
        assert_eq!(args.config, Some(PathBuf::from("player.json")));
    }

    #[test]
    fn test_missing_path_is_rejected() {
        assert!(Args::try_parse_from(["myy_playback", "--synthetic"]).is_err());
        assert!(Args::try_parse_from(["myy_playback", "a.mp4", "1", "extra"]).is_err());
    }
}
