use crate::core::{PlayerError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 播放器可调参数
///
/// 所有时间单位为秒。`latency_offset` 用于补偿音频和视频链路端到端延迟差，
/// 默认值为经验值，部署时应按实际平台调整。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// 帧队列容量（解码 → 渲染）
    pub frame_queue_capacity: usize,
    /// 显示队列容量（渲染 → 显示），刻意保持很小
    pub display_queue_capacity: usize,
    /// 帧队列写入超时，超时后丢弃该帧
    pub put_timeout: f64,
    /// 渲染线程取帧超时（暂停/seek/停止的响应粒度）
    pub render_poll: f64,
    /// 音视频延迟补偿
    pub latency_offset: f64,
    /// 帧落后超过该值则丢弃
    pub max_behind: f64,
    /// 帧超前超过该值则等待
    pub max_ahead: f64,
    /// 等待上限，超过则视为 seek 残留帧丢弃
    pub wait_ceiling: f64,
    /// seek 后视为残留的最大偏差
    pub seek_sanity: f64,
    /// seek 后按残留处理的数据包数量
    pub residue_packets: usize,
    /// cleanup 时等待线程退出的上限
    pub join_timeout: f64,
    /// 漂移采样环形缓冲长度
    pub drift_history: usize,
    /// 显示区域初始尺寸
    pub surface_width: u32,
    pub surface_height: u32,
    pub rate: f64,
    pub volume: f32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            frame_queue_capacity: 30,
            display_queue_capacity: 3,
            put_timeout: 2.0,
            render_poll: 0.05,
            latency_offset: 1.5,
            max_behind: 0.1,
            max_ahead: 0.02,
            wait_ceiling: 1.0,
            seek_sanity: 2.0,
            residue_packets: 3,
            join_timeout: 2.0,
            drift_history: 256,
            surface_width: 1280,
            surface_height: 720,
            rate: 1.0,
            volume: 1.0,
        }
    }
}

pub const MIN_RATE: f64 = 0.25;
pub const MAX_RATE: f64 = 4.0;

impl PlayerConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: PlayerConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// 校验参数范围
    pub fn validate(&self) -> Result<()> {
        if self.frame_queue_capacity == 0 {
            return Err(PlayerError::Config("frame_queue_capacity 必须大于 0".into()));
        }
        if self.display_queue_capacity == 0 {
            return Err(PlayerError::Config("display_queue_capacity 必须大于 0".into()));
        }
        let durations = [
            ("put_timeout", self.put_timeout),
            ("render_poll", self.render_poll),
            ("max_behind", self.max_behind),
            ("max_ahead", self.max_ahead),
            ("wait_ceiling", self.wait_ceiling),
            ("seek_sanity", self.seek_sanity),
            ("join_timeout", self.join_timeout),
        ];
        for (name, value) in durations {
            if !value.is_finite() || value < 0.0 {
                return Err(PlayerError::Config(format!("{} 必须是非负数: {}", name, value)));
            }
        }
        if !self.latency_offset.is_finite() {
            return Err(PlayerError::Config("latency_offset 必须是有限值".into()));
        }
        if !(MIN_RATE..=MAX_RATE).contains(&self.rate) {
            return Err(PlayerError::Config(format!(
                "rate 超出范围 [{}, {}]: {}",
                MIN_RATE, MAX_RATE, self.rate
            )));
        }
        Ok(())
    }

    pub fn put_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.put_timeout)
    }

    pub fn render_poll(&self) -> Duration {
        Duration::from_secs_f64(self.render_poll)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.join_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PlayerConfig::default();
        assert_eq!(config.frame_queue_capacity, 30);
        assert_eq!(config.display_queue_capacity, 3);
        assert_eq!(config.latency_offset, 1.5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = PlayerConfig::from_json_str(r#"{ "latency_offset": 0.25 }"#).unwrap();
        assert_eq!(config.latency_offset, 0.25);
        assert_eq!(config.frame_queue_capacity, 30);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(PlayerConfig::from_json_str(r#"{ "frame_queue_capacity": 0 }"#).is_err());
        assert!(PlayerConfig::from_json_str(r#"{ "max_behind": -1.0 }"#).is_err());
        assert!(PlayerConfig::from_json_str(r#"{ "rate": 10.0 }"#).is_err());
        assert!(matches!(
            PlayerConfig::from_json_str("{ not json"),
            Err(PlayerError::ConfigParse(_))
        ));
    }
}
