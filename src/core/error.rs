use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("文件不存在: {0}")]
    NotFound(String),

    #[error("无法识别的媒体格式: {0}")]
    InvalidFormat(String),

    #[error("无法找到视频流")]
    NoVideoStream,

    /// 单个数据包解码失败（可恢复，解码循环会跳过）
    #[error("解码错误: {0}")]
    Decode(String),

    /// 容器读取失败（不可恢复，会话回到 Idle）
    #[error("容器读取失败: {0}")]
    ContainerIo(String),

    #[error("音频设备错误: {0}")]
    AudioDevice(String),

    #[error("当前状态 {state} 不允许执行 {operation}")]
    InvalidState {
        state: &'static str,
        operation: &'static str,
    },

    #[error("配置错误: {0}")]
    Config(String),

    #[error("配置解析失败: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("未知错误: {0}")]
    Unknown(String),
}

impl PlayerError {
    /// 是否为单包级别的瞬时错误（记录日志后跳过即可）
    pub fn is_transient(&self) -> bool {
        match self {
            PlayerError::Decode(_) => true,
            // EAGAIN / 单包数据损坏
            #[cfg(feature = "ffmpeg")]
            PlayerError::FFmpegError(ffmpeg_next::Error::Other { errno: 11 })
            | PlayerError::FFmpegError(ffmpeg_next::Error::InvalidData) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(PlayerError::Decode("bad packet".into()).is_transient());
        assert!(!PlayerError::ContainerIo("eof in header".into()).is_transient());
        assert!(!PlayerError::NotFound("a.mp4".into()).is_transient());
    }

    #[test]
    fn test_invalid_state_message() {
        let err = PlayerError::InvalidState {
            state: "Idle",
            operation: "play",
        };
        assert!(err.to_string().contains("Idle"));
        assert!(err.to_string().contains("play"));
    }
}
