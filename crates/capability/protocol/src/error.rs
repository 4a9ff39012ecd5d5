//! 报文解码错误类型定义

/// 报文解码错误
///
/// 解码错误从不重试，也不会留下任何持久化记录。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// 长度不足（地址 + 功能码 + 校验 至少 4 字节）
    #[error("frame too short: {0} bytes")]
    FrameTooShort(usize),

    /// CRC 校验失败
    #[error("invalid checksum: expected {expected:#06x}, got {actual:#06x}")]
    InvalidChecksum { expected: u16, actual: u16 },

    /// 非读寄存器功能码（写入应答、异常应答等）
    #[error("invalid function code: {0:#04x}")]
    InvalidFunction(u8),

    /// 负载内容不合法
    #[error("invalid data: {0}")]
    InvalidData(String),
}
