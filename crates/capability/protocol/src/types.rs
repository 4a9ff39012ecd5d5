//! 协议相关类型定义

/// 支持的功能码
///
/// 只识别读寄存器应答；写入应答、异常应答由流水线忽略。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionCode {
    /// 读保持寄存器 (0x03)
    ReadHoldingRegisters = 0x03,
    /// 读输入寄存器 (0x04)
    ReadInputRegisters = 0x04,
}

impl FunctionCode {
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x03 => Some(Self::ReadHoldingRegisters),
            0x04 => Some(Self::ReadInputRegisters),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// 两个连续寄存器还原读数的方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterEncoding {
    /// 32 位无符号整数（高字在前），除以 `scale` 恢复小数位
    ScaledU32 { scale: u32 },
    /// IEEE-754 单精度浮点（高字在前）
    Float32,
}
