//! # 电表报文解码
//!
//! 将采集器转发的二进制报文解析为电表读数。无 I/O、无共享状态。
//!
//! ## 报文格式
//!
//! ```text
//! ┌─────────┬──────────┬──────────────────────────┬────────────┐
//! │ address │ function │ payload                  │ crc16 (LE) │
//! │ 1 byte  │ 1 byte   │ byte_count + registers…  │ 2 bytes    │
//! └─────────┴──────────┴──────────────────────────┴────────────┘
//! ```
//!
//! ## 解码顺序
//!
//! 1. 长度 ≥ 4，否则 `FrameTooShort`
//! 2. CRC 校验（先于任何字段解析），否则 `InvalidChecksum`
//! 3. 功能码必须是读寄存器（0x03 / 0x04），否则 `InvalidFunction`
//! 4. 负载首字节为字节数，必须等于剩余负载长度，否则 `InvalidData`
//! 5. 前两个寄存器（大端）按 [`DEFAULT_DECODERS`] 顺序尝试还原读数
//!
//! ```rust,ignore
//! let frame = decode_frame(&bytes)?;
//! let value = decode_reading(&frame)?; // Decimal，例如 102.50
//! ```

mod crc;
mod error;
mod frame;
mod reading;
mod types;

pub use crc::crc16_modbus;
pub use error::FrameError;
pub use frame::{Frame, decode_frame, encode_frame};
pub use reading::{DEFAULT_DECODERS, MAX_SCALED_RAW, decode_reading, decode_reading_with};
pub use types::{FunctionCode, RegisterEncoding};
