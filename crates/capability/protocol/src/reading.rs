//! 寄存器 → 读数还原

use crate::error::FrameError;
use crate::frame::Frame;
use crate::types::RegisterEncoding;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

/// 整数编码允许的最大原始值（9,999,999.99 单位），超出则视为非整数编码。
pub const MAX_SCALED_RAW: u32 = 999_999_999;

/// 默认解码顺序：先整数/100，再单精度浮点。
pub const DEFAULT_DECODERS: [RegisterEncoding; 2] = [
    RegisterEncoding::ScaledU32 { scale: 100 },
    RegisterEncoding::Float32,
];

/// 按默认顺序从读应答中还原读数
pub fn decode_reading(frame: &Frame) -> Result<Decimal, FrameError> {
    decode_reading_with(frame, &DEFAULT_DECODERS)
}

/// 按给定顺序尝试还原读数，第一个被接受的结果生效
pub fn decode_reading_with(
    frame: &Frame,
    decoders: &[RegisterEncoding],
) -> Result<Decimal, FrameError> {
    let registers = frame.registers()?;
    if registers.len() < 2 {
        return Err(FrameError::InvalidData(format!(
            "need 2 registers, got {}",
            registers.len()
        )));
    }
    let raw = (u32::from(registers[0]) << 16) | u32::from(registers[1]);

    let mut last_error = None;
    for decoder in decoders {
        match decode_raw(raw, *decoder) {
            Ok(value) => return Ok(value),
            Err(err) => last_error = Some(err),
        }
    }
    Err(last_error.unwrap_or_else(|| FrameError::InvalidData("no decoder configured".to_string())))
}

fn decode_raw(raw: u32, encoding: RegisterEncoding) -> Result<Decimal, FrameError> {
    match encoding {
        RegisterEncoding::ScaledU32 { scale } => {
            if scale == 0 {
                return Err(FrameError::InvalidData("zero scale".to_string()));
            }
            if raw > MAX_SCALED_RAW {
                return Err(FrameError::InvalidData(format!(
                    "scaled value out of range: {raw}"
                )));
            }
            Ok(Decimal::from(raw) / Decimal::from(scale))
        }
        RegisterEncoding::Float32 => {
            let value = f32::from_bits(raw);
            if !value.is_finite() {
                return Err(FrameError::InvalidData(format!("non-finite float: {value}")));
            }
            if value < 0.0 {
                return Err(FrameError::InvalidData(format!("negative reading: {value}")));
            }
            Decimal::from_f32(value)
                .map(|decimal| decimal.round_dp(2))
                .ok_or_else(|| FrameError::InvalidData(format!("unrepresentable float: {value}")))
        }
    }
}
