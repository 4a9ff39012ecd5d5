//! 报文帧解析与编码

use crate::crc::crc16_modbus;
use crate::error::FrameError;
use crate::types::FunctionCode;

/// 地址 + 功能码 + CRC16
const MIN_FRAME_LEN: usize = 4;

/// 已通过校验的报文帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// 从站地址
    pub address: u8,
    pub function: FunctionCode,
    /// 负载（不含地址、功能码与校验）
    pub payload: Vec<u8>,
}

impl Frame {
    /// 读应答中的寄存器（大端 16 位）
    ///
    /// 负载首字节为声明的字节数，必须等于剩余负载长度且为偶数。
    pub fn registers(&self) -> Result<Vec<u16>, FrameError> {
        let (declared, data) = self
            .payload
            .split_first()
            .ok_or_else(|| FrameError::InvalidData("empty payload".to_string()))?;
        let declared = usize::from(*declared);
        if declared != data.len() {
            return Err(FrameError::InvalidData(format!(
                "byte count mismatch: declared {}, actual {}",
                declared,
                data.len()
            )));
        }
        if data.len() % 2 != 0 {
            return Err(FrameError::InvalidData(format!(
                "odd register byte count: {}",
                data.len()
            )));
        }
        Ok(data
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }
}

/// 解析报文帧
///
/// 校验在任何字段被信任之前完成；畸形输入只会返回错误，不会 panic。
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, FrameError> {
    if bytes.len() < MIN_FRAME_LEN {
        return Err(FrameError::FrameTooShort(bytes.len()));
    }

    let (body, checksum) = bytes.split_at(bytes.len() - 2);
    let actual = u16::from_le_bytes([checksum[0], checksum[1]]);
    let expected = crc16_modbus(body);
    if expected != actual {
        return Err(FrameError::InvalidChecksum { expected, actual });
    }

    let address = body[0];
    let function = FunctionCode::from_u8(body[1]).ok_or(FrameError::InvalidFunction(body[1]))?;

    Ok(Frame {
        address,
        function,
        payload: body[2..].to_vec(),
    })
}

/// 编码报文帧（追加 CRC，低字节在前）
pub fn encode_frame(address: u8, function: u8, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(payload.len() + MIN_FRAME_LEN);
    bytes.push(address);
    bytes.push(function);
    bytes.extend_from_slice(payload);
    let crc = crc16_modbus(&bytes);
    bytes.extend_from_slice(&crc.to_le_bytes());
    bytes
}
