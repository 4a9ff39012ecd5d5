/// 传输层投递的原始报文事件。
#[derive(Debug, Clone)]
pub struct FrameEvent {
    /// 主题中解析出的设备（采集器）标识。
    pub device_id: String,
    /// 报文中的协议子地址（从站地址）。
    pub sub_address: u8,
    pub payload: Vec<u8>,
    pub received_at_ms: i64,
}

/// 电表通信地址。
///
/// 优先使用 `设备标识 + 子地址` 的组合地址，查找失败时回退到子地址本身。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommAddress {
    pub device_id: String,
    pub sub_address: u8,
}

impl CommAddress {
    pub fn new(device_id: impl Into<String>, sub_address: u8) -> Self {
        Self {
            device_id: device_id.into(),
            sub_address,
        }
    }

    /// 组合地址，例如 `collector-01:3`。
    pub fn composite(&self) -> String {
        format!("{}:{}", self.device_id, self.sub_address)
    }

    /// 仅子地址的回退形式，例如 `3`。
    pub fn fallback(&self) -> String {
        self.sub_address.to_string()
    }

    /// 按查找优先级排列的候选地址（设备标识为空时只有回退地址）。
    pub fn candidates(&self) -> Vec<String> {
        if self.device_id.is_empty() {
            vec![self.fallback()]
        } else {
            vec![self.composite(), self.fallback()]
        }
    }
}
