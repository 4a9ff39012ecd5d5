pub mod data;
pub mod status;

pub use data::{CommAddress, FrameEvent};
pub use status::{
    AccountStatus, CalcMode, CollectType, ConsumptionStatus, DeductionStatus, ServiceFeeKind,
    UnknownStatus,
};
