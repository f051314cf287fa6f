pub mod data;
pub mod model;
pub mod status;

pub use data::{Quality, Sample, TagNotification, TagValue, now_epoch_ms};
pub use model::{
    Channel, Device, DeviceId, DriverConfig, DriverId, SecurityMode, SessionId, Tag, TagScope,
    WriteRequest, device_path, merge_tags,
};
pub use status::{
    DeviceStatus, InvalidStatusCode, LiveStatusPolicy, OperationKind, Phase, failed_code,
    is_pending_status, success_code,
};
