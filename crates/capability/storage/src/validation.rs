//! 存储边界上的校验。
//!
//! 状态码只有 18 个合法值，写入前统一校验，避免非法整数落库。

use crate::error::StorageError;
use domain::{DeviceStatus, DriverId};

pub fn ensure_driver_id(driver_id: DriverId) -> Result<(), StorageError> {
    if driver_id <= 0 {
        return Err(StorageError::new(format!("invalid driver id: {driver_id}")));
    }
    Ok(())
}

/// 校验并解析状态码。
pub fn ensure_status_code(code: i32) -> Result<DeviceStatus, StorageError> {
    DeviceStatus::try_from(code).map_err(|err| StorageError::new(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_status_codes_outside_the_table() {
        assert!(ensure_status_code(11).is_ok());
        let err = ensure_status_code(13).expect_err("invalid");
        assert_eq!(err.message(), "invalid device status code: 13");
        assert!(ensure_driver_id(0).is_err());
    }
}
