//! 设备生命周期状态码。
//!
//! 存储层使用十进制整数编码：六种操作 × 三个阶段，`P` 待处理、`P+1` 成功、`P+2` 失败，
//! 其中 `P ∈ {10, 20, 30, 40, 50, 60}`。进程内部统一使用 [`DeviceStatus`]，
//! 整数只在存储边界出现，调用方不再自行做 `+1`/`+2` 运算。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 下发操作类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Add,
    Delete,
    Update,
    Activate,
    Deactivate,
    TagUpdate,
}

impl OperationKind {
    pub const ALL: [OperationKind; 6] = [
        OperationKind::Add,
        OperationKind::Delete,
        OperationKind::Update,
        OperationKind::Activate,
        OperationKind::Deactivate,
        OperationKind::TagUpdate,
    ];

    /// 该操作的待处理码（十位数）。
    pub const fn base_code(self) -> i32 {
        match self {
            OperationKind::Add => 10,
            OperationKind::Delete => 20,
            OperationKind::Update => 30,
            OperationKind::Activate => 40,
            OperationKind::Deactivate => 50,
            OperationKind::TagUpdate => 60,
        }
    }

    pub fn from_base_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.base_code() == code)
    }

    /// 成功后会改变会话监控的标签集合（需要重启所在会话）。
    pub const fn changes_tag_set(self) -> bool {
        matches!(
            self,
            OperationKind::Add | OperationKind::Update | OperationKind::TagUpdate
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            OperationKind::Add => "add",
            OperationKind::Delete => "delete",
            OperationKind::Update => "update",
            OperationKind::Activate => "activate",
            OperationKind::Deactivate => "deactivate",
            OperationKind::TagUpdate => "tag_update",
        }
    }
}

/// 操作阶段。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Pending,
    Success,
    Failed,
}

impl Phase {
    const fn offset(self) -> i32 {
        match self {
            Phase::Pending => 0,
            Phase::Success => 1,
            Phase::Failed => 2,
        }
    }

    const fn from_offset(offset: i32) -> Option<Self> {
        match offset {
            0 => Some(Phase::Pending),
            1 => Some(Phase::Success),
            2 => Some(Phase::Failed),
            _ => None,
        }
    }
}

/// 设备状态：操作类型 + 阶段。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub kind: OperationKind,
    pub phase: Phase,
}

impl DeviceStatus {
    pub const fn new(kind: OperationKind, phase: Phase) -> Self {
        Self { kind, phase }
    }

    pub const fn pending(kind: OperationKind) -> Self {
        Self::new(kind, Phase::Pending)
    }

    /// 从存储层整数解析；不在 18 个合法值内返回 `None`。
    pub fn from_code(code: i32) -> Option<Self> {
        if code < 0 {
            return None;
        }
        let kind = OperationKind::from_base_code(code / 10 * 10)?;
        let phase = Phase::from_offset(code % 10)?;
        Some(Self::new(kind, phase))
    }

    pub const fn code(self) -> i32 {
        self.kind.base_code() + self.phase.offset()
    }

    pub const fn succeeded(self) -> Self {
        Self::new(self.kind, Phase::Success)
    }

    pub const fn failed(self) -> Self {
        Self::new(self.kind, Phase::Failed)
    }

    pub const fn is_pending(self) -> bool {
        matches!(self.phase, Phase::Pending)
    }

    /// 全部 18 个合法状态码（升序）。
    pub fn all_codes() -> impl Iterator<Item = i32> {
        OperationKind::ALL.into_iter().flat_map(|kind| {
            [Phase::Pending, Phase::Success, Phase::Failed]
                .into_iter()
                .map(move |phase| DeviceStatus::new(kind, phase).code())
        })
    }
}

impl TryFrom<i32> for DeviceStatus {
    type Error = InvalidStatusCode;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or(InvalidStatusCode(code))
    }
}

impl From<DeviceStatus> for i32 {
    fn from(status: DeviceStatus) -> Self {
        status.code()
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self.phase {
            Phase::Pending => "pending",
            Phase::Success => "success",
            Phase::Failed => "failed",
        };
        write!(f, "{}_{}({})", self.kind.as_str(), phase, self.code())
    }
}

/// 非法状态码。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidStatusCode(pub i32);

impl fmt::Display for InvalidStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid device status code: {}", self.0)
    }
}

impl std::error::Error for InvalidStatusCode {}

/// 待处理码对应的成功码；非待处理码返回 `None`。
pub fn success_code(code: i32) -> Option<i32> {
    DeviceStatus::from_code(code)
        .filter(|status| status.is_pending())
        .map(|status| status.succeeded().code())
}

/// 待处理码对应的失败码；非待处理码返回 `None`。
pub fn failed_code(code: i32) -> Option<i32> {
    DeviceStatus::from_code(code)
        .filter(|status| status.is_pending())
        .map(|status| status.failed().code())
}

pub fn is_pending_status(code: i32) -> bool {
    code % 10 == 0 && (10..=60).contains(&code)
}

/// "在线"状态判定策略。
///
/// 成功码 `11/31/41/61` 始终视为在线；`51`（停用成功）是否计入由
/// `include_deactivated` 决定。历史查询一直把 `51` 与其它成功码放在一起，
/// 默认保留该行为。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveStatusPolicy {
    pub include_deactivated: bool,
}

impl Default for LiveStatusPolicy {
    fn default() -> Self {
        Self {
            include_deactivated: true,
        }
    }
}

impl LiveStatusPolicy {
    pub fn is_live(&self, status: DeviceStatus) -> bool {
        if status.phase != Phase::Success {
            return false;
        }
        match status.kind {
            OperationKind::Add
            | OperationKind::Update
            | OperationKind::Activate
            | OperationKind::TagUpdate => true,
            OperationKind::Deactivate => self.include_deactivated,
            OperationKind::Delete => false,
        }
    }

    pub fn is_live_code(&self, code: i32) -> bool {
        DeviceStatus::from_code(code).is_some_and(|status| self.is_live(status))
    }

    /// 在线状态码列表（用于存储层 `status = any($n)` 查询）。
    pub fn live_codes(&self) -> Vec<i32> {
        DeviceStatus::all_codes()
            .filter(|code| self.is_live_code(*code))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_valid_code_round_trips() {
        let codes: Vec<i32> = DeviceStatus::all_codes().collect();
        assert_eq!(codes.len(), 18);
        for code in codes {
            let status = DeviceStatus::from_code(code).expect("valid");
            assert_eq!(status.code(), code);
        }
    }

    #[test]
    fn rejects_codes_outside_the_table() {
        for code in [-10, 0, 1, 9, 13, 19, 23, 63, 70, 100] {
            assert!(DeviceStatus::from_code(code).is_none(), "code {code}");
        }
    }

    #[test]
    fn success_and_failed_codes_are_offsets_of_pending() {
        for base in [10, 20, 30, 40, 50, 60] {
            assert_eq!(success_code(base), Some(base + 1));
            assert_eq!(failed_code(base), Some(base + 2));
        }
        assert_eq!(success_code(11), None);
        assert_eq!(failed_code(12), None);
    }

    #[test]
    fn pending_predicate_matches_decade_rule() {
        for code in -5..80 {
            let expected = code % 10 == 0 && (10..=60).contains(&code);
            assert_eq!(is_pending_status(code), expected, "code {code}");
            if let Some(status) = DeviceStatus::from_code(code) {
                assert_eq!(status.is_pending(), expected);
            }
        }
    }

    #[test]
    fn live_policy_controls_deactivate_success() {
        let default = LiveStatusPolicy::default();
        assert_eq!(default.live_codes(), vec![11, 31, 41, 51, 61]);

        let strict = LiveStatusPolicy {
            include_deactivated: false,
        };
        assert_eq!(strict.live_codes(), vec![11, 31, 41, 61]);
        assert!(!strict.is_live_code(21));
        assert!(!strict.is_live_code(10));
    }

    #[test]
    fn only_tag_changing_operations_request_restart() {
        let restart: Vec<_> = OperationKind::ALL
            .into_iter()
            .filter(|kind| kind.changes_tag_set())
            .collect();
        assert_eq!(
            restart,
            vec![
                OperationKind::Add,
                OperationKind::Update,
                OperationKind::TagUpdate
            ]
        );
    }
}
