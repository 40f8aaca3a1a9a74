//! 阶段与监听器标识。
//!
//! 两类标识都来自进程级单调计数器，保证在同一进程内全局唯一：
//! - [`StageId`] 用于身份判定（例如双工组合拒绝同一阶段同时担任入口与出口）；
//! - [`ListenerId`] 用于退订，组合句柄可以在多个子端点之间按 ID 查找而不会冲突。

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

static NEXT_STAGE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// 阶段身份标识。
///
/// - **契约 (What)**：同一对象始终返回同一 ID；不同对象的 ID 互不相同；
/// - **风险 (Trade-offs)**：计数器不回收，`u64` 空间足以覆盖任何实际进程生命周期。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StageId(u64);

impl StageId {
    /// 分配下一个阶段 ID。
    pub fn next() -> Self {
        Self(NEXT_STAGE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// 返回底层数值，主要用于日志字段。
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage#{}", self.0)
    }
}

/// 监听器注册标识，由 [`SignalHub`](crate::SignalHub) 与 [`DataTaps`](crate::DataTaps) 共同使用。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// 分配下一个监听器 ID。
    pub fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}
