//! 一次性订阅守卫。
//!
//! # 教案式说明
//! - **意图 (Why)**：组合句柄上的一次性订阅可能经由多条路径被触发（例如同一错误从入口与出口
//!   同时到达），回调必须至多执行一次；仅靠“触发后移除注册”在重入场景下不够可靠；
//! - **契约 (What)**：[`OneShot`] 是只有两个状态的显式状态机：`Armed -> Fired`，迁移不可逆；
//! - **逻辑 (How)**：使用原子 `compare_exchange`，同线程重入与跨线程竞争下都只有一个调用者胜出。

use core::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::signal::{Signal, SignalListener};

const ARMED: u8 = 0;
const FIRED: u8 = 1;

/// 一次性守卫的可观察状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OneShotState {
    /// 尚未触发。
    Armed,
    /// 已触发，后续触发全部被忽略。
    Fired,
}

/// `Armed -> Fired` 状态机。
#[derive(Debug)]
pub struct OneShot {
    state: AtomicU8,
}

impl OneShot {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(ARMED),
        }
    }

    pub fn state(&self) -> OneShotState {
        match self.state.load(Ordering::Acquire) {
            ARMED => OneShotState::Armed,
            _ => OneShotState::Fired,
        }
    }

    /// 尝试从 `Armed` 迁移到 `Fired`，只有第一次调用返回 `true`。
    pub fn try_fire(&self) -> bool {
        self.state
            .compare_exchange(ARMED, FIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for OneShot {
    fn default() -> Self {
        Self::new()
    }
}

/// 将监听器包装为至多执行一次的版本。
pub fn once(listener: SignalListener) -> SignalListener {
    let gate = OneShot::new();
    Arc::new(move |signal: &Signal| {
        if gate.try_fire() {
            listener(signal);
        }
    })
}
