//! # signal 模块说明
//!
//! ## 角色定位（Why）
//! - 承载阶段的生命周期信号：可读、结束、关闭、排空、完成、挂接、摘除与错误；
//! - 把“信号属于生产侧还是消费侧”编码进 [`SignalKind::side`]，双工组合据此路由订阅。
//!
//! ## 设计要求（What）
//! - 监听器按种类注册，返回全局唯一的 [`ListenerId`]；
//! - 一次性注册在首次派发时即被移除，且额外受 [`OneShot`](crate::OneShot) 守卫保护；
//! - 没有监听者的 `Error` 信号不会被静默吞掉，而是以 `warn` 级别写入日志。
//!
//! ## 实现策略（How）
//! - 注册表由 `spin::Mutex` 保护；[`SignalHub::emit`] 在锁内复制匹配的监听器后释放锁，再逐个调用，
//!   因此监听器内部可以安全地重新订阅、退订或触发同一中枢。

use std::sync::Arc;
use std::vec::Vec;

use spin::Mutex;

use crate::error::FlowError;
use crate::ids::{ListenerId, StageId};
use crate::once::once;

/// 监听器默认上限，超过时仅告警，不拒绝注册。
pub const DEFAULT_MAX_LISTENERS: usize = 10;

/// 信号归属的一侧。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignalSide {
    /// 生产侧：条目产出生命周期。
    Production,
    /// 消费侧：写入与终结生命周期。
    Consumption,
    /// 两侧共有，仅 `Error`。
    Shared,
}

/// 信号种类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SignalKind {
    Readable,
    End,
    Close,
    Drain,
    Finish,
    Pipe,
    Unpipe,
    Error,
}

impl SignalKind {
    /// 全部种类，按声明顺序排列。
    pub const ALL: [SignalKind; 8] = [
        SignalKind::Readable,
        SignalKind::End,
        SignalKind::Close,
        SignalKind::Drain,
        SignalKind::Finish,
        SignalKind::Pipe,
        SignalKind::Unpipe,
        SignalKind::Error,
    ];

    pub const fn side(self) -> SignalSide {
        match self {
            SignalKind::Readable | SignalKind::End | SignalKind::Close => SignalSide::Production,
            SignalKind::Drain | SignalKind::Finish | SignalKind::Pipe | SignalKind::Unpipe => {
                SignalSide::Consumption
            }
            SignalKind::Error => SignalSide::Shared,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            SignalKind::Readable => "readable",
            SignalKind::End => "end",
            SignalKind::Close => "close",
            SignalKind::Drain => "drain",
            SignalKind::Finish => "finish",
            SignalKind::Pipe => "pipe",
            SignalKind::Unpipe => "unpipe",
            SignalKind::Error => "error",
        }
    }
}

/// 生命周期信号。
///
/// - `Readable`：拉模式下有条目可读；
/// - `End`：生产侧不会再产出条目；
/// - `Close`：阶段已向下游转发终结信号；
/// - `Drain`：先前返回 `Saturated` 的消费者恢复就绪；
/// - `Finish`：消费侧已处理终结信号；
/// - `Pipe` / `Unpipe`：上游挂接或摘除，携带上游身份；
/// - `Error`：终止性错误。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Signal {
    Readable,
    End,
    Close,
    Drain,
    Finish,
    Pipe(StageId),
    Unpipe(StageId),
    Error(FlowError),
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::Readable => SignalKind::Readable,
            Signal::End => SignalKind::End,
            Signal::Close => SignalKind::Close,
            Signal::Drain => SignalKind::Drain,
            Signal::Finish => SignalKind::Finish,
            Signal::Pipe(_) => SignalKind::Pipe,
            Signal::Unpipe(_) => SignalKind::Unpipe,
            Signal::Error(_) => SignalKind::Error,
        }
    }

    /// 若为错误信号则返回错误引用。
    pub fn error(&self) -> Option<&FlowError> {
        match self {
            Signal::Error(error) => Some(error),
            _ => None,
        }
    }
}

/// 信号监听器。
pub type SignalListener = Arc<dyn Fn(&Signal) + Send + Sync>;

struct Registration {
    id: ListenerId,
    kind: SignalKind,
    listener: SignalListener,
    once: bool,
}

struct HubEntries {
    registrations: Vec<Registration>,
    max_listeners: usize,
}

/// 单个阶段的信号中枢。
///
/// # 教案式说明
/// - **意图 (Why)**：为每个阶段提供独立的发布/订阅表，组合算子通过它转发或汇聚信号；
/// - **契约 (What)**：
///   - [`subscribe`](Self::subscribe) 永久注册，[`subscribe_once`](Self::subscribe_once) 至多触发一次；
///   - [`emit`](Self::emit) 返回本次实际调用的监听器数量；
///   - `max_listeners == 0` 表示不设上限；
/// - **逻辑 (How)**：派发前在锁内复制匹配项并移除一次性注册，锁外调用；
/// - **风险 (Trade-offs)**：注册表为线性 `Vec`，单阶段监听器数量通常个位数，线性扫描优于哈希。
pub struct SignalHub {
    entries: Mutex<HubEntries>,
}

impl SignalHub {
    pub fn new() -> Self {
        Self::with_max_listeners(DEFAULT_MAX_LISTENERS)
    }

    pub fn with_max_listeners(max_listeners: usize) -> Self {
        Self {
            entries: Mutex::new(HubEntries {
                registrations: Vec::new(),
                max_listeners,
            }),
        }
    }

    pub fn set_max_listeners(&self, max_listeners: usize) {
        self.entries.lock().max_listeners = max_listeners;
    }

    pub fn subscribe(&self, kind: SignalKind, listener: SignalListener) -> ListenerId {
        self.register(kind, listener, false)
    }

    pub fn subscribe_once(&self, kind: SignalKind, listener: SignalListener) -> ListenerId {
        self.register(kind, once(listener), true)
    }

    /// 按 ID 退订，返回是否命中。
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.registrations.len();
        entries.registrations.retain(|registration| registration.id != id);
        entries.registrations.len() != before
    }

    /// 清空指定种类（`None` 表示全部）的监听器。
    pub fn clear(&self, kind: Option<SignalKind>) {
        let mut entries = self.entries.lock();
        match kind {
            Some(kind) => entries
                .registrations
                .retain(|registration| registration.kind != kind),
            None => entries.registrations.clear(),
        }
    }

    pub fn listener_count(&self, kind: SignalKind) -> usize {
        self.entries
            .lock()
            .registrations
            .iter()
            .filter(|registration| registration.kind == kind)
            .count()
    }

    /// 派发信号。
    pub fn emit(&self, signal: &Signal) -> usize {
        let kind = signal.kind();
        let snapshot: Vec<SignalListener> = {
            let mut entries = self.entries.lock();
            let snapshot = entries
                .registrations
                .iter()
                .filter(|registration| registration.kind == kind)
                .map(|registration| Arc::clone(&registration.listener))
                .collect();
            entries
                .registrations
                .retain(|registration| !(registration.once && registration.kind == kind));
            snapshot
        };

        if snapshot.is_empty() {
            if let Signal::Error(error) = signal {
                tracing::warn!(
                    code = error.code(),
                    origin = %error.origin(),
                    error = %error,
                    "flow error emitted without any listener"
                );
            }
            return 0;
        }

        for listener in &snapshot {
            listener(signal);
        }
        snapshot.len()
    }

    fn register(&self, kind: SignalKind, listener: SignalListener, once: bool) -> ListenerId {
        let id = ListenerId::next();
        let mut entries = self.entries.lock();
        entries.registrations.push(Registration {
            id,
            kind,
            listener,
            once,
        });
        let count = entries
            .registrations
            .iter()
            .filter(|registration| registration.kind == kind)
            .count();
        if entries.max_listeners != 0 && count > entries.max_listeners {
            tracing::warn!(
                signal = kind.as_str(),
                count,
                limit = entries.max_listeners,
                "listener count exceeds the configured limit; possible leak"
            );
        }
        id
    }
}

impl Default for SignalHub {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for SignalHub {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let entries = self.entries.lock();
        f.debug_struct("SignalHub")
            .field("listeners", &entries.registrations.len())
            .field("max_listeners", &entries.max_listeners)
            .finish()
    }
}
