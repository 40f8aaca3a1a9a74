//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 区分两类失败：构造期的 [`ConfigurationError`]（同步返回、不可重试）与运行期的
//!   [`FlowError`]（沿发生它的阶段作为终止通知传播）；
//! - 为“每次底层错误对每个外部监听者恰好暴露一次”提供身份基础：[`OccurrenceId`]。
//!
//! ## 设计要求（What）
//! - 所有错误实现 `thiserror::Error`，并提供稳定的 `flow.*` 错误码，便于日志检索；
//! - `FlowError` 的克隆保留同一 `OccurrenceId`，克隆不是新的发生。
//!
//! ## 扩展建议（How）
//! - 新增运行期错误类别时，在 [`FlowErrorKind`] 追加变体并同步 [`FlowError::code`]。

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use std::collections::BTreeSet;

use spin::Mutex;
use thiserror::Error;

use crate::ids::StageId;

static NEXT_OCCURRENCE: AtomicU64 = AtomicU64::new(1);

/// 一次底层错误发生的身份。
///
/// - **契约 (What)**：由 [`FlowError::new`] 分配；同一错误的所有克隆共享该值；
/// - **用途 (How)**：组合算子在多条转发路径上收到同一错误时据此去重。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OccurrenceId(u64);

impl OccurrenceId {
    fn next() -> Self {
        Self(NEXT_OCCURRENCE.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OccurrenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "occurrence#{}", self.0)
    }
}

/// 运行期错误类别。
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum FlowErrorKind {
    /// 终结信号之后仍有写入。
    #[error("item written after the finalization signal")]
    WriteAfterFinish,

    /// 终结信号被重复投递。
    #[error("finalization signal delivered more than once")]
    AlreadyFinished,

    /// 阶段自身的业务失败，例如转换函数拒绝某个条目。
    #[error("stage failure: {detail}")]
    Stage { detail: String },
}

impl FlowErrorKind {
    /// 便捷构造业务失败。
    pub fn stage(detail: impl Into<String>) -> Self {
        Self::Stage {
            detail: detail.into(),
        }
    }
}

/// 流水线运行期错误。
///
/// # 教案式说明
/// - **意图 (Why)**：错误可能同时沿入口与出口两条路径到达组合句柄，或既作为写入返回值又作为
///   `Error` 信号到达分叉器；必须能够识别“这是同一次发生”；
/// - **契约 (What)**：
///   - `origin`：首次发出错误的阶段；
///   - `occurrence`：发生身份，克隆保持不变，只有 [`FlowError::new`] 会分配新值；
/// - **逻辑 (How)**：`PartialEq` 比较全部字段，因此同一发生的克隆彼此相等；
/// - **风险 (Trade-offs)**：`detail` 以 `String` 保存，牺牲少量分配换取可读性。
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{kind} ({origin}, {occurrence})")]
pub struct FlowError {
    kind: FlowErrorKind,
    origin: StageId,
    occurrence: OccurrenceId,
}

impl FlowError {
    /// 记录一次新的错误发生。
    pub fn new(origin: StageId, kind: FlowErrorKind) -> Self {
        Self {
            kind,
            origin,
            occurrence: OccurrenceId::next(),
        }
    }

    /// 以业务失败描述构造新错误。
    pub fn stage_failure(origin: StageId, detail: impl Into<String>) -> Self {
        Self::new(origin, FlowErrorKind::stage(detail))
    }

    pub fn kind(&self) -> &FlowErrorKind {
        &self.kind
    }

    pub fn origin(&self) -> StageId {
        self.origin
    }

    pub fn occurrence(&self) -> OccurrenceId {
        self.occurrence
    }

    /// 判断两个错误是否源自同一次发生。
    pub fn same_occurrence(&self, other: &Self) -> bool {
        self.occurrence == other.occurrence
    }

    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self.kind {
            FlowErrorKind::WriteAfterFinish => "flow.write_after_finish",
            FlowErrorKind::AlreadyFinished => "flow.already_finished",
            FlowErrorKind::Stage { .. } => "flow.stage_failure",
        }
    }
}

/// 构造期配置错误。
///
/// 这些错误全部在构造函数中同步返回，调用方应修正拓扑后重建，而不是重试。
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// 双工组合的入口不具备消费者能力。
    #[error("intake `{label}` ({id}) is not writable")]
    IntakeNotConsumer { id: StageId, label: String },

    /// 双工组合的出口不具备生产者能力。
    #[error("outlet `{label}` ({id}) is not readable")]
    OutletNotProducer { id: StageId, label: String },

    /// 入口与出口是同一个阶段。
    #[error("intake and outlet are the same stage ({id})")]
    SameStage { id: StageId },

    /// 流水线组装收到空列表。
    #[error("pipeline requires at least one stage")]
    EmptyPipeline,

    /// 非末尾阶段缺少生产者能力，无法向后继推送。
    #[error("stage at position {index} ({id}) cannot feed its successor")]
    MissingProducer { index: usize, id: StageId },

    /// 非首个阶段缺少消费者能力，无法接收前驱推送。
    #[error("stage at position {index} ({id}) cannot receive from its predecessor")]
    MissingConsumer { index: usize, id: StageId },

    /// 路由器没有任何目的地。
    #[error("router requires at least one destination")]
    NoDestinations,

    /// 默认目的地出现多于一次。
    #[error("router accepts at most one default destination")]
    DuplicateFallback,

    /// 默认目的地不是最后一个绑定。
    #[error("default destination must be the last binding, found at position {index}")]
    MisplacedFallback { index: usize },

    /// 配置文件非法。
    #[error("invalid flow configuration: {detail}")]
    InvalidConfig { detail: String },
}

impl ConfigurationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::IntakeNotConsumer { .. } => "flow.config.intake_not_consumer",
            Self::OutletNotProducer { .. } => "flow.config.outlet_not_producer",
            Self::SameStage { .. } => "flow.config.same_stage",
            Self::EmptyPipeline => "flow.config.empty_pipeline",
            Self::MissingProducer { .. } => "flow.config.missing_producer",
            Self::MissingConsumer { .. } => "flow.config.missing_consumer",
            Self::NoDestinations => "flow.config.no_destinations",
            Self::DuplicateFallback => "flow.config.duplicate_fallback",
            Self::MisplacedFallback { .. } => "flow.config.misplaced_fallback",
            Self::InvalidConfig { .. } => "flow.config.invalid",
        }
    }
}

/// 错误发生去重器。
///
/// # 教案式说明
/// - **意图 (Why)**：组合句柄、分叉器、路由器会从多条路径观察到同一错误，外部监听者只能看到一次；
/// - **契约 (What)**：[`OccurrenceFilter::admit`] 对每个 [`OccurrenceId`] 仅在首次调用时返回 `true`；
/// - **风险 (Trade-offs)**：已见集合不做淘汰，生命周期与持有它的阶段相同。集合大小等于被观察
///   阶段在其生命周期内产生的不同发生数：同一发生的任意多份克隆只占一项；转换阶段与车道
///   均锁存首个失败并以同一发生拒绝后续写入，因此每个子端点通常只贡献一项。直接在子端点上
///   反复发出新构造的错误会使集合持续增长，需要重置时请重建组合阶段。
#[derive(Debug, Default)]
pub struct OccurrenceFilter {
    seen: Mutex<BTreeSet<OccurrenceId>>,
}

impl OccurrenceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 首次见到该发生时返回 `true` 并记录。
    pub fn admit(&self, error: &FlowError) -> bool {
        self.seen.lock().insert(error.occurrence())
    }

    /// 已记录的发生数量。
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
