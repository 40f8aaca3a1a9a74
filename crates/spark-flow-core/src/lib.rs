#![deny(unsafe_code)]
#![doc = r#"
# spark-flow-core

## 设计动机（Why）
- 为推送式、逐条目的流水线提供统一的流控契约：生产者、消费者、就绪度与生命周期信号；
- 让双工组合、广播分叉、条件路由等上层算子共享同一套错误与信号语义，避免各自发明协议；
- 将“错误恰好暴露一次”“一次性订阅至多触发一次”等不变式沉淀为可复用的基础类型。

## 核心契约（What）
- [`Consumer::write`] 返回 [`Readiness`]，`Saturated` 表示生产者必须等待该消费者的 `Drain` 信号；
- [`Consumer::finish`] 即终结信号：至多观察一次，之后不得再接收条目；
- 每个 [`FlowError`] 携带 [`OccurrenceId`]，组合算子借助 [`OccurrenceFilter`] 去重；
- [`DeepClone`] / [`CloneService`] 给出结构独立的副本，禁止分支之间出现别名共享。

## 实现策略（How）
- 所有共享状态使用 `spin::Mutex`，遵循“锁内快照、锁外回调”，保证同线程重入安全；
- 信号监听器以 `Arc<dyn Fn>` 存储，[`SignalHub::emit`] 先复制匹配列表再逐个调用；
- 配置通过 [`FlowConfig`] 由 TOML 载入，高水位与监听器上限在构造阶段即完成校验。
"#]

pub mod clone;
pub mod config;
pub mod error;
pub mod ids;
pub mod once;
pub mod readiness;
pub mod signal;
pub mod stage;

pub use clone::{CloneService, CloneWith, DeepClone, DeepCloneService};
pub use config::FlowConfig;
pub use error::{ConfigurationError, FlowError, FlowErrorKind, OccurrenceFilter, OccurrenceId};
pub use ids::{ListenerId, StageId};
pub use once::{OneShot, OneShotState, once};
pub use readiness::Readiness;
pub use signal::{Signal, SignalHub, SignalKind, SignalListener, SignalSide};
pub use stage::{
    Capabilities, Consumer, DataListener, DataTaps, Producer, Stage, StageExt, StageHandle, pipe,
};
