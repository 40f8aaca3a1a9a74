#![deny(unsafe_code)]
#![doc = r#"
# spark-flow

## 设计动机（Why）
- 在 `spark-flow-core` 的流控契约之上提供可直接组装的算子：源、汇、逐条目转换，以及三种
  组合结构：双工组合、广播分叉、条件路由；
- 所有算子共享同一套背压协议：写入返回 `Saturated` 后，生产者等待该消费者的 `Drain` 再继续。

## 核心契约（What）
- [`duplex::compose`]：入口 + 出口 → 一个双向句柄，错误对外恰好暴露一次；
- [`fork::Forker`]：深拷贝后广播到 N 个目的地，各目的地背压独立；
- [`router::Router`]：首个命中的谓词胜出，否则走默认目的地，否则丢弃；
- [`assembly`]：自左向右挂接阶段列表，可选地把首末阶段组合为双向句柄。

## 实现策略（How）
- 生产侧的排队、背压挂起与终结转发集中在内部 `Outbox`；多目的地的车道记账集中在内部
  `FanOut`，分叉器与路由器只决定条目的去向；
- 执行模型为单线程协作式：所有回调在锁外同步执行，重入通过标记位折叠为外层循环。

## 快速上手
```rust
use spark_flow::prelude::*;

let source = from_items(vec![1, 2, 3]);
let doubled = map(|value: i32, _index: usize| value * 2);
let sink = collect::<i32>();
pipe(&*source, Arc::clone(&doubled));
pipe(&*doubled, Arc::clone(&sink));
source.resume();
assert_eq!(sink.take(), vec![2, 4, 6]);
```
"#]

mod lanes;
mod outbox;

pub mod assembly;
pub mod duplex;
pub mod fork;
pub mod router;
pub mod sink;
pub mod source;
pub mod through;
pub mod transform;

/// 常用类型与构造函数的一站式导入。
pub mod prelude {
    pub use std::sync::Arc;

    pub use spark_flow_core::{
        CloneService, CloneWith, ConfigurationError, Consumer, DeepClone, FlowConfig, FlowError,
        FlowErrorKind, Producer, Readiness, Signal, SignalKind, Stage, StageExt, StageHandle,
        pipe,
    };

    pub use crate::assembly;
    pub use crate::duplex::{CompositeHandle, compose};
    pub use crate::fork::{Forker, fork};
    pub use crate::router::{Binding, Router, RouterBuilder};
    pub use crate::sink::{
        CollectSink, Collected, Discard, collect, collect_into, collect_with, discard, discard_with,
    };
    pub use crate::source::{IterSource, from_items};
    pub use crate::through::{Emitter, Through, Transform};
    pub use crate::transform::{
        FieldRule, Fields, clone_items, filter, fold, for_each, map, map_key, map_keys, reduce,
        through, try_map,
    };
}
