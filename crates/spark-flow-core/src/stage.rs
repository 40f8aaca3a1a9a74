//! # stage 模块说明
//!
//! ## 角色定位（Why）
//! - 定义流控契约：所有阶段共享 [`Stage`] 基础能力（身份、信号），并按需实现
//!   [`Consumer`]（可写）与 [`Producer`]（可读）；
//! - [`StageHandle`] 在运行期记录一个阶段拥有哪些能力，供双工组合与流水线组装做能力校验。
//!
//! ## 协议约束（What）
//! - `write` 返回 `Saturated` 后，生产者必须等待该消费者的 `Drain` 信号再推送；
//! - `finish` 至多生效一次，之后的写入返回 `WriteAfterFinish`；
//! - 消费者失败时先在自身中枢发出 `Error` 信号，再返回 `Err`；生产者随即停止使用该边；
//! - 沿单一路径的条目与终结信号保持发送顺序。
//!
//! ## 实现提示（How）
//! - 各方法均以 `&self` 接收，实现者自行以内部可变性维护状态，保证阶段可被 `Arc` 共享；
//! - 所有阶段都是 `Send + Sync`，条目类型需满足 `Send + 'static`。

use std::borrow::Cow;
use std::sync::Arc;
use std::vec::Vec;

use spin::Mutex;

use crate::error::{ConfigurationError, FlowError};
use crate::ids::{ListenerId, StageId};
use crate::readiness::Readiness;
use crate::signal::{Signal, SignalHub, SignalKind, SignalListener};

/// 阶段基础能力：身份与信号。
///
/// # 教案式说明
/// - **意图 (Why)**：无论阶段是源、汇还是转换，订阅与派发信号的方式都一致；
/// - **契约 (What)**：默认实现全部委托给 [`Stage::signals`]；组合句柄会覆盖这些方法，按信号
///   所属的一侧路由到子端点；
/// - **风险 (Trade-offs)**：`clear_listeners` 会同时移除其他阶段注册的内部等待者（例如上游的
///   `Drain` 等待），调用方需确认阶段不在活跃背压周期内。
pub trait Stage: Send + Sync {
    fn id(&self) -> StageId;

    /// 人类可读标签，仅用于日志与错误上下文。
    fn label(&self) -> Cow<'static, str> {
        Cow::Borrowed("stage")
    }

    fn signals(&self) -> &SignalHub;

    fn subscribe(&self, kind: SignalKind, listener: SignalListener) -> ListenerId {
        self.signals().subscribe(kind, listener)
    }

    fn subscribe_once(&self, kind: SignalKind, listener: SignalListener) -> ListenerId {
        self.signals().subscribe_once(kind, listener)
    }

    fn unsubscribe(&self, id: ListenerId) -> bool {
        self.signals().unsubscribe(id)
    }

    fn clear_listeners(&self, kind: Option<SignalKind>) {
        self.signals().clear(kind);
    }

    fn listener_count(&self, kind: SignalKind) -> usize {
        self.signals().listener_count(kind)
    }

    fn set_max_listeners(&self, limit: usize) {
        self.signals().set_max_listeners(limit);
    }

    fn emit(&self, signal: Signal) -> usize {
        self.signals().emit(&signal)
    }
}

/// 闭包友好的订阅入口。
pub trait StageExt: Stage {
    fn on<F>(&self, kind: SignalKind, listener: F) -> ListenerId
    where
        F: Fn(&Signal) + Send + Sync + 'static,
    {
        self.subscribe(kind, Arc::new(listener))
    }

    fn once<F>(&self, kind: SignalKind, listener: F) -> ListenerId
    where
        F: Fn(&Signal) + Send + Sync + 'static,
    {
        self.subscribe_once(kind, Arc::new(listener))
    }
}

impl<S: Stage + ?Sized> StageExt for S {}

/// 可写阶段。
pub trait Consumer<T>: Stage {
    /// 接收一个条目并报告即时就绪度。
    fn write(&self, item: T) -> Result<Readiness, FlowError>;

    /// 终结信号。
    fn finish(&self) -> Result<(), FlowError>;

    fn is_finished(&self) -> bool;
}

/// 可读阶段。
///
/// # 教案式说明
/// - **意图 (Why)**：生产者既支持推模式（挂接下游后主动推送），也支持拉模式（`read`）；
/// - **契约 (What)**：
///   - `attach` 替换当前下游，并向新下游发出 `Pipe(self.id())`，向旧下游发出 `Unpipe`；
///   - 对已结束的生产者调用 `attach` 会立即向新下游转发终结信号；
///   - 源阶段初始为暂停状态，`resume` 后开始产出；转换阶段初始即为流动状态；
///   - `tap` 注册的数据监听器在条目交付下游或被 `read` 取走时触发；
/// - **风险 (Trade-offs)**：一个生产者同一时刻只有一个下游，扇出请使用广播分叉器。
pub trait Producer<T>: Stage {
    fn attach(&self, downstream: Arc<dyn Consumer<T>>);

    fn detach(&self) -> Option<Arc<dyn Consumer<T>>>;

    fn read(&self) -> Option<T>;

    fn pause(&self);

    fn resume(&self);

    fn is_paused(&self) -> bool;

    fn is_ended(&self) -> bool;

    fn tap(&self, listener: DataListener<T>) -> ListenerId;

    fn untap(&self, id: ListenerId) -> bool;
}

/// 将 `downstream` 挂接到 `producer` 并原样返回，便于链式书写。
pub fn pipe<T, P, C>(producer: &P, downstream: Arc<C>) -> Arc<C>
where
    T: 'static,
    P: Producer<T> + ?Sized,
    C: Consumer<T> + 'static,
{
    let erased: Arc<dyn Consumer<T>> = downstream.clone();
    producer.attach(erased);
    downstream
}

/// 数据监听器。
pub type DataListener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// 生产者的数据观察点集合。
pub struct DataTaps<T> {
    listeners: Mutex<Vec<(ListenerId, DataListener<T>)>>,
}

impl<T> DataTaps<T> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, listener: DataListener<T>) -> ListenerId {
        let id = ListenerId::next();
        self.listeners.lock().push((id, listener));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(candidate, _)| *candidate != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 锁外依次通知全部观察点。
    pub fn notify(&self, item: &T) {
        let snapshot: Vec<DataListener<T>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(item);
        }
    }
}

impl<T> Default for DataTaps<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// 阶段能力位。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Capabilities {
    consumer: bool,
    producer: bool,
}

impl Capabilities {
    pub const NONE: Self = Self {
        consumer: false,
        producer: false,
    };
    pub const CONSUMER: Self = Self {
        consumer: true,
        producer: false,
    };
    pub const PRODUCER: Self = Self {
        consumer: false,
        producer: true,
    };
    pub const DUPLEX: Self = Self {
        consumer: true,
        producer: true,
    };

    pub const fn is_consumer(self) -> bool {
        self.consumer
    }

    pub const fn is_producer(self) -> bool {
        self.producer
    }

    pub const fn is_duplex(self) -> bool {
        self.consumer && self.producer
    }
}

/// 运行期阶段句柄：同一阶段的身份加上它实际具备的能力视图。
///
/// # 教案式说明
/// - **意图 (Why)**：双工组合与流水线组装需要在运行期判断“是否可写/可读”，并以身份判断
///   “入口与出口是否为同一对象”；
/// - **契约 (What)**：`I` 为写入条目类型，`O` 为产出条目类型；不具备的能力对应的类型参数不受约束；
/// - **逻辑 (How)**：内部保存类型擦除后的 `Arc<dyn Consumer<I>>` 与 `Arc<dyn Producer<O>>`，克隆廉价。
pub struct StageHandle<I, O> {
    id: StageId,
    label: Cow<'static, str>,
    consumer: Option<Arc<dyn Consumer<I>>>,
    producer: Option<Arc<dyn Producer<O>>>,
}

impl<I: 'static, O: 'static> StageHandle<I, O> {
    /// 仅可读的阶段。
    pub fn source<P>(stage: Arc<P>) -> Self
    where
        P: Producer<O> + 'static,
    {
        Self {
            id: stage.id(),
            label: stage.label(),
            consumer: None,
            producer: Some(stage),
        }
    }

    /// 仅可写的阶段。
    pub fn sink<C>(stage: Arc<C>) -> Self
    where
        C: Consumer<I> + 'static,
    {
        Self {
            id: stage.id(),
            label: stage.label(),
            consumer: Some(stage),
            producer: None,
        }
    }

    /// 可读可写的阶段。
    pub fn duplex<S>(stage: Arc<S>) -> Self
    where
        S: Consumer<I> + Producer<O> + 'static,
    {
        let consumer: Arc<dyn Consumer<I>> = stage.clone();
        Self {
            id: stage.id(),
            label: stage.label(),
            consumer: Some(consumer),
            producer: Some(stage),
        }
    }

    pub fn id(&self) -> StageId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            consumer: self.consumer.is_some(),
            producer: self.producer.is_some(),
        }
    }

    pub fn consumer(&self) -> Option<&Arc<dyn Consumer<I>>> {
        self.consumer.as_ref()
    }

    pub fn producer(&self) -> Option<&Arc<dyn Producer<O>>> {
        self.producer.as_ref()
    }

    /// 取出消费者视图，缺失时返回 [`ConfigurationError::IntakeNotConsumer`]。
    pub fn require_consumer(&self) -> Result<Arc<dyn Consumer<I>>, ConfigurationError> {
        self.consumer
            .clone()
            .ok_or_else(|| ConfigurationError::IntakeNotConsumer {
                id: self.id,
                label: self.label.to_string(),
            })
    }

    /// 取出生产者视图，缺失时返回 [`ConfigurationError::OutletNotProducer`]。
    pub fn require_producer(&self) -> Result<Arc<dyn Producer<O>>, ConfigurationError> {
        self.producer
            .clone()
            .ok_or_else(|| ConfigurationError::OutletNotProducer {
                id: self.id,
                label: self.label.to_string(),
            })
    }
}

impl<I, O> Clone for StageHandle<I, O> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            label: self.label.clone(),
            consumer: self.consumer.clone(),
            producer: self.producer.clone(),
        }
    }
}

impl<I, O> core::fmt::Debug for StageHandle<I, O> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StageHandle")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("consumer", &self.consumer.is_some())
            .field("producer", &self.producer.is_some())
            .finish()
    }
}
