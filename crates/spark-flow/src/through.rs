//! # through 模块说明
//!
//! ## 角色定位（Why）
//! - 所有逐条目转换（映射、过滤、字段替换、折叠……）共享同一个双工外壳 [`Through`]：
//!   写入侧执行转换，产出侧复用 [`Outbox`](crate::outbox::Outbox) 完成背压与终结转发；
//! - 具体转换只需实现 [`Transform`]，其索引、累加器等状态作为结构体字段显式保存。
//!
//! ## 契约（What）
//! - 写入在终结之后返回 `WriteAfterFinish`，重复终结返回 `AlreadyFinished`，二者都不发出信号；
//! - 转换失败时：已产出的条目照常交付，阶段发出一次 `Error` 信号并锁存该错误，之后的写入与终结
//!   都返回同一错误（同一发生），不会重复通知；
//! - 终结顺序：`Transform::flush` 产出的尾部条目入队 → 发出 `Finish` → 冲刷 → `End` →
//!   下游 `finish` → `Close`。
//!
//! ## 风险（Trade-offs）
//! - 转换函数在阶段内部锁中执行，不得回调所属阶段本身。

use std::borrow::Cow;
use std::marker::PhantomData;
use std::sync::Arc;
use std::vec::Vec;

use spark_flow_core::{
    Consumer, DataListener, FlowConfig, FlowError, FlowErrorKind, ListenerId, Producer, Readiness,
    Signal, SignalHub, Stage, StageHandle, StageId,
};
use spin::Mutex;
use tracing::warn;

use crate::outbox::Outbox;

/// 转换产出收集器。
#[derive(Debug)]
pub struct Emitter<O> {
    items: Vec<O>,
}

impl<O> Emitter<O> {
    pub(crate) fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub(crate) fn into_items(self) -> Vec<O> {
        self.items
    }

    pub fn push(&mut self, item: O) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// 逐条目转换逻辑。
///
/// - `apply`：处理一个条目，可产出零个或多个结果；
/// - `flush`：收到终结信号时调用一次，可产出尾部结果（例如折叠的最终累加值）。
pub trait Transform<I, O>: Send + 'static {
    fn apply(&mut self, item: I, out: &mut Emitter<O>) -> Result<(), FlowErrorKind>;

    fn flush(&mut self, _out: &mut Emitter<O>) -> Result<(), FlowErrorKind> {
        Ok(())
    }
}

struct ThroughState<X> {
    transform: X,
    finished: bool,
    failure: Option<FlowError>,
}

/// 以 [`Transform`] 驱动的双工阶段。
pub struct Through<I, O, X> {
    id: StageId,
    label: Cow<'static, str>,
    hub: Arc<SignalHub>,
    outbox: Arc<Outbox<O>>,
    state: Mutex<ThroughState<X>>,
    _input: PhantomData<fn(I)>,
}

impl<I, O, X> Through<I, O, X>
where
    I: Send + 'static,
    O: Send + 'static,
    X: Transform<I, O>,
{
    pub fn new(label: impl Into<Cow<'static, str>>, transform: X) -> Arc<Self> {
        Self::with_config(label, transform, &FlowConfig::default())
    }

    pub fn with_config(
        label: impl Into<Cow<'static, str>>,
        transform: X,
        config: &FlowConfig,
    ) -> Arc<Self> {
        let id = StageId::next();
        let hub = Arc::new(SignalHub::with_max_listeners(config.max_listeners));
        let outbox = Outbox::new(id, Arc::clone(&hub), config.high_water_mark, false, None);
        Arc::new(Self {
            id,
            label: label.into(),
            hub,
            outbox,
            state: Mutex::new(ThroughState {
                transform,
                finished: false,
                failure: None,
            }),
            _input: PhantomData,
        })
    }

    /// 包装为运行期句柄。
    pub fn handle(self: &Arc<Self>) -> StageHandle<I, O> {
        StageHandle::duplex(Arc::clone(self))
    }

    /// 当前锁存的失败，若有。
    pub fn failure(&self) -> Option<FlowError> {
        self.state.lock().failure.clone()
    }

    fn enqueue(&self, emitted: Emitter<O>) {
        for item in emitted.into_items() {
            self.outbox.push(item);
        }
    }

    fn raise(&self, error: &FlowError) {
        warn!(stage = %self.id, label = %self.label, code = error.code(), "transform failed");
        self.hub.emit(&Signal::Error(error.clone()));
    }
}

impl<I, O, X> Stage for Through<I, O, X>
where
    I: Send + 'static,
    O: Send + 'static,
    X: Transform<I, O>,
{
    fn id(&self) -> StageId {
        self.id
    }

    fn label(&self) -> Cow<'static, str> {
        self.label.clone()
    }

    fn signals(&self) -> &SignalHub {
        &self.hub
    }
}

impl<I, O, X> Consumer<I> for Through<I, O, X>
where
    I: Send + 'static,
    O: Send + 'static,
    X: Transform<I, O>,
{
    fn write(&self, item: I) -> Result<Readiness, FlowError> {
        let mut emitted = Emitter::new();
        let outcome = {
            let mut state = self.state.lock();
            if let Some(failure) = &state.failure {
                return Err(failure.clone());
            }
            if state.finished {
                return Err(FlowError::new(self.id, FlowErrorKind::WriteAfterFinish));
            }
            match state.transform.apply(item, &mut emitted) {
                Ok(()) => Ok(()),
                Err(kind) => {
                    let error = FlowError::new(self.id, kind);
                    state.failure = Some(error.clone());
                    Err(error)
                }
            }
        };

        self.enqueue(emitted);
        self.outbox.flush();
        if let Err(error) = outcome {
            self.raise(&error);
            return Err(error);
        }
        Ok(self.outbox.readiness())
    }

    fn finish(&self) -> Result<(), FlowError> {
        let mut emitted = Emitter::new();
        let outcome = {
            let mut state = self.state.lock();
            if let Some(failure) = &state.failure {
                return Err(failure.clone());
            }
            if state.finished {
                return Err(FlowError::new(self.id, FlowErrorKind::AlreadyFinished));
            }
            state.finished = true;
            match state.transform.flush(&mut emitted) {
                Ok(()) => Ok(()),
                Err(kind) => {
                    let error = FlowError::new(self.id, kind);
                    state.failure = Some(error.clone());
                    Err(error)
                }
            }
        };

        self.enqueue(emitted);
        if let Err(error) = outcome {
            self.outbox.flush();
            self.raise(&error);
            return Err(error);
        }
        self.outbox.close_input();
        self.hub.emit(&Signal::Finish);
        self.outbox.flush();
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.state.lock().finished
    }
}

impl<I, O, X> Producer<O> for Through<I, O, X>
where
    I: Send + 'static,
    O: Send + 'static,
    X: Transform<I, O>,
{
    fn attach(&self, downstream: Arc<dyn Consumer<O>>) {
        self.outbox.attach(downstream);
    }

    fn detach(&self) -> Option<Arc<dyn Consumer<O>>> {
        self.outbox.detach()
    }

    fn read(&self) -> Option<O> {
        self.outbox.read()
    }

    fn pause(&self) {
        self.outbox.pause();
    }

    fn resume(&self) {
        self.outbox.resume();
    }

    fn is_paused(&self) -> bool {
        self.outbox.is_paused()
    }

    fn is_ended(&self) -> bool {
        self.outbox.is_ended()
    }

    fn tap(&self, listener: DataListener<O>) -> ListenerId {
        self.outbox.tap(listener)
    }

    fn untap(&self, id: ListenerId) -> bool {
        self.outbox.untap(id)
    }
}
