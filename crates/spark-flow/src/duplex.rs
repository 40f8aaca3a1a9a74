//! # duplex 模块说明
//!
//! ## 角色定位（Why）
//! - 把独立构造的入口（可写）与出口（可读）合并为一个双向句柄，外部调用方只面对一个对象，
//!   典型场景是把一整段流水线包装成“一个阶段”交给别的组件挂接；
//! - 句柄是静态结构体，逐方法显式委托给持有的子端点，构造期不改写任何方法表。
//!
//! ## 契约（What）
//! - 校验顺序：入口不可写 → [`ConfigurationError::IntakeNotConsumer`]；出口不可读 →
//!   [`ConfigurationError::OutletNotProducer`]；二者为同一阶段 → [`ConfigurationError::SameStage`]；
//! - 生产侧信号（`Readable`/`End`/`Close`）与数据观察点落在出口；消费侧信号
//!   （`Drain`/`Finish`/`Pipe`/`Unpipe`）落在入口；
//! - `Error` 是唯一跨侧的信号：句柄在两个子端点上各登记一个转发器，经 [`OccurrenceFilter`]
//!   去重后在自身中枢上发出；外部错误监听只登记在自身中枢，同一发生无论来自哪一侧、
//!   或两侧同时出现，都只通知一次；
//! - 一次性订阅在路由前先包上 [`OneShot`](spark_flow_core::OneShot) 守卫；
//! - 链式方法返回句柄本身；返回值的方法原样返回子端点的结果。
//!
//! ## 风险（Trade-offs）
//! - 句柄拥有独立的 [`StageId`]，与两个子端点的身份都不同；需要子端点身份时请使用
//!   [`CompositeHandle::intake`] / [`CompositeHandle::outlet`]。

use std::borrow::Cow;
use std::sync::{Arc, Weak};

use spark_flow_core::{
    ConfigurationError, Consumer, DataListener, FlowError, ListenerId, OccurrenceFilter, Producer,
    Readiness, Signal, SignalHub, SignalKind, SignalListener, SignalSide, Stage, StageExt,
    StageHandle, StageId, once,
};
use tracing::debug;

/// 错误转发核心：两个子端点的转发器共享同一去重器与中枢。
struct CompositeCore {
    hub: SignalHub,
    filter: OccurrenceFilter,
}

impl CompositeCore {
    fn relay(&self, error: &FlowError) -> usize {
        if self.filter.admit(error) {
            self.hub.emit(&Signal::Error(error.clone()))
        } else {
            0
        }
    }
}

/// 双工组合句柄。
pub struct CompositeHandle<I, O> {
    id: StageId,
    label: Cow<'static, str>,
    intake: Arc<dyn Consumer<I>>,
    outlet: Arc<dyn Producer<O>>,
    core: Arc<CompositeCore>,
    intake_relay: ListenerId,
    outlet_relay: ListenerId,
}

/// 组合入口与出口。
///
/// # 教案式说明
/// - **意图 (Why)**：入口与出口各自独立构造、各自维护背压，组合只负责统一对外视图；
/// - **契约 (What)**：校验失败时不产生任何订阅副作用；成功时返回的句柄同时具备两种能力；
/// - **逻辑 (How)**：先取能力视图并比对身份，再在两侧各登记一个只持有 `Weak` 的错误转发器。
pub fn compose<I, X, Y, O>(
    intake: &StageHandle<I, X>,
    outlet: &StageHandle<Y, O>,
) -> Result<Arc<CompositeHandle<I, O>>, ConfigurationError>
where
    I: Send + 'static,
    X: 'static,
    Y: 'static,
    O: Send + 'static,
{
    let writable = intake.require_consumer()?;
    let readable = outlet.require_producer()?;
    if intake.id() == outlet.id() {
        return Err(ConfigurationError::SameStage { id: intake.id() });
    }

    let core = Arc::new(CompositeCore {
        hub: SignalHub::new(),
        filter: OccurrenceFilter::new(),
    });
    let intake_relay = writable.subscribe(SignalKind::Error, relay_to(&core));
    let outlet_relay = readable.subscribe(SignalKind::Error, relay_to(&core));

    let id = StageId::next();
    let label = format!("duplex({} -> {})", intake.label(), outlet.label());
    debug!(
        stage = %id,
        intake = %intake.id(),
        outlet = %outlet.id(),
        "duplex composed"
    );
    Ok(Arc::new(CompositeHandle {
        id,
        label: Cow::Owned(label),
        intake: writable,
        outlet: readable,
        core,
        intake_relay,
        outlet_relay,
    }))
}

fn relay_to(core: &Arc<CompositeCore>) -> SignalListener {
    let core: Weak<CompositeCore> = Arc::downgrade(core);
    Arc::new(move |signal: &Signal| {
        if let (Some(core), Some(error)) = (core.upgrade(), signal.error()) {
            core.relay(error);
        }
    })
}

impl<I: Send + 'static, O: Send + 'static> CompositeHandle<I, O> {
    pub fn intake(&self) -> &Arc<dyn Consumer<I>> {
        &self.intake
    }

    pub fn outlet(&self) -> &Arc<dyn Producer<O>> {
        &self.outlet
    }

    pub fn handle(self: &Arc<Self>) -> StageHandle<I, O> {
        StageHandle::duplex(Arc::clone(self))
    }

    pub fn on<F>(&self, kind: SignalKind, listener: F) -> &Self
    where
        F: Fn(&Signal) + Send + Sync + 'static,
    {
        StageExt::on(self, kind, listener);
        self
    }

    pub fn once<F>(&self, kind: SignalKind, listener: F) -> &Self
    where
        F: Fn(&Signal) + Send + Sync + 'static,
    {
        StageExt::once(self, kind, listener);
        self
    }

    pub fn off(&self, id: ListenerId) -> &Self {
        Stage::unsubscribe(self, id);
        self
    }

    /// 清空监听器；错误转发器不受影响。
    ///
    /// - **风险 (Trade-offs)**：消费侧信号的清空直接作用于入口的中枢，`None` 或
    ///   `Some(SignalKind::Drain)` 会一并移除上游生产者登记在入口上的 `Drain` 等待者，
    ///   处于背压等待中的上游将不再被唤醒。背压周期内请只清空具体的非 `Drain` 种类。
    pub fn off_all(&self, kind: Option<SignalKind>) -> &Self {
        Stage::clear_listeners(self, kind);
        self
    }

    pub fn pause(&self) -> &Self {
        self.outlet.pause();
        self
    }

    pub fn resume(&self) -> &Self {
        self.outlet.resume();
        self
    }

    pub fn set_max_listeners(&self, limit: usize) -> &Self {
        Stage::set_max_listeners(self, limit);
        self
    }

    fn clear_kind(&self, kind: SignalKind) {
        match kind.side() {
            SignalSide::Production => self.outlet.clear_listeners(Some(kind)),
            SignalSide::Consumption => self.intake.clear_listeners(Some(kind)),
            SignalSide::Shared => self.core.hub.clear(Some(kind)),
        }
    }
}

impl<I: Send + 'static, O: Send + 'static> Stage for CompositeHandle<I, O> {
    fn id(&self) -> StageId {
        self.id
    }

    fn label(&self) -> Cow<'static, str> {
        self.label.clone()
    }

    fn signals(&self) -> &SignalHub {
        &self.core.hub
    }

    fn subscribe(&self, kind: SignalKind, listener: SignalListener) -> ListenerId {
        match kind.side() {
            SignalSide::Production => self.outlet.subscribe(kind, listener),
            SignalSide::Consumption => self.intake.subscribe(kind, listener),
            SignalSide::Shared => self.core.hub.subscribe(kind, listener),
        }
    }

    fn subscribe_once(&self, kind: SignalKind, listener: SignalListener) -> ListenerId {
        let guarded = once(listener);
        match kind.side() {
            SignalSide::Production => self.outlet.subscribe_once(kind, guarded),
            SignalSide::Consumption => self.intake.subscribe_once(kind, guarded),
            SignalSide::Shared => self.core.hub.subscribe_once(kind, guarded),
        }
    }

    fn unsubscribe(&self, id: ListenerId) -> bool {
        if id == self.intake_relay || id == self.outlet_relay {
            return false;
        }
        self.core.hub.unsubscribe(id) || self.outlet.unsubscribe(id) || self.intake.unsubscribe(id)
    }

    fn clear_listeners(&self, kind: Option<SignalKind>) {
        match kind {
            Some(kind) => self.clear_kind(kind),
            None => {
                for kind in SignalKind::ALL {
                    self.clear_kind(kind);
                }
            }
        }
    }

    fn listener_count(&self, kind: SignalKind) -> usize {
        match kind.side() {
            SignalSide::Production => self.outlet.listener_count(kind),
            SignalSide::Consumption => self.intake.listener_count(kind),
            SignalSide::Shared => self.core.hub.listener_count(kind),
        }
    }

    fn set_max_listeners(&self, limit: usize) {
        self.core.hub.set_max_listeners(limit);
        self.intake.set_max_listeners(limit);
        self.outlet.set_max_listeners(limit);
    }

    fn emit(&self, signal: Signal) -> usize {
        if let Signal::Error(error) = &signal {
            return self.core.relay(error);
        }
        match signal.kind().side() {
            SignalSide::Production => self.outlet.emit(signal),
            SignalSide::Consumption | SignalSide::Shared => self.intake.emit(signal),
        }
    }
}

impl<I: Send + 'static, O: Send + 'static> Consumer<I> for CompositeHandle<I, O> {
    fn write(&self, item: I) -> Result<Readiness, FlowError> {
        self.intake.write(item)
    }

    fn finish(&self) -> Result<(), FlowError> {
        self.intake.finish()
    }

    fn is_finished(&self) -> bool {
        self.intake.is_finished()
    }
}

impl<I: Send + 'static, O: Send + 'static> Producer<O> for CompositeHandle<I, O> {
    fn attach(&self, downstream: Arc<dyn Consumer<O>>) {
        self.outlet.attach(downstream);
    }

    fn detach(&self) -> Option<Arc<dyn Consumer<O>>> {
        self.outlet.detach()
    }

    fn read(&self) -> Option<O> {
        self.outlet.read()
    }

    fn pause(&self) {
        self.outlet.pause();
    }

    fn resume(&self) {
        self.outlet.resume();
    }

    fn is_paused(&self) -> bool {
        self.outlet.is_paused()
    }

    fn is_ended(&self) -> bool {
        self.outlet.is_ended()
    }

    fn tap(&self, listener: DataListener<O>) -> ListenerId {
        self.outlet.tap(listener)
    }

    fn untap(&self, id: ListenerId) -> bool {
        self.outlet.untap(id)
    }
}

impl<I, O> Drop for CompositeHandle<I, O> {
    fn drop(&mut self) {
        self.intake.unsubscribe(self.intake_relay);
        self.outlet.unsubscribe(self.outlet_relay);
    }
}
