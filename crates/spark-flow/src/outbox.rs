//! 生产侧推送引擎。
//!
//! # 教案式说明
//! - **意图 (Why)**：源阶段与转换阶段的产出端行为完全一致：排队、交付下游、遇到 `Saturated`
//!   时挂起并等待下游 `Drain`、输入关闭且队列清空后发出 `End` 并向下游转发终结信号；
//! - **契约 (What)**：
//!   - 条目按入队顺序交付，终结信号排在最后一个条目之后；
//!   - 下游终结信号至多转发一次；
//!   - 下游写入失败时该边终止，错误由下游自身负责暴露，这里只记录日志；
//! - **逻辑 (How)**：
//!   - 状态位全部由 `spin::Mutex` 保护，交付与回调均在锁外进行；
//!   - `flushing` + `reflush` 防止同线程重入时递归冲刷，内层调用只打标记，由外层循环补做；
//!   - `Drain` 等待者只持有 `Weak`，阶段被释放后回调自然失效；
//! - **风险 (Trade-offs)**：供给迭代器在锁内被推进，迭代器实现不得回调所属阶段。

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use spark_flow_core::{
    Consumer, DataListener, DataTaps, FlowError, ListenerId, Readiness, Signal, SignalHub,
    SignalKind, Stage, StageId,
};
use spin::Mutex;
use tracing::{debug, trace, warn};

/// 惰性条目供给。
pub(crate) type Supplier<T> = Box<dyn Iterator<Item = T> + Send>;

pub(crate) struct Outbox<T> {
    owner: StageId,
    hub: Arc<SignalHub>,
    taps: DataTaps<T>,
    high_water_mark: usize,
    state: Mutex<OutboxState<T>>,
    this: Weak<Outbox<T>>,
}

struct OutboxState<T> {
    queue: VecDeque<T>,
    supplier: Option<Supplier<T>>,
    downstream: Option<Arc<dyn Consumer<T>>>,
    drain_waiter: Option<ListenerId>,
    paused: bool,
    awaiting_drain: bool,
    broken: bool,
    need_drain: bool,
    input_closed: bool,
    ended: bool,
    flushing: bool,
    reflush: bool,
}

impl<T: Send + 'static> Outbox<T> {
    pub(crate) fn new(
        owner: StageId,
        hub: Arc<SignalHub>,
        high_water_mark: usize,
        paused: bool,
        supplier: Option<Supplier<T>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            owner,
            hub,
            taps: DataTaps::new(),
            high_water_mark: high_water_mark.max(1),
            state: Mutex::new(OutboxState {
                queue: VecDeque::new(),
                supplier,
                downstream: None,
                drain_waiter: None,
                paused,
                awaiting_drain: false,
                broken: false,
                need_drain: false,
                input_closed: false,
                ended: false,
                flushing: false,
                reflush: false,
            }),
            this: this.clone(),
        })
    }

    /// 入队一个待交付条目；拉模式下从空变为非空时发出 `Readable`。
    pub(crate) fn push(&self, item: T) {
        let announce = {
            let mut state = self.state.lock();
            let announce = state.queue.is_empty() && state.downstream.is_none();
            state.queue.push_back(item);
            announce
        };
        if announce {
            self.hub.emit(&Signal::Readable);
        }
    }

    /// 依据当前积压计算写入方应得到的就绪度；饱和时登记待发 `Drain`。
    pub(crate) fn readiness(&self) -> Readiness {
        let mut state = self.state.lock();
        if state.queue.len() >= self.high_water_mark {
            state.need_drain = true;
            Readiness::Saturated
        } else {
            Readiness::Ready
        }
    }

    pub(crate) fn close_input(&self) {
        self.state.lock().input_closed = true;
    }

    pub(crate) fn is_ended(&self) -> bool {
        self.state.lock().ended
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    pub(crate) fn pause(&self) {
        self.state.lock().paused = true;
    }

    pub(crate) fn resume(&self) {
        self.state.lock().paused = false;
        self.flush();
    }

    pub(crate) fn tap(&self, listener: DataListener<T>) -> ListenerId {
        self.taps.add(listener)
    }

    pub(crate) fn untap(&self, id: ListenerId) -> bool {
        self.taps.remove(id)
    }

    pub(crate) fn attach(&self, downstream: Arc<dyn Consumer<T>>) {
        let (previous, waiter, ended) = {
            let mut state = self.state.lock();
            let previous = state.downstream.replace(Arc::clone(&downstream));
            let waiter = state.drain_waiter.take();
            state.awaiting_drain = false;
            state.broken = false;
            (previous, waiter, state.ended)
        };
        if let Some(previous) = previous {
            if let Some(waiter) = waiter {
                previous.unsubscribe(waiter);
            }
            previous.emit(Signal::Unpipe(self.owner));
        }
        downstream.emit(Signal::Pipe(self.owner));
        debug!(stage = %self.owner, downstream = %downstream.id(), "downstream attached");

        if ended {
            if let Err(error) = downstream.finish() {
                debug!(stage = %self.owner, error = %error, "late downstream refused finalization");
            }
        } else {
            self.flush();
        }
    }

    pub(crate) fn detach(&self) -> Option<Arc<dyn Consumer<T>>> {
        let (previous, waiter) = {
            let mut state = self.state.lock();
            state.awaiting_drain = false;
            (state.downstream.take(), state.drain_waiter.take())
        };
        let previous = previous?;
        if let Some(waiter) = waiter {
            previous.unsubscribe(waiter);
        }
        previous.emit(Signal::Unpipe(self.owner));
        Some(previous)
    }

    pub(crate) fn read(&self) -> Option<T> {
        let item = {
            let mut state = self.state.lock();
            Self::next_item(&mut state)
        };
        if let Some(item) = &item {
            self.taps.notify(item);
        }
        self.settle();
        item
    }

    /// 尽可能多地向下游交付。
    pub(crate) fn flush(&self) {
        {
            let mut state = self.state.lock();
            if state.flushing {
                state.reflush = true;
                return;
            }
            state.flushing = true;
        }

        loop {
            let (downstream, item) = {
                let mut state = self.state.lock();
                match Self::next_delivery(&mut state) {
                    Some(delivery) => delivery,
                    None if state.reflush => {
                        state.reflush = false;
                        continue;
                    }
                    None => {
                        state.flushing = false;
                        break;
                    }
                }
            };

            self.taps.notify(&item);
            match downstream.write(item) {
                Ok(Readiness::Ready) => {}
                Ok(Readiness::Saturated) => self.await_drain(&downstream),
                Err(error) => self.sever(&error),
            }
        }

        self.settle();
    }

    fn next_item(state: &mut OutboxState<T>) -> Option<T> {
        if let Some(item) = state.queue.pop_front() {
            return Some(item);
        }
        if state.input_closed {
            return None;
        }
        let supplier = state.supplier.as_mut()?;
        match supplier.next() {
            Some(item) => Some(item),
            None => {
                state.supplier = None;
                state.input_closed = true;
                None
            }
        }
    }

    fn next_delivery(state: &mut OutboxState<T>) -> Option<(Arc<dyn Consumer<T>>, T)> {
        if state.paused || state.awaiting_drain || state.broken {
            return None;
        }
        let downstream = Arc::clone(state.downstream.as_ref()?);
        let item = Self::next_item(state)?;
        Some((downstream, item))
    }

    fn await_drain(&self, downstream: &Arc<dyn Consumer<T>>) {
        self.state.lock().awaiting_drain = true;
        trace!(
            stage = %self.owner,
            downstream = %downstream.id(),
            "downstream saturated; awaiting drain"
        );
        let this = self.this.clone();
        let waiter = downstream.subscribe_once(
            SignalKind::Drain,
            Arc::new(move |_signal: &Signal| {
                if let Some(outbox) = this.upgrade() {
                    outbox.on_drain();
                }
            }),
        );
        let mut state = self.state.lock();
        if state.awaiting_drain {
            state.drain_waiter = Some(waiter);
        }
    }

    fn on_drain(&self) {
        {
            let mut state = self.state.lock();
            state.awaiting_drain = false;
            state.drain_waiter = None;
        }
        self.flush();
    }

    fn sever(&self, error: &FlowError) {
        self.state.lock().broken = true;
        warn!(
            stage = %self.owner,
            code = error.code(),
            error = %error,
            "downstream failed; edge terminated"
        );
    }

    /// 冲刷结束后的收尾：补发 `Drain`，并在输入关闭且队列清空时结束生产。
    fn settle(&self) {
        let (drained, finale) = {
            let mut state = self.state.lock();
            if state.flushing {
                return;
            }
            let drained = state.need_drain && state.queue.is_empty();
            if drained {
                state.need_drain = false;
            }
            let finale = if state.input_closed && state.queue.is_empty() && !state.ended {
                state.ended = true;
                Some(if state.broken {
                    None
                } else {
                    state.downstream.clone()
                })
            } else {
                None
            };
            (drained, finale)
        };

        if drained {
            self.hub.emit(&Signal::Drain);
        }
        if let Some(downstream) = finale {
            debug!(stage = %self.owner, "production ended");
            self.hub.emit(&Signal::End);
            if let Some(downstream) = downstream
                && let Err(error) = downstream.finish()
            {
                debug!(stage = %self.owner, error = %error, "downstream refused finalization");
            }
            self.hub.emit(&Signal::Close);
        }
    }
}
