//! # lanes 模块说明
//!
//! ## 角色定位（Why）
//! - 广播分叉器与条件路由器都要面对同一个问题：一个上游、多个下游，每个下游的背压必须
//!   独立记账，终结信号必须在各自积压清空后恰好转发一次，错误必须恰好暴露一次；
//! - [`FanOut`] 把这部分机制集中实现，二者只负责决定“条目去往哪条车道”。
//!
//! ## 契约（What）
//! - 每条车道维护 `ready` 标记与积压队列：车道就绪且无积压时直接写入，否则排队；
//! - 车道收到目的地的 `Drain` 后按序补发积压，补发期间新到条目继续排队以保持顺序；
//! - `finish_all` 之后，每条车道在积压清空时恰好调用一次目的地的 `finish`；
//! - 目的地的错误无论经由写入返回值还是 `Error` 信号到达，都通过 [`OccurrenceFilter`] 去重后
//!   在所属阶段的中枢上发出一次；失败车道清空积压且不再转发终结信号；
//! - 全部车道清空且此前报告过饱和时发出 `Drain`；全部车道终结（或失败）后发出 `Finish`；
//! - [`FailurePolicy::Seal`] 下，首个车道失败即关闭输入：健康车道在积压清空后各自终结，
//!   不依赖上游再调用 `finish`。批量投递期间发生的失败推迟到批次结束再关闭，避免同一条目的
//!   其余副本落在已终结的车道上。
//!
//! ## 实现策略（How）
//! - 车道状态集中在一把 `spin::Mutex` 中，所有写入与回调在锁外进行；
//! - 车道级 `pumping` 标记防止补发过程被重入打乱顺序；
//! - 订阅目的地信号的闭包只持有 `Weak`，`Drop` 时主动退订。

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::vec::Vec;

use spark_flow_core::{
    Consumer, FlowError, FlowErrorKind, ListenerId, OccurrenceFilter, Readiness, Signal,
    SignalHub, SignalKind, Stage, StageId,
};
use spin::Mutex;
use tracing::{debug, trace, warn};

/// 车道失败后的处理方式。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FailurePolicy {
    /// 只隔离失败车道，其余车道继续接收条目。
    Isolate,
    /// 首个失败后关闭输入，健康车道在积压清空后终结。
    Seal,
}

struct Lane<T> {
    destination: Arc<dyn Consumer<T>>,
    ready: bool,
    backlog: VecDeque<T>,
    pumping: bool,
    finished: bool,
    failure: Option<FlowError>,
    drain_waiter: Option<ListenerId>,
    error_listener: Option<ListenerId>,
}

impl<T> Lane<T> {
    fn is_clear(&self) -> bool {
        self.failure.is_some() || (self.ready && self.backlog.is_empty() && !self.pumping)
    }

    fn is_settled(&self) -> bool {
        self.finished || self.failure.is_some()
    }
}

struct FanOutState<T> {
    lanes: Vec<Lane<T>>,
    need_drain: bool,
    input_finished: bool,
    completed: bool,
    batch_depth: usize,
    seal_pending: bool,
    first_failure: Option<FlowError>,
}

pub(crate) struct FanOut<T> {
    owner: StageId,
    policy: FailurePolicy,
    hub: SignalHub,
    filter: OccurrenceFilter,
    state: Mutex<FanOutState<T>>,
    this: Weak<FanOut<T>>,
}

impl<T: Send + 'static> FanOut<T> {
    pub(crate) fn new(
        owner: StageId,
        destinations: Vec<Arc<dyn Consumer<T>>>,
        max_listeners: usize,
        policy: FailurePolicy,
    ) -> Arc<Self> {
        let fanout = Arc::new_cyclic(|this: &Weak<Self>| Self {
            owner,
            policy,
            hub: SignalHub::with_max_listeners(max_listeners),
            filter: OccurrenceFilter::new(),
            state: Mutex::new(FanOutState {
                lanes: destinations
                    .into_iter()
                    .map(|destination| Lane {
                        destination,
                        ready: true,
                        backlog: VecDeque::new(),
                        pumping: false,
                        finished: false,
                        failure: None,
                        drain_waiter: None,
                        error_listener: None,
                    })
                    .collect(),
                need_drain: false,
                input_finished: false,
                completed: false,
                batch_depth: 0,
                seal_pending: false,
                first_failure: None,
            }),
            this: this.clone(),
        });
        fanout.watch_errors();
        fanout
    }

    fn watch_errors(&self) {
        let destinations: Vec<Arc<dyn Consumer<T>>> = self
            .state
            .lock()
            .lanes
            .iter()
            .map(|lane| Arc::clone(&lane.destination))
            .collect();
        for (index, destination) in destinations.into_iter().enumerate() {
            let this = self.this.clone();
            let id = destination.subscribe(
                SignalKind::Error,
                Arc::new(move |signal: &Signal| {
                    if let (Some(fanout), Some(error)) = (this.upgrade(), signal.error()) {
                        fanout.fail_lane(index, error.clone());
                    }
                }),
            );
            self.state.lock().lanes[index].error_listener = Some(id);
        }
    }

    pub(crate) fn hub(&self) -> &SignalHub {
        &self.hub
    }

    pub(crate) fn lane_count(&self) -> usize {
        self.state.lock().lanes.len()
    }

    pub(crate) fn is_input_finished(&self) -> bool {
        self.state.lock().input_finished
    }

    /// 时间上最早的车道失败。
    pub(crate) fn failure(&self) -> Option<FlowError> {
        self.state.lock().first_failure.clone()
    }

    /// 向指定车道投递条目，返回该车道在本次写入后的就绪度。
    pub(crate) fn dispatch(&self, index: usize, item: T) -> Result<Readiness, FlowError> {
        let destination = {
            let mut state = self.state.lock();
            let lane = &mut state.lanes[index];
            if let Some(failure) = &lane.failure {
                return Err(failure.clone());
            }
            if !lane.ready || lane.pumping || !lane.backlog.is_empty() {
                lane.backlog.push_back(item);
                trace!(
                    stage = %self.owner,
                    lane = index,
                    backlog = lane.backlog.len(),
                    "lane saturated; item deferred"
                );
                return Ok(Readiness::Saturated);
            }
            Arc::clone(&lane.destination)
        };
        self.deliver(index, &destination, item)
    }

    /// 依据车道状态给出写入方应得到的就绪度；饱和时登记待发 `Drain`。
    ///
    /// `scope` 为 `None` 时考察全部车道。同步完成排空的车道视为就绪。
    pub(crate) fn backpressure(&self, scope: Option<usize>) -> Readiness {
        let mut state = self.state.lock();
        let clear = match scope {
            Some(index) => state.lanes[index].is_clear(),
            None => state.lanes.iter().all(Lane::is_clear),
        };
        if !clear {
            state.need_drain = true;
        }
        Readiness::from_bool(clear)
    }

    /// 把同一条目的多次投递合并为一个批次；批次内发生的失败在批次结束后才关闭输入。
    pub(crate) fn batch<R>(&self, body: impl FnOnce() -> R) -> R {
        self.state.lock().batch_depth += 1;
        let outcome = body();
        let seal = {
            let mut state = self.state.lock();
            state.batch_depth -= 1;
            state.batch_depth == 0 && state.seal_pending
        };
        if seal {
            self.seal();
        }
        outcome
    }

    /// 输入终结：每条车道在积压清空后各自终结。
    pub(crate) fn finish_all(&self) -> Result<(), FlowError> {
        let Some(lanes) = self.close_input() else {
            return Err(FlowError::new(self.owner, FlowErrorKind::AlreadyFinished));
        };
        debug!(stage = %self.owner, lanes, "finalization requested");
        self.finalize_lanes(lanes);
        Ok(())
    }

    fn close_input(&self) -> Option<usize> {
        let mut state = self.state.lock();
        state.seal_pending = false;
        if state.input_finished {
            return None;
        }
        state.input_finished = true;
        Some(state.lanes.len())
    }

    fn finalize_lanes(&self, lanes: usize) {
        for index in 0..lanes {
            self.settle_lane(index);
        }
        self.settle();
    }

    fn seal(&self) {
        if let Some(lanes) = self.close_input() {
            debug!(stage = %self.owner, lanes, "input sealed after destination failure");
            self.finalize_lanes(lanes);
        }
    }

    fn deliver(
        &self,
        index: usize,
        destination: &Arc<dyn Consumer<T>>,
        item: T,
    ) -> Result<Readiness, FlowError> {
        match destination.write(item) {
            Ok(Readiness::Ready) => Ok(Readiness::Ready),
            Ok(Readiness::Saturated) => {
                self.await_lane_drain(index, destination);
                Ok(Readiness::Saturated)
            }
            Err(error) => {
                self.fail_lane(index, error.clone());
                Err(error)
            }
        }
    }

    fn await_lane_drain(&self, index: usize, destination: &Arc<dyn Consumer<T>>) {
        {
            let mut state = self.state.lock();
            let lane = &mut state.lanes[index];
            if lane.failure.is_some() || !lane.ready {
                return;
            }
            lane.ready = false;
        }
        trace!(stage = %self.owner, lane = index, "destination saturated; awaiting drain");
        let this = self.this.clone();
        let waiter = destination.subscribe_once(
            SignalKind::Drain,
            Arc::new(move |_signal: &Signal| {
                if let Some(fanout) = this.upgrade() {
                    fanout.on_lane_drain(index);
                }
            }),
        );
        let mut state = self.state.lock();
        let lane = &mut state.lanes[index];
        if !lane.ready {
            lane.drain_waiter = Some(waiter);
        }
    }

    fn on_lane_drain(&self, index: usize) {
        {
            let mut state = self.state.lock();
            let lane = &mut state.lanes[index];
            lane.ready = true;
            lane.drain_waiter = None;
        }
        self.pump(index);
    }

    /// 按序补发车道积压。
    fn pump(&self, index: usize) {
        {
            let mut state = self.state.lock();
            let lane = &mut state.lanes[index];
            if lane.pumping {
                return;
            }
            lane.pumping = true;
        }

        loop {
            let next = {
                let mut state = self.state.lock();
                let lane = &mut state.lanes[index];
                if lane.failure.is_some() || !lane.ready {
                    None
                } else {
                    lane.backlog
                        .pop_front()
                        .map(|item| (Arc::clone(&lane.destination), item))
                }
            };
            let Some((destination, item)) = next else {
                break;
            };
            if self.deliver(index, &destination, item).is_err() {
                break;
            }
        }

        self.state.lock().lanes[index].pumping = false;
        self.settle_lane(index);
        self.settle();
    }

    /// 若输入已终结且车道积压清空，向目的地转发终结信号。
    fn settle_lane(&self, index: usize) {
        let destination = {
            let mut state = self.state.lock();
            if !state.input_finished {
                return;
            }
            let lane = &mut state.lanes[index];
            if lane.is_settled() || lane.pumping || !lane.backlog.is_empty() {
                return;
            }
            lane.finished = true;
            Arc::clone(&lane.destination)
        };
        debug!(stage = %self.owner, lane = index, "forwarding finalization");
        if let Err(error) = destination.finish() {
            self.fail_lane(index, error);
        }
    }

    fn fail_lane(&self, index: usize, error: FlowError) {
        let seal_now = {
            let mut state = self.state.lock();
            let lane = &mut state.lanes[index];
            if lane.failure.is_none() {
                let dropped = lane.backlog.len();
                lane.backlog.clear();
                lane.failure = Some(error.clone());
                if dropped > 0 {
                    warn!(stage = %self.owner, lane = index, dropped, "deferred items discarded");
                }
            }
            if state.first_failure.is_none() {
                state.first_failure = Some(error.clone());
            }
            if self.policy == FailurePolicy::Seal && !state.input_finished {
                state.seal_pending = true;
                state.batch_depth == 0
            } else {
                false
            }
        };
        if self.filter.admit(&error) {
            warn!(
                stage = %self.owner,
                lane = index,
                code = error.code(),
                error = %error,
                "destination failed"
            );
            self.hub.emit(&Signal::Error(error));
        }
        if seal_now {
            self.seal();
        } else {
            self.settle();
        }
    }

    /// 汇总全部车道：补发 `Drain` 与 `Finish`。
    fn settle(&self) {
        let (drained, completed) = {
            let mut state = self.state.lock();
            let clear = state.lanes.iter().all(Lane::is_clear);
            let drained = state.need_drain && clear;
            if drained {
                state.need_drain = false;
            }
            let completed = state.input_finished
                && !state.completed
                && state.lanes.iter().all(Lane::is_settled);
            if completed {
                state.completed = true;
            }
            (drained, completed)
        };
        if drained {
            self.hub.emit(&Signal::Drain);
        }
        if completed {
            debug!(stage = %self.owner, "all lanes finalized");
            self.hub.emit(&Signal::Finish);
        }
    }
}

impl<T> Drop for FanOut<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for lane in &mut state.lanes {
            if let Some(id) = lane.error_listener.take() {
                lane.destination.unsubscribe(id);
            }
            if let Some(id) = lane.drain_waiter.take() {
                lane.destination.unsubscribe(id);
            }
        }
    }
}
