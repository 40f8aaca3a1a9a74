//! 集成测试共享夹具。
//!
//! - [`GatedSink`]：可控背压的汇，达到容量后返回 `Saturated`，调用 [`GatedSink::release`] 后发出
//!   `Drain`；也可配置为在第 N 次写入时失败；
//! - [`SignalLog`]：按种类记录某个阶段发出的信号，便于断言“恰好一次”。
#![allow(dead_code)]

use std::borrow::Cow;
use std::sync::{Arc, Mutex};

use spark_flow::prelude::*;
use spark_flow_core::{SignalHub, StageId};

struct GateState<T> {
    items: Vec<T>,
    in_flight: usize,
    writes: usize,
    finishes: usize,
    failure: Option<FlowError>,
}

/// 容量受控、可注入失败的汇。
pub struct GatedSink<T> {
    id: StageId,
    hub: SignalHub,
    capacity: usize,
    fail_at: Option<usize>,
    state: Mutex<GateState<T>>,
}

impl<T: Send + 'static> GatedSink<T> {
    /// `capacity` 次写入后报告饱和，直到 `release`。
    pub fn new(capacity: usize) -> Arc<Self> {
        Self::build(capacity, None)
    }

    /// 从不饱和，在第 `write_index` 次写入（从 0 计）时失败。
    pub fn failing_at(write_index: usize) -> Arc<Self> {
        Self::build(usize::MAX, Some(write_index))
    }

    fn build(capacity: usize, fail_at: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            id: StageId::next(),
            hub: SignalHub::new(),
            capacity,
            fail_at,
            state: Mutex::new(GateState {
                items: Vec::new(),
                in_flight: 0,
                writes: 0,
                finishes: 0,
                failure: None,
            }),
        })
    }

    /// 清空在途计数并发出 `Drain`。
    pub fn release(&self) {
        self.state.lock().expect("夹具锁不应中毒").in_flight = 0;
        self.hub.emit(&Signal::Drain);
    }

    pub fn finishes(&self) -> usize {
        self.state.lock().expect("夹具锁不应中毒").finishes
    }

    pub fn failure(&self) -> Option<FlowError> {
        self.state.lock().expect("夹具锁不应中毒").failure.clone()
    }

    pub fn erased(self: &Arc<Self>) -> Arc<dyn Consumer<T>> {
        Arc::clone(self) as Arc<dyn Consumer<T>>
    }
}

impl<T: Clone + Send + 'static> GatedSink<T> {
    pub fn items(&self) -> Vec<T> {
        self.state.lock().expect("夹具锁不应中毒").items.clone()
    }
}

impl<T: Send + 'static> Stage for GatedSink<T> {
    fn id(&self) -> StageId {
        self.id
    }

    fn label(&self) -> Cow<'static, str> {
        Cow::Borrowed("gated")
    }

    fn signals(&self) -> &SignalHub {
        &self.hub
    }
}

impl<T: Send + 'static> Consumer<T> for GatedSink<T> {
    fn write(&self, item: T) -> Result<Readiness, FlowError> {
        let outcome = {
            let mut state = self.state.lock().expect("夹具锁不应中毒");
            if let Some(failure) = &state.failure {
                return Err(failure.clone());
            }
            let index = state.writes;
            state.writes += 1;
            if self.fail_at == Some(index) {
                let error = FlowError::stage_failure(self.id, "injected failure");
                state.failure = Some(error.clone());
                Err(error)
            } else {
                state.items.push(item);
                state.in_flight += 1;
                Ok(Readiness::from_bool(state.in_flight < self.capacity))
            }
        };
        if let Err(error) = &outcome {
            self.hub.emit(&Signal::Error(error.clone()));
        }
        outcome
    }

    fn finish(&self) -> Result<(), FlowError> {
        {
            let mut state = self.state.lock().expect("夹具锁不应中毒");
            state.finishes += 1;
            if state.finishes > 1 {
                return Err(FlowError::new(self.id, FlowErrorKind::AlreadyFinished));
            }
        }
        self.hub.emit(&Signal::Finish);
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.finishes() > 0
    }
}

/// 按种类记录信号。
pub struct SignalLog {
    entries: Arc<Mutex<Vec<Signal>>>,
}

impl SignalLog {
    /// 在 `stage` 上为每个给定种类注册一个记录监听器。
    pub fn attach<S: Stage + ?Sized>(stage: &S, kinds: &[SignalKind]) -> Self {
        let entries = Arc::new(Mutex::new(Vec::new()));
        for kind in kinds {
            let sink = Arc::clone(&entries);
            stage.on(*kind, move |signal: &Signal| {
                sink.lock().expect("记录锁不应中毒").push(signal.clone());
            });
        }
        Self { entries }
    }

    pub fn count(&self, kind: SignalKind) -> usize {
        self.entries
            .lock()
            .expect("记录锁不应中毒")
            .iter()
            .filter(|signal| signal.kind() == kind)
            .count()
    }

    pub fn kinds(&self) -> Vec<SignalKind> {
        self.entries
            .lock()
            .expect("记录锁不应中毒")
            .iter()
            .map(Signal::kind)
            .collect()
    }

    pub fn errors(&self) -> Vec<FlowError> {
        self.entries
            .lock()
            .expect("记录锁不应中毒")
            .iter()
            .filter_map(|signal| signal.error().cloned())
            .collect()
    }
}

/// 把具体汇擦除为 `Arc<dyn Consumer<T>>`。
pub fn erase<T, C>(stage: &Arc<C>) -> Arc<dyn Consumer<T>>
where
    C: Consumer<T> + 'static,
{
    Arc::clone(stage) as Arc<dyn Consumer<T>>
}
