//! # sink 模块说明
//!
//! ## 角色定位（Why）
//! - [`CollectSink`]：把收到的条目累积为集合，终结时交给回调或写入调用方提供的 [`Collected`]；
//! - [`Discard`]：始终就绪、丢弃一切条目，终结时可选地触发回调，用于只关心副作用的流水线末端。
//!
//! ## 契约（What）
//! - 两者的写入永远返回 `Ready`；
//! - 终结后写入返回 `WriteAfterFinish`，重复终结返回 `AlreadyFinished`；
//! - 终结回调先于 `Finish` 信号执行。

use std::borrow::Cow;
use std::marker::PhantomData;
use std::sync::Arc;
use std::vec::Vec;

use spark_flow_core::{
    Consumer, FlowError, FlowErrorKind, Readiness, Signal, SignalHub, Stage, StageHandle, StageId,
};
use spin::Mutex;
use tracing::debug;

/// 调用方持有的共享收集目标。
///
/// 克隆句柄共享同一底层集合。
pub struct Collected<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T> Collected<T> {
    pub fn new() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 取走全部条目。
    pub fn take(&self) -> Vec<T> {
        core::mem::take(&mut *self.items.lock())
    }

    fn extend(&self, items: Vec<T>) {
        self.items.lock().extend(items);
    }
}

impl<T: Clone> Collected<T> {
    pub fn snapshot(&self) -> Vec<T> {
        self.items.lock().clone()
    }
}

impl<T> Clone for Collected<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<T> Default for Collected<T> {
    fn default() -> Self {
        Self::new()
    }
}

type CompletionFn<T> = Box<dyn FnOnce(Vec<T>) + Send>;

enum Completion<T> {
    Keep,
    Callback(CompletionFn<T>),
    Target(Collected<T>),
}

struct CollectState<T> {
    items: Vec<T>,
    finished: bool,
    completion: Completion<T>,
}

/// 收集型汇。
pub struct CollectSink<T> {
    id: StageId,
    hub: SignalHub,
    state: Mutex<CollectState<T>>,
}

impl<T: Send + 'static> CollectSink<T> {
    fn with_completion(completion: Completion<T>) -> Arc<Self> {
        Arc::new(Self {
            id: StageId::next(),
            hub: SignalHub::new(),
            state: Mutex::new(CollectState {
                items: Vec::new(),
                finished: false,
                completion,
            }),
        })
    }

    /// 仅在内部保留条目，可通过 [`CollectSink::take`] 取出。
    pub fn new() -> Arc<Self> {
        Self::with_completion(Completion::Keep)
    }

    /// 终结时把全部条目交给回调。
    pub fn with_callback<F>(callback: F) -> Arc<Self>
    where
        F: FnOnce(Vec<T>) + Send + 'static,
    {
        Self::with_completion(Completion::Callback(Box::new(callback)))
    }

    /// 终结时把全部条目追加到调用方提供的集合。
    pub fn into_target(target: Collected<T>) -> Arc<Self> {
        Self::with_completion(Completion::Target(target))
    }

    pub fn handle<O: 'static>(self: &Arc<Self>) -> StageHandle<T, O> {
        StageHandle::sink(Arc::clone(self))
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 取走尚留在汇内部的条目。
    pub fn take(&self) -> Vec<T> {
        core::mem::take(&mut self.state.lock().items)
    }
}

pub fn collect<T: Send + 'static>() -> Arc<CollectSink<T>> {
    CollectSink::new()
}

pub fn collect_with<T, F>(callback: F) -> Arc<CollectSink<T>>
where
    T: Send + 'static,
    F: FnOnce(Vec<T>) + Send + 'static,
{
    CollectSink::with_callback(callback)
}

pub fn collect_into<T: Send + 'static>(target: Collected<T>) -> Arc<CollectSink<T>> {
    CollectSink::into_target(target)
}

impl<T: Send + 'static> Stage for CollectSink<T> {
    fn id(&self) -> StageId {
        self.id
    }

    fn label(&self) -> Cow<'static, str> {
        Cow::Borrowed("collect")
    }

    fn signals(&self) -> &SignalHub {
        &self.hub
    }
}

impl<T: Send + 'static> Consumer<T> for CollectSink<T> {
    fn write(&self, item: T) -> Result<Readiness, FlowError> {
        let mut state = self.state.lock();
        if state.finished {
            return Err(FlowError::new(self.id, FlowErrorKind::WriteAfterFinish));
        }
        state.items.push(item);
        Ok(Readiness::Ready)
    }

    fn finish(&self) -> Result<(), FlowError> {
        let (items, completion) = {
            let mut state = self.state.lock();
            if state.finished {
                return Err(FlowError::new(self.id, FlowErrorKind::AlreadyFinished));
            }
            state.finished = true;
            match core::mem::replace(&mut state.completion, Completion::Keep) {
                Completion::Keep => (Vec::new(), Completion::Keep),
                completion => (core::mem::take(&mut state.items), completion),
            }
        };

        debug!(stage = %self.id, collected = items.len(), "collection finished");
        match completion {
            Completion::Keep => {}
            Completion::Callback(callback) => callback(items),
            Completion::Target(target) => target.extend(items),
        }
        self.hub.emit(&Signal::Finish);
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.state.lock().finished
    }
}

type DiscardFn = Box<dyn FnOnce() + Send>;

struct DiscardState {
    finished: bool,
    on_finish: Option<DiscardFn>,
}

/// 丢弃型汇。
pub struct Discard<T> {
    id: StageId,
    hub: SignalHub,
    state: Mutex<DiscardState>,
    _items: PhantomData<fn(T)>,
}

impl<T: Send + 'static> Discard<T> {
    pub fn new() -> Arc<Self> {
        Self::build(None)
    }

    pub fn with_callback<F>(on_finish: F) -> Arc<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        Self::build(Some(Box::new(on_finish)))
    }

    fn build(on_finish: Option<DiscardFn>) -> Arc<Self> {
        Arc::new(Self {
            id: StageId::next(),
            hub: SignalHub::new(),
            state: Mutex::new(DiscardState {
                finished: false,
                on_finish,
            }),
            _items: PhantomData,
        })
    }

    pub fn handle<O: 'static>(self: &Arc<Self>) -> StageHandle<T, O> {
        StageHandle::sink(Arc::clone(self))
    }
}

pub fn discard<T: Send + 'static>() -> Arc<Discard<T>> {
    Discard::new()
}

pub fn discard_with<T, F>(on_finish: F) -> Arc<Discard<T>>
where
    T: Send + 'static,
    F: FnOnce() + Send + 'static,
{
    Discard::with_callback(on_finish)
}

impl<T: Send + 'static> Stage for Discard<T> {
    fn id(&self) -> StageId {
        self.id
    }

    fn label(&self) -> Cow<'static, str> {
        Cow::Borrowed("discard")
    }

    fn signals(&self) -> &SignalHub {
        &self.hub
    }
}

impl<T: Send + 'static> Consumer<T> for Discard<T> {
    fn write(&self, _item: T) -> Result<Readiness, FlowError> {
        if self.state.lock().finished {
            return Err(FlowError::new(self.id, FlowErrorKind::WriteAfterFinish));
        }
        Ok(Readiness::Ready)
    }

    fn finish(&self) -> Result<(), FlowError> {
        let on_finish = {
            let mut state = self.state.lock();
            if state.finished {
                return Err(FlowError::new(self.id, FlowErrorKind::AlreadyFinished));
            }
            state.finished = true;
            state.on_finish.take()
        };
        if let Some(on_finish) = on_finish {
            on_finish();
        }
        self.hub.emit(&Signal::Finish);
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.state.lock().finished
    }
}
