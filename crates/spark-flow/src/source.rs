//! 迭代器驱动的源阶段。
//!
//! - 源阶段初始处于暂停状态：挂接下游不会触发产出，调用 `resume` 后才开始推送，
//!   这样调用方可以先完成整条流水线的组装与监听注册；
//! - 迭代器按需推进，遇到下游饱和即停止，收到 `Drain` 后从断点继续；
//! - 迭代器耗尽后发出 `End`，向下游转发一次终结信号，随后发出 `Close`。

use std::borrow::Cow;
use std::sync::Arc;

use spark_flow_core::{
    Consumer, DataListener, FlowConfig, ListenerId, Producer, SignalHub, Stage, StageHandle,
    StageId,
};

use crate::outbox::Outbox;

/// 从迭代器产出条目的源。
pub struct IterSource<T> {
    id: StageId,
    hub: Arc<SignalHub>,
    outbox: Arc<Outbox<T>>,
}

impl<T: Send + 'static> IterSource<T> {
    pub fn new<I>(items: I) -> Arc<Self>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self::with_config(items, &FlowConfig::default())
    }

    pub fn with_config<I>(items: I, config: &FlowConfig) -> Arc<Self>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        let id = StageId::next();
        let hub = Arc::new(SignalHub::with_max_listeners(config.max_listeners));
        let outbox = Outbox::new(
            id,
            Arc::clone(&hub),
            config.high_water_mark,
            true,
            Some(Box::new(items.into_iter())),
        );
        Arc::new(Self { id, hub, outbox })
    }

    pub fn handle<I: 'static>(self: &Arc<Self>) -> StageHandle<I, T> {
        StageHandle::source(Arc::clone(self))
    }
}

/// 以任意可迭代集合构造源。
pub fn from_items<T, I>(items: I) -> Arc<IterSource<T>>
where
    T: Send + 'static,
    I: IntoIterator<Item = T>,
    I::IntoIter: Send + 'static,
{
    IterSource::new(items)
}

impl<T: Send + 'static> Stage for IterSource<T> {
    fn id(&self) -> StageId {
        self.id
    }

    fn label(&self) -> Cow<'static, str> {
        Cow::Borrowed("from_items")
    }

    fn signals(&self) -> &SignalHub {
        &self.hub
    }
}

impl<T: Send + 'static> Producer<T> for IterSource<T> {
    fn attach(&self, downstream: Arc<dyn Consumer<T>>) {
        self.outbox.attach(downstream);
    }

    fn detach(&self) -> Option<Arc<dyn Consumer<T>>> {
        self.outbox.detach()
    }

    fn read(&self) -> Option<T> {
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

    fn tap(&self, listener: DataListener<T>) -> ListenerId {
        self.outbox.tap(listener)
    }

    fn untap(&self, id: ListenerId) -> bool {
        self.outbox.untap(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pull_mode_reads_in_order_then_ends() {
        let source = from_items(vec![1, 2]);
        assert_eq!(source.read(), Some(1));
        assert!(!source.is_ended());
        assert_eq!(source.read(), Some(2));
        assert_eq!(source.read(), None);
        assert!(source.is_ended(), "迭代器耗尽后应结束生产");
    }
}
