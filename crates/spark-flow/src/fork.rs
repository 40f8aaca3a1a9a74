//! # fork 模块说明
//!
//! ## 角色定位（Why）
//! - 把一条条目流复制为 N 条彼此独立的分支：任一分支修改自己的副本，其他分支不受影响；
//! - 典型用法是同一份记录同时送往多条后续处理链，每条链各自做字段改写。
//!
//! ## 契约（What）
//! - [`Forker`] 只具备消费者能力，本身不产出条目；
//! - 每次写入为每个目的地各调用一次 [`CloneService::duplicate`]，分支之间不存在别名共享；
//! - 写入返回的就绪度为全部目的地写后就绪度的逻辑与；某个目的地饱和时，只有该目的地的条目
//!   进入积压，其他目的地照常立即写入；
//! - 终结时每个目的地恰好收到一次终结信号，且排在该目的地全部积压条目之后；
//! - 任一目的地失败：错误在分叉器上恰好暴露一次，已分发给健康目的地的积压继续交付，
//!   之后的写入一律以同一错误拒绝；分叉器随即关闭输入，健康目的地在积压清空后各自收到
//!   终结信号，无需上游再调用 `finish`。
//!
//! ## 风险（Trade-offs）
//! - 积压没有上限，背压依赖上游遵守 `Saturated` 协议。

use std::borrow::Cow;
use std::sync::Arc;
use std::vec::Vec;

use spark_flow_core::{
    CloneService, Consumer, DeepClone, DeepCloneService, FlowConfig, FlowError, FlowErrorKind,
    Readiness, SignalHub, Stage, StageHandle, StageId,
};

use crate::lanes::{FailurePolicy, FanOut};

/// 广播分叉器。
pub struct Forker<T> {
    id: StageId,
    cloner: Arc<dyn CloneService<T>>,
    fanout: Arc<FanOut<T>>,
}

impl<T: DeepClone + Send + 'static> Forker<T> {
    /// 使用 [`DeepClone`] 复制条目。
    pub fn new(destinations: Vec<Arc<dyn Consumer<T>>>) -> Arc<Self> {
        Self::with_cloner(destinations, Arc::new(DeepCloneService))
    }
}

impl<T: Send + 'static> Forker<T> {
    /// 使用自定义复制服务。
    pub fn with_cloner(
        destinations: Vec<Arc<dyn Consumer<T>>>,
        cloner: Arc<dyn CloneService<T>>,
    ) -> Arc<Self> {
        Self::with_config(destinations, cloner, &FlowConfig::default())
    }

    pub fn with_config(
        destinations: Vec<Arc<dyn Consumer<T>>>,
        cloner: Arc<dyn CloneService<T>>,
        config: &FlowConfig,
    ) -> Arc<Self> {
        let id = StageId::next();
        let fanout = FanOut::new(
            id,
            destinations,
            config.max_listeners,
            FailurePolicy::Seal,
        );
        Arc::new(Self { id, cloner, fanout })
    }

    pub fn handle<O: 'static>(self: &Arc<Self>) -> StageHandle<T, O> {
        StageHandle::sink(Arc::clone(self))
    }

    pub fn destination_count(&self) -> usize {
        self.fanout.lane_count()
    }
}

/// 以深拷贝语义把条目广播到全部目的地。
pub fn fork<T: DeepClone + Send + 'static>(destinations: Vec<Arc<dyn Consumer<T>>>) -> Arc<Forker<T>> {
    Forker::new(destinations)
}

impl<T: Send + 'static> Stage for Forker<T> {
    fn id(&self) -> StageId {
        self.id
    }

    fn label(&self) -> Cow<'static, str> {
        Cow::Borrowed("fork")
    }

    fn signals(&self) -> &SignalHub {
        self.fanout.hub()
    }
}

impl<T: Send + 'static> Consumer<T> for Forker<T> {
    fn write(&self, item: T) -> Result<Readiness, FlowError> {
        if let Some(failure) = self.fanout.failure() {
            return Err(failure);
        }
        if self.fanout.is_input_finished() {
            return Err(FlowError::new(self.id, FlowErrorKind::WriteAfterFinish));
        }

        let failure = self.fanout.batch(|| {
            let mut failure = None;
            for index in 0..self.fanout.lane_count() {
                let copy = self.cloner.duplicate(&item);
                if let Err(error) = self.fanout.dispatch(index, copy) {
                    failure.get_or_insert(error);
                }
            }
            failure
        });
        if let Some(error) = failure {
            return Err(error);
        }
        Ok(self.fanout.backpressure(None))
    }

    /// 失败锁存后输入已被关闭，返回锁存的错误。
    fn finish(&self) -> Result<(), FlowError> {
        if let Some(failure) = self.fanout.failure() {
            return Err(failure);
        }
        self.fanout.finish_all()
    }

    fn is_finished(&self) -> bool {
        self.fanout.is_input_finished()
    }
}
