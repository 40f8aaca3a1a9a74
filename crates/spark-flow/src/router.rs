//! # router 模块说明
//!
//! ## 角色定位（Why）
//! - 按条件把每个条目送往至多一个目的地：第一个谓词命中者胜出，否则交给默认目的地，
//!   两者皆无则丢弃；
//! - 每个目的地的背压独立记账：某个目的地饱和，不会阻塞发往其他就绪目的地的条目。
//!
//! ## 契约（What）
//! - 绑定按配置顺序求值；命中的目的地收到未经复制的原条目；
//! - 写入返回该条目所去车道的写后就绪度；被丢弃的条目返回 `Ready`；
//! - 终结时每个目的地恰好收到一次终结信号，排在该目的地全部积压之后；
//! - 某个目的地失败时错误在路由器上恰好暴露一次；写入仍返回 `Ready`，上游边保持打开；
//!   之后发往该目的地的条目记录日志后丢弃，其他目的地照常接收条目并在终结时各自收到一次
//!   终结信号；
//! - 构造期校验：至少一个目的地；默认目的地至多一个且必须位于最后。

use std::borrow::Cow;
use std::sync::Arc;
use std::vec::Vec;

use spark_flow_core::{
    ConfigurationError, Consumer, FlowConfig, FlowError, FlowErrorKind, Readiness, SignalHub,
    Stage, StageHandle, StageId,
};
use tracing::{debug, trace};

use crate::lanes::{FailurePolicy, FanOut};

/// 路由谓词。
pub type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// 目的地绑定。
pub enum Binding<T> {
    /// 谓词命中时送往该目的地。
    When(Predicate<T>, Arc<dyn Consumer<T>>),
    /// 默认目的地。
    Otherwise(Arc<dyn Consumer<T>>),
}

impl<T> Binding<T> {
    pub fn when<F>(predicate: F, destination: Arc<dyn Consumer<T>>) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self::When(Arc::new(predicate), destination)
    }

    pub fn otherwise(destination: Arc<dyn Consumer<T>>) -> Self {
        Self::Otherwise(destination)
    }
}

/// 条件路由器。
pub struct Router<T> {
    id: StageId,
    predicates: Vec<Predicate<T>>,
    fallback: Option<usize>,
    fanout: Arc<FanOut<T>>,
}

impl<T: Send + 'static> Router<T> {
    pub fn new(bindings: Vec<Binding<T>>) -> Result<Arc<Self>, ConfigurationError> {
        Self::with_config(bindings, &FlowConfig::default())
    }

    /// 校验并构造。
    ///
    /// - **契约 (What)**：空绑定返回 [`ConfigurationError::NoDestinations`]；多个默认目的地返回
    ///   [`ConfigurationError::DuplicateFallback`]；默认目的地不在末尾返回
    ///   [`ConfigurationError::MisplacedFallback`]；
    /// - **逻辑 (How)**：谓词下标与车道下标一一对应，默认目的地占用最后一条车道。
    pub fn with_config(
        bindings: Vec<Binding<T>>,
        config: &FlowConfig,
    ) -> Result<Arc<Self>, ConfigurationError> {
        if bindings.is_empty() {
            return Err(ConfigurationError::NoDestinations);
        }
        let fallbacks = bindings
            .iter()
            .filter(|binding| matches!(binding, Binding::Otherwise(_)))
            .count();
        if fallbacks > 1 {
            return Err(ConfigurationError::DuplicateFallback);
        }
        if let Some(index) = bindings
            .iter()
            .position(|binding| matches!(binding, Binding::Otherwise(_)))
            && index + 1 != bindings.len()
        {
            return Err(ConfigurationError::MisplacedFallback { index });
        }

        let mut predicates = Vec::with_capacity(bindings.len());
        let mut destinations = Vec::with_capacity(bindings.len());
        let mut fallback = None;
        for binding in bindings {
            match binding {
                Binding::When(predicate, destination) => {
                    predicates.push(predicate);
                    destinations.push(destination);
                }
                Binding::Otherwise(destination) => {
                    fallback = Some(destinations.len());
                    destinations.push(destination);
                }
            }
        }

        let id = StageId::next();
        debug!(
            stage = %id,
            routes = predicates.len(),
            fallback = fallback.is_some(),
            "router constructed"
        );
        let fanout = FanOut::new(
            id,
            destinations,
            config.max_listeners,
            FailurePolicy::Isolate,
        );
        Ok(Arc::new(Self {
            id,
            predicates,
            fallback,
            fanout,
        }))
    }

    pub fn builder() -> RouterBuilder<T> {
        RouterBuilder::new()
    }

    /// 路由决策：返回目标车道下标，`None` 表示丢弃。
    pub fn select(&self, item: &T) -> Option<usize> {
        self.predicates
            .iter()
            .position(|predicate| predicate(item))
            .or(self.fallback)
    }

    pub fn handle<O: 'static>(self: &Arc<Self>) -> StageHandle<T, O> {
        StageHandle::sink(Arc::clone(self))
    }
}

/// 以链式调用收集绑定的构造器。
pub struct RouterBuilder<T> {
    bindings: Vec<Binding<T>>,
    config: FlowConfig,
}

impl<T: Send + 'static> RouterBuilder<T> {
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
            config: FlowConfig::default(),
        }
    }

    pub fn route<F>(mut self, predicate: F, destination: Arc<dyn Consumer<T>>) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.bindings.push(Binding::when(predicate, destination));
        self
    }

    pub fn fallback(mut self, destination: Arc<dyn Consumer<T>>) -> Self {
        self.bindings.push(Binding::otherwise(destination));
        self
    }

    pub fn config(mut self, config: FlowConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Arc<Router<T>>, ConfigurationError> {
        Router::with_config(self.bindings, &self.config)
    }
}

impl<T: Send + 'static> Default for RouterBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Stage for Router<T> {
    fn id(&self) -> StageId {
        self.id
    }

    fn label(&self) -> Cow<'static, str> {
        Cow::Borrowed("router")
    }

    fn signals(&self) -> &SignalHub {
        self.fanout.hub()
    }
}

impl<T: Send + 'static> Consumer<T> for Router<T> {
    fn write(&self, item: T) -> Result<Readiness, FlowError> {
        if self.fanout.is_input_finished() {
            return Err(FlowError::new(self.id, FlowErrorKind::WriteAfterFinish));
        }
        let Some(index) = self.select(&item) else {
            trace!(stage = %self.id, "no binding matched; item dropped");
            return Ok(Readiness::Ready);
        };
        match self.fanout.dispatch(index, item) {
            Ok(_) => Ok(self.fanout.backpressure(Some(index))),
            Err(error) => {
                debug!(
                    stage = %self.id,
                    lane = index,
                    code = error.code(),
                    "item routed to a failed destination; dropped"
                );
                Ok(Readiness::Ready)
            }
        }
    }

    fn finish(&self) -> Result<(), FlowError> {
        self.fanout.finish_all()
    }

    fn is_finished(&self) -> bool {
        self.fanout.is_input_finished()
    }
}
