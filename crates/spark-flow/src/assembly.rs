//! 流水线组装。
//!
//! - [`pipe`] 自左向右把相邻阶段两两挂接，返回原列表供调用方继续引用；
//! - [`head`] / [`tail`] 组装后返回首个 / 末个阶段；
//! - [`pipeline`] 组装后把首末两个阶段交给 [`compose`] 合成一个双向句柄。
//!
//! 能力校验在任何挂接发生之前完成：校验失败时拓扑保持原样。

use std::sync::Arc;
use std::vec::Vec;

use spark_flow_core::{ConfigurationError, Producer, StageHandle};
use tracing::debug;

use crate::duplex::{CompositeHandle, compose};

fn validate<T: 'static>(stages: &[StageHandle<T, T>]) -> Result<(), ConfigurationError> {
    if stages.is_empty() {
        return Err(ConfigurationError::EmptyPipeline);
    }
    for (index, pair) in stages.windows(2).enumerate() {
        if pair[0].producer().is_none() {
            return Err(ConfigurationError::MissingProducer {
                index,
                id: pair[0].id(),
            });
        }
        if pair[1].consumer().is_none() {
            return Err(ConfigurationError::MissingConsumer {
                index: index + 1,
                id: pair[1].id(),
            });
        }
    }
    Ok(())
}

fn wire<T: 'static>(stages: &[StageHandle<T, T>]) {
    for pair in stages.windows(2) {
        if let (Some(producer), Some(consumer)) = (pair[0].producer(), pair[1].consumer()) {
            producer.attach(Arc::clone(consumer));
        }
    }
    debug!(
        stages = stages.len(),
        head = %stages[0].id(),
        tail = %stages[stages.len() - 1].id(),
        "pipeline assembled"
    );
}

/// 挂接相邻阶段并原样返回列表。
pub fn pipe<T: 'static>(
    stages: Vec<StageHandle<T, T>>,
) -> Result<Vec<StageHandle<T, T>>, ConfigurationError> {
    validate(&stages)?;
    wire(&stages);
    Ok(stages)
}

/// 挂接后返回首个阶段，通常用于向整条流水线写入。
pub fn head<T: 'static>(
    stages: Vec<StageHandle<T, T>>,
) -> Result<StageHandle<T, T>, ConfigurationError> {
    pipe(stages)?
        .into_iter()
        .next()
        .ok_or(ConfigurationError::EmptyPipeline)
}

/// 挂接后返回末个阶段，通常用于从整条流水线读取。
pub fn tail<T: 'static>(
    stages: Vec<StageHandle<T, T>>,
) -> Result<StageHandle<T, T>, ConfigurationError> {
    pipe(stages)?
        .pop()
        .ok_or(ConfigurationError::EmptyPipeline)
}

/// 挂接后把首末阶段组合为一个双向句柄。
///
/// 单阶段列表的首末是同一阶段，返回 [`ConfigurationError::SameStage`]。组合校验先于挂接执行。
pub fn pipeline<T: Send + 'static>(
    stages: Vec<StageHandle<T, T>>,
) -> Result<Arc<CompositeHandle<T, T>>, ConfigurationError> {
    validate(&stages)?;
    let (first, last) = match (stages.first(), stages.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(ConfigurationError::EmptyPipeline),
    };
    let composite = compose(first, last)?;
    wire(&stages);
    Ok(composite)
}
