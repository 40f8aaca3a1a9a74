//! # clone 模块说明
//!
//! ## 角色定位（Why）
//! - 广播分叉器要求每个分支拿到结构独立的副本：任一分支修改自己的副本，不得影响其他分支；
//! - Rust 的 `Clone` 对 `Arc<T>` 只复制指针，会在分支之间共享内部可变状态，因此需要单独的
//!   [`DeepClone`] 语义。
//!
//! ## 设计要求（What）
//! - `DeepClone` 对拥有所有权的容器逐元素深拷贝；对 `Arc<T>` 重新分配，断开共享；
//! - [`CloneService`] 是分叉器的注入点，默认实现 [`DeepCloneService`] 委托 `DeepClone`，
//!   [`CloneWith`] 允许调用方以闭包自定义复制逻辑。

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

/// 结构深拷贝。
pub trait DeepClone {
    fn deep_clone(&self) -> Self;
}

macro_rules! deep_clone_by_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl DeepClone for $ty {
                fn deep_clone(&self) -> Self {
                    self.clone()
                }
            }
        )*
    };
}

deep_clone_by_value!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    f32,
    f64,
    String,
    &'static str,
    serde_json::Value,
);

impl<T: DeepClone> DeepClone for Option<T> {
    fn deep_clone(&self) -> Self {
        self.as_ref().map(DeepClone::deep_clone)
    }
}

impl<T: DeepClone> DeepClone for Box<T> {
    fn deep_clone(&self) -> Self {
        Box::new((**self).deep_clone())
    }
}

impl<T: DeepClone> DeepClone for Vec<T> {
    fn deep_clone(&self) -> Self {
        self.iter().map(DeepClone::deep_clone).collect()
    }
}

impl<T: DeepClone> DeepClone for VecDeque<T> {
    fn deep_clone(&self) -> Self {
        self.iter().map(DeepClone::deep_clone).collect()
    }
}

impl<K, V> DeepClone for BTreeMap<K, V>
where
    K: DeepClone + Ord,
    V: DeepClone,
{
    fn deep_clone(&self) -> Self {
        self.iter()
            .map(|(key, value)| (key.deep_clone(), value.deep_clone()))
            .collect()
    }
}

impl<K, V, S> DeepClone for HashMap<K, V, S>
where
    K: DeepClone + Eq + Hash,
    V: DeepClone,
    S: BuildHasher + Clone,
{
    fn deep_clone(&self) -> Self {
        let mut copy = HashMap::with_capacity_and_hasher(self.len(), self.hasher().clone());
        for (key, value) in self {
            copy.insert(key.deep_clone(), value.deep_clone());
        }
        copy
    }
}

impl<A: DeepClone, B: DeepClone> DeepClone for (A, B) {
    fn deep_clone(&self) -> Self {
        (self.0.deep_clone(), self.1.deep_clone())
    }
}

impl<A: DeepClone, B: DeepClone, C: DeepClone> DeepClone for (A, B, C) {
    fn deep_clone(&self) -> Self {
        (self.0.deep_clone(), self.1.deep_clone(), self.2.deep_clone())
    }
}

/// 重新分配共享指针，副本不再与原值共享任何内部状态。
impl<T: DeepClone> DeepClone for Arc<T> {
    fn deep_clone(&self) -> Self {
        Arc::new((**self).deep_clone())
    }
}

impl<T: DeepClone> DeepClone for spin::Mutex<T> {
    fn deep_clone(&self) -> Self {
        spin::Mutex::new(self.lock().deep_clone())
    }
}

impl<T: DeepClone> DeepClone for std::sync::Mutex<T> {
    fn deep_clone(&self) -> Self {
        let guard = self
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        std::sync::Mutex::new(guard.deep_clone())
    }
}

/// 条目复制服务。
///
/// # 教案式说明
/// - **意图 (Why)**：分叉器只依赖“给我一个独立副本”这一能力，不关心条目结构；
/// - **契约 (What)**：`duplicate` 的返回值与入参之间不得存在任何可观察的共享可变状态；
/// - **风险 (Trade-offs)**：自定义实现若返回浅拷贝，会破坏分支独立性，这一约束无法在类型层面检查。
pub trait CloneService<T>: Send + Sync {
    fn duplicate(&self, item: &T) -> T;
}

/// 基于 [`DeepClone`] 的默认复制服务。
#[derive(Clone, Copy, Debug, Default)]
pub struct DeepCloneService;

impl<T: DeepClone> CloneService<T> for DeepCloneService {
    fn duplicate(&self, item: &T) -> T {
        item.deep_clone()
    }
}

/// 以闭包实现的复制服务。
#[derive(Clone, Copy, Debug)]
pub struct CloneWith<F>(pub F);

impl<T, F> CloneService<T> for CloneWith<F>
where
    F: Fn(&T) -> T + Send + Sync,
{
    fn duplicate(&self, item: &T) -> T {
        (self.0)(item)
    }
}
