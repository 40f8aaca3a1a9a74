//! # transform 模块说明
//!
//! ## 角色定位（Why）
//! - 提供最常用的逐条目转换：直通、映射、可失败映射、过滤、旁路观察、字段替换、折叠与深拷贝；
//! - 每个转换都把“第几个条目”的索引与折叠累加器作为结构体字段保存，而不是藏在闭包捕获里。
//!
//! ## 契约（What）
//! - 回调收到的 `index` 从 0 开始，仅统计进入该阶段的条目（被过滤掉的条目同样计数）；
//! - [`fold`] 在终结时恰好产出一个条目（空输入时产出初始值）；[`reduce`] 以首个条目为种子，
//!   空输入时不产出任何条目；
//! - [`map_keys`] 中同名字段以最后声明的规则为准。
//!
//! ## 使用方式（How）
//! - 构造函数返回 `Arc<Through<..>>`，可直接 `attach`，也可通过 [`Through::handle`] 参与组装。

use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;
use std::sync::Arc;

use serde_json::Value;
use spark_flow_core::{CloneService, DeepClone, DeepCloneService, FlowErrorKind};
use tracing::trace;

use crate::through::{Emitter, Through, Transform};

/// 直通转换。
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl<T: Send + 'static> Transform<T, T> for Identity {
    fn apply(&mut self, item: T, out: &mut Emitter<T>) -> Result<(), FlowErrorKind> {
        out.push(item);
        Ok(())
    }
}

/// 带索引的映射。
pub struct Map<F> {
    f: F,
    index: usize,
}

impl<I, O, F> Transform<I, O> for Map<F>
where
    F: FnMut(I, usize) -> O + Send + 'static,
{
    fn apply(&mut self, item: I, out: &mut Emitter<O>) -> Result<(), FlowErrorKind> {
        let index = self.index;
        self.index += 1;
        out.push((self.f)(item, index));
        Ok(())
    }
}

/// 可失败映射：回调返回 `Err` 时阶段以业务失败终止。
pub struct TryMap<F> {
    f: F,
    index: usize,
}

impl<I, O, F> Transform<I, O> for TryMap<F>
where
    F: FnMut(I, usize) -> Result<O, String> + Send + 'static,
{
    fn apply(&mut self, item: I, out: &mut Emitter<O>) -> Result<(), FlowErrorKind> {
        let index = self.index;
        self.index += 1;
        let mapped = (self.f)(item, index).map_err(FlowErrorKind::stage)?;
        out.push(mapped);
        Ok(())
    }
}

/// 带索引的过滤。
pub struct Filter<F> {
    predicate: F,
    index: usize,
}

impl<T, F> Transform<T, T> for Filter<F>
where
    F: FnMut(&T, usize) -> bool + Send + 'static,
{
    fn apply(&mut self, item: T, out: &mut Emitter<T>) -> Result<(), FlowErrorKind> {
        let index = self.index;
        self.index += 1;
        if (self.predicate)(&item, index) {
            out.push(item);
        }
        Ok(())
    }
}

/// 旁路观察：回调只读条目，条目原样下传。
pub struct Inspect<F> {
    f: F,
    index: usize,
}

impl<T, F> Transform<T, T> for Inspect<F>
where
    F: FnMut(&T, usize) + Send + 'static,
{
    fn apply(&mut self, item: T, out: &mut Emitter<T>) -> Result<(), FlowErrorKind> {
        let index = self.index;
        self.index += 1;
        (self.f)(&item, index);
        out.push(item);
        Ok(())
    }
}

/// 可按键读写字段的条目。
pub trait Fields {
    type Value: Clone + Send + 'static;

    fn field(&self, key: &str) -> Option<&Self::Value>;

    fn set_field(&mut self, key: &str, value: Self::Value);
}

impl Fields for Value {
    type Value = Value;

    fn field(&self, key: &str) -> Option<&Value> {
        self.get(key)
    }

    /// 非对象值没有字段可写，保持原样。
    fn set_field(&mut self, key: &str, value: Value) {
        match self {
            Value::Object(map) => {
                map.insert(key.to_owned(), value);
            }
            _ => trace!(key, "field assignment skipped on a non-object value"),
        }
    }
}

impl<V: Clone + Send + 'static> Fields for BTreeMap<String, V> {
    type Value = V;

    fn field(&self, key: &str) -> Option<&V> {
        self.get(key)
    }

    fn set_field(&mut self, key: &str, value: V) {
        self.insert(key.to_owned(), value);
    }
}

impl<V, S> Fields for HashMap<String, V, S>
where
    V: Clone + Send + 'static,
    S: BuildHasher,
{
    type Value = V;

    fn field(&self, key: &str) -> Option<&V> {
        self.get(key)
    }

    fn set_field(&mut self, key: &str, value: V) {
        self.insert(key.to_owned(), value);
    }
}

/// 字段计算回调：`(当前值, 整个条目, 索引) -> 新值`。
pub type FieldFn<T> =
    Box<dyn FnMut(Option<<T as Fields>::Value>, &T, usize) -> <T as Fields>::Value + Send>;

/// 单个字段的替换规则。
pub enum FieldRule<T: Fields> {
    /// 由回调计算新值。
    Compute(FieldFn<T>),
    /// 写入固定值。
    Assign(T::Value),
}

impl<T: Fields> FieldRule<T> {
    pub fn compute<F>(f: F) -> Self
    where
        F: FnMut(Option<T::Value>, &T, usize) -> T::Value + Send + 'static,
    {
        Self::Compute(Box::new(f))
    }

    pub fn assign(value: T::Value) -> Self {
        Self::Assign(value)
    }
}

/// 字段替换转换。
pub struct MapKeys<T: Fields> {
    rules: Vec<(String, FieldRule<T>)>,
    index: usize,
}

impl<T: Fields> MapKeys<T> {
    /// 同名规则以后声明者为准，并移动到后声明的位置。
    pub fn new<K, R>(rules: R) -> Self
    where
        K: Into<String>,
        R: IntoIterator<Item = (K, FieldRule<T>)>,
    {
        let mut ordered: Vec<(String, FieldRule<T>)> = Vec::new();
        for (key, rule) in rules {
            let key = key.into();
            ordered.retain(|(existing, _)| *existing != key);
            ordered.push((key, rule));
        }
        Self {
            rules: ordered,
            index: 0,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|(key, _)| key.as_str())
    }
}

impl<T> Transform<T, T> for MapKeys<T>
where
    T: Fields + Send + 'static,
{
    fn apply(&mut self, mut item: T, out: &mut Emitter<T>) -> Result<(), FlowErrorKind> {
        let index = self.index;
        self.index += 1;
        for (key, rule) in &mut self.rules {
            let value = match rule {
                FieldRule::Compute(f) => {
                    let current = item.field(key).cloned();
                    f(current, &item, index)
                }
                FieldRule::Assign(value) => value.clone(),
            };
            item.set_field(key, value);
        }
        out.push(item);
        Ok(())
    }
}

/// 带初始值的折叠。
pub struct Fold<A, F> {
    accumulator: Option<A>,
    f: F,
    index: usize,
}

impl<I, A, F> Transform<I, A> for Fold<A, F>
where
    A: Send + 'static,
    F: FnMut(A, I, usize) -> A + Send + 'static,
{
    fn apply(&mut self, item: I, _out: &mut Emitter<A>) -> Result<(), FlowErrorKind> {
        let index = self.index;
        self.index += 1;
        if let Some(accumulator) = self.accumulator.take() {
            self.accumulator = Some((self.f)(accumulator, item, index));
        }
        Ok(())
    }

    fn flush(&mut self, out: &mut Emitter<A>) -> Result<(), FlowErrorKind> {
        if let Some(accumulator) = self.accumulator.take() {
            out.push(accumulator);
        }
        Ok(())
    }
}

/// 以首个条目为种子的折叠。
pub struct Reduce<T, F> {
    accumulator: Option<T>,
    f: F,
    index: usize,
}

impl<T, F> Transform<T, T> for Reduce<T, F>
where
    T: Send + 'static,
    F: FnMut(T, T, usize) -> T + Send + 'static,
{
    fn apply(&mut self, item: T, _out: &mut Emitter<T>) -> Result<(), FlowErrorKind> {
        let index = self.index;
        self.index += 1;
        self.accumulator = Some(match self.accumulator.take() {
            None => item,
            Some(accumulator) => (self.f)(accumulator, item, index),
        });
        Ok(())
    }

    fn flush(&mut self, out: &mut Emitter<T>) -> Result<(), FlowErrorKind> {
        if let Some(accumulator) = self.accumulator.take() {
            out.push(accumulator);
        }
        Ok(())
    }
}

/// 逐条目深拷贝，断开与上游持有者之间的共享。
pub struct Duplicate<C> {
    cloner: C,
}

impl<T, C> Transform<T, T> for Duplicate<C>
where
    C: CloneService<T> + 'static,
{
    fn apply(&mut self, item: T, out: &mut Emitter<T>) -> Result<(), FlowErrorKind> {
        out.push(self.cloner.duplicate(&item));
        Ok(())
    }
}

pub fn through<T: Send + 'static>() -> Arc<Through<T, T, Identity>> {
    Through::new("through", Identity)
}

pub fn map<I, O, F>(f: F) -> Arc<Through<I, O, Map<F>>>
where
    I: Send + 'static,
    O: Send + 'static,
    F: FnMut(I, usize) -> O + Send + 'static,
{
    Through::new("map", Map { f, index: 0 })
}

pub fn try_map<I, O, F>(f: F) -> Arc<Through<I, O, TryMap<F>>>
where
    I: Send + 'static,
    O: Send + 'static,
    F: FnMut(I, usize) -> Result<O, String> + Send + 'static,
{
    Through::new("try_map", TryMap { f, index: 0 })
}

pub fn filter<T, F>(predicate: F) -> Arc<Through<T, T, Filter<F>>>
where
    T: Send + 'static,
    F: FnMut(&T, usize) -> bool + Send + 'static,
{
    Through::new("filter", Filter {
        predicate,
        index: 0,
    })
}

pub fn for_each<T, F>(f: F) -> Arc<Through<T, T, Inspect<F>>>
where
    T: Send + 'static,
    F: FnMut(&T, usize) + Send + 'static,
{
    Through::new("for_each", Inspect { f, index: 0 })
}

/// 以回调替换单个字段。
pub fn map_key<T, F>(key: impl Into<String>, f: F) -> Arc<Through<T, T, MapKeys<T>>>
where
    T: Fields + Send + 'static,
    F: FnMut(Option<T::Value>, &T, usize) -> T::Value + Send + 'static,
{
    Through::new(
        "map_key",
        MapKeys::new([(key.into(), FieldRule::compute(f))]),
    )
}

/// 按规则表替换多个字段。
pub fn map_keys<T, K, R>(rules: R) -> Arc<Through<T, T, MapKeys<T>>>
where
    T: Fields + Send + 'static,
    K: Into<String>,
    R: IntoIterator<Item = (K, FieldRule<T>)>,
{
    Through::new("map_keys", MapKeys::new(rules))
}

pub fn fold<I, A, F>(initial: A, f: F) -> Arc<Through<I, A, Fold<A, F>>>
where
    I: Send + 'static,
    A: Send + 'static,
    F: FnMut(A, I, usize) -> A + Send + 'static,
{
    Through::new("fold", Fold {
        accumulator: Some(initial),
        f,
        index: 0,
    })
}

pub fn reduce<T, F>(f: F) -> Arc<Through<T, T, Reduce<T, F>>>
where
    T: Send + 'static,
    F: FnMut(T, T, usize) -> T + Send + 'static,
{
    Through::new("reduce", Reduce {
        accumulator: None,
        f,
        index: 0,
    })
}

pub fn clone_items<T>() -> Arc<Through<T, T, Duplicate<DeepCloneService>>>
where
    T: DeepClone + Send + 'static,
{
    Through::new("clone", Duplicate {
        cloner: DeepCloneService,
    })
}
