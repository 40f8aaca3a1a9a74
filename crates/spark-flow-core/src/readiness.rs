//! 写入就绪度。

/// 消费者对一次写入的即时回应。
///
/// # 教案式说明
/// - **意图 (Why)**：把“是否可以继续推送”显式建模为枚举，替代裸布尔值，使背压分支在
///   `match` 中一目了然；
/// - **契约 (What)**：
///   - `Ready`：生产者可以立即推送下一条目；
///   - `Saturated`：条目已被接收，但生产者必须等待该消费者的 `Drain` 信号后再推送；
/// - **逻辑 (How)**：广播分叉需要对多个目的地的结果取逻辑与，因此提供 [`Readiness::and`]
///   与 [`Readiness::all`]；
/// - **风险 (Trade-offs)**：背压是建议性的，消费者在 `Saturated` 后仍可能收到条目，需自行排队。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Readiness {
    /// 可继续推送。
    Ready,
    /// 需等待 `Drain`。
    Saturated,
}

impl Readiness {
    /// 由布尔值构造，`true` 对应 `Ready`。
    pub const fn from_bool(ready: bool) -> Self {
        if ready { Self::Ready } else { Self::Saturated }
    }

    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }

    /// 逻辑与：任一方饱和即饱和。
    pub const fn and(self, other: Self) -> Self {
        Self::from_bool(self.is_ready() && other.is_ready())
    }

    /// 对一组就绪度取逻辑与；空集合视为 `Ready`。
    pub fn all<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        values.into_iter().fold(Self::Ready, Self::and)
    }
}

impl From<bool> for Readiness {
    fn from(ready: bool) -> Self {
        Self::from_bool(ready)
    }
}

impl From<Readiness> for bool {
    fn from(value: Readiness) -> Self {
        value.is_ready()
    }
}
