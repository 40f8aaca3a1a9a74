//! `duplex_contract` 集成测试：验证双工组合句柄的校验、信号路由、错误去重与一次性订阅。
//!
//! # 测试目标（Why）
//! - 组合句柄对外必须表现为单个双向阶段：写入落在入口，读取来自出口；
//! - 错误是唯一跨侧的信号，同一发生无论来自入口、出口还是两侧，外部只能看到一次；
//! - 一次性订阅无论经由哪条转发路径都至多触发一次；
//! - 链式方法返回句柄本身。
//!
//! # 结构安排（How）
//! - 典型拓扑：入口 `double` 挂接到出口 `increment`，二者组合为一个句柄；
//! - 错误场景通过 `try_map` 或直接在子端点上发出 `Error` 信号构造。

mod support;

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use spark_flow::prelude::*;
use spark_flow_core::StageId;
use support::SignalLog;

type Relay = Arc<dyn Consumer<i32>>;

/// 构造 `double → increment` 两段并返回组合句柄与两个子端点。
fn double_then_increment() -> (
    Arc<CompositeHandle<i32, i32>>,
    Arc<Through<i32, i32, spark_flow::transform::Map<fn(i32, usize) -> i32>>>,
    Arc<Through<i32, i32, spark_flow::transform::Map<fn(i32, usize) -> i32>>>,
) {
    let double = map((|value: i32, _index: usize| value * 2) as fn(i32, usize) -> i32);
    let increment = map((|value: i32, _index: usize| value + 1) as fn(i32, usize) -> i32);
    pipe(&*double, Arc::clone(&increment));
    let composite = compose(&double.handle(), &increment.handle()).expect("合法组合应成功");
    (composite, double, increment)
}

/// 验证校验顺序：入口不可写、出口不可读、二者相同分别得到对应错误。
///
/// # 契约校验（What）
/// - 入口为纯源 → `IntakeNotConsumer`；
/// - 出口为纯汇 → `OutletNotProducer`；
/// - 同一阶段 → `SameStage`，错误携带该阶段身份。
#[test]
fn composition_validates_capabilities_and_identity() {
    let source = from_items(vec![1]);
    let sink = collect::<i32>();
    let relay = through::<i32>();

    let not_writable = compose(&source.handle::<i32>(), &relay.handle()).err();
    assert!(matches!(
        not_writable,
        Some(ConfigurationError::IntakeNotConsumer { id, .. }) if id == source.id()
    ));

    let not_readable = compose(&relay.handle(), &sink.handle::<i32>()).err();
    assert!(matches!(
        not_readable,
        Some(ConfigurationError::OutletNotProducer { .. })
    ));

    let same = compose(&relay.handle(), &relay.handle()).err();
    assert_eq!(same, Some(ConfigurationError::SameStage { id: relay.id() }));

    let both_wrong = compose(&source.handle::<i32>(), &sink.handle::<i32>()).err();
    assert_eq!(
        both_wrong.map(|error| error.code()),
        Some("flow.config.intake_not_consumer"),
        "入口校验先于出口校验"
    );
}

/// 验证写入委托给入口、读取委托给出口，返回值原样透传。
#[test]
fn values_flow_through_the_composite() {
    let (composite, double, increment) = double_then_increment();

    assert_eq!(composite.write(5).expect("写入应成功"), Readiness::Ready);
    assert_eq!(composite.read(), Some(11));
    assert_eq!(composite.read(), None);

    composite.finish().expect("终结应成功");
    assert!(double.is_finished());
    assert!(composite.is_finished());
    assert!(composite.is_ended(), "入口终结沿内部链路传到出口");
    assert!(increment.is_ended());
    assert_ne!(composite.id(), double.id());
    assert_ne!(composite.id(), increment.id());
}

/// 验证组合句柄可作为流水线中的一个阶段被挂接。
#[test]
fn composite_participates_in_pipelines() {
    let (composite, _double, _increment) = double_then_increment();
    let source = from_items(vec![1, 2, 3]);
    let sink = collect::<i32>();

    pipe(&*source, Arc::clone(&composite));
    pipe(&*composite, Arc::clone(&sink));
    source.resume();

    assert_eq!(sink.take(), vec![3, 5, 7]);
    assert!(sink.is_finished());
}

/// 验证信号路由：消费侧订阅落在入口，生产侧订阅落在出口，错误订阅只落在句柄自身。
#[test]
fn subscriptions_route_by_signal_side() {
    let (composite, double, increment) = double_then_increment();
    let consumption_before = double.listener_count(SignalKind::Finish);
    let production_before = increment.listener_count(SignalKind::End);
    let errors_before = (
        double.listener_count(SignalKind::Error),
        increment.listener_count(SignalKind::Error),
    );

    let finish_id = Stage::subscribe(&*composite, SignalKind::Finish, Arc::new(|_: &Signal| {}));
    Stage::subscribe(&*composite, SignalKind::End, Arc::new(|_: &Signal| {}));
    Stage::subscribe(&*composite, SignalKind::Error, Arc::new(|_: &Signal| {}));

    assert_eq!(double.listener_count(SignalKind::Finish), consumption_before + 1);
    assert_eq!(increment.listener_count(SignalKind::End), production_before + 1);
    assert_eq!(
        (
            double.listener_count(SignalKind::Error),
            increment.listener_count(SignalKind::Error),
        ),
        errors_before,
        "错误订阅不得经由子端点重复登记"
    );
    assert_eq!(composite.listener_count(SignalKind::Error), 1);

    assert!(Stage::unsubscribe(&*composite, finish_id));
    assert_eq!(double.listener_count(SignalKind::Finish), consumption_before);
}

/// 验证同一发生来自入口、出口或两侧时，外部错误监听只被调用一次。
///
/// # 步骤说明（How）
/// 1. 构造一个错误，先在入口上发出，再在出口上发出同一发生；
/// 2. 直接在组合句柄上再次发出；
/// 3. 再构造一个不同的发生，从出口发出。
///
/// # 契约校验（What）
/// - 前三次只产生一次通知；新的发生产生第二次通知。
#[test]
fn error_from_either_side_surfaces_once() {
    let (composite, double, increment) = double_then_increment();
    let errors = SignalLog::attach(&*composite, &[SignalKind::Error]);
    let shared = FlowError::stage_failure(StageId::next(), "shared");

    double.emit(Signal::Error(shared.clone()));
    increment.emit(Signal::Error(shared.clone()));
    assert_eq!(Stage::emit(&*composite, Signal::Error(shared.clone())), 0);
    assert_eq!(errors.errors().len(), 1, "同一发生只通知一次");

    let distinct = FlowError::stage_failure(increment.id(), "distinct");
    increment.emit(Signal::Error(distinct.clone()));
    let seen = errors.errors();
    assert_eq!(seen.len(), 2);
    assert!(seen[0].same_occurrence(&shared));
    assert!(seen[1].same_occurrence(&distinct));
}

/// 验证真实失败路径：入口转换失败时，组合句柄恰好通知一次并透传写入错误。
#[test]
fn failing_intake_reports_through_the_composite() {
    let parse = try_map(|value: i32, _index: usize| {
        if value < 0 {
            Err("negative".to_owned())
        } else {
            Ok(value)
        }
    });
    let relay = through::<i32>();
    pipe(&*parse, Arc::clone(&relay));
    let composite = compose(&parse.handle(), &relay.handle()).expect("合法组合应成功");
    let errors = SignalLog::attach(&*composite, &[SignalKind::Error]);

    composite.write(1).expect("合法条目应成功");
    let failure = composite.write(-1).expect_err("负数必须失败");
    let again = composite.write(2).expect_err("失败后写入返回锁存错误");

    assert!(again.same_occurrence(&failure));
    assert_eq!(errors.errors().len(), 1);
    assert_eq!(composite.read(), Some(1));
}

/// 验证一次性错误监听：两侧各自产生错误，回调只执行一次。
#[test]
fn once_listener_fires_exactly_once() {
    let (composite, double, increment) = double_then_increment();
    let hits = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&hits);
    composite.once(SignalKind::Error, move |_signal: &Signal| {
        observed.fetch_add(1, Ordering::SeqCst);
    });

    double.emit(Signal::Error(FlowError::stage_failure(double.id(), "left")));
    increment.emit(Signal::Error(FlowError::stage_failure(increment.id(), "right")));

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(composite.listener_count(SignalKind::Error), 0, "触发后应被移除");
}

/// 验证生产侧一次性订阅同样只触发一次。
#[test]
fn once_listener_on_production_side() {
    let (composite, _double, increment) = double_then_increment();
    let ends = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&ends);
    composite.once(SignalKind::End, move |_signal: &Signal| {
        observed.fetch_add(1, Ordering::SeqCst);
    });

    increment.emit(Signal::End);
    increment.emit(Signal::End);
    assert_eq!(ends.load(Ordering::SeqCst), 1);
}

/// 验证链式方法返回句柄本身。
#[test]
fn chaining_returns_the_composite() {
    let (composite, _double, increment) = double_then_increment();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let observed = Arc::clone(&seen);

    let chained: *const CompositeHandle<i32, i32> = composite
        .on(SignalKind::Finish, move |signal: &Signal| {
            observed.lock().expect("记录锁").push(signal.kind());
        })
        .set_max_listeners(4)
        .pause();
    assert!(std::ptr::eq(chained, Arc::as_ptr(&composite)));
    assert!(increment.is_paused(), "pause 作用于出口");

    composite.resume().off_all(Some(SignalKind::Finish));
    assert!(!increment.is_paused());
    composite.finish().expect("终结应成功");
    assert!(seen.lock().expect("记录锁").is_empty(), "off_all 之后监听器不得再触发");
}

/// 验证清空监听器不会移除内部错误转发器；句柄释放后转发器随之退订。
#[test]
fn forwarders_survive_clear_and_leave_on_drop() {
    let (composite, double, increment) = double_then_increment();
    assert_eq!(double.listener_count(SignalKind::Error), 1);
    assert_eq!(increment.listener_count(SignalKind::Error), 1);

    composite.off_all(None);
    assert_eq!(double.listener_count(SignalKind::Error), 1, "转发器不受清空影响");

    let errors = SignalLog::attach(&*composite, &[SignalKind::Error]);
    double.emit(Signal::Error(FlowError::stage_failure(double.id(), "still relayed")));
    assert_eq!(errors.errors().len(), 1);

    drop(composite);
    assert_eq!(double.listener_count(SignalKind::Error), 0);
    assert_eq!(increment.listener_count(SignalKind::Error), 0);
}

/// 验证组合句柄作为下游时，上游的背压等待登记在入口上并能被入口的 `Drain` 唤醒。
#[test]
fn upstream_waits_on_the_intake_drain() {
    let config = FlowConfig::default().with_high_water_mark(1);
    let gate = Through::<i32, i32, _>::with_config("gate", spark_flow::transform::Identity, &config);
    let tail = Through::<i32, i32, _>::with_config("tail", spark_flow::transform::Identity, &config);
    pipe(&*gate, Arc::clone(&tail));
    tail.pause();
    let composite = compose(&gate.handle(), &tail.handle()).expect("合法组合应成功");
    let relay: Relay = Arc::clone(&composite) as Relay;

    let source = from_items(vec![1, 2, 3]);
    source.attach(relay);
    source.resume();
    assert!(gate.listener_count(SignalKind::Drain) >= 1, "上游应在入口上等待 Drain");

    composite.resume();
    let mut drained = Vec::new();
    while let Some(item) = composite.read() {
        drained.push(item);
    }
    assert_eq!(drained, vec![1, 2, 3]);
}

/// 验证清空具体种类不会触及上游在入口上的 `Drain` 等待；清空全部则会移除该等待。
///
/// # 契约校验（What）
/// - `off_all(Some(Finish))` 之后，入口上的 `Drain` 等待者数量不变，释放背压后上游交付全部条目；
/// - `off_all(None)` 之后，入口上不再有 `Drain` 等待者。
#[test]
fn scoped_clear_keeps_the_upstream_drain_waiter() {
    let config = FlowConfig::default().with_high_water_mark(1);
    let gate = Through::<i32, i32, _>::with_config("gate", spark_flow::transform::Identity, &config);
    let tail = Through::<i32, i32, _>::with_config("tail", spark_flow::transform::Identity, &config);
    pipe(&*gate, Arc::clone(&tail));
    tail.pause();
    let composite = compose(&gate.handle(), &tail.handle()).expect("合法组合应成功");
    let source = from_items(vec![1, 2, 3]);
    source.attach(Arc::clone(&composite) as Relay);
    source.resume();

    let waiting = gate.listener_count(SignalKind::Drain);
    assert!(waiting >= 1, "上游应在入口上等待 Drain");
    composite.off_all(Some(SignalKind::Finish));
    assert_eq!(gate.listener_count(SignalKind::Drain), waiting);

    composite.resume();
    let mut drained = Vec::new();
    while let Some(item) = composite.read() {
        drained.push(item);
    }
    assert_eq!(drained, vec![1, 2, 3]);

    let stalled = through::<i32>();
    let gated_tail = Through::<i32, i32, _>::with_config("stalled", spark_flow::transform::Identity, &config);
    let cut = Through::<i32, i32, _>::with_config("cut", spark_flow::transform::Identity, &config);
    pipe(&*gated_tail, Arc::clone(&cut));
    cut.pause();
    let fragile = compose(&gated_tail.handle(), &cut.handle()).expect("合法组合应成功");
    stalled.attach(Arc::clone(&fragile) as Relay);
    for value in 0..4 {
        stalled.write(value).expect("写入应成功");
    }
    assert!(gated_tail.listener_count(SignalKind::Drain) >= 1);
    fragile.off_all(None);
    assert_eq!(gated_tail.listener_count(SignalKind::Drain), 0, "清空全部会移除上游等待者");
}
