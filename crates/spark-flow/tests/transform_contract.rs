//! `transform_contract` 集成测试：验证源、转换与汇在真实挂接路径下遵守流控契约。
//!
//! # 测试目标（Why）
//! - 直通流水线必须保序，且终结信号恰好转发一次；
//! - 折叠类转换只在终结时产出一个条目，回调参数与索引符合约定；
//! - 背压：饱和后暂停推送，收到 `Drain` 后从断点继续；
//! - 转换失败时错误只通知一次，并以同一发生锁存。
//!
//! # 结构安排（How）
//! - 每个用例自行搭建 `from_items → 转换 → 汇` 的最小拓扑，并在 `resume` 后断言结果；
//! - 需要观察背压的用例使用 `support::GatedSink`。

mod support;

use std::sync::Mutex;

use serde_json::{Value, json};
use spark_flow::prelude::*;
use support::{GatedSink, SignalLog};

/// 验证直通流水线保序输出，并按 `Finish → End → Close` 的顺序收尾。
///
/// # 步骤说明（How）
/// 1. `from_items([1..=5]) → through → collect`；
/// 2. 挂接完成后 `resume` 源；
/// 3. 检查汇中条目与直通阶段发出的生命周期信号。
#[test]
fn identity_pipeline_preserves_order_and_finalizes_once() {
    let source = from_items(vec![1, 2, 3, 4, 5]);
    let relay = through::<i32>();
    let sink = collect::<i32>();
    let lifecycle = SignalLog::attach(
        &*relay,
        &[SignalKind::Finish, SignalKind::End, SignalKind::Close],
    );
    let finishes = SignalLog::attach(&*sink, &[SignalKind::Finish]);

    pipe(&*source, Arc::clone(&relay));
    pipe(&*relay, Arc::clone(&sink));
    assert!(source.is_paused(), "源在 resume 之前不得产出");
    assert!(sink.is_empty());

    source.resume();

    assert_eq!(sink.take(), vec![1, 2, 3, 4, 5]);
    assert_eq!(
        lifecycle.kinds(),
        vec![SignalKind::Finish, SignalKind::End, SignalKind::Close],
        "终结顺序必须稳定"
    );
    assert_eq!(finishes.count(SignalKind::Finish), 1, "汇只能观察到一次终结");
    assert!(source.is_ended());
    assert!(relay.is_ended());
}

/// 验证带初始值的折叠：回调按 `(累加值, 条目, 索引)` 调用，终结时只产出一个结果。
#[test]
fn fold_with_initial_value_emits_single_result_on_finish() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let observed = Arc::clone(&calls);
    let summed = fold(4, move |acc: i32, item: i32, index: usize| {
        observed.lock().expect("记录锁").push((acc, item, index));
        acc + item
    });
    let results = Arc::new(Mutex::new(Vec::new()));
    let target = Arc::clone(&results);
    let sink = collect_with(move |items: Vec<i32>| {
        *target.lock().expect("结果锁") = items;
    });

    summed.write(1).expect("写入应成功");
    summed.write(2).expect("写入应成功");
    summed.write(3).expect("写入应成功");
    pipe(&*summed, Arc::clone(&sink));
    assert!(sink.is_empty(), "终结之前折叠不得产出任何条目");

    summed.finish().expect("终结应成功");

    assert_eq!(*results.lock().expect("结果锁"), vec![10]);
    assert_eq!(
        *calls.lock().expect("记录锁"),
        vec![(4, 1, 0), (5, 2, 1), (7, 3, 2)]
    );
}

/// 验证无初始值的归约：首个条目作为种子，回调只在 `(1,2)`、`(3,3)` 上调用。
///
/// # 契约校验（What）
/// - 输入 `[1,2,3]` 产出单个 `6`；
/// - 回调从不单独作用于首个条目，索引从 1 开始。
#[test]
fn reduce_seeds_with_first_item() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let observed = Arc::clone(&calls);
    let source = from_items(vec![1, 2, 3]);
    let total = reduce(move |acc: i32, item: i32, index: usize| {
        observed.lock().expect("记录锁").push((acc, item, index));
        acc + item
    });
    let target = Collected::<i32>::new();
    let sink = collect_into(target.clone());

    pipe(&*source, Arc::clone(&total));
    pipe(&*total, sink);
    source.resume();

    assert_eq!(target.take(), vec![6]);
    assert_eq!(*calls.lock().expect("记录锁"), vec![(1, 2, 1), (3, 3, 2)]);
}

/// 验证空输入：折叠产出初始值，归约不产出任何条目，二者都会向下游转发终结。
#[test]
fn empty_input_behaviour_of_accumulators() {
    let folded = Collected::<String>::new();
    let fold_sink = collect_into(folded.clone());
    let source = from_items(Vec::<i32>::new());
    let acc = fold(String::from("seed"), |acc: String, item: i32, _index: usize| {
        format!("{acc}{item}")
    });
    pipe(&*source, Arc::clone(&acc));
    pipe(&*acc, Arc::clone(&fold_sink));
    source.resume();
    assert_eq!(folded.take(), vec![String::from("seed")]);
    assert!(fold_sink.is_finished());

    let reduced = collect::<i32>();
    let source = from_items(Vec::<i32>::new());
    let total = reduce(|acc: i32, item: i32, _index: usize| acc + item);
    pipe(&*source, Arc::clone(&total));
    pipe(&*total, Arc::clone(&reduced));
    source.resume();
    assert!(reduced.is_empty());
    assert!(reduced.is_finished(), "空输入同样需要转发终结");
}

/// 验证 map / filter / for_each 的索引语义：被过滤的条目同样计入索引。
#[test]
fn map_filter_and_for_each_share_index_semantics() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let observed = Arc::clone(&seen);
    let source = from_items(vec!["a", "b", "c", "d"]);
    let inspect = for_each(move |item: &&str, index: usize| {
        observed.lock().expect("记录锁").push((item.to_string(), index));
    });
    let odd = filter(|_item: &&str, index: usize| index % 2 == 1);
    let label = map(|item: &str, index: usize| format!("{index}:{item}"));
    let sink = collect::<String>();

    pipe(&*source, Arc::clone(&inspect));
    pipe(&*inspect, Arc::clone(&odd));
    pipe(&*odd, Arc::clone(&label));
    pipe(&*label, Arc::clone(&sink));
    source.resume();

    assert_eq!(sink.take(), vec!["0:b".to_owned(), "1:d".to_owned()]);
    assert_eq!(seen.lock().expect("记录锁").len(), 4, "旁路观察看到全部条目");
}

/// 验证字段替换：回调收到当前值（缺失时为 `None`），固定值规则原样写入。
///
/// # 步骤说明（How）
/// 1. 为 `name` 注册计算规则：缺失时写入 `"UNDEFINED"`，否则转大写；
/// 2. 为 `seen` 注册固定值规则；
/// 3. 检查两条记录的输出。
#[test]
fn map_keys_computes_and_assigns_fields() {
    let source = from_items(vec![json!({ "name": "ada" }), json!({ "id": 7 })]);
    let rewrite = map_keys([
        (
            "name",
            FieldRule::<Value>::compute(|current: Option<Value>, _record: &Value, _index: usize| {
                match current.as_ref().and_then(Value::as_str) {
                    Some(name) => Value::from(name.to_uppercase()),
                    None => Value::from("UNDEFINED"),
                }
            }),
        ),
        ("seen", FieldRule::<Value>::assign(Value::Bool(true))),
    ]);
    let sink = collect::<Value>();

    pipe(&*source, Arc::clone(&rewrite));
    pipe(&*rewrite, Arc::clone(&sink));
    source.resume();

    assert_eq!(
        sink.take(),
        vec![
            json!({ "name": "ADA", "seen": true }),
            json!({ "id": 7, "name": "UNDEFINED", "seen": true }),
        ]
    );
}

/// 验证单字段替换可以读取整个条目与索引。
#[test]
fn map_key_sees_the_whole_record() {
    let rewrite = map_key::<Value, _>("rank", |_current: Option<Value>, record: &Value, index: usize| {
        let id = record.get("id").and_then(Value::as_u64).unwrap_or_default();
        Value::from(id * 10 + index as u64)
    });
    rewrite.write(json!({ "id": 1 })).expect("写入应成功");
    rewrite.write(json!({ "id": 2 })).expect("写入应成功");

    assert_eq!(rewrite.read(), Some(json!({ "id": 1, "rank": 10 })));
    assert_eq!(rewrite.read(), Some(json!({ "id": 2, "rank": 21 })));
}

/// 验证源在下游饱和时暂停，并在每次 `Drain` 后从断点继续。
///
/// # 测试意图（Why）
/// - 若源忽略 `Saturated`，背压协议形同虚设；若忽略 `Drain`，流水线将永久停滞。
///
/// # 契约校验（What）
/// - 容量为 2 的汇在每次 `release` 之前至多收到 2 个条目；
/// - 全部交付后汇恰好被终结一次。
#[test]
fn source_waits_for_drain_after_saturation() {
    let source = from_items(1..=5);
    let gate = GatedSink::<i32>::new(2);
    source.attach(gate.erased());
    source.resume();
    assert_eq!(gate.items(), vec![1, 2]);
    assert_eq!(gate.finishes(), 0);

    gate.release();
    assert_eq!(gate.items(), vec![1, 2, 3, 4]);

    gate.release();
    assert_eq!(gate.items(), vec![1, 2, 3, 4, 5]);
    assert_eq!(gate.finishes(), 1, "积压清空后才能终结");
    assert!(source.is_ended());
}

/// 验证转换阶段的高水位：积压达到高水位时写入返回 `Saturated`，排空后发出 `Drain`。
#[test]
fn through_reports_saturation_at_high_water_mark() {
    let config = FlowConfig::default().with_high_water_mark(2);
    let relay = Through::<i32, i32, _>::with_config("relay", spark_flow::transform::Identity, &config);
    let drains = SignalLog::attach(&*relay, &[SignalKind::Drain]);

    assert_eq!(relay.write(1).expect("写入应成功"), Readiness::Ready);
    assert_eq!(relay.write(2).expect("写入应成功"), Readiness::Saturated);
    assert_eq!(relay.read(), Some(1));
    assert_eq!(drains.count(SignalKind::Drain), 0, "仍有积压时不得发出 Drain");
    assert_eq!(relay.read(), Some(2));
    assert_eq!(drains.count(SignalKind::Drain), 1);
}

/// 验证终结之后的写入与重复终结都被拒绝，且不发出任何信号。
#[test]
fn writes_after_finish_are_rejected() {
    let relay = through::<u8>();
    let errors = SignalLog::attach(&*relay, &[SignalKind::Error]);
    relay.finish().expect("首次终结应成功");

    let late = relay.write(1).expect_err("终结后写入必须失败");
    assert_eq!(late.kind(), &FlowErrorKind::WriteAfterFinish);
    let again = relay.finish().expect_err("重复终结必须失败");
    assert_eq!(again.code(), "flow.already_finished");
    assert!(errors.errors().is_empty(), "协议误用不应通过 Error 信号广播");
}

/// 验证可失败映射：错误只通知一次，并以同一发生锁存；已产出的条目照常交付。
#[test]
fn failing_transform_latches_one_occurrence() {
    let source = from_items(vec![1, 2, 3]);
    let parse = try_map(|value: i32, _index: usize| {
        if value == 2 {
            Err(format!("cannot handle {value}"))
        } else {
            Ok(value * 100)
        }
    });
    let sink = collect::<i32>();
    let errors = SignalLog::attach(&*parse, &[SignalKind::Error]);

    pipe(&*source, Arc::clone(&parse));
    pipe(&*parse, Arc::clone(&sink));
    source.resume();

    let reported = errors.errors();
    assert_eq!(reported.len(), 1, "错误必须恰好通知一次");
    assert_eq!(reported[0].code(), "flow.stage_failure");
    assert_eq!(sink.take(), vec![100]);
    assert!(!sink.is_finished(), "失败的边不得继续转发终结");

    let latched = parse.write(9).expect_err("失败后写入必须返回锁存错误");
    assert!(latched.same_occurrence(&reported[0]));
    assert_eq!(errors.errors().len(), 1, "锁存错误不得重复通知");
}

/// 验证对已结束的生产者挂接新下游会立即终结该下游。
#[test]
fn attaching_to_ended_producer_finalizes_downstream() {
    let source = from_items(Vec::<i32>::new());
    assert_eq!(source.read(), None);
    assert!(source.is_ended());

    let sink = collect::<i32>();
    pipe(&*source, Arc::clone(&sink));
    assert!(sink.is_finished());
}

/// 验证挂接与解除挂接分别向下游发出 `Pipe` / `Unpipe`，并携带上游身份。
#[test]
fn attach_and_detach_announce_the_upstream() {
    let relay = through::<i32>();
    let sink = collect::<i32>();
    let log = SignalLog::attach(&*sink, &[SignalKind::Pipe, SignalKind::Unpipe]);

    pipe(&*relay, Arc::clone(&sink));
    let detached = relay.detach().expect("应返回原下游");
    assert_eq!(detached.id(), sink.id());
    assert_eq!(log.kinds(), vec![SignalKind::Pipe, SignalKind::Unpipe]);

    relay.write(1).expect("无下游时写入应进入队列");
    assert!(sink.is_empty(), "解除挂接后不得再交付");
}

/// 验证暂停期间条目在队列中等待，恢复后按序交付；数据观察点看到每个交付的条目。
#[test]
fn pause_holds_items_and_taps_observe_delivery() {
    let relay = through::<i32>();
    let sink = collect::<i32>();
    let tapped = Arc::new(Mutex::new(Vec::new()));
    let observed = Arc::clone(&tapped);
    relay.tap(Arc::new(move |item: &i32| {
        observed.lock().expect("记录锁").push(*item);
    }));
    pipe(&*relay, Arc::clone(&sink));

    relay.pause();
    relay.write(1).expect("写入应成功");
    relay.write(2).expect("写入应成功");
    assert!(sink.is_empty(), "暂停期间不得交付");

    relay.resume();
    assert_eq!(sink.take(), vec![1, 2]);
    assert_eq!(*tapped.lock().expect("记录锁"), vec![1, 2]);
}

/// 验证丢弃型汇始终就绪，终结回调恰好执行一次。
#[test]
fn discard_runs_completion_once() {
    let done = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&done);
    let source = from_items(0..100);
    let sink = discard_with::<i32, _>(move || {
        *counter.lock().expect("计数锁") += 1;
    });
    pipe(&*source, Arc::clone(&sink));
    source.resume();

    assert_eq!(*done.lock().expect("计数锁"), 1);
    assert!(sink.finish().is_err(), "重复终结必须失败");
    assert_eq!(*done.lock().expect("计数锁"), 1);
}

/// 验证深拷贝转换切断与上游共享的 `Arc`。
#[test]
fn clone_items_breaks_shared_ownership() {
    let shared = Arc::new(Mutex::new(vec![1]));
    let copier = clone_items::<Arc<Mutex<Vec<i32>>>>();
    copier.write(Arc::clone(&shared)).expect("写入应成功");
    let copy = copier.read().expect("应产出副本");

    copy.lock().expect("副本锁").push(2);
    assert_eq!(*shared.lock().expect("原件锁"), vec![1], "副本修改不得影响原件");
    assert!(!Arc::ptr_eq(&copy, &shared));
}
