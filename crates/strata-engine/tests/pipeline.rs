//! End-to-end tests: declarations through compile, interpret and instantiate

use std::any::Any;
use std::sync::{Arc, Mutex};
use strata_engine::config::LoopConfig;
use strata_engine::diagnostic::create_files;
use strata_engine::expr::BinaryOp;
use strata_engine::{Compiler, DeclNode, ElementInstance, EngineConfig, Expr, ModelValue};
use strata_reactive::{
    Datum, EventSource, Listener, ObservableAction, ObservableCollection, ObservableEvent, SettableValue,
    SimpleValue, Subscription,
};

fn times(name: &str, factor: i64) -> Expr {
    Expr::binary(BinaryOp::Mul, Expr::name(name), Expr::int(factor))
}

fn int_value(name: &str, init: i64) -> DeclNode {
    DeclNode::new("value")
        .attr("name", name)
        .attr("type", "int")
        .attr("init", init)
}

fn doubled() -> DeclNode {
    DeclNode::new("map-to").attr("map", times("source", 2))
}

fn instantiate(compiler: &Compiler, node: DeclNode) -> ElementInstance {
    let compiled = compiler.compile(node);
    assert!(!compiled.has_errors(), "{:?}", compiled.diagnostics);
    let interpreted = compiler.interpret(&compiled);
    assert!(!interpreted.has_errors(), "{:?}", interpreted.diagnostics);
    interpreted.instantiate().unwrap()
}

fn set(instance: &ElementInstance, name: &str, datum: Datum) {
    instance
        .get(name)
        .unwrap()
        .as_value()
        .unwrap()
        .set(datum)
        .unwrap();
}

// ── Values ──────────────────────────────────────────────────────────────

#[test]
fn test_map_follows_source() {
    let compiler = Compiler::default();
    let instance = instantiate(
        &compiler,
        DeclNode::new("models")
            .child(int_value("x", 5))
            .child(DeclNode::new("transform").attr("name", "y").attr("source", "x").child(doubled())),
    );
    assert_eq!(instance.get("y").unwrap().to_datum(), Datum::Int(10));
    set(&instance, "x", Datum::Int(7));
    assert_eq!(instance.get("y").unwrap().to_datum(), Datum::Int(14));
}

#[test]
fn test_map_then_filter() {
    let positive = Expr::binary(BinaryOp::Gt, Expr::name("source"), Expr::int(0));
    let compiler = Compiler::default();
    let instance = instantiate(
        &compiler,
        DeclNode::new("models").child(int_value("x", 5)).child(
            DeclNode::new("transform")
                .attr("name", "y")
                .attr("source", "x")
                .child(doubled())
                .child(DeclNode::new("filter").attr("test", positive)),
        ),
    );
    assert_eq!(instance.get("y").unwrap().to_datum(), Datum::Int(10));
    set(&instance, "x", Datum::Int(-5));
    assert_eq!(instance.get("y").unwrap().to_datum(), Datum::Null);
}

#[test]
fn test_reverse_writes_back_to_source() {
    let halve = Expr::binary(BinaryOp::Div, Expr::name("target"), Expr::int(2));
    let compiler = Compiler::default();
    let instance = instantiate(
        &compiler,
        DeclNode::new("models").child(int_value("x", 5)).child(
            DeclNode::new("transform")
                .attr("name", "y")
                .attr("source", "x")
                .child(doubled().child(DeclNode::new("replace-source").attr("replace", halve))),
        ),
    );
    set(&instance, "y", Datum::Int(20));
    assert_eq!(instance.get("x").unwrap().to_datum(), Datum::Int(10));
    assert_eq!(instance.get("y").unwrap().to_datum(), Datum::Int(20));
}

#[test]
fn test_map_without_reverse_is_read_only() {
    let compiler = Compiler::default();
    let instance = instantiate(
        &compiler,
        DeclNode::new("models")
            .child(int_value("x", 5))
            .child(DeclNode::new("transform").attr("name", "y").attr("source", "x").child(doubled())),
    );
    let y = instance.get("y").unwrap();
    assert!(y.as_value().unwrap().set(Datum::Int(4)).is_err());
    assert_eq!(instance.get("x").unwrap().to_datum(), Datum::Int(5));
}

#[test]
fn test_values_are_stable_within_an_instance() {
    let compiler = Compiler::default();
    let instance = instantiate(
        &compiler,
        DeclNode::new("models")
            .child(int_value("x", 1))
            .child(DeclNode::new("transform").attr("name", "y").attr("source", "x").child(doubled())),
    );
    assert!(instance.get("x").unwrap().ptr_eq(&instance.get("x").unwrap()));
    assert!(instance.get("y").unwrap().ptr_eq(&instance.get("y").unwrap()));
}

#[test]
fn test_fresh_values_per_instance() {
    let compiler = Compiler::default();
    let compiled = compiler.compile(DeclNode::new("models").child(int_value("x", 1)));
    let interpreted = compiler.interpret(&compiled);
    let first = interpreted.instantiate().unwrap();
    let second = interpreted.instantiate().unwrap();
    set(&first, "x", Datum::Int(9));
    assert_eq!(second.get("x").unwrap().to_datum(), Datum::Int(1));
}

// ── Hollow values ───────────────────────────────────────────────────────

#[test]
fn test_transform_over_a_hollow_value() {
    let compiler = Compiler::default();
    let compiled = compiler.compile(
        DeclNode::new("models")
            .child(DeclNode::new("hollow").attr("name", "h").attr("type", "Value<int>"))
            .child(DeclNode::new("transform").attr("name", "y").attr("source", "h").child(doubled())),
    );
    let interpreted = compiler.interpret(&compiled);
    assert!(!interpreted.has_errors(), "{:?}", interpreted.diagnostics);

    let h = Arc::new(SimpleValue::new(Datum::Int(3)));
    let instance = interpreted
        .instantiate_satisfying(compiler.registry(), &[("h", ModelValue::Value(h.clone()))])
        .unwrap();
    assert_eq!(instance.get("y").unwrap().to_datum(), Datum::Int(6));
    h.set(Datum::Int(4)).unwrap();
    assert_eq!(instance.get("y").unwrap().to_datum(), Datum::Int(8));
}

#[test]
fn test_unknown_hollow_name_is_unbound() {
    let compiler = Compiler::default();
    let compiled = compiler.compile(DeclNode::new("models").child(int_value("x", 1)));
    let interpreted = compiler.interpret(&compiled);
    let value = ModelValue::Value(Arc::new(SimpleValue::new(Datum::Int(1))));
    assert!(interpreted
        .instantiate_satisfying(compiler.registry(), &[("missing", value)])
        .is_err());
}

// ── Collections ─────────────────────────────────────────────────────────

fn numbers() -> DeclNode {
    DeclNode::new("list")
        .attr("name", "xs")
        .attr("type", "int")
        .child(DeclNode::new("element").with_value(3i64))
        .child(DeclNode::new("element").with_value(1i64))
        .child(DeclNode::new("element").with_value(2i64))
}

#[test]
fn test_sorted_collection() {
    let compiler = Compiler::default();
    let instance = instantiate(
        &compiler,
        DeclNode::new("models").child(numbers()).child(
            DeclNode::new("transform")
                .attr("name", "sorted")
                .attr("source", "xs")
                .child(DeclNode::new("sort")),
        ),
    );
    let sorted = instance.get("sorted").unwrap();
    assert_eq!(
        sorted.as_collection().unwrap().elements(),
        vec![Datum::Int(1), Datum::Int(2), Datum::Int(3)]
    );
}

#[test]
fn test_size_of_collection() {
    let compiler = Compiler::default();
    let compiled = compiler.compile(
        DeclNode::new("models").child(numbers()).child(
            DeclNode::new("transform")
                .attr("name", "count")
                .attr("source", "xs")
                .child(DeclNode::new("size")),
        ),
    );
    let interpreted = compiler.interpret(&compiled);
    assert_eq!(
        interpreted.type_of("count").map(|t| t.to_string()),
        Some("Value<int>".to_string())
    );
    let instance = interpreted.instantiate().unwrap();
    assert_eq!(instance.get("count").unwrap().to_datum(), Datum::Int(3));
}

fn allowed() -> DeclNode {
    DeclNode::new("list")
        .attr("name", "allowed")
        .attr("type", "int")
        .child(DeclNode::new("element").with_value(1i64))
        .child(DeclNode::new("element").with_value(2i64))
        .child(DeclNode::new("element").with_value(5i64))
}

#[test]
fn test_reduce_folds_from_seed() {
    let combine = Expr::binary(BinaryOp::Add, Expr::name("source"), Expr::name("temp"));
    let compiler = Compiler::default();
    let compiled = compiler.compile(
        DeclNode::new("models").child(numbers()).child(
            DeclNode::new("transform").attr("name", "total").attr("source", "xs").child(
                DeclNode::new("reduce")
                    .attr("seed", Expr::int(0))
                    .attr("combine", combine),
            ),
        ),
    );
    assert!(!compiled.has_errors(), "{:?}", compiled.diagnostics);
    let interpreted = compiler.interpret(&compiled);
    assert!(!interpreted.has_errors(), "{:?}", interpreted.diagnostics);
    assert_eq!(
        interpreted.type_of("total").map(|t| t.to_string()),
        Some("Value<int>".to_string())
    );
    let instance = interpreted.instantiate().unwrap();
    assert_eq!(instance.get("total").unwrap().to_datum(), Datum::Int(6));

    let xs = instance.get("xs").unwrap();
    xs.as_collection().unwrap().add(Datum::Int(4)).unwrap();
    assert_eq!(instance.get("total").unwrap().to_datum(), Datum::Int(10));
    let total = instance.get("total").unwrap();
    assert!(total.as_value().unwrap().set(Datum::Int(0)).is_err());
}

#[test]
fn test_where_contained_follows_membership() {
    let compiler = Compiler::default();
    let membership = |name: &str, inclusive: bool| {
        DeclNode::new("transform").attr("name", name).attr("source", "xs").child(
            DeclNode::new("where-contained")
                .attr("filter", Expr::name("allowed"))
                .attr("inclusive", inclusive),
        )
    };
    let instance = instantiate(
        &compiler,
        DeclNode::new("models")
            .child(numbers())
            .child(allowed())
            .child(membership("kept", true))
            .child(membership("dropped", false)),
    );
    let kept = instance.get("kept").unwrap();
    let dropped = instance.get("dropped").unwrap();
    assert_eq!(kept.as_collection().unwrap().elements(), vec![Datum::Int(1), Datum::Int(2)]);
    assert_eq!(dropped.as_collection().unwrap().elements(), vec![Datum::Int(3)]);

    let allowed = instance.get("allowed").unwrap();
    allowed.as_collection().unwrap().add(Datum::Int(3)).unwrap();
    assert_eq!(
        kept.as_collection().unwrap().elements(),
        vec![Datum::Int(3), Datum::Int(1), Datum::Int(2)]
    );
    assert!(dropped.as_collection().unwrap().elements().is_empty());
}

#[test]
fn test_refresh_each_moves_the_stamp() {
    let compiler = Compiler::default();
    let compiled = compiler.compile(
        DeclNode::new("models")
            .child(numbers())
            .child(DeclNode::new("hollow").attr("name", "tick").attr("type", "Event<int>"))
            .child(
                DeclNode::new("transform")
                    .attr("name", "watched")
                    .attr("source", "xs")
                    .child(DeclNode::new("refresh-each").attr("on", Expr::name("tick"))),
            ),
    );
    let interpreted = compiler.interpret(&compiled);
    assert!(!interpreted.has_errors(), "{:?}", interpreted.diagnostics);

    let tick = Arc::new(EventSource::new());
    let instance = interpreted
        .instantiate_satisfying(compiler.registry(), &[("tick", ModelValue::Event(tick.clone()))])
        .unwrap();
    let watched = instance.get("watched").unwrap();
    let watched = watched.as_collection().unwrap();
    assert_eq!(watched.elements(), vec![Datum::Int(3), Datum::Int(1), Datum::Int(2)]);
    let before = watched.stamp();
    tick.fire(&Datum::Int(1));
    assert_ne!(watched.stamp(), before);
}

// ── Events ──────────────────────────────────────────────────────────────

/// Fires `0` to every new listener before forwarding later events
#[derive(Debug)]
struct Announcing(EventSource);

impl ObservableEvent for Announcing {
    fn subscribe(&self, listener: Listener) -> Subscription {
        listener(&Datum::Int(0));
        self.0.subscribe(listener)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn recorder() -> (Arc<Mutex<Vec<Datum>>>, Listener) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, Arc::new(move |d: &Datum| sink.lock().unwrap().push(d.clone())))
}

#[test]
fn test_take_until_and_no_init() {
    let compiler = Compiler::default();
    let compiled = compiler.compile(
        DeclNode::new("models")
            .child(DeclNode::new("hollow").attr("name", "clicks").attr("type", "Event<int>"))
            .child(DeclNode::new("hollow").attr("name", "stop").attr("type", "Event<int>"))
            .child(
                DeclNode::new("transform")
                    .attr("name", "until")
                    .attr("source", "clicks")
                    .child(DeclNode::new("take-until").attr("until", Expr::name("stop"))),
            )
            .child(
                DeclNode::new("transform")
                    .attr("name", "quiet")
                    .attr("source", "clicks")
                    .child(DeclNode::new("no-init")),
            ),
    );
    assert!(!compiled.has_errors(), "{:?}", compiled.diagnostics);
    let interpreted = compiler.interpret(&compiled);
    assert!(!interpreted.has_errors(), "{:?}", interpreted.diagnostics);

    let clicks = Arc::new(Announcing(EventSource::new()));
    let stop = Arc::new(EventSource::new());
    let instance = interpreted
        .instantiate_satisfying(
            compiler.registry(),
            &[
                ("clicks", ModelValue::Event(clicks.clone())),
                ("stop", ModelValue::Event(stop.clone())),
            ],
        )
        .unwrap();

    let (until, until_listener) = recorder();
    let _until = instance.get("until").unwrap().into_event().unwrap().subscribe(until_listener);
    let (quiet, quiet_listener) = recorder();
    let _quiet = instance.get("quiet").unwrap().into_event().unwrap().subscribe(quiet_listener);

    clicks.0.fire(&Datum::Int(1));
    stop.fire(&Datum::Int(0));
    clicks.0.fire(&Datum::Int(2));
    assert_eq!(*until.lock().unwrap(), vec![Datum::Int(0), Datum::Int(1)]);
    assert_eq!(*quiet.lock().unwrap(), vec![Datum::Int(1), Datum::Int(2)]);
}

// ── Copies ──────────────────────────────────────────────────────────────

fn guarded_double() -> DeclNode {
    let halve = Expr::binary(BinaryOp::Div, Expr::name("target"), Expr::int(2));
    let positive = Expr::binary(BinaryOp::Gt, Expr::name("source"), Expr::int(0));
    DeclNode::new("models")
        .child(DeclNode::new("hollow").attr("name", "h").attr("type", "Value<int>"))
        .child(
            DeclNode::new("transform")
                .attr("name", "y")
                .attr("source", "h")
                .child(doubled().child(DeclNode::new("replace-source").attr("replace", halve)))
                .child(DeclNode::new("filter").attr("test", positive)),
        )
}

#[test]
fn test_copy_keeps_values_over_the_same_source() {
    let compiler = Compiler::default();
    let interpreted = compiler.interpret(&compiler.compile(guarded_double()));
    assert!(!interpreted.has_errors(), "{:?}", interpreted.diagnostics);

    let h = ModelValue::Value(Arc::new(SimpleValue::new(Datum::Int(5))));
    let instance = interpreted
        .instantiate_satisfying(compiler.registry(), &[("h", h.clone())])
        .unwrap();
    let copy = interpreted
        .copy_satisfying(compiler.registry(), &instance, &[("h", h)])
        .unwrap();
    let y = copy.get_by_name("y").unwrap();
    assert!(y.ptr_eq(&instance.get("y").unwrap()));
    assert_eq!(y.to_datum(), Datum::Int(10));
}

#[test]
fn test_copy_rebuilds_values_over_a_new_source() {
    let compiler = Compiler::default();
    let interpreted = compiler.interpret(&compiler.compile(guarded_double()));
    let h = Arc::new(SimpleValue::new(Datum::Int(5)));
    let instance = interpreted
        .instantiate_satisfying(compiler.registry(), &[("h", ModelValue::Value(h.clone()))])
        .unwrap();

    let other = Arc::new(SimpleValue::new(Datum::Int(-5)));
    let copy = interpreted
        .copy_satisfying(compiler.registry(), &instance, &[("h", ModelValue::Value(other.clone()))])
        .unwrap();
    let y = copy.get_by_name("y").unwrap();
    assert!(!y.ptr_eq(&instance.get("y").unwrap()));
    assert_eq!(y.to_datum(), Datum::Null);

    other.set(Datum::Int(6)).unwrap();
    assert_eq!(y.to_datum(), Datum::Int(12));
    y.as_value().unwrap().set(Datum::Int(20)).unwrap();
    assert_eq!(other.get(), Datum::Int(10));
    assert_eq!(h.get(), Datum::Int(5));
    assert_eq!(instance.get("y").unwrap().to_datum(), Datum::Int(10));
}

#[test]
fn test_copy_requires_hollow_values() {
    let compiler = Compiler::default();
    let interpreted = compiler.interpret(&compiler.compile(guarded_double()));
    let h = ModelValue::Value(Arc::new(SimpleValue::new(Datum::Int(5))));
    let instance = interpreted
        .instantiate_satisfying(compiler.registry(), &[("h", h)])
        .unwrap();
    assert!(interpreted.copy_satisfying(compiler.registry(), &instance, &[]).is_err());
}

#[test]
fn test_copy_of_a_sorted_collection() {
    let compiler = Compiler::default();
    let compiled = compiler.compile(
        DeclNode::new("models").child(numbers()).child(
            DeclNode::new("transform")
                .attr("name", "sorted")
                .attr("source", "xs")
                .child(DeclNode::new("sort")),
        ),
    );
    let interpreted = compiler.interpret(&compiled);
    let instance = interpreted.instantiate().unwrap();
    let copy = interpreted.copy_satisfying(compiler.registry(), &instance, &[]).unwrap();

    let sorted = copy.get_by_name("sorted").unwrap();
    assert_eq!(
        sorted.as_collection().unwrap().elements(),
        instance.get("sorted").unwrap().as_collection().unwrap().elements()
    );

    let xs = copy.get_by_name("xs").unwrap();
    xs.as_collection().unwrap().add(Datum::Int(0)).unwrap();
    assert_eq!(
        sorted.as_collection().unwrap().elements(),
        vec![Datum::Int(0), Datum::Int(1), Datum::Int(2), Datum::Int(3)]
    );
    assert_eq!(
        instance.get("sorted").unwrap().as_collection().unwrap().elements(),
        vec![Datum::Int(1), Datum::Int(2), Datum::Int(3)]
    );
}

// ── Actions ─────────────────────────────────────────────────────────────

fn counting_loop(condition: Expr) -> DeclNode {
    let increment = Expr::assign(
        Expr::name("i"),
        Expr::binary(BinaryOp::Add, Expr::name("i"), Expr::int(1)),
    );
    DeclNode::new("models").child(int_value("i", 0)).child(
        DeclNode::new("loop")
            .attr("name", "count")
            .attr("while", condition)
            .child(DeclNode::new("action").attr("name", "step").attr("action", increment)),
    )
}

#[test]
fn test_loop_runs_while_condition_holds() {
    let compiler = Compiler::default();
    let below = Expr::binary(BinaryOp::Lt, Expr::name("i"), Expr::int(3));
    let instance = instantiate(&compiler, counting_loop(below));
    instance.get("count").unwrap().as_action().unwrap().act().unwrap();
    assert_eq!(instance.get("i").unwrap().to_datum(), Datum::Int(3));
}

#[test]
fn test_loop_cap_from_config() {
    let config = EngineConfig {
        loops: LoopConfig { max_iterations: 5 },
        ..EngineConfig::default()
    };
    let compiler = Compiler::new(config);
    let instance = instantiate(&compiler, counting_loop(Expr::bool(true)));
    assert!(instance.get("count").unwrap().as_action().unwrap().act().is_ok());
    assert_eq!(instance.get("i").unwrap().to_datum(), Datum::Int(5));
}

// ── Diagnostics ─────────────────────────────────────────────────────────

#[test]
fn test_failed_sibling_does_not_stop_others() {
    let compiler = Compiler::default();
    let compiled = compiler.compile(
        DeclNode::new("models")
            .child(int_value("x", 2))
            .child(DeclNode::new("gadget").attr("name", "g")),
    );
    assert!(compiled.diagnostics.contains_code("E1001"));
    let interpreted = compiler.interpret(&compiled);
    let instance = interpreted.instantiate().unwrap();
    assert_eq!(instance.get("x").unwrap().to_datum(), Datum::Int(2));
}

#[test]
fn test_duplicate_names() {
    let compiler = Compiler::default();
    let compiled = compiler.compile(
        DeclNode::new("models")
            .child(int_value("x", 1))
            .child(int_value("x", 2)),
    );
    assert!(compiled.diagnostics.contains_code("E1009"));
}

#[test]
fn test_operator_outside_its_family() {
    let compiler = Compiler::default();
    let compiled = compiler.compile(
        DeclNode::new("models").child(int_value("x", 1)).child(
            DeclNode::new("transform")
                .attr("name", "y")
                .attr("source", "x")
                .child(DeclNode::new("sort")),
        ),
    );
    assert!(compiled.diagnostics.contains_code("E1004"));
}

#[test]
fn test_diagnostics_as_json() {
    let source = r#"{"type": "models", "children": [{"type": "gadget"}]}"#;
    let node = DeclNode::from_json(source).unwrap();
    let compiler = Compiler::default();
    let compiled = compiler.compile(node);
    let files = create_files("doc.json", source);
    let json = compiled.diagnostics.to_json(&files, 0).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    let first = &parsed.as_array().unwrap()[0];
    assert_eq!(first["code"], "E1001");
    assert_eq!(first["severity"], "error");
}

#[test]
fn test_cyclic_sources_name_the_value_once() {
    let compiler = Compiler::default();
    let compiled = compiler.compile(
        DeclNode::new("models")
            .child(DeclNode::new("transform").attr("name", "y").attr("source", "z").child(doubled()))
            .child(DeclNode::new("transform").attr("name", "z").attr("source", "y").child(doubled())),
    );
    let interpreted = compiler.interpret(&compiled);
    assert!(interpreted.diagnostics.contains_code("E2004"));
    let cyclic: Vec<&str> = interpreted
        .diagnostics
        .iter()
        .filter(|d| d.code.as_deref() == Some("E2004"))
        .map(|d| d.message.as_str())
        .collect();
    assert!(cyclic.contains(&"transform 'y' depends on itself"), "{:?}", cyclic);
    assert!(cyclic.iter().all(|m| !m.contains("''")), "{:?}", cyclic);
}
