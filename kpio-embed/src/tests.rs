//! Behavioural tests of the embedding API.

use core::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::*;

const FILE: &str = "tests.rs";

/// A fresh context, checked for an empty stack when the test ends.
struct Fixture {
    ctx: Context,
}

impl Fixture {
    fn new() -> Self {
        Self::with_config(ContextConfig::default())
    }

    fn with_config(config: ContextConfig) -> Self {
        Fixture {
            ctx: Context::with_config(config).unwrap(),
        }
    }

    fn eval(&mut self, source: &str) -> Result<HostValue> {
        self.ctx.eval_with_filename(source, FILE)
    }

    fn exec(&mut self, source: &str) -> Result<()> {
        self.ctx.exec_with_filename(source, FILE)
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        if !std::thread::panicking() && !self.ctx.is_fatal() {
            assert!(self.ctx.is_valid(), "context left in a weird state");
        }
    }
}

fn script_error(kind: ScriptErrorKind, message: &str) -> Error {
    Error::Script {
        kind,
        message: message.to_string(),
    }
}

fn float(n: f64) -> HostValue {
    HostValue::Float(n)
}

#[derive(Debug)]
struct Widget;

impl HostObject for Widget {
    fn type_name(&self) -> &str {
        "Widget"
    }
}

#[derive(Debug, Default)]
struct Counter {
    hits: Cell<i64>,
}

impl HostObject for Counter {
    fn type_name(&self) -> &str {
        "Counter"
    }

    fn send(&self, method: &str, args: Vec<HostValue>) -> Result<HostValue> {
        match method {
            "hit" => {
                let step = args.first().and_then(HostValue::as_f64).unwrap_or(1.0) as i64;
                self.hits.set(self.hits.get() + step);
                Ok(HostValue::Integer(self.hits.get()))
            }
            "hits" => Ok(HostValue::Integer(self.hits.get())),
            _ => Err(Error::no_method(self.type_name(), method)),
        }
    }
}

mod eval {
    use super::*;

    #[test]
    fn test_string() {
        let mut t = Fixture::new();
        assert_eq!(t.eval("\"123\"").unwrap(), "123".into());
    }

    #[test]
    fn test_boolean() {
        let mut t = Fixture::new();
        assert_eq!(t.eval("1 == 1").unwrap(), true.into());
        assert_eq!(t.eval("1 == 2").unwrap(), false.into());
    }

    #[test]
    fn test_number() {
        let mut t = Fixture::new();
        assert_eq!(t.eval("123").unwrap(), float(123.0));
    }

    #[test]
    fn test_nil_undef() {
        let mut t = Fixture::new();
        assert_eq!(t.eval("null").unwrap(), HostValue::Nil);
        assert_eq!(t.eval("undefined").unwrap(), HostValue::Nil);
    }

    #[test]
    fn test_array() {
        let mut t = Fixture::new();
        assert_eq!(
            t.eval("[1, 2, 3]").unwrap(),
            HostValue::from(vec![1.0, 2.0, 3.0])
        );
        assert_eq!(
            t.eval("[1, [2, [3]]]").unwrap(),
            HostValue::Sequence(vec![
                float(1.0),
                HostValue::Sequence(vec![float(2.0), HostValue::from(vec![3.0])]),
            ])
        );
    }

    #[test]
    fn test_object() {
        let mut t = Fixture::new();
        assert_eq!(
            t.eval("({a: 1, b: 2})").unwrap(),
            HostValue::mapping([("a", float(1.0)), ("b", float(2.0))])
        );
        assert_eq!(
            t.eval("({a: 1, b: {c: [2]}})").unwrap(),
            HostValue::mapping([
                ("a", float(1.0)),
                ("b", HostValue::mapping([("c", HostValue::from(vec![2.0]))])),
            ])
        );
    }

    #[test]
    fn test_complex_object() {
        let mut t = Fixture::new();
        assert_eq!(t.eval("a = function() {}").unwrap(), HostValue::Complex);
    }

    #[test]
    fn test_throw_error() {
        let mut t = Fixture::new();
        let err = t.eval("throw new Error(\"boom\")").unwrap_err();
        assert_eq!(err, script_error(ScriptErrorKind::Error, "boom"));
    }

    #[test]
    fn test_thrown_primitive() {
        let mut t = Fixture::new();
        let err = t.eval("throw 42").unwrap_err();
        assert_eq!(err, script_error(ScriptErrorKind::Error, "42"));
    }

    #[test]
    fn test_reference_error() {
        let mut t = Fixture::new();
        let err = t.eval("fail").unwrap_err();
        assert_eq!(
            err,
            script_error(ScriptErrorKind::Reference, "identifier 'fail' undefined")
        );
    }

    #[test]
    fn test_syntax_error() {
        let mut t = Fixture::new();
        let err = t.eval("{").unwrap_err();
        assert_eq!(err, script_error(ScriptErrorKind::Syntax, "parse error (line 1)"));
    }

    #[test]
    fn test_type_error() {
        let mut t = Fixture::new();
        let err = t.eval("null.fail").unwrap_err();
        assert_eq!(err, script_error(ScriptErrorKind::Type, "invalid base value"));
        assert_eq!(err.to_string(), "TypeError: invalid base value");
    }

    #[test]
    fn test_range_error_from_deep_recursion() {
        let mut t = Fixture::new();
        let err = t.eval("function r() { return r() } r()").unwrap_err();
        assert_eq!(err.script_kind(), Some(ScriptErrorKind::Range));
    }

    #[test]
    fn test_deeply_nested_source() {
        let mut t = Fixture::new();
        let nested = format!("{}1{}", "(".repeat(500), ")".repeat(500));
        let err = t.eval(&nested).unwrap_err();
        assert_eq!(err, script_error(ScriptErrorKind::Syntax, "nesting too deep (line 1)"));

        let chain = format!("1{}", "+1".repeat(20000));
        let err = t.eval(&chain).unwrap_err();
        assert_eq!(err.script_kind(), Some(ScriptErrorKind::Syntax));
        assert_eq!(t.eval("1 + 1").unwrap(), float(2.0));
    }

    #[test]
    fn test_deeply_nested_json() {
        let mut t = Fixture::new();
        let err = t
            .eval("var a = []; for (var i = 0; i < 1000; i++) a = [a]; JSON.stringify(a)")
            .unwrap_err();
        assert_eq!(err, script_error(ScriptErrorKind::Range, "json nesting too deep"));
        let err = t.eval("JSON.parse(new Array(1000).join('[') + ']')").unwrap_err();
        assert_eq!(err.script_kind(), Some(ScriptErrorKind::Range));
    }

    #[test]
    fn test_cyclic_result() {
        let mut t = Fixture::new();
        let err = t.eval("var a = {}; a.self = a; a").unwrap_err();
        assert_eq!(err, Error::Argument("cannot convert cyclic structure".to_string()));
    }
}

mod exec {
    use super::*;

    #[test]
    fn test_basic() {
        let mut t = Fixture::new();
        t.exec("a = 1").unwrap();
        assert_eq!(t.eval("a").unwrap(), float(1.0));
    }

    #[test]
    fn test_doesnt_try_convert() {
        let mut t = Fixture::new();
        t.exec("a = {b: function() {}}").unwrap();
        t.exec("b = {c: 1}").unwrap();
        assert_eq!(t.eval("b.c").unwrap(), float(1.0));
    }

    #[test]
    fn test_var_then_get_property() {
        let mut t = Fixture::new();
        t.exec("var x = 40 + 2").unwrap();
        assert_eq!(t.ctx.get_property("x").unwrap(), float(42.0));
    }

    #[test]
    fn test_errors() {
        let mut t = Fixture::new();
        assert_eq!(
            t.exec("throw new Error(\"boom\")").unwrap_err(),
            script_error(ScriptErrorKind::Error, "boom")
        );
        assert_eq!(
            t.exec("fail").unwrap_err(),
            script_error(ScriptErrorKind::Reference, "identifier 'fail' undefined")
        );
        assert_eq!(
            t.exec("{").unwrap_err(),
            script_error(ScriptErrorKind::Syntax, "parse error (line 1)")
        );
        assert_eq!(
            t.exec("null.fail").unwrap_err(),
            script_error(ScriptErrorKind::Type, "invalid base value")
        );
    }

    #[test]
    fn test_custom_error_names_fall_back_to_base() {
        let mut t = Fixture::new();
        let err = t
            .exec("var e = new Error('odd'); e.name = 'OddError'; throw e")
            .unwrap_err();
        assert_eq!(err, script_error(ScriptErrorKind::Error, "odd"));
        let err = t.exec("throw new URIError('bad uri')").unwrap_err();
        assert_eq!(err, script_error(ScriptErrorKind::Uri, "bad uri"));
    }
}

mod get_property {
    use super::*;

    #[test]
    fn test_basic() {
        let mut t = Fixture::new();
        t.exec("a = 1").unwrap();
        assert_eq!(t.ctx.get_property("a").unwrap(), float(1.0));
    }

    #[test]
    fn test_nested() {
        let mut t = Fixture::new();
        t.exec("a = {}; a.b = {}; a.b.c = 1").unwrap();
        assert_eq!(t.ctx.get_property(["a", "b", "c"]).unwrap(), float(1.0));
    }

    #[test]
    fn test_nested_undefined() {
        let mut t = Fixture::new();
        t.exec("a = {}").unwrap();
        assert_eq!(t.ctx.get_property(["a", "missing"]).unwrap(), HostValue::Nil);
    }

    #[test]
    fn test_missing() {
        let mut t = Fixture::new();
        assert_eq!(
            t.ctx.get_property("a").unwrap_err(),
            script_error(ScriptErrorKind::Reference, "identifier 'a' undefined")
        );
    }

    #[test]
    fn test_nested_reference_error() {
        let mut t = Fixture::new();
        assert_eq!(
            t.ctx.get_property(vec!["a", "b"]).unwrap_err(),
            script_error(ScriptErrorKind::Reference, "identifier 'a' undefined")
        );
    }

    #[test]
    fn test_nested_type_error() {
        let mut t = Fixture::new();
        t.exec("a = {};").unwrap();
        assert_eq!(
            t.ctx.get_property(["a", "b", "c"]).unwrap_err(),
            script_error(ScriptErrorKind::Type, "invalid base value")
        );
    }

    #[test]
    fn test_path_from_host_value() {
        let mut t = Fixture::new();
        t.exec("a = {b: 'c'}").unwrap();
        let path = HostValue::from(vec!["a", "b"]);
        assert_eq!(t.ctx.get_property(&path).unwrap(), "c".into());
        assert!(matches!(
            t.ctx.get_property(HostValue::Integer(1)),
            Err(Error::Type(_))
        ));
        assert!(matches!(
            t.ctx.get_property(Vec::<&str>::new()),
            Err(Error::Argument(_))
        ));
    }

    #[test]
    fn test_sentinel_entries_are_omitted() {
        let mut t = Fixture::new();
        t.exec("o = {a: 1, f: function() {}, nested: {g: function() {}}}")
            .unwrap();
        assert_eq!(
            t.ctx.get_property("o").unwrap(),
            HostValue::mapping([
                ("a", float(1.0)),
                ("nested", HostValue::Mapping(BTreeMap::new())),
            ])
        );
    }

    #[test]
    fn test_sentinel_elements_are_kept_in_sequences() {
        let mut t = Fixture::new();
        t.exec("l = [1, function() {}]").unwrap();
        assert_eq!(
            t.ctx.get_property("l").unwrap(),
            HostValue::Sequence(vec![float(1.0), HostValue::Complex])
        );
    }
}

mod call_property {
    use super::*;

    fn fixture() -> Fixture {
        let mut t = Fixture::new();
        t.exec("function id(a) { return a }").unwrap();
        t
    }

    #[test]
    fn test_primitives() {
        let mut t = fixture();
        assert_eq!(t.ctx.call_property("id", &["Hei".into()]).unwrap(), "Hei".into());
        assert_eq!(t.ctx.call_property("id", &[2.into()]).unwrap(), float(2.0));
        assert_eq!(t.ctx.call_property("id", &[2.0.into()]).unwrap(), float(2.0));
        assert_eq!(t.ctx.call_property("id", &[true.into()]).unwrap(), true.into());
        assert_eq!(t.ctx.call_property("id", &[false.into()]).unwrap(), false.into());
        assert_eq!(t.ctx.call_property("id", &[HostValue::Nil]).unwrap(), HostValue::Nil);
        assert_eq!(
            t.ctx.call_property("id", &[HostValue::symbol("sym")]).unwrap(),
            "sym".into()
        );
    }

    #[test]
    fn test_arrays() {
        let mut t = fixture();
        assert_eq!(
            t.ctx.call_property("id", &[HostValue::from(vec![1])]).unwrap(),
            HostValue::from(vec![1.0])
        );
        let nested = HostValue::Sequence(vec![HostValue::Sequence(vec![
            "foo".into(),
            HostValue::from(vec![1]),
        ])]);
        assert_eq!(
            t.ctx.call_property("id", &[nested]).unwrap(),
            HostValue::Sequence(vec![HostValue::Sequence(vec![
                "foo".into(),
                HostValue::from(vec![1.0]),
            ])])
        );
    }

    #[test]
    fn test_mappings() {
        let mut t = fixture();
        let hash = HostValue::mapping([("hello", HostValue::from(123))]);
        assert_eq!(
            t.ctx.call_property("id", &[hash]).unwrap(),
            HostValue::mapping([("hello", float(123.0))])
        );
        let nested = HostValue::mapping([(
            MapKey::Symbol("hello".to_string()),
            HostValue::Sequence(vec![HostValue::mapping([("foo", HostValue::from(123))])]),
        )]);
        assert_eq!(
            t.ctx.call_property("id", &[nested]).unwrap(),
            HostValue::mapping([(
                "hello",
                HostValue::Sequence(vec![HostValue::mapping([("foo", float(123.0))])]),
            )])
        );
    }

    #[test]
    fn test_math_pow() {
        let mut t = Fixture::new();
        assert_eq!(
            t.ctx
                .call_property(["Math", "pow"], &[2.into(), 10.into()])
                .unwrap(),
            float(1024.0)
        );
    }

    #[test]
    fn test_binding() {
        let mut t = Fixture::new();
        t.exec("var self = this; function test() { return this === self }")
            .unwrap();
        assert_eq!(t.ctx.call_property("test", &[]).unwrap(), true.into());
    }

    #[test]
    fn test_nested_property() {
        let mut t = Fixture::new();
        t.exec("a = {}; a.b = {}; a.b.id = function(v) { return v; };")
            .unwrap();
        assert_eq!(
            t.ctx.call_property(["a", "b", "id"], &["Hei".into()]).unwrap(),
            "Hei".into()
        );
    }

    #[test]
    fn test_nested_binding() {
        let mut t = Fixture::new();
        t.exec("a = {}; a.b = {}; a.b.test = function() { return this == a.b; };")
            .unwrap();
        assert_eq!(t.ctx.call_property(["a", "b", "test"], &[]).unwrap(), true.into());
    }

    #[test]
    fn test_throw_error() {
        let mut t = Fixture::new();
        t.exec("function fail(msg) { throw new Error(msg) }").unwrap();
        assert_eq!(
            t.ctx.call_property("fail", &["boom".into(), FILE.into()]).unwrap_err(),
            script_error(ScriptErrorKind::Error, "boom")
        );
    }

    #[test]
    fn test_reference_errors() {
        let mut t = Fixture::new();
        assert_eq!(
            t.ctx.call_property("missing", &[]).unwrap_err(),
            script_error(ScriptErrorKind::Reference, "identifier 'missing' undefined")
        );
        assert_eq!(
            t.ctx.call_property(["missing", "foo"], &[]).unwrap_err(),
            script_error(ScriptErrorKind::Reference, "identifier 'missing' undefined")
        );
    }

    #[test]
    fn test_not_callable() {
        let mut t = Fixture::new();
        t.exec("a = {}").unwrap();
        assert_eq!(
            t.ctx.call_property(["a", "missing"], &[]).unwrap_err(),
            script_error(ScriptErrorKind::Type, "not callable")
        );
    }

    #[test]
    fn test_unknown_argument_type() {
        let mut t = fixture();
        let widget = HostValue::opaque(Widget);

        let err = t.ctx.call_property("id", &[widget.clone()]).unwrap_err();
        assert!(matches!(&err, Error::Type(m) if m.contains("Widget")), "{}", err);

        let err = t
            .ctx
            .call_property("id", &[HostValue::Sequence(vec![widget.clone()])])
            .unwrap_err();
        assert!(matches!(err, Error::Type(_)));

        let mut by_number = BTreeMap::new();
        by_number.insert(MapKey::Integer(123), widget.clone());
        let err = t.ctx.call_property("id", &[by_number.into()]).unwrap_err();
        assert!(matches!(&err, Error::Type(m) if m.contains("123")), "{}", err);

        let err = t
            .ctx
            .call_property("id", &[HostValue::mapping([("key", widget)])])
            .unwrap_err();
        assert!(matches!(err, Error::Type(_)));

        let err = t.ctx.call_property("id", &[HostValue::Complex]).unwrap_err();
        assert!(matches!(err, Error::Type(_)));
    }
}

mod strings {
    use super::*;

    #[test]
    fn test_ascii() {
        let mut t = Fixture::new();
        assert_eq!(t.eval("\"foo\"").unwrap(), "foo".into());
    }

    #[test]
    fn test_supplementary_round_trip() {
        let mut t = Fixture::new();
        t.exec("function id(a) { return a }").unwrap();
        let text = "caf\u{e9} \u{1F600}";
        assert_eq!(t.ctx.call_property("id", &[text.into()]).unwrap(), text.into());
        assert_eq!(
            t.ctx.call_property("id", &["\u{1F600}".into()]).unwrap(),
            "\u{1F600}".into()
        );
        assert_eq!(t.eval("'\\uD83D\\uDE00'").unwrap(), "\u{1F600}".into());
        assert_eq!(t.eval("'\\uD83D\\uDE00'.length").unwrap(), float(2.0));
    }

    #[test]
    fn test_unpaired_surrogate_is_rejected() {
        let mut t = Fixture::new();
        let err = t.eval("'\\uD800'").unwrap_err();
        assert!(matches!(&err, Error::Argument(m) if m.contains("surrogate")), "{}", err);
    }

    #[test]
    fn test_property_names_are_transcoded() {
        let mut t = Fixture::new();
        let value = HostValue::mapping([("\u{1F600}", HostValue::from(1))]);
        t.ctx.define_function("keys", |args| {
            match args.into_iter().next() {
                Some(HostValue::Mapping(map)) => Ok(HostValue::Sequence(
                    map.keys()
                        .filter_map(|k| k.as_name().map(HostValue::from))
                        .collect(),
                )),
                _ => Ok(HostValue::Nil),
            }
        })
        .unwrap();
        assert_eq!(
            t.ctx.call_property("keys", &[value]).unwrap(),
            HostValue::Sequence(vec!["\u{1F600}".into()])
        );
    }
}

#[test]
fn test_stacktrace() {
    let mut t = Fixture::new();
    let source = "function run() {\n  try {\n    throw new Error;\n  } catch (err) {\n    return err.stack.toString();\n  }\n}\n\nrun();";
    let trace = t.ctx.eval_with_filename(source, "trace.js").unwrap();
    let trace = trace.as_str().unwrap_or_default().to_string();
    assert!(trace.contains("trace.js:3"), "{}", trace);
}

#[test]
fn test_default_filename_in_stacktrace() {
    let mut t = Fixture::with_config(ContextConfig::default().with_default_filename("main.js"));
    let trace = t.ctx.eval("new Error('x').stack").unwrap();
    assert!(trace.as_str().unwrap_or_default().contains("main.js:1"), "{:?}", trace);
}

mod modules {
    use super::*;

    #[test]
    fn test_globals_are_undefined() {
        let mut t = Fixture::new();
        for name in ["require", "module", "exports", "Host"] {
            assert_eq!(
                t.eval(&format!("typeof {}", name)).unwrap(),
                "undefined".into(),
                "{}",
                name
            );
        }
    }
}

mod previous_bugs {
    use super::*;

    #[test]
    fn test_tailcall_bug() {
        let mut t = Fixture::new();
        let result = t
            .eval(
                "var reduce = function(obj, iterator, memo) {
                   return obj.reduce(iterator, memo);
                 };
                 function replace(array, shallow) {
                   return reduce(array, function(memo, value) {
                     return memo.concat(shallow);
                   }, []);
                 }
                 JSON.stringify(replace([1, 2], 1));",
            )
            .unwrap();
        assert_eq!(result, "[1,1]".into());
    }

    #[test]
    fn test_bind_constructor() {
        let mut t = Fixture::new();
        let result = t
            .eval(
                "function Thing(value) { this.value = value; }
                 one = Thing.bind(null, 1);
                 var obj = new one;
                 obj.value;",
            )
            .unwrap();
        assert_eq!(result, float(1.0));
    }
}

mod sentinel {
    use super::*;

    #[test]
    fn test_custom_sentinel() {
        let marker = HostValue::String("<complex>".to_string());
        let mut t = Fixture::with_config(ContextConfig::default().with_complex_object(marker.clone()));
        assert_eq!(t.eval("(function() {})").unwrap(), marker);
        assert_eq!(
            t.eval("({a: 1, f: function() {}})").unwrap(),
            HostValue::mapping([("a", float(1.0))])
        );
    }

    #[test]
    fn test_opaque_sentinel_is_not_pushed_back() {
        let marker = HostValue::opaque(Widget);
        let config = ContextConfig::default()
            .with_complex_object(marker.clone())
            .with_foreign_bridge(true);
        let mut t = Fixture::with_config(config);
        t.exec("function id(a) { return a }").unwrap();
        let pulled = t.eval("[function() {}]").unwrap();
        assert_eq!(pulled, HostValue::Sequence(vec![marker.clone()]));
        let err = t.ctx.call_property("id", &[marker]).unwrap_err();
        assert!(matches!(&err, Error::Type(m) if m.contains("Widget")), "{}", err);
        assert_eq!(t.ctx.live_references(), 0);
    }
}

mod define_function {
    use super::*;

    #[test]
    fn test_callback_receives_converted_arguments() {
        let mut t = Fixture::new();
        t.ctx
            .define_function("sum", |args| {
                let total: f64 = args.iter().filter_map(HostValue::as_f64).sum();
                Ok(HostValue::Float(total))
            })
            .unwrap();
        assert_eq!(t.eval("sum(1, 2, 3.5)").unwrap(), float(6.5));
        assert_eq!(t.eval("[sum(), sum(1)]").unwrap(), HostValue::from(vec![0.0, 1.0]));
    }

    #[test]
    fn test_callback_results_are_converted() {
        let mut t = Fixture::new();
        t.ctx
            .define_function("config", |_| {
                Ok(HostValue::mapping([
                    ("name", HostValue::from("demo")),
                    ("sizes", HostValue::from(vec![1, 2])),
                ]))
            })
            .unwrap();
        assert_eq!(t.eval("config().sizes[1] + config().name").unwrap(), "2demo".into());
    }

    #[test]
    fn test_callback_errors_round_trip() {
        let mut t = Fixture::new();
        t.ctx
            .define_function("strict", |_| {
                Err(Error::Script {
                    kind: ScriptErrorKind::Range,
                    message: "too big".to_string(),
                })
            })
            .unwrap();
        assert_eq!(
            t.eval("var r; try { strict() } catch (e) { r = e.name + ': ' + e.message } r")
                .unwrap(),
            "RangeError: too big".into()
        );
        assert_eq!(
            t.eval("strict()").unwrap_err(),
            script_error(ScriptErrorKind::Range, "too big")
        );
    }
}

mod foreign {
    use super::*;

    fn bridged() -> Fixture {
        let mut t = Fixture::with_config(ContextConfig::default().with_foreign_bridge(true));
        t.exec(
            "var kept = null;
             function id(o) { return o }
             function keep(o) { kept = o }
             function hit(o, n) { return Host.send(o, 'hit', [n]) }
             function explode(o) { return Host.send(o, 'explode', []) }",
        )
        .unwrap();
        t
    }

    #[test]
    fn test_opaque_round_trip_is_identity() {
        let mut t = bridged();
        let counter: Rc<dyn HostObject> = Rc::new(Counter::default());
        let value = HostValue::Opaque(counter.clone());
        match t.ctx.call_property("id", &[value]).unwrap() {
            HostValue::Opaque(back) => assert!(Rc::ptr_eq(&back, &counter)),
            other => panic!("expected an opaque value, got {:?}", other),
        }
    }

    #[test]
    fn test_reference_lifecycle() {
        let mut t = bridged();
        let counter: Rc<dyn HostObject> = Rc::new(Counter::default());
        t.ctx
            .call_property("keep", &[HostValue::Opaque(counter.clone())])
            .unwrap();
        t.ctx.gc();
        assert_eq!(t.ctx.live_references(), 1);
        assert_eq!(Rc::strong_count(&counter), 2);

        t.exec("kept = null").unwrap();
        t.ctx.gc();
        t.ctx.gc();
        assert_eq!(t.ctx.live_references(), 0);
        assert_eq!(Rc::strong_count(&counter), 1);
    }

    #[test]
    fn test_send_and_is_object() {
        let mut t = bridged();
        let counter = Rc::new(Counter::default());
        let value = HostValue::Opaque(counter.clone());
        assert_eq!(
            t.ctx.call_property("hit", &[value.clone(), 5.into()]).unwrap(),
            float(5.0)
        );
        assert_eq!(
            t.ctx.call_property("hit", &[value.clone(), 2.into()]).unwrap(),
            float(7.0)
        );
        assert_eq!(counter.hits.get(), 7);

        t.ctx.call_property("keep", &[value]).unwrap();
        assert_eq!(t.eval("Host.isObject(kept)").unwrap(), true.into());
        assert_eq!(t.eval("Host.isObject({})").unwrap(), false.into());
        assert_eq!(t.eval("Host.isObject(1)").unwrap(), false.into());
    }

    #[test]
    fn test_missing_method_propagates_unchanged() {
        let mut t = bridged();
        let value = HostValue::opaque(Counter::default());
        assert_eq!(
            t.ctx.call_property("explode", &[value.clone()]).unwrap_err(),
            Error::no_method("Counter", "explode")
        );
        t.ctx.call_property("keep", &[value]).unwrap();
        assert_eq!(
            t.eval("var r; try { Host.send(kept, 'explode', []) } catch (e) { r = e.name } r")
                .unwrap(),
            "UncaughtError".into()
        );
    }

    #[test]
    fn test_invalid_send_arguments() {
        let mut t = bridged();
        let err = t.eval("Host.send({}, 'hit', [])").unwrap_err();
        assert_eq!(err, script_error(ScriptErrorKind::Type, "invalid foreign object"));
        t.ctx
            .call_property("keep", &[HostValue::opaque(Counter::default())])
            .unwrap();
        let err = t.eval("Host.send(kept, 1, [])").unwrap_err();
        assert_eq!(err.script_kind(), Some(ScriptErrorKind::Type));
        let err = t.eval("Host.send(kept, 'hit', 1)").unwrap_err();
        assert_eq!(err.script_kind(), Some(ScriptErrorKind::Type));
    }

    #[test]
    fn test_wrappers_hide_their_reference() {
        let mut t = bridged();
        t.ctx
            .call_property("keep", &[HostValue::opaque(Widget)])
            .unwrap();
        assert_eq!(t.eval("Object.keys(kept).length").unwrap(), float(0.0));
        assert_eq!(t.eval("JSON.stringify(kept)").unwrap(), "{}".into());
    }

    #[test]
    fn test_dropping_the_context_releases_objects() {
        let counter: Rc<dyn HostObject> = Rc::new(Counter::default());
        {
            let mut t = bridged();
            t.ctx
                .call_property("keep", &[HostValue::Opaque(counter.clone())])
                .unwrap();
            assert_eq!(Rc::strong_count(&counter), 2);
        }
        assert_eq!(Rc::strong_count(&counter), 1);
    }
}

mod fatal {
    use super::*;

    fn limited() -> ContextConfig {
        let engine = EngineConfig::default().with_gc_threshold(usize::MAX);
        let builtins = kpio_js::Engine::with_config(engine.clone()).heap_stats().objects;
        ContextConfig::default().with_engine_config(engine.with_max_objects(builtins + 200))
    }

    #[test]
    fn test_fatal_latch() {
        let mut t = Fixture::with_config(limited());
        let tick = Rc::new(Cell::new(0));
        let calls = tick.clone();
        t.ctx
            .define_function("tick", move |_| {
                calls.set(calls.get() + 1);
                Ok(HostValue::Nil)
            })
            .unwrap();
        t.exec("var x = 1; tick()").unwrap();
        assert_eq!(tick.get(), 1);

        let err = t
            .exec("var a = []; for (;;) { try { a.push({}) } catch (e) {} }")
            .unwrap_err();
        assert!(err.is_fatal(), "{:?}", err);
        assert!(t.ctx.is_fatal());
        assert!(!t.ctx.is_valid());

        for err in [
            t.eval("tick()").unwrap_err(),
            t.exec("tick()").unwrap_err(),
            t.ctx.get_property("x").unwrap_err(),
            t.ctx.call_property("tick", &[]).unwrap_err(),
        ] {
            assert_eq!(err.internal_kind(), Some(InternalErrorKind::Fatal));
            assert_eq!(err.message(), "context is in a fatal state");
        }
        assert!(t.ctx.define_function("late", |_| Ok(HostValue::Nil)).is_err());
        assert_eq!(t.ctx.gc(), 0);
        assert_eq!(tick.get(), 1);
    }

    #[test]
    fn test_setup_failure_is_reported() {
        let engine = EngineConfig::default().with_gc_threshold(usize::MAX);
        let builtins = kpio_js::Engine::with_config(engine.clone()).heap_stats().objects;
        let tight = ContextConfig::default()
            .with_engine_config(engine.with_max_objects(builtins + 2))
            .with_foreign_bridge(true);

        let err = Context::with_config(tight.clone()).unwrap_err();
        assert!(matches!(err, Error::Internal { .. }), "{:?}", err);

        let mut ctx = Context::with_config(tight.with_foreign_bridge(false)).unwrap();
        assert_eq!(ctx.eval("typeof require").unwrap(), "undefined".into());
        assert!(ctx.is_valid());
    }

    #[test]
    fn test_contexts_are_isolated() {
        let mut a = Fixture::new();
        let mut b = Fixture::new();
        a.exec("var shared = 1").unwrap();
        assert!(b.ctx.get_property("shared").is_err());
        assert_eq!(a.ctx.get_property("shared").unwrap(), float(1.0));
    }
}
