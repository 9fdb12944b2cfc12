// Property: once an expression runs compiled, every evaluation returns the
// same value as the interpreter, or fails with an error of the same kind.

use proptest::prelude::*;
use serde_json::{json, Value};
use tiered_expr::{CompilationState, CompilerMode, EvaluationContext, ExpressionParser, ParserConfig};

fn leaf() -> impl Strategy<Value = String> {
    prop_oneof![
        (-20i64..20).prop_map(|n| n.to_string()),
        (0u8..4).prop_map(|n| format!("{n}.5")),
        Just("#a".to_string()),
        Just("#b".to_string()),
        Just("'s'".to_string()),
        Just("null".to_string()),
        Just("items[#i]".to_string()),
        Just("rec.n".to_string()),
    ]
}

fn operator() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["+", "-", "*", "/", "%", "<", ">=", "==", "!=", "and", "or"])
}

fn expression() -> impl Strategy<Value = String> {
    leaf().prop_recursive(4, 24, 3, |inner| {
        prop_oneof![
            (inner.clone(), operator(), inner.clone())
                .prop_map(|(l, op, r)| format!("({l} {op} {r})")),
            (inner.clone(), inner.clone(), inner.clone())
                .prop_map(|(c, t, e)| format!("({c} ? {t} : {e})")),
            (inner.clone(), inner.clone()).prop_map(|(v, f)| format!("({v} ?: {f})")),
            inner.clone().prop_map(|e| format!("abs({e})")),
            inner.prop_map(|e| format!("!{e}")),
        ]
    })
}

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        (-50i64..50).prop_map(Value::from),
        (-50i64..50).prop_map(|n| json!(n as f64 + 0.25)),
        Just(json!("t")),
        Just(json!("")),
        Just(Value::Null),
    ]
}

fn context() -> impl Strategy<Value = EvaluationContext> {
    (scalar(), scalar(), 0i64..4, scalar()).prop_map(|(a, b, i, n)| {
        EvaluationContext::new(json!({"items": [1, 2.5, "x"], "rec": {"n": n}}))
            .with_variable("a", a)
            .with_variable("b", b)
            .with_variable("i", json!(i))
    })
}

fn tiered() -> ExpressionParser {
    let cfg = ParserConfig::with_compiler(Some(CompilerMode::Mixed), None)
        .unwrap()
        .with_promotion_threshold(1);
    ExpressionParser::new(cfg)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn compiled_matches_interpreted(
        text in expression(),
        profile in context(),
        runs in prop::collection::vec(context(), 1..4),
    ) {
        let interpreted = ExpressionParser::default().parse(&text).unwrap();
        let compiled = tiered().parse(&text).unwrap();

        if compiled.get_value(&mut profile.clone()).is_ok() {
            prop_assert_eq!(compiled.state(), CompilationState::Compiled);
        }

        for ctx in runs {
            let expected = interpreted.get_value(&mut ctx.clone());
            let actual = compiled.get_value(&mut ctx.clone());
            match (expected, actual) {
                (Ok(e), Ok(a)) => prop_assert_eq!(e, a, "{}", text),
                (Err(e), Err(a)) => prop_assert_eq!(e.kind(), a.kind(), "{}", text),
                (e, a) => prop_assert!(false, "{}: interpreted {:?}, compiled {:?}", text, e, a),
            }
        }
    }
}
