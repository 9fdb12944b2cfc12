use pretty_assertions::assert_eq;
use serde_json::json;
use tiered_expr as tx;
use tiered_expr::{EvaluationContext, ExpressionParser};

fn order() -> serde_json::Value {
    json!({
        "customer": {"name": "Ada", "tier": "gold"},
        "lines": [
            {"sku": "A-1", "qty": 2, "price": 10},
            {"sku": "B-2", "qty": 1, "price": 2.5}
        ],
        "note": ""
    })
}

#[test]
fn test_example_line_total() {
    let out = tx::eval_with("lines[0].qty * lines[0].price + lines[1].price", order()).unwrap();
    assert_eq!(out, json!(22.5));
}

#[test]
fn test_example_conditional_discount() {
    let expr = "customer.tier == 'gold' ? lines[0].price * 0.5 : lines[0].price";
    assert_eq!(tx::eval_with(expr, order()).unwrap(), json!(5.0));
}

#[test]
fn test_example_elvis_on_empty_string() {
    assert_eq!(tx::eval_with("note ?: 'n/a'", order()).unwrap(), json!("n/a"));
    assert_eq!(tx::eval_with("customer.name ?: 'n/a'", order()).unwrap(), json!("Ada"));
}

#[test]
fn test_example_bracket_property_and_string_index() {
    assert_eq!(tx::eval_with("customer['name'][0]", order()).unwrap(), json!("A"));
}

#[test]
fn test_example_missing_terminal_reads_null() {
    assert_eq!(tx::eval_with("customer.email", order()).unwrap(), json!(null));
}

#[test]
fn test_example_variables_and_collections() {
    let expr = ExpressionParser::default()
        .parse("{total: #qty * 3, skus: {#a, #b}, ok: #qty > 1 && !#blocked}")
        .unwrap();
    let mut ctx = EvaluationContext::default()
        .with_variable("qty", json!(4))
        .with_variable("a", json!("x"))
        .with_variable("b", json!("y"))
        .with_variable("blocked", json!(false));
    assert_eq!(
        expr.get_value(&mut ctx).unwrap(),
        json!({"total": 12, "skus": ["x", "y"], "ok": true})
    );
}

#[test]
fn test_example_this_and_root_are_the_context_root() {
    let out = tx::eval_with("size(#this.lines) == size(#root.lines)", order()).unwrap();
    assert_eq!(out, json!(true));
}

#[test]
fn test_example_method_chain() {
    let out = tx::eval_with("lines[1].sku.lower().contains('b')", order()).unwrap();
    assert_eq!(out, json!(true));
}

#[test]
fn test_example_operators() {
    assert_eq!(tx::eval("7 / 2").unwrap(), json!(3));
    assert_eq!(tx::eval("7 % 4 - -1").unwrap(), json!(4));
    assert_eq!(tx::eval("'n=' + 3").unwrap(), json!("n=3"));
    assert_eq!(tx::eval("{1} + {2, 3}").unwrap(), json!([1, 2, 3]));
    assert_eq!(tx::eval("1 == 1.0 and 'a' < 'b' or false").unwrap(), json!(true));
    assert_eq!(tx::eval("not (2 >= 3)").unwrap(), json!(true));
}

#[test]
fn test_example_reuse_is_independent_of_context() {
    let expr = ExpressionParser::default().parse("customer.name.upper()").unwrap();
    assert_eq!(expr.value_of(order()).unwrap(), json!("ADA"));
    assert_eq!(
        expr.value_of(json!({"customer": {"name": "bo"}})).unwrap(),
        json!("BO")
    );
}
