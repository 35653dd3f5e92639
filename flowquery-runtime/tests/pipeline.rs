//! End-to-end scenarios for the operation executor, covering the concrete
//! input/output pairs a pipeline query must produce.

use std::sync::Arc;

use async_trait::async_trait;
use flowquery_core::Value;
use flowquery_runtime::{AsyncProvider, ExecError, Registry, Row, Runner};

fn row(pairs: &[(&str, Value)]) -> Row {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

async fn run(source: &str) -> Vec<Row> {
    let mut runner = Runner::new(source).expect("source should parse");
    runner.run().await.expect("query should execute");
    runner.results().to_vec()
}

#[tokio::test]
async fn return_arithmetic() {
    let rows = run("RETURN 1 + 2 AS sum").await;
    assert_eq!(rows, vec![row(&[("sum", Value::int(3))])]);
}

#[tokio::test]
async fn unwind_emits_one_row_per_element() {
    let rows = run("UNWIND [1,2,3] AS n RETURN n").await;
    assert_eq!(
        rows,
        vec![
            row(&[("n", Value::int(1))]),
            row(&[("n", Value::int(2))]),
            row(&[("n", Value::int(3))]),
        ]
    );
}

#[tokio::test]
async fn nested_unwind_groups_by_outer_binding() {
    let rows = run("UNWIND [1,1,2,2] AS i UNWIND range(1,4) AS j RETURN i, sum(j) AS s").await;
    assert_eq!(
        rows,
        vec![
            row(&[("i", Value::int(1)), ("s", Value::int(20))]),
            row(&[("i", Value::int(2)), ("s", Value::int(20))]),
        ]
    );
}

#[tokio::test]
async fn range_lookup_slices_from_the_end() {
    let rows = run("WITH range(1,10) AS a RETURN a[2:-2] AS b").await;
    let expected = Value::seq((3..=8).map(Value::int).collect());
    assert_eq!(rows, vec![row(&[("b", expected)])]);
}

#[tokio::test]
async fn case_picks_first_truthy_arm() {
    let rows = run("RETURN CASE WHEN 1 THEN 2 ELSE 3 END AS v").await;
    assert_eq!(rows, vec![row(&[("v", Value::int(2))])]);
}

#[tokio::test]
async fn predicate_form_aggregate_filters_before_reducing() {
    let rows = run("RETURN sum(n IN [1,2,3] | n WHERE n > 1) AS s").await;
    assert_eq!(rows, vec![row(&[("s", Value::int(5))])]);
}

#[tokio::test]
async fn where_after_return_gates_the_emitted_row() {
    let rows = run("UNWIND range(1,100) AS n WITH n RETURN n WHERE n >= 20 AND n <= 30").await;
    let expected: Vec<Row> = (20..=30).map(|n| row(&[("n", Value::int(n))])).collect();
    assert_eq!(rows, expected);
}

struct Gen;

#[async_trait(?Send)]
impl AsyncProvider for Gen {
    async fn generate(&self, _args: &[Value]) -> Result<Vec<Value>, ExecError> {
        Ok((1..=3)
            .map(|n| Value::map(row(&[("result", Value::int(n))])))
            .collect())
    }
}

#[tokio::test]
async fn call_yield_feeds_an_aggregate_downstream() {
    Registry::shared()
        .write()
        .expect("registry lock poisoned")
        .register_async("gen", Arc::new(Gen));

    let rows = run("CALL gen() YIELD result RETURN sum(result) AS total").await;
    assert_eq!(rows, vec![row(&[("total", Value::int(6))])]);
}

#[tokio::test]
async fn limit_truncates_without_reordering() {
    let rows = run("UNWIND range(1,10) AS n RETURN n LIMIT 3").await;
    assert_eq!(
        rows,
        vec![
            row(&[("n", Value::int(1))]),
            row(&[("n", Value::int(2))]),
            row(&[("n", Value::int(3))]),
        ]
    );
}

#[tokio::test]
async fn keywords_and_function_names_are_case_insensitive() {
    let rows = run("unwind [1,2] as n return SUM(n) as total").await;
    assert_eq!(rows, vec![row(&[("total", Value::int(3))])]);
}

#[tokio::test]
async fn repeated_runs_are_deterministic() {
    let a = run("UNWIND [3,1,2] AS n RETURN n").await;
    let b = run("UNWIND [3,1,2] AS n RETURN n").await;
    assert_eq!(a, b);
}
