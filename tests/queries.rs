use nestdb::collection::Collection;
use nestdb::datatype::Value;
use nestdb::error::NestError;
use serde_json::json;

fn setup() -> Collection {
    Collection::from_values(vec![
        json!({"a": 1, "b": 2}),
        json!({"a": 5, "b": 2}),
        json!({"a": 1, "b": 9}),
    ])
    .expect("import ok")
}

#[test]
fn fetch_without_query_returns_everything_in_order() {
    let mut db = setup();
    let all = db.fetch();
    assert_eq!(
        all,
        vec![
            Value::from(json!({"a": 1, "b": 2})),
            Value::from(json!({"a": 5, "b": 2})),
            Value::from(json!({"a": 1, "b": 9})),
        ]
    );
}

#[test]
fn or_widens_and_narrows() {
    let mut db = setup();
    let either = db
        .select("a", "=", 1)
        .expect("query ok")
        .or("b", "=", 2)
        .expect("query ok")
        .fetch();
    assert_eq!(either.len(), 3, "every record has a = 1 or b = 2");

    let both = db
        .select("a", "=", 1)
        .expect("query ok")
        .and("b", "=", 2)
        .expect("query ok")
        .fetch();
    assert_eq!(both, vec![Value::from(json!({"a": 1, "b": 2}))]);
}

#[test]
fn three_clauses_fold_from_the_left() {
    let mut db = setup();
    // (a = 5 OR b = 9) AND a = 1
    let found = db
        .select("a", "=", 5)
        .expect("query ok")
        .or("b", "=", 9)
        .expect("query ok")
        .and("a", "=", 1)
        .expect("query ok")
        .fetch();
    assert_eq!(found, vec![Value::from(json!({"a": 1, "b": 9}))]);
}

#[test]
fn select_starts_over() {
    let mut db = setup();
    db.settings_mut().retain_query = true;
    db.select("a", "=", 5).expect("query ok");
    db.select("b", "=", 9).expect("query ok");
    assert_eq!(db.fetch().len(), 1, "only the last select counts");
}

#[test]
fn execute_breeds_the_matches() {
    let mut db = setup();
    let mut found = db.select("b", ">=", 2).expect("query ok").and("a", "<", 5).expect("query ok").execute();
    assert_eq!(found.len(), 2);
    found.insert(json!({"a": 0})).expect("insert ok");
    assert_eq!(db.len(), 3, "the source is untouched");
    assert_eq!(db.last_selection().len(), 2);
}

#[test]
fn wildcard_and_field_sets() {
    let mut db = setup();
    assert_eq!(db.select("*", "=", 9).expect("query ok").fetch().len(), 1);
    assert_eq!(db.select(["a", "b"], "=", 5).expect("query ok").fetch().len(), 1);
    assert_eq!(db.select("*", "><", [4, 6]).expect("query ok").fetch().len(), 1);
}

#[test]
fn malformed_conditions() {
    let mut db = setup();
    assert!(matches!(db.select("a", "=", Value::Undefined), Err(NestError::Query(_))));
    assert!(matches!(db.select("a", "in", 3), Err(NestError::Query(_))));
    assert!(matches!(db.select("a", "~", 3), Err(NestError::Query(_))));
}

#[test]
fn nested_fields_and_patterns() {
    let mut db = Collection::from_values(vec![
        json!({"user": {"name": "Alice", "langs": ["rust", "c"]}}),
        json!({"user": {"name": "alfred"}}),
        json!({"user": {"name": "Bob"}}),
    ])
    .expect("import ok");
    assert_eq!(db.select("user.name", "LIKE", "Al%").expect("query ok").fetch().len(), 1);
    assert_eq!(db.select("user.name", "iLIKE", "al%").expect("query ok").fetch().len(), 2);
    assert_eq!(db.select("user.langs", "E", Value::Undefined).expect("query ok").fetch().len(), 1);
    assert_eq!(db.select("user.name", "in", ["Bob", "Eve"]).expect("query ok").fetch().len(), 1);
}
