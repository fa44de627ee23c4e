use probitas::{selector, Scenario, Selector, SelectorSyntaxError};

fn scenario(name: &str, tags: &[&str]) -> Scenario {
    Scenario::new(name).tags(tags.iter().copied())
}

fn names(scenarios: &[Scenario]) -> Vec<&str> {
    scenarios.iter().map(|s| s.name.as_str()).collect()
}

// Two scenarios tagged ["api","auth"] and ["api"]; `tag:api,!tag:auth`
// keeps only the second.
#[test]
fn conjunction_with_negation_picks_the_untagged_scenario() {
    let scenarios = vec![
        scenario("first", &["api", "auth"]),
        scenario("second", &["api"]),
    ];

    let picked = selector::apply(
        scenarios,
        &["tag:api,!tag:auth".parse::<Selector>().unwrap()],
    );

    assert_eq!(names(&picked), ["second"]);
}

#[test]
fn repeated_selectors_union_their_matches() {
    let scenarios = vec![
        scenario("api checkout", &["api"]),
        scenario("db migration", &["db"]),
        scenario("ui smoke", &["ui"]),
    ];

    let picked = selector::apply(
        scenarios,
        &[
            "tag:db".parse::<Selector>().unwrap(),
            "checkout".parse::<Selector>().unwrap(),
        ],
    );

    assert_eq!(names(&picked), ["api checkout", "db migration"]);
}

#[test]
fn applying_no_selectors_is_the_identity() {
    let scenarios =
        vec![scenario("a", &[]), scenario("b", &["x"]), scenario("c", &[])];

    let picked = selector::apply(scenarios, &[]);

    assert_eq!(names(&picked), ["a", "b", "c"]);
}

#[test]
fn application_is_idempotent_and_order_preserving() {
    let selectors = vec!["tag:keep".parse::<Selector>().unwrap()];
    let scenarios = vec![
        scenario("third", &["keep"]),
        scenario("second", &[]),
        scenario("first", &["keep"]),
    ];

    let once = selector::apply(scenarios, &selectors);
    assert_eq!(names(&once), ["third", "first"]);

    let twice = selector::apply(once, &selectors);
    assert_eq!(names(&twice), ["third", "first"]);
}

#[test]
fn name_matching_is_substring_and_tag_matching_is_exact() {
    let scenarios = vec![
        scenario("checkout flow", &["api-v2"]),
        scenario("login", &["api"]),
    ];

    let by_name = selector::apply(
        scenarios,
        &["name:check".parse::<Selector>().unwrap()],
    );
    assert_eq!(names(&by_name), ["checkout flow"]);

    let scenarios = vec![
        scenario("checkout flow", &["api-v2"]),
        scenario("login", &["api"]),
    ];
    let by_tag =
        selector::apply(scenarios, &["tag:api".parse().unwrap()]);
    assert_eq!(names(&by_tag), ["login"]);
}

#[test]
fn malformed_expressions_are_usage_errors() {
    assert!(matches!(
        "tag:".parse::<Selector>(),
        Err(SelectorSyntaxError::EmptyValue { .. }),
    ));
    assert!(matches!(
        ":value".parse::<Selector>(),
        Err(SelectorSyntaxError::EmptyType { .. }),
    ));
    assert!(matches!(
        "file:foo".parse::<Selector>(),
        Err(SelectorSyntaxError::UnknownType { ty, .. }) if ty == "file",
    ));
    assert!(matches!(
        "!".parse::<Selector>(),
        Err(SelectorSyntaxError::EmptyValue { .. }),
    ));
    // `!` is only the leading negation marker, never part of a value.
    assert!(matches!(
        "name:a!b".parse::<Selector>(),
        Err(SelectorSyntaxError::MisplacedNegation { .. }),
    ));
}

#[test]
fn whitespace_around_atoms_is_insignificant() {
    let sel: Selector = "  tag:api ,  ! tag:slow ".parse().unwrap();

    assert!(sel.is_match("anything", &["api".into()]));
    assert!(!sel.is_match(
        "anything",
        &["api".into(), "slow".into()],
    ));
}
