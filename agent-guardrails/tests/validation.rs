use agent_guardrails::{OutputValidator, ValidationStatus};
use proptest::prelude::*;
use serde_json::json;

fn distinct_sentence(target_chars: usize) -> String {
    let mut sentence = String::new();
    let mut index = 0;
    while sentence.len() < target_chars - 10 {
        sentence.push_str(&format!("term{index} "));
        index += 1;
    }
    let mut sentence = sentence.trim_end().to_owned();
    while sentence.len() < target_chars - 1 {
        sentence.push('z');
    }
    sentence.push('.');
    sentence
}

#[test]
fn two_characters_are_invalid() {
    let outcome = OutputValidator::default().validate("ok", "Writer");
    assert_eq!(outcome.status(), ValidationStatus::Invalid);
    assert!(outcome.output().is_none());
}

#[test]
fn json_report_is_valid() {
    let outcome = OutputValidator::default()
        .validate(r#"{"content":"Report ready","confidence":0.9}"#, "Writer");
    assert_eq!(outcome.status(), ValidationStatus::Valid);
    let output = outcome.output().unwrap();
    assert_eq!(output.content(), "Report ready");
    assert!((output.confidence().value() - 0.9).abs() < f64::EPSILON);
}

#[test]
fn long_distinct_sentence_scores_full_confidence() {
    let sentence = distinct_sentence(200);
    assert_eq!(sentence.chars().count(), 200);

    let output = OutputValidator::default()
        .validate(&sentence, "Writer")
        .into_output()
        .unwrap();
    assert!((output.confidence().value() - 1.0).abs() < f64::EPSILON);
}

proptest! {
    #[test]
    fn short_text_is_always_invalid(raw in "[^{]{0,9}") {
        let outcome = OutputValidator::default().validate(&raw, "Writer");
        prop_assert_eq!(outcome.status(), ValidationStatus::Invalid);
        prop_assert!(outcome.output().is_none());
    }

    #[test]
    fn json_content_is_returned_verbatim(content in any::<String>()) {
        let raw = json!({ "content": content }).to_string();
        let output = OutputValidator::default().validate(&raw, "Writer").into_output();
        prop_assert!(output.is_some());
        let output = output.unwrap();
        prop_assert_eq!(output.content(), content.as_str());
        prop_assert!((output.confidence().value() - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn prose_is_valid_with_a_bounded_score(raw in "[a-z][a-z .,!?]{8,300}[a-z.]") {
        let outcome = OutputValidator::default().validate(&raw, "Writer");
        prop_assert_eq!(outcome.status(), ValidationStatus::Valid);
        let output = outcome.into_output().unwrap();
        prop_assert_eq!(output.content(), raw.as_str());
        prop_assert!((0.5..=1.0).contains(&output.confidence().value()));
    }

    #[test]
    fn arbitrary_input_never_panics(raw in any::<String>()) {
        let outcome = OutputValidator::default().validate(&raw, "Writer");
        prop_assert_eq!(
            outcome.output().is_some(),
            outcome.status() == ValidationStatus::Valid
        );
    }
}
