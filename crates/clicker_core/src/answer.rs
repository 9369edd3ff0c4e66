//! Answer normalization and validation.
//!
//! All answer comparisons in the engine go through [`answers_match`]. Values
//! are coerced to a canonical string before comparing:
//!
//! * text is trimmed and lowercased,
//! * booleans become `"true"` / `"false"`,
//! * numbers, and text that parses as a finite number, become a canonical
//!   decimal (`3`, `3.5`), so `3`, `"3"` and `" 3.0 "` are equal.

use crate::domain::{AnswerValue, QuestionKind};
use crate::error::{EngineError, EngineResult};

const MAX_TEXT_ANSWER_LEN: usize = 1000;

/// The canonical comparison form of an answer.
pub fn normalize(value: &AnswerValue) -> String {
    match value {
        AnswerValue::Bool(b) => b.to_string(),
        AnswerValue::Number(n) => canonical_number(*n),
        AnswerValue::Text(text) => {
            let trimmed = text.trim();
            match parse_finite(trimmed) {
                Some(n) => canonical_number(n),
                None => trimmed.to_lowercase(),
            }
        }
    }
}

pub fn answers_match(given: &AnswerValue, expected: &AnswerValue) -> bool {
    normalize(given) == normalize(expected)
}

/// Rejects answers that cannot be an answer to the question at all.
pub fn validate_answer(kind: &QuestionKind, answer: &AnswerValue) -> EngineResult<()> {
    if let AnswerValue::Text(text) = answer {
        if text.trim().is_empty() {
            return Err(EngineError::Validation("answer must not be empty".to_string()));
        }
        if text.chars().count() > MAX_TEXT_ANSWER_LEN {
            return Err(EngineError::Validation(format!(
                "answer must be at most {} characters",
                MAX_TEXT_ANSWER_LEN
            )));
        }
    }
    if let AnswerValue::Number(n) = answer {
        if !n.is_finite() {
            return Err(EngineError::Validation("answer must be a finite number".to_string()));
        }
    }

    let normalized = normalize(answer);
    match kind {
        QuestionKind::MultipleChoice { options, .. } => {
            let known = options
                .iter()
                .any(|opt| normalize(&AnswerValue::Text(opt.clone())) == normalized);
            if !known {
                return Err(EngineError::Validation(
                    "answer is not one of the question's options".to_string(),
                ));
            }
        }
        QuestionKind::TrueFalse { .. } => {
            if normalized != "true" && normalized != "false" {
                return Err(EngineError::Validation(
                    "answer must be true or false".to_string(),
                ));
            }
        }
        QuestionKind::Numeric { .. } => {
            let numeric = match answer {
                AnswerValue::Number(_) => true,
                AnswerValue::Text(text) => parse_finite(text.trim()).is_some(),
                AnswerValue::Bool(_) => false,
            };
            if !numeric {
                return Err(EngineError::Validation("answer must be a number".to_string()));
            }
        }
        QuestionKind::ShortAnswer { .. } => {}
    }
    Ok(())
}

fn parse_finite(text: &str) -> Option<f64> {
    text.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn canonical_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> AnswerValue {
        AnswerValue::Text(s.to_string())
    }

    #[test]
    fn text_comparison_ignores_case_and_whitespace() {
        assert!(answers_match(&text("  Paris "), &text("paris")));
        assert!(!answers_match(&text("Paris"), &text("Rome")));
    }

    #[test]
    fn numbers_and_numeric_text_compare_by_value() {
        assert!(answers_match(&AnswerValue::Number(3.0), &text("3")));
        assert!(answers_match(&text(" 3.0 "), &AnswerValue::Number(3.0)));
        assert!(answers_match(&AnswerValue::Number(2.5), &text("2.50")));
        assert!(!answers_match(&AnswerValue::Number(3.0), &text("3.1")));
    }

    #[test]
    fn booleans_compare_with_their_text_form() {
        assert!(answers_match(&AnswerValue::Bool(true), &text("TRUE")));
        assert!(!answers_match(&AnswerValue::Bool(false), &text("true")));
    }

    #[test]
    fn non_finite_text_stays_text() {
        assert_eq!(normalize(&text("NaN")), "nan");
        assert_eq!(normalize(&text("inf")), "inf");
    }

    #[test]
    fn multiple_choice_answers_must_be_an_option() {
        let kind = QuestionKind::MultipleChoice {
            options: vec!["A".to_string(), "B".to_string()],
            correct_answer: "B".to_string(),
        };
        assert!(validate_answer(&kind, &text("a")).is_ok());
        assert!(matches!(
            validate_answer(&kind, &text("C")),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn true_false_and_numeric_answers_are_type_checked() {
        let tf = QuestionKind::TrueFalse { correct_answer: true };
        assert!(validate_answer(&tf, &AnswerValue::Bool(false)).is_ok());
        assert!(validate_answer(&tf, &text("False")).is_ok());
        assert!(validate_answer(&tf, &text("maybe")).is_err());

        let numeric = QuestionKind::Numeric { correct_answer: 42.0 };
        assert!(validate_answer(&numeric, &text("41.5")).is_ok());
        assert!(validate_answer(&numeric, &AnswerValue::Bool(true)).is_err());
        assert!(validate_answer(&numeric, &text("forty")).is_err());
    }

    #[test]
    fn empty_text_is_rejected() {
        let kind = QuestionKind::ShortAnswer {
            correct_answer: "x".to_string(),
        };
        assert!(validate_answer(&kind, &text("   ")).is_err());
    }

    #[test]
    fn text_length_limit_counts_characters() {
        let kind = QuestionKind::ShortAnswer {
            correct_answer: "x".to_string(),
        };
        let at_limit = "é".repeat(MAX_TEXT_ANSWER_LEN);
        assert!(at_limit.len() > MAX_TEXT_ANSWER_LEN);
        assert!(validate_answer(&kind, &text(&at_limit)).is_ok());
        let over = "é".repeat(MAX_TEXT_ANSWER_LEN + 1);
        assert!(validate_answer(&kind, &text(&over)).is_err());
    }
}
