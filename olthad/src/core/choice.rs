//! Resolving a free-text answer to one of a fixed set of lettered options.

use serde::Serialize;

use crate::error::{OlthadError, Result};

/// One lettered option of a multiple-choice question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChoiceOption {
    pub letter: &'static str,
    pub text: &'static str,
}

/// Which of two options was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryChoice {
    A,
    B,
}

impl BinaryChoice {
    fn from_index(idx: usize) -> Option<Self> {
        match idx {
            0 => Some(Self::A),
            1 => Some(Self::B),
            _ => None,
        }
    }
}

/// Lowercase alphabetic subsequence of `text`.
fn normalize(text: &str) -> String {
    text.chars()
        .filter(char::is_ascii_alphabetic)
        .map(|ch| ch.to_ascii_lowercase())
        .collect()
}

/// Index of the option `answer` names.
///
/// Letters are compared first, then full option texts, then letter followed
/// by text (`"A) yes ..."`). The first match wins.
pub fn resolve_option(answer: &str, options: &[ChoiceOption]) -> Result<usize> {
    let answer = normalize(answer);
    let by_letter = options
        .iter()
        .position(|opt| normalize(opt.letter) == answer);
    let by_text = || {
        options
            .iter()
            .position(|opt| normalize(opt.text) == answer)
    };
    let by_both = || {
        options
            .iter()
            .position(|opt| normalize(&format!("{}{}", opt.letter, opt.text)) == answer)
    };

    by_letter
        .or_else(by_text)
        .or_else(by_both)
        .ok_or_else(|| {
            let letters: Vec<&str> = options.iter().map(|opt| opt.letter).collect();
            OlthadError::usage(format!(
                "answer '{answer}' matches none of the options {letters:?}"
            ))
        })
}

/// [`resolve_option`] over exactly two options.
pub fn resolve_binary(answer: &str, options: &[ChoiceOption; 2]) -> Result<BinaryChoice> {
    let idx = resolve_option(answer, options)?;
    BinaryChoice::from_index(idx)
        .ok_or_else(|| OlthadError::usage(format!("option index {idx} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPTIONS: [ChoiceOption; 2] = [
        ChoiceOption {
            letter: "A",
            text: "Yes, it was completed successfully.",
        },
        ChoiceOption {
            letter: "B",
            text: "No, it was not.",
        },
    ];

    #[test]
    fn letters_match_loosely() {
        for answer in ["A", "a", "(A)", " A. ", "**A**"] {
            assert_eq!(resolve_binary(answer, &OPTIONS).expect(answer), BinaryChoice::A);
        }
        assert_eq!(resolve_binary("b)", &OPTIONS).expect("b"), BinaryChoice::B);
    }

    #[test]
    fn option_text_matches() {
        assert_eq!(
            resolve_binary("no, it was NOT", &OPTIONS).expect("text"),
            BinaryChoice::B
        );
    }

    #[test]
    fn letter_with_text_matches() {
        assert_eq!(
            resolve_binary("A) Yes, it was completed successfully.", &OPTIONS).expect("both"),
            BinaryChoice::A
        );
    }

    #[test]
    fn unknown_answer_is_usage_error() {
        let err = resolve_binary("maybe", &OPTIONS).unwrap_err();
        assert!(matches!(err, OlthadError::Usage(_)));
    }
}
