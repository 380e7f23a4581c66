//! Decoding deliberator replies against a declared response schema.

use jsonschema::{Draft, Validator};
use serde_json::Value;

use crate::error::DeliberationError;

/// Declarative description of a deliberator response.
pub struct ResponseSchema {
    validator: Validator,
    /// Field tallied when aggregating parallel samples.
    pub vote_field: &'static str,
    /// Free-text field merged across the winning samples.
    pub reason_field: Option<&'static str>,
}

impl std::fmt::Debug for ResponseSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseSchema")
            .field("vote_field", &self.vote_field)
            .field("reason_field", &self.reason_field)
            .finish_non_exhaustive()
    }
}

impl ResponseSchema {
    /// Compile an embedded JSON Schema (Draft 2020-12).
    ///
    /// Panics if `schema` is not a valid schema; callers only pass documents
    /// embedded at compile time.
    pub fn embedded(
        schema: &'static str,
        vote_field: &'static str,
        reason_field: Option<&'static str>,
    ) -> Self {
        let schema: Value =
            serde_json::from_str(schema).expect("embedded response schema should be valid JSON");
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&schema)
            .expect("embedded response schema should compile");
        Self {
            validator,
            vote_field,
            reason_field,
        }
    }

    /// Extract the outermost JSON object from `text` and validate it.
    pub fn decode(&self, text: &str) -> Result<Value, DeliberationError> {
        let object = outermost_object(text).ok_or(DeliberationError::NoJsonObject)?;
        let value: Value = serde_json::from_str(object)
            .map_err(|err| DeliberationError::InvalidJson(err.to_string()))?;
        let messages: Vec<String> = self
            .validator
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect();
        if !messages.is_empty() {
            return Err(DeliberationError::SchemaMismatch(messages.join("; ")));
        }
        Ok(value)
    }
}

/// First balanced `{...}` span of `text`, ignoring braces inside strings.
pub fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"{
        "type": "object",
        "properties": {
            "answer": { "type": "string" },
            "retrospective": { "type": "string" }
        },
        "required": ["answer", "retrospective"]
    }"#;

    #[test]
    fn extracts_object_surrounded_by_prose() {
        let text = "Thinking...\n{\"a\": {\"b\": 1}} trailing {\"c\": 2}";
        assert_eq!(outermost_object(text), Some("{\"a\": {\"b\": 1}}"));
    }

    #[test]
    fn braces_inside_strings_are_ignored() {
        let text = r#"{"answer": "use } and { freely \" }", "x": 1}"#;
        assert_eq!(outermost_object(text), Some(text));
    }

    #[test]
    fn unbalanced_text_has_no_object() {
        assert_eq!(outermost_object("no json here"), None);
        assert_eq!(outermost_object("{\"open\": 1"), None);
    }

    #[test]
    fn decode_validates_against_schema() {
        let schema = ResponseSchema::embedded(SCHEMA, "answer", Some("retrospective"));

        let ok = schema
            .decode("Answer: {\"answer\": \"A\", \"retrospective\": \"done\"}")
            .expect("decode");
        assert_eq!(ok["answer"], "A");

        let missing = schema.decode("{\"answer\": \"A\"}").unwrap_err();
        assert!(matches!(missing, DeliberationError::SchemaMismatch(_)));

        let broken = schema.decode("{\"answer\": A}").unwrap_err();
        assert!(matches!(broken, DeliberationError::InvalidJson(_)));

        let none = schema.decode("I refuse").unwrap_err();
        assert_eq!(none, DeliberationError::NoJsonObject);
    }
}
