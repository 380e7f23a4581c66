//! Deciding whether a task string is an executable skill invocation.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

static CALL_HEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*\s*\(")
        .expect("skill call pattern should be valid")
});

/// Classifies task text as an executable skill invocation.
#[async_trait]
pub trait SkillClassifier: Send + Sync {
    async fn is_skill_invocation(&self, task: &str) -> bool;
}

/// Adapts a synchronous predicate.
pub struct FnClassifier<F>(pub F);

#[async_trait]
impl<F> SkillClassifier for FnClassifier<F>
where
    F: Fn(&str) -> bool + Send + Sync,
{
    async fn is_skill_invocation(&self, task: &str) -> bool {
        (self.0)(task)
    }
}

/// Function-call shape: an identifier followed by balanced parentheses that
/// close at the end of the text, e.g. `mineBlocks('oak_log', 3)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternClassifier;

impl PatternClassifier {
    pub fn matches(task: &str) -> bool {
        let Some(head) = CALL_HEAD.find(task) else {
            return false;
        };
        // The head match ends just past the opening parenthesis.
        closes_at_end(&task[head.end() - 1..])
    }
}

#[async_trait]
impl SkillClassifier for PatternClassifier {
    async fn is_skill_invocation(&self, task: &str) -> bool {
        Self::matches(task)
    }
}

/// True if `text` opens with `(` whose matching `)` is its last non-space char.
fn closes_at_end(text: &str) -> bool {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if let Some(q) = quote {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                _ if ch == q => quote = None,
                _ => {}
            }
            continue;
        }
        match ch {
            '\'' | '"' | '`' => quote = Some(ch),
            '(' => depth += 1,
            ')' => {
                let Some(next) = depth.checked_sub(1) else {
                    return false;
                };
                depth = next;
                if depth == 0 {
                    return text[idx + 1..].trim().is_empty();
                }
            }
            _ => {}
        }
    }
    false
}
