//! Line-oriented diff between two renderings.
//!
//! Lines are tagged unchanged (`"  "`), removed (`"- "`), added (`"+ "`), or
//! hint (`"? "`). Hint lines follow a removed or added line that was paired
//! with a close counterpart and mark the changed columns with `-`, `+`, `^`.

use std::fmt;

use serde::Serialize;
use similar::{Algorithm, DiffOp, DiffTag as OpTag, capture_diff_slices, get_diff_ratio};

/// Minimum character similarity for a replaced pair to get hint lines.
const HINT_RATIO: f32 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffTag {
    Unchanged,
    Removed,
    Added,
    Hint,
}

impl DiffTag {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Unchanged => "  ",
            Self::Removed => "- ",
            Self::Added => "+ ",
            Self::Hint => "? ",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffLine {
    pub tag: DiffTag,
    pub text: String,
}

impl DiffLine {
    fn new(tag: DiffTag, text: impl Into<String>) -> Self {
        Self {
            tag,
            text: text.into(),
        }
    }
}

impl fmt::Display for DiffLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.tag.prefix(), self.text)
    }
}

/// Diff `before` against `after` line by line.
pub fn line_diff(before: &str, after: &str) -> Vec<DiffLine> {
    let old: Vec<&str> = before.lines().collect();
    let new: Vec<&str> = after.lines().collect();
    let mut out = Vec::with_capacity(old.len().max(new.len()));

    for op in capture_diff_slices(Algorithm::Myers, &old, &new) {
        let (tag, old_range, new_range) = op.as_tag_tuple();
        match tag {
            OpTag::Equal => out.extend(
                old[old_range]
                    .iter()
                    .map(|line| DiffLine::new(DiffTag::Unchanged, *line)),
            ),
            OpTag::Delete => out.extend(
                old[old_range]
                    .iter()
                    .map(|line| DiffLine::new(DiffTag::Removed, *line)),
            ),
            OpTag::Insert => out.extend(
                new[new_range]
                    .iter()
                    .map(|line| DiffLine::new(DiffTag::Added, *line)),
            ),
            OpTag::Replace => replace_block(&old[old_range], &new[new_range], &mut out),
        }
    }

    out
}

/// Emit a replaced block, pairing lines positionally and hinting close pairs.
fn replace_block(old: &[&str], new: &[&str], out: &mut Vec<DiffLine>) {
    let paired = old.len().min(new.len());
    for (before, after) in old.iter().zip(new.iter()) {
        let (old_marks, new_marks, ratio) = char_marks(before, after);
        out.push(DiffLine::new(DiffTag::Removed, *before));
        if ratio >= HINT_RATIO && !old_marks.is_empty() {
            out.push(DiffLine::new(DiffTag::Hint, old_marks.clone()));
        }
        out.push(DiffLine::new(DiffTag::Added, *after));
        if ratio >= HINT_RATIO && !new_marks.is_empty() {
            out.push(DiffLine::new(DiffTag::Hint, new_marks));
        }
    }
    out.extend(
        old[paired..]
            .iter()
            .map(|line| DiffLine::new(DiffTag::Removed, *line)),
    );
    out.extend(
        new[paired..]
            .iter()
            .map(|line| DiffLine::new(DiffTag::Added, *line)),
    );
}

/// Column markers for a changed pair, plus their character similarity.
fn char_marks(before: &str, after: &str) -> (String, String, f32) {
    let old: Vec<char> = before.chars().collect();
    let new: Vec<char> = after.chars().collect();
    let ops: Vec<DiffOp> = capture_diff_slices(Algorithm::Myers, &old, &new);
    let ratio = get_diff_ratio(&ops, old.len(), new.len());

    let mut old_marks = String::with_capacity(old.len());
    let mut new_marks = String::with_capacity(new.len());
    for op in &ops {
        let (tag, old_range, new_range) = op.as_tag_tuple();
        let (old_mark, new_mark) = match tag {
            OpTag::Equal => (' ', ' '),
            OpTag::Delete => ('-', ' '),
            OpTag::Insert => (' ', '+'),
            OpTag::Replace => ('^', '^'),
        };
        old_marks.extend(std::iter::repeat_n(old_mark, old_range.len()));
        new_marks.extend(std::iter::repeat_n(new_mark, new_range.len()));
    }

    (
        old_marks.trim_end().to_string(),
        new_marks.trim_end().to_string(),
        ratio,
    )
}
