//! Signature-matched line rewrite for one known class of bug.
//!
//! The rule names a function by a literal signature (e.g.
//! `export function add(a, b)`) and a literal buggy expression inside its
//! body. Only lines inside that function body are considered, and only the
//! matched substring is replaced. Every other byte, line endings included,
//! is carried through untouched.

use serde::{Deserialize, Serialize};

/// A literal signature/expression pair and its fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRule {
    /// Literal text identifying the function declaration line.
    pub signature: String,
    /// Literal buggy expression expected inside the body.
    pub find: String,
    /// Replacement for `find`.
    pub replace: String,
}

/// Outcome of applying a [`SignatureRule`] to file content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rewrite {
    /// The signature and expression matched; `lines` are 1-based line numbers
    /// that were rewritten.
    Changed { content: String, lines: Vec<usize> },
    /// Signature absent, or present without the buggy expression.
    Unchanged,
}

/// Apply `rule` to `content`.
///
/// The body of the function is tracked by brace depth starting at the
/// signature line, so a `find` match after the function closes is ignored.
/// The opening brace may sit on the signature line or start the next line;
/// otherwise only the signature line itself is eligible.
pub fn rewrite_signature(content: &str, rule: &SignatureRule) -> Rewrite {
    if rule.signature.is_empty() || rule.find.is_empty() || rule.find == rule.replace {
        return Rewrite::Unchanged;
    }

    let mut out = String::with_capacity(content.len());
    let mut changed_lines = Vec::new();
    let mut body = Body::Outside;

    for (idx, segment) in content.split_inclusive('\n').enumerate() {
        let (line, ending) = split_line_ending(segment);

        let eligible = match body {
            Body::Outside if line.contains(&rule.signature) => {
                body = Body::Inside {
                    depth: 0,
                    opened: false,
                }
                .advance(line);
                true
            }
            Body::Inside { opened: false, .. } if !line.trim_start().starts_with('{') => {
                body = Body::Finished;
                false
            }
            Body::Inside { .. } => {
                body = body.advance(line);
                true
            }
            Body::Outside | Body::Finished => false,
        };

        if eligible && line.contains(&rule.find) {
            out.push_str(&line.replacen(&rule.find, &rule.replace, 1));
            changed_lines.push(idx + 1);
        } else {
            out.push_str(line);
        }
        out.push_str(ending);

        if let Body::Inside {
            depth: 0,
            opened: true,
        } = body
        {
            body = Body::Finished;
        }
    }

    if changed_lines.is_empty() {
        Rewrite::Unchanged
    } else {
        Rewrite::Changed {
            content: out,
            lines: changed_lines,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Body {
    Outside,
    Inside { depth: i64, opened: bool },
    Finished,
}

impl Body {
    fn advance(self, line: &str) -> Self {
        match self {
            Body::Inside { depth, opened } => {
                let (opens, closes) = brace_counts(line);
                Body::Inside {
                    depth: (depth + opens - closes).max(0),
                    opened: opened || opens > 0,
                }
            }
            other => other,
        }
    }
}

fn brace_counts(line: &str) -> (i64, i64) {
    let opens = line.matches('{').count() as i64;
    let closes = line.matches('}').count() as i64;
    (opens, closes)
}

/// Split a segment from `split_inclusive('\n')` into text and its terminator.
fn split_line_ending(segment: &str) -> (&str, &str) {
    if let Some(stripped) = segment.strip_suffix("\r\n") {
        (stripped, &segment[stripped.len()..])
    } else if let Some(stripped) = segment.strip_suffix('\n') {
        (stripped, &segment[stripped.len()..])
    } else {
        (segment, "")
    }
}
