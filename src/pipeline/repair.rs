//! Turning a raw model response into typed bullets.
//!
//! ```text
//! RECEIVED ──strict parse──▶ PARSED
//!     │
//!     └─fail─▶ REPAIRING ──stage 1..4, re-parse after each──▶ PARSED (repaired)
//!                   │
//!                   └─all fail─▶ FAILED
//! ```
//!
//! Repairs work on a token stream, not on regex guesses about the text, so a
//! comma or brace inside a string value is never touched. Stages 1 and 2
//! build on each other; stages 3 and 4 are alternative endings applied to
//! the stage-2 text, because closing a truncated element and dropping it
//! are mutually exclusive.
//!
//! After a successful parse [`sanitize_hierarchy`] enforces the bullet
//! tree invariant: levels in 1–4, unique ids, and every parent a preceding
//! bullet of strictly lower level.

use crate::output::{Bullet, HierarchyFixes};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// One applied repair stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Repair {
    /// Markdown fences or prose around the JSON value removed.
    StripWrapper,
    /// Commas directly before `}` or `]` removed.
    TrailingCommas,
    /// Unterminated string closed, dangling key/colon/comma dropped, open
    /// containers closed.
    CloseContainers,
    /// Cut back to the last complete array element, then closed.
    TruncateToLastElement,
}

/// Successful parse of a response.
#[derive(Debug, Clone)]
pub struct ParsedPayload {
    pub bullets: Vec<Bullet>,
    /// Empty when the strict parse succeeded.
    pub repairs: Vec<Repair>,
}

impl ParsedPayload {
    pub fn repaired(&self) -> bool {
        !self.repairs.is_empty()
    }
}

/// Parse `raw` into bullets, repairing if needed.
///
/// On failure returns the strict-parse error, annotated with the last
/// repair error when repairs were attempted.
pub fn parse_response(raw: &str) -> Result<ParsedPayload, String> {
    let strict_err = match parse_bullets(raw) {
        Ok(bullets) => {
            return Ok(ParsedPayload {
                bullets,
                repairs: Vec::new(),
            })
        }
        Err(e) => e,
    };

    let mut text = raw.to_string();
    let mut repairs = Vec::new();
    let mut last_err = None;

    let cumulative: [(Repair, fn(&str) -> Option<String>); 2] = [
        (Repair::StripWrapper, strip_wrapper),
        (Repair::TrailingCommas, drop_trailing_commas),
    ];
    for (repair, stage) in cumulative {
        if let Some(next) = stage(&text) {
            text = next;
            repairs.push(repair);
            match parse_bullets(&text) {
                Ok(bullets) => return Ok(ParsedPayload { bullets, repairs }),
                Err(e) => last_err = Some(e),
            }
        }
    }

    let endings: [(Repair, fn(&str) -> Option<String>); 2] = [
        (Repair::CloseContainers, close_containers),
        (Repair::TruncateToLastElement, truncate_to_last_element),
    ];
    for (repair, stage) in endings {
        if let Some(candidate) = stage(&text) {
            match parse_bullets(&candidate) {
                Ok(bullets) => {
                    let mut applied = repairs.clone();
                    applied.push(repair);
                    return Ok(ParsedPayload {
                        bullets,
                        repairs: applied,
                    });
                }
                Err(e) => last_err = Some(e),
            }
        }
    }

    Err(match last_err {
        Some(last) => format!("{strict_err} (after repair: {last})"),
        None => strict_err,
    })
}

/// Strict parse: `{"bullets": [...]}` or a bare array of bullets.
pub fn parse_bullets(text: &str) -> Result<Vec<Bullet>, String> {
    let value: Value = serde_json::from_str(text.trim()).map_err(|e| e.to_string())?;
    let list = match value {
        Value::Array(_) => value,
        Value::Object(mut map) => match map.remove("bullets") {
            Some(list @ Value::Array(_)) => list,
            Some(_) => return Err("'bullets' is not an array".into()),
            None => return Err("object has no 'bullets' array".into()),
        },
        _ => return Err("expected an object with 'bullets' or an array".into()),
    };
    serde_json::from_value(list).map_err(|e| format!("bullet shape: {e}"))
}

// ── Tokens ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Open(u8),
    Close(u8),
    Colon,
    Comma,
    Str { closed: bool },
    Scalar,
}

#[derive(Debug, Clone, Copy)]
struct Token {
    kind: Kind,
    start: usize,
    end: usize,
}

/// Lenient JSON lexer. Never fails; an unterminated string becomes the
/// last token with `closed: false`.
fn tokenize(s: &str) -> Vec<Token> {
    let b = s.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < b.len() {
        let c = b[i];
        let single = |kind: Kind, at: usize| Token {
            kind,
            start: at,
            end: at + 1,
        };
        match c {
            b' ' | b'\t' | b'\n' | b'\r' => i += 1,
            b'{' | b'[' => {
                out.push(single(Kind::Open(c), i));
                i += 1;
            }
            b'}' | b']' => {
                out.push(single(Kind::Close(c), i));
                i += 1;
            }
            b':' => {
                out.push(single(Kind::Colon, i));
                i += 1;
            }
            b',' => {
                out.push(single(Kind::Comma, i));
                i += 1;
            }
            b'"' => {
                let start = i;
                i += 1;
                let mut closed = false;
                while i < b.len() {
                    match b[i] {
                        b'\\' => i += 2,
                        b'"' => {
                            i += 1;
                            closed = true;
                            break;
                        }
                        _ => i += 1,
                    }
                }
                let end = i.min(b.len());
                out.push(Token {
                    kind: Kind::Str { closed },
                    start,
                    end,
                });
                i = end;
            }
            _ => {
                let start = i;
                while i < b.len() && !b" \t\n\r{}[]:,\"".contains(&b[i]) {
                    i += 1;
                }
                out.push(Token {
                    kind: Kind::Scalar,
                    start,
                    end: i,
                });
            }
        }
    }
    out
}

/// Open containers after consuming `tokens`.
fn open_stack(tokens: &[Token]) -> Vec<u8> {
    let mut stack = Vec::new();
    for t in tokens {
        match t.kind {
            Kind::Open(c) => stack.push(c),
            Kind::Close(_) => {
                stack.pop();
            }
            _ => {}
        }
    }
    stack
}

fn closers(stack: &[u8]) -> String {
    stack
        .iter()
        .rev()
        .map(|c| if *c == b'{' { '}' } else { ']' })
        .collect()
}

// ── Stages ───────────────────────────────────────────────────────────────

static RE_FENCE_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*```[A-Za-z]*\s*$").unwrap());

/// Stage 1: cut the text down to the outermost JSON value.
fn strip_wrapper(text: &str) -> Option<String> {
    let unfenced = RE_FENCE_OPEN.replace_all(text, "");
    let start = unfenced.find(['{', '['])?;
    let body = &unfenced[start..];

    // Trailing prose has no quotes; a truncated tail almost always does.
    let body = match body.rfind(['}', ']']) {
        Some(last) if !body[last + 1..].contains('"') => &body[..=last],
        _ => body,
    };

    let result = body.trim().to_string();
    (result != text.trim()).then_some(result)
}

/// Stage 2: drop commas that directly precede a closing bracket.
fn drop_trailing_commas(text: &str) -> Option<String> {
    let tokens = tokenize(text);
    let doomed: Vec<&Token> = tokens
        .windows(2)
        .filter(|w| w[0].kind == Kind::Comma && matches!(w[1].kind, Kind::Close(_)))
        .map(|w| &w[0])
        .collect();
    if doomed.is_empty() {
        return None;
    }
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;
    for t in doomed {
        out.push_str(&text[pos..t.start]);
        pos = t.end;
    }
    out.push_str(&text[pos..]);
    Some(out)
}

/// Byte offset at which an unterminated string should be cut so that no
/// half escape sequence remains.
fn safe_string_end(text: &str, tok: &Token) -> usize {
    let s = &text.as_bytes()[tok.start..tok.end];
    if let Some(pos) = s.iter().rposition(|&c| c == b'\\') {
        let run = s[..=pos].iter().rev().take_while(|&&c| c == b'\\').count();
        let tail = &s[pos + 1..];
        let partial_unicode = tail.first() == Some(&b'u')
            && tail.len() < 5
            && tail[1..].iter().all(|c| c.is_ascii_hexdigit());
        if run % 2 == 1 && (tail.is_empty() || partial_unicode) {
            return tok.start + pos;
        }
    }
    tok.end
}

fn is_valid_scalar(s: &str) -> bool {
    serde_json::from_str::<Value>(s).is_ok()
}

/// Stage 3: end the document where it was cut off and close every open
/// container.
fn close_containers(text: &str) -> Option<String> {
    let mut tokens = tokenize(text);
    if tokens.is_empty() {
        return None;
    }

    loop {
        let Some(last) = tokens.last().copied() else {
            return None;
        };
        let stack = open_stack(&tokens[..tokens.len() - 1]);
        let prev = tokens.len().checked_sub(2).map(|i| tokens[i].kind);
        let in_object = stack.last() == Some(&b'{');
        let is_key = in_object && matches!(prev, None | Some(Kind::Open(_)) | Some(Kind::Comma));

        let dangling = match last.kind {
            Kind::Comma | Kind::Colon => true,
            Kind::Str { .. } => is_key,
            Kind::Scalar => !is_valid_scalar(&text[last.start..last.end]),
            _ => false,
        };
        if !dangling {
            break;
        }
        tokens.pop();
    }

    let last = tokens.last().copied()?;
    let mut out = match last.kind {
        Kind::Str { closed: false } => {
            let mut s = text[..safe_string_end(text, &last)].to_string();
            s.push('"');
            s
        }
        _ => text[..last.end].to_string(),
    };
    out.push_str(&closers(&open_stack(&tokens)));

    (out != text).then_some(out)
}

/// Stage 4: keep everything up to the last value that completed directly
/// inside an array, then close.
fn truncate_to_last_element(text: &str) -> Option<String> {
    let tokens = tokenize(text);
    let mut stack: Vec<u8> = Vec::new();
    let mut cut: Option<(usize, Vec<u8>)> = None;
    let mut prev: Option<Kind> = None;

    for t in &tokens {
        let completes_value = match t.kind {
            Kind::Open(c) => {
                stack.push(c);
                false
            }
            Kind::Close(_) => {
                stack.pop();
                true
            }
            Kind::Str { closed } => closed,
            Kind::Scalar => is_valid_scalar(&text[t.start..t.end]),
            Kind::Colon | Kind::Comma => false,
        };
        let element_position = !matches!(prev, Some(Kind::Colon));
        if completes_value && element_position && stack.last() == Some(&b'[') {
            cut = Some((t.end, stack.clone()));
        }
        prev = Some(t.kind);
    }

    let (end, stack) = cut?;
    let out = format!("{}{}", &text[..end], closers(&stack));
    (out != text).then_some(out)
}

// ── Hierarchy ────────────────────────────────────────────────────────────

/// Make the bullet list a valid forest in place.
///
/// Parent references resolve to the nearest preceding bullet with that id,
/// so a child written after a duplicated id follows the renamed copy.
pub fn sanitize_hierarchy(bullets: &mut [Bullet]) -> HierarchyFixes {
    let mut fixes = HierarchyFixes::default();
    let mut used: HashSet<String> = HashSet::new();
    let mut latest: HashMap<String, (String, u8)> = HashMap::new();

    for b in bullets.iter_mut() {
        let clamped = b.level.clamp(1, 4);
        if clamped != b.level {
            b.level = clamped;
            fixes.levels_clamped += 1;
        }

        let raw_id = std::mem::take(&mut b.id);
        b.id = if raw_id.is_empty() || used.contains(&raw_id) {
            fixes.ids_renamed += 1;
            let base = if raw_id.is_empty() { "unnamed" } else { raw_id.as_str() };
            (2..)
                .map(|n| format!("{base}~{n}"))
                .find(|candidate| !used.contains(candidate))
                .unwrap_or_default()
        } else {
            raw_id.clone()
        };
        used.insert(b.id.clone());

        if !b.parent_id.is_empty() {
            let resolved = match latest.get(&b.parent_id) {
                Some((effective, level)) if b.level > 1 && *level < b.level => Some(effective.clone()),
                _ => None,
            };
            match resolved {
                Some(effective) => b.parent_id = effective,
                None => {
                    b.parent_id.clear();
                    fixes.parents_cleared += 1;
                }
            }
        }

        latest.insert(raw_id, (b.id.clone(), b.level));
    }
    fixes
}
