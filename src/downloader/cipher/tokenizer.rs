// Structural tokenizer for player script fragments
//
// Only understands enough of the script language to cut function bodies out
// of minified text and split them into call statements.

use lazy_static::lazy_static;
use regex::Regex;

/// Argument of a call statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Arg {
    Ident(String),
    Number(usize),
    Other(String),
}

impl Arg {
    fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Ok(n) = raw.parse::<usize>() {
            Arg::Number(n)
        } else if !raw.is_empty() && raw.chars().all(is_ident_char) {
            Arg::Ident(raw.to_string())
        } else {
            Arg::Other(raw.to_string())
        }
    }

    pub fn as_number(&self) -> Option<usize> {
        match self {
            Arg::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_ident(&self, name: &str) -> bool {
        matches!(self, Arg::Ident(s) if s == name)
    }
}

/// `receiver.method(args)` or `receiver["method"](args)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CallSite {
    pub receiver: String,
    pub method: String,
    pub args: Vec<Arg>,
}

/// One `;`-separated statement of a function body
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Statement {
    /// `a=a.split("")`
    Split { target: String },
    /// `return a.join("")`
    Join { target: String },
    Call { site: CallSite, text: String },
    Other(String),
}

impl Statement {
    pub fn text(&self) -> String {
        match self {
            Statement::Split { target } => format!("{}={}.split(\"\")", target, target),
            Statement::Join { target } => format!("return {}.join(\"\")", target),
            Statement::Call { text, .. } => text.clone(),
            Statement::Other(text) => text.clone(),
        }
    }
}

pub(crate) fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '$' || c == '_'
}

/// Index of the brace closing the one at `open`, skipping string literals
pub(crate) fn find_matching_brace(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.get(open) != Some(&b'{') {
        return None;
    }

    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = open;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'"' | b'\'' | b'`' => quote = Some(b),
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            },
        }
        i += 1;
    }
    None
}

/// Split on top-level `;`, ignoring separators inside strings and brackets
pub(crate) fn split_statements(body: &str) -> Vec<&str> {
    split_top_level(body, b';')
}

fn split_top_level(text: &str, separator: u8) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'"' | b'\'' | b'`' => quote = Some(b),
                b'(' | b'[' | b'{' => depth += 1,
                b')' | b']' | b'}' => depth -= 1,
                _ if b == separator && depth == 0 => {
                    parts.push(text[start..i].trim());
                    start = i + 1;
                }
                _ => {}
            },
        }
        i += 1;
    }
    parts.push(text[start.min(text.len())..].trim());
    parts.retain(|p| !p.is_empty());
    parts
}

/// Parse a single statement into its structural form
pub(crate) fn parse_statement(stmt: &str) -> Statement {
    lazy_static! {
        static ref SPLIT_RE: Regex =
            Regex::new(r#"^([A-Za-z0-9$_]+)\s*=\s*([A-Za-z0-9$_]+)\.split\(\s*(?:""|'')\s*\)$"#).unwrap();
        static ref JOIN_RE: Regex =
            Regex::new(r#"^return\s+([A-Za-z0-9$_]+)\.join\(\s*(?:""|'')\s*\)$"#).unwrap();
        static ref CALL_RE: Regex = Regex::new(
            r#"(?s)^(?:[A-Za-z0-9$_]+\s*=\s*)?([A-Za-z0-9$_]+)\s*(?:\.\s*([A-Za-z0-9$_]+)|\[\s*["']([A-Za-z0-9$_]+)["']\s*\])\s*\((.*)\)$"#
        )
        .unwrap();
    }

    let stmt = stmt.trim();

    if let Some(caps) = SPLIT_RE.captures(stmt) {
        if caps[1] == caps[2] {
            return Statement::Split {
                target: caps[1].to_string(),
            };
        }
    }

    if let Some(caps) = JOIN_RE.captures(stmt) {
        return Statement::Join {
            target: caps[1].to_string(),
        };
    }

    if let Some(caps) = CALL_RE.captures(stmt) {
        let method = caps
            .get(2)
            .or_else(|| caps.get(3))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        let raw_args = caps.get(4).map(|m| m.as_str()).unwrap_or_default();
        let args = split_top_level(raw_args, b',')
            .into_iter()
            .map(Arg::parse)
            .collect();

        return Statement::Call {
            site: CallSite {
                receiver: caps[1].to_string(),
                method,
                args,
            },
            text: stmt.to_string(),
        };
    }

    Statement::Other(stmt.to_string())
}

/// Tokenize a function body into structural statements
pub(crate) fn tokenize(body: &str) -> Vec<Statement> {
    split_statements(body)
        .into_iter()
        .map(parse_statement)
        .collect()
}
