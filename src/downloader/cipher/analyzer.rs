// CipherAnalyzer - derives the operation sequence from player script text

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

use super::idioms::{default_idioms, IdiomPattern, MatchContext, MethodShape};
use super::tokenizer::{find_matching_brace, tokenize, Statement};
use super::OperationSequence;
use crate::downloader::errors::CipherError;

/// Single-argument function whose body was cut out of the script
struct TransformFunction<'a> {
    name: &'a str,
    param: &'a str,
    statements: Vec<Statement>,
}

/// Statically derives the transform of one player script build
pub struct CipherAnalyzer {
    idioms: Vec<Box<dyn IdiomPattern>>,
}

impl Default for CipherAnalyzer {
    fn default() -> Self {
        Self {
            idioms: default_idioms(),
        }
    }
}

impl CipherAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the operation sequence from script text.
    ///
    /// The transform function is found by shape: one parameter, a body that
    /// starts by splitting or reversing that parameter and ends by joining
    /// it. Every statement in between must match a known idiom.
    pub fn derive(&self, script: &str) -> Result<OperationSequence, CipherError> {
        let function = locate_transform(script)?;
        debug!(
            function = function.name,
            statements = function.statements.len(),
            "located transform function"
        );

        let helpers = resolve_helpers(script, &function)?;
        let ctx = MatchContext {
            param: function.param,
            helpers: &helpers,
        };

        let body = match function.statements.first() {
            Some(Statement::Split { .. }) => &function.statements[1..function.statements.len() - 1],
            _ => &function.statements[..function.statements.len() - 1],
        };

        let mut operations = Vec::with_capacity(body.len());
        for statement in body {
            let site = match statement {
                Statement::Call { site, .. } => site,
                other => return Err(CipherError::UnknownShape(other.text())),
            };

            let matched = self
                .idioms
                .iter()
                .find_map(|idiom| idiom.try_match(site, &ctx).map(|op| (idiom.name(), op)));

            match matched {
                Some((idiom, op)) => {
                    debug!(idiom, statement = %statement.text(), "matched idiom");
                    operations.push(op);
                }
                None => return Err(CipherError::UnknownShape(statement.text())),
            }
        }

        OperationSequence::new(operations)
            .ok_or_else(|| CipherError::EmptySequence(function.name.to_string()))
    }
}

fn locate_transform(script: &str) -> Result<TransformFunction<'_>, CipherError> {
    lazy_static! {
        static ref ASSIGNED_RE: Regex = Regex::new(
            r"(?:^|[^A-Za-z0-9$_.])([A-Za-z0-9$_]+)\s*=\s*function\s*\(\s*([A-Za-z0-9$_]+)\s*\)\s*\{"
        )
        .unwrap();
        static ref DECLARED_RE: Regex = Regex::new(
            r"function\s+([A-Za-z0-9$_]+)\s*\(\s*([A-Za-z0-9$_]+)\s*\)\s*\{"
        )
        .unwrap();
    }

    let mut candidates: Vec<(usize, &str, &str)> = ASSIGNED_RE
        .captures_iter(script)
        .chain(DECLARED_RE.captures_iter(script))
        .filter_map(|caps| {
            let open = caps.get(0)?.end() - 1;
            let name = caps.get(1)?.as_str();
            let param = caps.get(2)?.as_str();
            Some((open, name, param))
        })
        .collect();
    candidates.sort_by_key(|(open, _, _)| *open);

    for (open, name, param) in candidates {
        let close = find_matching_brace(script, open)
            .ok_or_else(|| CipherError::UnterminatedBody(name.to_string()))?;
        let statements = tokenize(&script[open + 1..close]);

        let starts_on_param = match statements.first() {
            Some(Statement::Split { target }) => target == param,
            Some(Statement::Call { site, .. }) => site.receiver == param && site.method == "reverse",
            _ => false,
        };
        let ends_with_join = matches!(
            statements.last(),
            Some(Statement::Join { target }) if target == param
        );

        if starts_on_param && ends_with_join && statements.len() >= 2 {
            return Ok(TransformFunction {
                name,
                param,
                statements,
            });
        }
    }

    Err(CipherError::TransformNotFound)
}

/// Classify the methods of every helper object the transform calls into
fn resolve_helpers(
    script: &str,
    function: &TransformFunction<'_>,
) -> Result<HashMap<String, HashMap<String, MethodShape>>, CipherError> {
    let mut helpers = HashMap::new();

    for statement in &function.statements {
        let Statement::Call { site, .. } = statement else {
            continue;
        };
        if site.receiver == function.param || helpers.contains_key(&site.receiver) {
            continue;
        }

        let methods = helper_methods(script, &site.receiver)
            .ok_or_else(|| CipherError::HelperMissing(site.receiver.clone()))?;
        debug!(helper = %site.receiver, methods = methods.len(), "resolved helper object");
        helpers.insert(site.receiver.clone(), methods);
    }

    Ok(helpers)
}

fn helper_methods(script: &str, object: &str) -> Option<HashMap<String, MethodShape>> {
    lazy_static! {
        static ref METHOD_RE: Regex = Regex::new(
            r#"^[\s,]*["']?([A-Za-z0-9$_]+)["']?\s*:\s*function\s*\([^)]*\)\s*\{"#
        )
        .unwrap();
    }

    let object_re = Regex::new(&format!(
        r"(?:^|[^A-Za-z0-9$_.]){}\s*=\s*\{{",
        regex::escape(object)
    ))
    .ok()?;
    let open = object_re.find(script)?.end() - 1;
    let close = find_matching_brace(script, open)?;
    let literal = &script[open + 1..close];

    let mut methods = HashMap::new();
    let mut pos = 0;
    while let Some(caps) = METHOD_RE.captures(&literal[pos..]) {
        let header = caps.get(0)?;
        let body_open = pos + header.end() - 1;
        let body_close = find_matching_brace(literal, body_open)?;
        let shape = MethodShape::classify(&literal[body_open + 1..body_close]);
        methods.insert(caps[1].to_string(), shape);
        pos = body_close + 1;
    }

    Some(methods)
}
