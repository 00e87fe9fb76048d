// Recognized transform idioms
//
// Each idiom is a pattern object over a parsed call statement. A call either
// operates on the token array directly (`a.reverse()`) or delegates to a
// method of a helper object (`Xy.ab(a,3)`) whose body shape decides what the
// call does.

use std::collections::HashMap;

use super::tokenizer::CallSite;
use super::Operation;

/// What a helper method does, judged by its body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MethodShape {
    Reverse,
    Splice,
    Swap,
    Unknown,
}

impl MethodShape {
    /// Classify a helper method body such as `a.splice(0,b)`
    pub fn classify(body: &str) -> Self {
        let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.contains(".reverse()") {
            MethodShape::Reverse
        } else if compact.contains(".splice(") {
            MethodShape::Splice
        } else if compact.contains("[0]=") {
            MethodShape::Swap
        } else {
            MethodShape::Unknown
        }
    }
}

/// Everything an idiom needs besides the call itself
pub(crate) struct MatchContext<'a> {
    /// Name of the transform function's parameter
    pub param: &'a str,
    /// helper object name -> method name -> shape
    pub helpers: &'a HashMap<String, HashMap<String, MethodShape>>,
}

impl MatchContext<'_> {
    fn helper_shape(&self, call: &CallSite) -> Option<MethodShape> {
        self.helpers
            .get(&call.receiver)
            .and_then(|methods| methods.get(&call.method))
            .copied()
    }

    /// Numeric argument of a delegated call `Obj.m(param, N)`
    fn delegated_number(&self, call: &CallSite) -> Option<usize> {
        match call.args.as_slice() {
            [target, n] if target.is_ident(self.param) => n.as_number(),
            _ => None,
        }
    }

    fn is_direct(&self, call: &CallSite) -> bool {
        call.receiver == self.param
    }
}

/// Uniform contract of a recognized idiom
pub(crate) trait IdiomPattern: Send + Sync {
    /// Name of the idiom (for logging)
    fn name(&self) -> &'static str;

    /// Operation the call represents, if it has this idiom's shape
    fn try_match(&self, call: &CallSite, ctx: &MatchContext<'_>) -> Option<Operation>;
}

/// `a.reverse()` or a helper whose body reverses its argument
pub(crate) struct ReverseIdiom;

impl IdiomPattern for ReverseIdiom {
    fn name(&self) -> &'static str {
        "reverse"
    }

    fn try_match(&self, call: &CallSite, ctx: &MatchContext<'_>) -> Option<Operation> {
        if ctx.is_direct(call) {
            return (call.method == "reverse" && call.args.is_empty()).then_some(Operation::Reverse);
        }

        match (ctx.helper_shape(call)?, call.args.first()) {
            (MethodShape::Reverse, Some(target)) if target.is_ident(ctx.param) => {
                Some(Operation::Reverse)
            }
            _ => None,
        }
    }
}

/// Drop-prefix: `a.splice(0,N)`, `a.splice(N)`, `a.slice(N)` or a splicing helper
pub(crate) struct SpliceIdiom;

impl IdiomPattern for SpliceIdiom {
    fn name(&self) -> &'static str {
        "splice"
    }

    fn try_match(&self, call: &CallSite, ctx: &MatchContext<'_>) -> Option<Operation> {
        if ctx.is_direct(call) {
            let count = match (call.method.as_str(), call.args.as_slice()) {
                ("splice", [start, n]) if start.as_number() == Some(0) => n.as_number(),
                ("splice" | "slice", [n]) => n.as_number(),
                _ => None,
            };
            return count.map(|count| Operation::Splice { count });
        }

        match ctx.helper_shape(call)? {
            MethodShape::Splice => ctx
                .delegated_number(call)
                .map(|count| Operation::Splice { count }),
            _ => None,
        }
    }
}

/// Swap of position 0 with position N: `a.swap(N)` or a swapping helper
pub(crate) struct SwapIdiom;

impl IdiomPattern for SwapIdiom {
    fn name(&self) -> &'static str {
        "swap"
    }

    fn try_match(&self, call: &CallSite, ctx: &MatchContext<'_>) -> Option<Operation> {
        if ctx.is_direct(call) {
            return match (call.method.as_str(), call.args.as_slice()) {
                ("swap", [n]) => n.as_number().map(|index| Operation::Swap { index }),
                _ => None,
            };
        }

        match ctx.helper_shape(call)? {
            MethodShape::Swap => ctx
                .delegated_number(call)
                .map(|index| Operation::Swap { index }),
            _ => None,
        }
    }
}

/// The recognized idioms in matching order
pub(crate) fn default_idioms() -> Vec<Box<dyn IdiomPattern>> {
    vec![
        Box::new(ReverseIdiom),
        Box::new(SpliceIdiom),
        Box::new(SwapIdiom),
    ]
}
