// Cipher module - derivation, caching and application of the token transform

mod analyzer;
mod cache;
mod idioms;
mod tokenizer;
mod transform;

pub use analyzer::CipherAnalyzer;
pub use cache::CipherCache;
pub use transform::SignatureTransformer;

use std::fmt;

/// One step of the token permutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Reverse the whole token
    Reverse,
    /// Drop the first `count` characters
    Splice { count: usize },
    /// Exchange position 0 with position `index`
    Swap { index: usize },
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Reverse => write!(f, "reverse"),
            Operation::Splice { count } => write!(f, "splice({})", count),
            Operation::Swap { index } => write!(f, "swap({})", index),
        }
    }
}

/// Non-empty, ordered list of operations derived from one player build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSequence(Vec<Operation>);

impl OperationSequence {
    /// Returns `None` for an empty list
    pub fn new(operations: Vec<Operation>) -> Option<Self> {
        if operations.is_empty() {
            None
        } else {
            Some(Self(operations))
        }
    }

    pub fn operations(&self) -> &[Operation] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for OperationSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|op| op.to_string()).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_never_empty() {
        assert!(OperationSequence::new(vec![]).is_none());
        let seq = OperationSequence::new(vec![Operation::Reverse, Operation::Swap { index: 3 }]).unwrap();
        assert_eq!(seq.len(), 2);
        assert_eq!(seq.to_string(), "[reverse, swap(3)]");
    }
}
