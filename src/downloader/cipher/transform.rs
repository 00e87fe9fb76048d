// SignatureTransformer - replays an operation sequence over a token

use super::{Operation, OperationSequence};
use crate::downloader::errors::CipherError;

/// Pure application of a derived sequence
pub struct SignatureTransformer;

impl SignatureTransformer {
    /// Apply every operation in order.
    ///
    /// A splice past the end leaves an empty token. A swap past the end is an
    /// error because it means the sequence was derived for another build.
    pub fn apply(sequence: &OperationSequence, token: &str) -> Result<String, CipherError> {
        let mut chars: Vec<char> = token.chars().collect();

        for op in sequence.operations() {
            match *op {
                Operation::Reverse => chars.reverse(),
                Operation::Splice { count } => {
                    chars.drain(..count.min(chars.len()));
                }
                Operation::Swap { index } => {
                    if index >= chars.len() {
                        return Err(CipherError::SwapOutOfRange {
                            index,
                            len: chars.len(),
                        });
                    }
                    chars.swap(0, index);
                }
            }
        }

        Ok(chars.into_iter().collect())
    }
}
