use thiserror::Error;

/// An error raised when validating a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum SignatureError {
    /// The signature is longer than 255 bytes.
    #[error("signature is longer than 255 bytes")]
    TooLong,
    /// A byte which is not a type code.
    #[error("unknown type code `{0}`")]
    UnknownTypeCode(char),
    /// Containers nest deeper than the protocol allows.
    #[error("exceeded maximum container depth")]
    TooDeep,
    /// An `a` with no element type following it.
    #[error("array is missing an element type")]
    MissingArrayElementType,
    /// `()` is not a valid type.
    #[error("struct has no fields")]
    EmptyStruct,
    /// A `)` with no matching `(`.
    #[error("struct ended but never started")]
    UnmatchedParen,
    /// A `(` with no matching `)`.
    #[error("struct started but never ended")]
    UnterminatedStruct,
    /// A dict entry must hold exactly one key and one value.
    #[error("dict entry must have exactly two fields")]
    DictEntryFieldCount,
    /// Dict keys are restricted to basic types.
    #[error("dict entry key must be a basic type")]
    DictKeyMustBeBasic,
    /// A dict entry may only appear as an array element.
    #[error("dict entry only valid inside an array")]
    DictEntryNotInArray,
    /// A closing brace with no matching opening brace.
    #[error("dict entry ended but never started")]
    UnmatchedBrace,
    /// An opening brace with no matching closing brace.
    #[error("dict entry started but never ended")]
    UnterminatedDict,
}
