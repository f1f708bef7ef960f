use crate::protocol::types;

use super::{SignatureError, MAX_CONTAINER_DEPTH, MAX_SIGNATURE_LENGTH};

/// A container frame while scanning. Struct and dict frames count the
/// complete types they have absorbed so far.
#[derive(Clone, Copy)]
enum Frame {
    Array,
    Struct(u8),
    Dict(u8),
}

const STACK_CAPACITY: usize = 3 * MAX_CONTAINER_DEPTH;

/// Validate a signature in a single pass.
///
/// Runs in const context so that signatures can be checked at compile time
/// through [`Signature::new_const`].
///
/// [`Signature::new_const`]: super::Signature::new_const
pub(super) const fn validate(bytes: &[u8]) -> Result<(), SignatureError> {
    if bytes.len() > MAX_SIGNATURE_LENGTH {
        return Err(SignatureError::TooLong);
    }

    let mut stack = [Frame::Array; STACK_CAPACITY];
    let mut top = 0usize;
    let mut arrays = 0usize;
    let mut containers = 0usize;

    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        i += 1;

        // Whether the byte completes a type on its own, and whether that
        // type is basic (eligible as a dict key).
        let mut is_basic = match b {
            types::BYTE
            | types::BOOLEAN
            | types::INT16
            | types::UINT16
            | types::INT32
            | types::UINT32
            | types::INT64
            | types::UINT64
            | types::DOUBLE
            | types::STRING
            | types::OBJECT_PATH
            | types::SIGNATURE
            | types::UNIX_FD => true,
            types::VARIANT => false,
            types::ARRAY => {
                if top == STACK_CAPACITY || arrays == MAX_CONTAINER_DEPTH {
                    return Err(SignatureError::TooDeep);
                }

                stack[top] = Frame::Array;
                top += 1;
                arrays += 1;
                continue;
            }
            types::OPEN_PAREN => {
                if top == STACK_CAPACITY || containers == MAX_CONTAINER_DEPTH {
                    return Err(SignatureError::TooDeep);
                }

                stack[top] = Frame::Struct(0);
                top += 1;
                containers += 1;
                continue;
            }
            types::CLOSE_PAREN => {
                if top == 0 {
                    return Err(SignatureError::UnmatchedParen);
                }

                top -= 1;

                match stack[top] {
                    Frame::Struct(0) => return Err(SignatureError::EmptyStruct),
                    Frame::Struct(..) => {}
                    Frame::Array => return Err(SignatureError::MissingArrayElementType),
                    Frame::Dict(..) => return Err(SignatureError::UnmatchedParen),
                }

                containers -= 1;
                false
            }
            types::OPEN_BRACE => {
                if top == STACK_CAPACITY || containers == MAX_CONTAINER_DEPTH {
                    return Err(SignatureError::TooDeep);
                }

                stack[top] = Frame::Dict(0);
                top += 1;
                containers += 1;
                continue;
            }
            types::CLOSE_BRACE => {
                if top == 0 {
                    return Err(SignatureError::UnmatchedBrace);
                }

                top -= 1;

                match stack[top] {
                    Frame::Dict(2) => {}
                    Frame::Dict(..) => return Err(SignatureError::DictEntryFieldCount),
                    Frame::Array => return Err(SignatureError::MissingArrayElementType),
                    Frame::Struct(..) => return Err(SignatureError::UnmatchedBrace),
                }

                containers -= 1;

                // A dict entry is only meaningful as an array element.
                if top == 0 || !matches!(stack[top - 1], Frame::Array) {
                    return Err(SignatureError::DictEntryNotInArray);
                }

                false
            }
            _ => return Err(SignatureError::UnknownTypeCode(b as char)),
        };

        // The completed type also completes any run of enclosing arrays.
        while top > 0 {
            if let Frame::Array = stack[top - 1] {
                top -= 1;
                arrays -= 1;
                is_basic = false;
            } else {
                break;
            }
        }

        if top > 0 {
            match stack[top - 1] {
                Frame::Struct(n) => {
                    stack[top - 1] = Frame::Struct(n + 1);
                }
                Frame::Dict(0) => {
                    if !is_basic {
                        return Err(SignatureError::DictKeyMustBeBasic);
                    }

                    stack[top - 1] = Frame::Dict(1);
                }
                Frame::Dict(1) => {
                    stack[top - 1] = Frame::Dict(2);
                }
                Frame::Dict(..) => return Err(SignatureError::DictEntryFieldCount),
                Frame::Array => {}
            }
        }
    }

    if top > 0 {
        return match stack[top - 1] {
            Frame::Array => Err(SignatureError::MissingArrayElementType),
            Frame::Struct(..) => Err(SignatureError::UnterminatedStruct),
            Frame::Dict(..) => Err(SignatureError::UnterminatedDict),
        };
    }

    Ok(())
}
