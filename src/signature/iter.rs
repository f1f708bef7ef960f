use crate::protocol::types;

use super::Signature;

/// An iterator over the single complete types of a signature.
pub(crate) struct Iter<'a> {
    rest: &'a [u8],
}

impl<'a> Iter<'a> {
    #[inline]
    pub(super) fn new(signature: &'a Signature) -> Iter<'a> {
        Iter {
            rest: signature.as_bytes(),
        }
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Signature;

    fn next(&mut self) -> Option<&'a Signature> {
        if self.rest.is_empty() {
            return None;
        }

        let n = complete_type_len(self.rest)?;
        let (head, tail) = self.rest.split_at(n);
        self.rest = tail;
        // SAFETY: a complete type sliced out of a validated signature is
        // itself a valid signature.
        Some(unsafe { Signature::new_unchecked(head) })
    }
}

/// Length in bytes of the first single complete type: a run of `a` markers
/// followed by either one basic or variant code, or a balanced container.
fn complete_type_len(bytes: &[u8]) -> Option<usize> {
    let mut i = 0;

    while bytes.get(i) == Some(&types::ARRAY) {
        i += 1;
    }

    match *bytes.get(i)? {
        types::OPEN_PAREN | types::OPEN_BRACE => {
            let mut depth = 0usize;

            loop {
                let b = *bytes.get(i)?;
                i += 1;

                match b {
                    types::OPEN_PAREN | types::OPEN_BRACE => depth += 1,
                    types::CLOSE_PAREN | types::CLOSE_BRACE => {
                        depth -= 1;

                        if depth == 0 {
                            break;
                        }
                    }
                    _ => {}
                }
            }
        }
        _ => i += 1,
    }

    Some(i)
}

/// Structured view over a single complete type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TypeView<'a> {
    /// A basic type identified by its type code.
    Basic(u8),
    /// An array and its element type.
    Array(&'a Signature),
    /// A dict: array of dict entries, split into key and value types.
    Dict(&'a Signature, &'a Signature),
    /// A struct and the signature of its fields.
    Struct(&'a Signature),
    /// A variant, typed per value.
    Variant,
}

impl Signature {
    /// Classify this signature, which must hold exactly one complete type.
    pub(crate) fn view(&self) -> TypeView<'_> {
        let bytes = self.as_bytes();

        match bytes[0] {
            types::VARIANT => TypeView::Variant,
            types::OPEN_PAREN => {
                // SAFETY: fields of a validated struct form a signature.
                TypeView::Struct(unsafe {
                    Signature::new_unchecked(&bytes[1..bytes.len() - 1])
                })
            }
            types::ARRAY => {
                let inner = &bytes[1..];

                if inner[0] == types::OPEN_BRACE {
                    let entry = &inner[1..inner.len() - 1];
                    let key_len = complete_type_len(entry).unwrap_or(entry.len());
                    let (key, value) = entry.split_at(key_len);

                    // SAFETY: key and value of a validated dict entry are
                    // single complete types.
                    unsafe {
                        TypeView::Dict(
                            Signature::new_unchecked(key),
                            Signature::new_unchecked(value),
                        )
                    }
                } else {
                    // SAFETY: the element type of a validated array is a
                    // single complete type.
                    TypeView::Array(unsafe { Signature::new_unchecked(inner) })
                }
            }
            code => TypeView::Basic(code),
        }
    }
}
