/// Validate an object path: `/`, or `/`-separated elements of
/// `[A-Za-z0-9_]`, with no empty or trailing element.
pub(super) const fn validate(bytes: &[u8]) -> bool {
    let [b'/', rest @ ..] = bytes else {
        return false;
    };

    if rest.is_empty() {
        return true;
    }

    let mut rest = rest;
    let mut element = false;

    while let [b, tail @ ..] = rest {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' => {
                element = true;
            }
            b'/' => {
                if !element {
                    return false;
                }

                element = false;
            }
            _ => return false,
        }

        rest = tail;
    }

    element
}
