//! Scanner for the debugger's textual rendering of an rwlock value.
//!
//! The printed struct varies between builds (field prefixes, interposed
//! union/padding members, glibc's `__nr_readers` style names) so the scanner
//! matches each field name as a case-insensitive substring, in a fixed
//! order, and tolerates arbitrary text in between. Either every field is
//! found or the text is reported unparsed; there are no partial results.

/// Counters of an rwlock at the moment the target was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockFields {
    pub readers: u64,
    pub readers_wakeup: u64,
    pub writer_wakeup: u64,
    pub readers_queued: u64,
    pub writers_queued: u64,
    pub writer: u64,
    pub shared: u64,
}

const FIELD_ORDER: [&str; 7] = [
    "readers",
    "readers_wakeup",
    "writer_wakeup",
    "readers_queued",
    "writers_queued",
    "writer",
    "shared",
];

/// Parse the lock counters out of `text`, or `None` if any field is missing
/// or out of order.
pub fn parse_lock_text(text: &str) -> Option<LockFields> {
    let lower = text.to_ascii_lowercase();
    let mut from = 0;
    let mut values = [0u64; 7];
    for (slot, name) in FIELD_ORDER.iter().enumerate() {
        let (value, after) = find_field(&lower, from, name)?;
        values[slot] = value;
        from = after;
    }
    Some(LockFields {
        readers: values[0],
        readers_wakeup: values[1],
        writer_wakeup: values[2],
        readers_queued: values[3],
        writers_queued: values[4],
        writer: values[5],
        shared: values[6],
    })
}

/// Find the first occurrence of `name` at or after `from` that is followed
/// by `= <digits>`, returning the value and the offset just past the digits.
fn find_field(text: &str, from: usize, name: &str) -> Option<(u64, usize)> {
    let mut at = from;
    while let Some(pos) = text[at..].find(name) {
        let start = at + pos;
        if let Some(hit) = match_assignment(text, start + name.len()) {
            return Some(hit);
        }
        at = start + 1;
    }
    None
}

/// Match `= <digits>` starting at `at`, with optional blanks around the
/// equals sign. Returns the parsed value and the offset past the digits.
fn match_assignment(text: &str, at: usize) -> Option<(u64, usize)> {
    let bytes = text.as_bytes();
    let mut i = at;
    while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t') {
        i += 1;
    }
    if i >= bytes.len() || bytes[i] != b'=' {
        return None;
    }
    i += 1;
    while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t') {
        i += 1;
    }
    let digits_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i == digits_start {
        return None;
    }
    let value: u64 = text[digits_start..i].parse().ok()?;
    Some((value, i))
}
