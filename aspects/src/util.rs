use std::collections::VecDeque;

/// A fixed-capacity FIFO buffer that drops the oldest element on overflow.
///
/// Every unbounded-growth hazard in the library (event logs, sample windows,
/// state histories) goes through this type so the bound is explicit and
/// uniform.
#[derive(Clone, Debug)]
pub(crate) struct Ring<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> Ring<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    /// Appends an element, evicting the oldest one when full.
    pub(crate) fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }

        self.items.push_back(item);
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn clear(&mut self) {
        self.items.clear();
    }

    /// Iterates oldest-first.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub(crate) fn back(&self) -> Option<&T> {
        self.items.back()
    }

    pub(crate) fn front(&self) -> Option<&T> {
        self.items.front()
    }
}

/// Checks a metric or label name against the Prometheus naming convention:
/// ASCII `[A-Za-z_][A-Za-z0-9_]*`.
#[cfg(feature = "metrics")]
pub(crate) fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }

    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Matches `text` against a glob where `*` stands for any run of characters
/// (including the empty run). No other metacharacters are recognized.
#[cfg(feature = "cache")]
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    fn inner(pat: &[u8], text: &[u8]) -> bool {
        match pat.split_first() {
            None => text.is_empty(),
            Some((b'*', rest)) => {
                (0..=text.len()).any(|skip| inner(rest, &text[skip..]))
            }
            Some((c, rest)) => match text.split_first() {
                Some((t, text_rest)) if t == c => inner(rest, text_rest),
                _ => false,
            },
        }
    }

    inner(pattern.as_bytes(), text.as_bytes())
}
