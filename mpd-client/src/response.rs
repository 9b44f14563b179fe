//! Key/value responses.

/// The `key: value` pairs of one response or one record, in server order.
///
/// Keys may repeat (a song can carry several `Artist` tags); [`Attrs::get`]
/// returns the first occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attrs {
    pairs: Vec<(String, String)>,
}

impl Attrs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    /// First value stored under `key`, compared exactly.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First value stored under `key`, ignoring ASCII case.
    ///
    /// MPD capitalises tag names (`Title`) but not status fields (`duration`).
    pub fn get_ignore_case(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Every value stored under `key`.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Split a flat response into records, starting a new record at every
    /// occurrence of `first_key`. Pairs before the first `first_key` are
    /// dropped.
    pub fn split_records(self, first_key: &str) -> Vec<Attrs> {
        let mut records = Vec::new();
        let mut current: Option<Attrs> = None;

        for (key, value) in self.pairs {
            if key == first_key {
                if let Some(record) = current.take() {
                    records.push(record);
                }
                current = Some(Attrs::new());
            }
            if let Some(record) = current.as_mut() {
                record.pairs.push((key, value));
            }
        }

        records.extend(current);
        records
    }
}

impl FromIterator<(String, String)> for Attrs {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            pairs: iter.into_iter().collect(),
        }
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for Attrs {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}
