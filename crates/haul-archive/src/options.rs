/// Options applied to every entry of an extracted archive.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Leading path components removed from each entry. Entries left with
    /// no components are skipped.
    pub strip_components: usize,
}

impl ExtractOptions {
    #[must_use]
    pub fn strip_components(mut self, n: usize) -> Self {
        self.strip_components = n;
        self
    }
}
