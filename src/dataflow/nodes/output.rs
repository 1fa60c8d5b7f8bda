/// Role of an output in its model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Raw,
    Main,
    Lookup,
    /// Global copy of a faceted computation used by shared scales.
    Scale,
}

/// A named, reference-counted dataset boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputNode {
    /// Key into the reference-count table.
    pub name: String,
    pub kind: OutputKind,
    /// Dataset the output resolves to; starts as the logical name and is
    /// rewritten during assembly.
    pub source: String,
    pub id: u64,
}

impl OutputNode {
    pub fn new(name: impl Into<String>, kind: OutputKind, id: u64) -> Self {
        let name = name.into();
        Self {
            source: name.clone(),
            name,
            kind,
            id,
        }
    }
}
