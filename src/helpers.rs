use std::iter::{self, Chain, Once};

use crate::types::FileHandle;

pub fn version() -> String {
    format!("llm-cli v{}", env!("CARGO_PKG_VERSION"))
}

/// Strip leading and trailing whitespace from user input.
pub fn preprocess_input(input: &str) -> &str {
    input.trim()
}

/// A sequence whose first element has already been pulled.
pub struct Peeked<I: Iterator> {
    first: I::Item,
    rest: I,
}

impl<I: Iterator> Peeked<I> {
    pub fn first(&self) -> &I::Item {
        &self.first
    }
}

impl<I: Iterator> IntoIterator for Peeked<I> {
    type Item = I::Item;
    type IntoIter = Chain<Once<I::Item>, I>;

    /// The whole original sequence, first element included.
    fn into_iter(self) -> Self::IntoIter {
        iter::once(self.first).chain(self.rest)
    }
}

/// Look at the first element without losing it. `None` when the sequence is
/// empty.
pub fn peek<I: IntoIterator>(iter: I) -> Option<Peeked<I::IntoIter>> {
    let mut rest = iter.into_iter();
    let first = rest.next()?;
    Some(Peeked { first, rest })
}

/// One tab-separated line per file, matching the `files --list` header.
pub fn format_file_info(file: &FileHandle) -> String {
    format!(
        "{}\t - \t{}\t - \t{}\t - \t{}",
        file.display_name, file.mime_type, file.size_bytes, file.uri
    )
}
