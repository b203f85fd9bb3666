//! Processing order for transfers and previews.

use std::cmp::Ordering;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Column that fixes the file-processing order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SortColumn {
    /// Case-insensitive file name.
    #[default]
    Name,
    /// Lowercased extension, then name.
    Extension,
    /// File size in bytes.
    Size,
    /// Last modification time.
    Modified,
    /// Creation time (where the platform records it).
    Created,
}

/// Sort direction.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SortOrder {
    #[default]
    #[strum(serialize = "ascending", serialize = "asc")]
    Ascending,
    #[strum(serialize = "descending", serialize = "desc")]
    Descending,
}

/// Sort column plus direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortSpec {
    pub column: SortColumn,
    pub order: SortOrder,
}

/// Anything that can be ordered by a [`SortSpec`].
pub trait SortKey {
    /// File name, used for name and extension ordering.
    fn name(&self) -> &str;
    /// Size in bytes.
    fn size(&self) -> u64;
    /// Modification time, if known.
    fn modified(&self) -> Option<SystemTime>;
    /// Creation time, if known.
    fn created(&self) -> Option<SystemTime>;
}

impl SortSpec {
    /// Create a sort spec.
    pub fn new(column: SortColumn, order: SortOrder) -> Self {
        Self { column, order }
    }

    /// Compare two entries under this spec.
    pub fn compare<T: SortKey>(&self, a: &T, b: &T) -> Ordering {
        let cmp = match self.column {
            SortColumn::Name => cmp_name(a.name(), b.name()),
            SortColumn::Extension => extension_of(a.name())
                .cmp(&extension_of(b.name()))
                .then_with(|| cmp_name(a.name(), b.name())),
            SortColumn::Size => a.size().cmp(&b.size()),
            SortColumn::Modified => a.modified().cmp(&b.modified()),
            SortColumn::Created => a.created().cmp(&b.created()),
        };
        match self.order {
            SortOrder::Ascending => cmp,
            SortOrder::Descending => cmp.reverse(),
        }
    }

    /// Stable sort of a slice under this spec.
    pub fn sort<T: SortKey>(&self, items: &mut [T]) {
        items.sort_by(|a, b| self.compare(a, b));
    }
}

fn cmp_name(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}

/// Lowercased extension, empty when there is none. Leading-dot names
/// (".bashrc") have no extension.
fn extension_of(name: &str) -> String {
    match name.rfind('.') {
        Some(0) | None => String::new(),
        Some(idx) => name[idx + 1..].to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Item {
        name: &'static str,
        size: u64,
    }

    impl SortKey for Item {
        fn name(&self) -> &str {
            self.name
        }
        fn size(&self) -> u64 {
            self.size
        }
        fn modified(&self) -> Option<SystemTime> {
            None
        }
        fn created(&self) -> Option<SystemTime> {
            None
        }
    }

    fn names(items: &[Item]) -> Vec<&'static str> {
        items.iter().map(|i| i.name).collect()
    }

    #[test]
    fn test_name_sort_is_case_insensitive() {
        let mut items = vec![
            Item { name: "b.txt", size: 1 },
            Item { name: "A.txt", size: 2 },
            Item { name: "c.txt", size: 3 },
        ];
        SortSpec::default().sort(&mut items);
        assert_eq!(names(&items), ["A.txt", "b.txt", "c.txt"]);
    }

    #[test]
    fn test_extension_sort_then_name() {
        let mut items = vec![
            Item { name: "z.rs", size: 0 },
            Item { name: "a.txt", size: 0 },
            Item { name: "b.rs", size: 0 },
            Item { name: "README", size: 0 },
        ];
        SortSpec::new(SortColumn::Extension, SortOrder::Ascending).sort(&mut items);
        assert_eq!(names(&items), ["README", "b.rs", "z.rs", "a.txt"]);
    }

    #[test]
    fn test_size_descending_is_stable() {
        let mut items = vec![
            Item { name: "one", size: 10 },
            Item { name: "two", size: 30 },
            Item { name: "three", size: 10 },
        ];
        SortSpec::new(SortColumn::Size, SortOrder::Descending).sort(&mut items);
        assert_eq!(names(&items), ["two", "one", "three"]);
    }

    #[test]
    fn test_parse_from_str() {
        assert_eq!("size".parse::<SortColumn>().unwrap(), SortColumn::Size);
        assert_eq!("DESC".parse::<SortOrder>().unwrap(), SortOrder::Descending);
        assert_eq!("ascending".parse::<SortOrder>().unwrap(), SortOrder::Ascending);
    }
}
