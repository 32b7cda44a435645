//! Linear-merge kernel symbolizer

use super::kallsyms::SymbolTable;

/// Resolves sorted kernel addresses against a [`SymbolTable`]
pub struct KernelSymbolizer<'a> {
    table: &'a SymbolTable,
}

impl<'a> KernelSymbolizer<'a> {
    #[must_use]
    pub fn new(table: &'a SymbolTable) -> Self {
        Self { table }
    }

    /// Resolve each address to the nearest symbol at or below it
    ///
    /// `addresses` must be ascending. The result has one entry per address in
    /// input order; `None` means the address lies below the first symbol (or
    /// the table is empty).
    #[must_use]
    pub fn resolve(&self, addresses: &[u64]) -> Vec<Option<&'a str>> {
        debug_assert!(addresses.windows(2).all(|w| w[0] <= w[1]), "addresses must be sorted");

        let mut resolved = Vec::with_capacity(addresses.len());
        if addresses.is_empty() {
            return resolved;
        }

        let mut last: Option<&'a str> = None;
        let mut next = 0;

        for symbol in self.table.symbols() {
            while next < addresses.len() && addresses[next] < symbol.address {
                resolved.push(last);
                next += 1;
            }
            if next == addresses.len() {
                break;
            }
            last = Some(symbol.name.as_str());
        }

        // Past the end of the table everything belongs to the last symbol
        resolved.resize(addresses.len(), last);
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(u64, &str)]) -> SymbolTable {
        let text: String =
            entries.iter().map(|(addr, name)| format!("{addr:016x} T {name}\n")).collect();
        SymbolTable::parse(text.as_bytes())
    }

    #[test]
    fn test_merge_resolves_to_preceding_symbol() {
        let table = table(&[(10, "A"), (20, "B"), (30, "C")]);
        let names = KernelSymbolizer::new(&table).resolve(&[5, 15, 25, 35]);
        assert_eq!(names, vec![None, Some("A"), Some("B"), Some("C")]);
    }

    #[test]
    fn test_exact_match_resolves_to_that_symbol() {
        let table = table(&[(10, "A"), (20, "B"), (30, "C")]);
        let names = KernelSymbolizer::new(&table).resolve(&[10, 20, 30]);
        assert_eq!(names, vec![Some("A"), Some("B"), Some("C")]);
    }

    #[test]
    fn test_several_queries_between_two_symbols() {
        let table = table(&[(0x1000, "do_syscall_64"), (0x2000, "schedule")]);
        let names = KernelSymbolizer::new(&table).resolve(&[0x1001, 0x1500, 0x1fff, 0x2001]);
        assert_eq!(
            names,
            vec![Some("do_syscall_64"), Some("do_syscall_64"), Some("do_syscall_64"), Some("schedule")]
        );
    }

    #[test]
    fn test_empty_table_leaves_everything_unresolved() {
        let table = SymbolTable::default();
        let names = KernelSymbolizer::new(&table).resolve(&[1, 2, 3]);
        assert_eq!(names, vec![None, None, None]);
    }

    #[test]
    fn test_empty_query_returns_empty() {
        let table = table(&[(10, "A")]);
        assert!(KernelSymbolizer::new(&table).resolve(&[]).is_empty());
    }
}
