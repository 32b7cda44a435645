//! Kernel symbol table loading

use log::{debug, warn};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor};
use std::path::{Path, PathBuf};

/// Name given to kernel addresses that fall below the first known symbol
pub const UNRESOLVED_SYMBOL: &str = "Unknown";

/// Default location of the kernel's exported symbol listing
pub const DEFAULT_KALLSYMS_PATH: &str = "/proc/kallsyms";

/// Width of the hex address field
const ADDRESS_WIDTH: usize = 16;

/// Column where the symbol name starts (address, space, type, space)
const NAME_COLUMN: usize = ADDRESS_WIDTH + 3;

/// One `(address, name)` pair from the listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSymbol {
    pub address: u64,
    pub name: String,
}

/// Address-ordered kernel symbols
///
/// The order is the order of the source; kallsyms is sorted by the kernel and
/// no monotonicity check is done here.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: Vec<KernelSymbol>,
}

impl SymbolTable {
    /// Parse a kallsyms-formatted listing
    ///
    /// Lines too short to carry a name and lines whose address does not parse
    /// are skipped. A read error ends parsing and keeps what was read so far.
    pub fn parse<R: BufRead>(reader: R) -> Self {
        let mut symbols = Vec::new();

        for (index, line) in reader.lines().enumerate() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("Stopped reading kernel symbols at line {}: {e}", index + 1);
                    break;
                }
            };

            match parse_line(&line) {
                Some(symbol) => symbols.push(symbol),
                None => debug!("Skipping kallsyms line {}: {line:?}", index + 1),
            }
        }

        Self { symbols }
    }

    #[must_use]
    pub fn symbols(&self) -> &[KernelSymbol] {
        &self.symbols
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// True when every address was hidden by `kptr_restrict`
    #[must_use]
    pub fn is_redacted(&self) -> bool {
        !self.symbols.is_empty() && self.symbols.iter().all(|s| s.address == 0)
    }
}

fn parse_line(line: &str) -> Option<KernelSymbol> {
    let address = line.get(..ADDRESS_WIDTH)?;
    let name = line.get(NAME_COLUMN..)?.trim_end();
    if name.is_empty() {
        return None;
    }

    let address = u64::from_str_radix(address, 16).ok()?;
    Some(KernelSymbol { address, name: name.to_string() })
}

/// Somewhere a kallsyms listing can be read from
pub trait SymbolSource {
    /// Open a fresh reader positioned at the first line
    ///
    /// # Errors
    /// Returns the underlying I/O error if the listing cannot be opened
    fn open(&self) -> io::Result<Box<dyn BufRead + '_>>;

    /// Human-readable origin, used in log messages
    fn describe(&self) -> String;
}

/// Symbol listing backed by a file, normally `/proc/kallsyms`
#[derive(Debug, Clone)]
pub struct KallsymsFile {
    path: PathBuf,
}

impl KallsymsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for KallsymsFile {
    fn default() -> Self {
        Self::new(DEFAULT_KALLSYMS_PATH)
    }
}

impl SymbolSource for KallsymsFile {
    fn open(&self) -> io::Result<Box<dyn BufRead + '_>> {
        let file = File::open(&self.path)?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Symbol listing held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemorySymbols {
    text: String,
}

impl InMemorySymbols {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl SymbolSource for InMemorySymbols {
    fn open(&self) -> io::Result<Box<dyn BufRead + '_>> {
        Ok(Box::new(Cursor::new(self.text.as_bytes())))
    }

    fn describe(&self) -> String {
        "<in-memory symbols>".to_string()
    }
}

/// Load the symbol table, failing soft
///
/// An unopenable source or a fully redacted listing yields an empty table,
/// which makes every kernel address resolve to [`UNRESOLVED_SYMBOL`].
pub fn load_symbol_table(source: &dyn SymbolSource) -> SymbolTable {
    let reader = match source.open() {
        Ok(reader) => reader,
        Err(e) => {
            warn!("Cannot read kernel symbols from {}: {e}", source.describe());
            return SymbolTable::default();
        }
    };

    let table = SymbolTable::parse(reader);
    if table.is_redacted() {
        warn!(
            "Kernel symbol addresses in {} are hidden (kptr_restrict); kernel frames will be {UNRESOLVED_SYMBOL}",
            source.describe()
        );
        return SymbolTable::default();
    }

    debug!("Loaded {} kernel symbols from {}", table.len(), source.describe());
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
ffffffff9d000000 T startup_64
ffffffff9d000040 T secondary_startup_64
ffffffffc0a01000 t ext4_fill_super\t[ext4]
";

    #[test]
    fn test_parse_well_formed_lines() {
        let table = SymbolTable::parse(LISTING.as_bytes());
        assert_eq!(table.len(), 3);
        assert_eq!(
            table.symbols()[0],
            KernelSymbol { address: 0xffff_ffff_9d00_0000, name: "startup_64".to_string() }
        );
        assert_eq!(table.symbols()[2].name, "ext4_fill_super\t[ext4]");
    }

    #[test]
    fn test_parse_skips_malformed_lines() {
        let text = "zzzzzzzzzzzzzzzz T bogus\n\
                    ffffffff9d000000 T\n\
                    short\n\
                    \n\
                    ffffffff9d000010 T good\r\n";
        let table = SymbolTable::parse(text.as_bytes());
        assert_eq!(table.len(), 1);
        assert_eq!(table.symbols()[0].name, "good");
        assert_eq!(table.symbols()[0].address, 0xffff_ffff_9d00_0010);
    }

    #[test]
    fn test_parse_keeps_unsorted_input_order() {
        let text = "0000000000000020 T b\n0000000000000010 T a\n";
        let table = SymbolTable::parse(text.as_bytes());
        let names: Vec<&str> = table.symbols().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_missing_file_yields_empty_table() {
        let source = KallsymsFile::new("/nonexistent/kallsyms");
        let table = load_symbol_table(&source);
        assert!(table.is_empty());
    }

    #[test]
    fn test_redacted_listing_yields_empty_table() {
        let source = InMemorySymbols::new(
            "0000000000000000 T startup_64\n0000000000000000 T secondary_startup_64\n",
        );
        assert!(load_symbol_table(&source).is_empty());
    }

    #[test]
    fn test_file_source_reads_listing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kallsyms");
        std::fs::write(&path, LISTING).unwrap();

        let table = load_symbol_table(&KallsymsFile::new(&path));
        assert_eq!(table.len(), 3);
    }
}
