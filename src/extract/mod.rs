//! Document extraction — PDF text/OCR, CSV, and Excel readers.

pub mod pdf;
pub mod tabular;
pub mod text;

use std::path::Path;

/// Statement formats the pipeline can ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementFormat {
    Pdf,
    Csv,
    Excel,
}

impl StatementFormat {
    /// Detect the format from the file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "pdf" => Some(Self::Pdf),
            "csv" => Some(Self::Csv),
            "xlsx" | "xls" => Some(Self::Excel),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_supported_extensions() {
        assert_eq!(
            StatementFormat::from_path(Path::new("extrato.PDF")),
            Some(StatementFormat::Pdf)
        );
        assert_eq!(
            StatementFormat::from_path(Path::new("export.csv")),
            Some(StatementFormat::Csv)
        );
        assert_eq!(
            StatementFormat::from_path(Path::new("movimentos.xls")),
            Some(StatementFormat::Excel)
        );
        assert_eq!(
            StatementFormat::from_path(Path::new("notes.txt")),
            None
        );
        assert_eq!(StatementFormat::from_path(Path::new("no_extension")), None);
    }
}
