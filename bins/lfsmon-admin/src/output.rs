//! Table and JSON rendering of command results.

use std::io::Write;

use serde::Serialize;

pub type OutputRow = Vec<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Column-aligned text.
    #[default]
    Table,
    Json,
}

/// A header row followed by data rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputTable {
    pub header: OutputRow,
    pub rows: Vec<OutputRow>,
}

impl OutputTable {
    pub fn with_header(header: &[&str]) -> Self {
        Self {
            header: header.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: OutputRow) {
        self.rows.push(row);
    }
}

pub struct Printer<W: Write> {
    out: W,
    format: OutputFormat,
}

impl<W: Write> Printer<W> {
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self { out, format }
    }

    pub fn print_table(&mut self, table: &OutputTable) -> std::io::Result<()> {
        match self.format {
            OutputFormat::Table => self.print_aligned(table),
            OutputFormat::Json => {
                let rows: Vec<serde_json::Map<String, serde_json::Value>> = table
                    .rows
                    .iter()
                    .map(|row| {
                        table
                            .header
                            .iter()
                            .cloned()
                            .zip(row.iter().cloned().map(serde_json::Value::String))
                            .collect()
                    })
                    .collect();
                self.print_json(&rows)
            }
        }
    }

    /// A single value; rendered with `Display` in table mode.
    pub fn print_value<T: Serialize + std::fmt::Display>(&mut self, value: &T) -> std::io::Result<()> {
        match self.format {
            OutputFormat::Table => writeln!(self.out, "{value}"),
            OutputFormat::Json => self.print_json(value),
        }
    }

    fn print_json<T: Serialize + ?Sized>(&mut self, value: &T) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        writeln!(self.out, "{json}")
    }

    fn print_aligned(&mut self, table: &OutputTable) -> std::io::Result<()> {
        const SEPARATOR: &str = "  ";
        let mut widths: Vec<usize> = table.header.iter().map(String::len).collect();
        for row in &table.rows {
            if widths.len() < row.len() {
                widths.resize(row.len(), 0);
            }
            for (col, cell) in row.iter().enumerate() {
                widths[col] = widths[col].max(cell.len());
            }
        }
        for row in std::iter::once(&table.header).chain(&table.rows) {
            let mut line = String::new();
            for (col, cell) in row.iter().enumerate() {
                if col + 1 < row.len() {
                    line.push_str(&format!("{cell:<width$}{SEPARATOR}", width = widths[col]));
                } else {
                    line.push_str(cell);
                }
            }
            writeln!(self.out, "{line}")?;
        }
        Ok(())
    }
}
