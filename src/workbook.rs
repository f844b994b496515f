//! Spreadsheet load/save and the cell walk that feeds translation.
//!
//! Cells are read through `umya-spreadsheet`; saving goes through [`Package`],
//! which patches only the edited worksheet parts. Styles, drawings, charts and
//! chart sheets come out exactly as they went in.

use crate::classifier::has_translatable_text;
use crate::package::{CellEdits, Package, SheetKind};
use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::io::Cursor;
use umya_spreadsheet::{Cell, CellRawValue, Spreadsheet};

/// Position of a cell inside a workbook
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellRef {
    pub sheet: String,
    /// A1-style address, e.g. `B7`
    pub coordinate: String,
    /// 1-based column
    pub column: u32,
    /// 1-based row
    pub row: u32,
}

/// A cell selected for translation together with its current text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatableCell {
    pub reference: CellRef,
    pub text: String,
}

/// A loaded workbook owned by a single request
pub struct Workbook {
    book: Spreadsheet,
    package: Package,
    /// Sheet name → cells written since load
    edits: BTreeMap<String, CellEdits>,
}

impl Workbook {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_vec(bytes.to_vec())
    }

    fn from_vec(bytes: Vec<u8>) -> Result<Self> {
        let package = Package::read(bytes).context("Failed to read workbook")?;
        let book = umya_spreadsheet::reader::xlsx::read_reader(Cursor::new(package.source()), true)
            .map_err(|e| anyhow!("Failed to read workbook: {}", e))?;
        Ok(Self {
            book,
            package,
            edits: BTreeMap::new(),
        })
    }

    /// Serialize an in-memory spreadsheet and load the result
    pub fn from_spreadsheet(book: &Spreadsheet) -> Result<Self> {
        let mut buffer = Cursor::new(Vec::new());
        umya_spreadsheet::writer::xlsx::write_writer(book, &mut buffer)
            .map_err(|e| anyhow!("Failed to write workbook: {}", e))?;
        Self::from_vec(buffer.into_inner())
    }

    /// [`Workbook::from_bytes`] on the blocking pool
    pub async fn load(bytes: Vec<u8>) -> Result<Self> {
        tokio::task::spawn_blocking(move || Self::from_vec(bytes))
            .await
            .context("Workbook load task failed")?
    }

    /// [`Workbook::into_bytes`] on the blocking pool
    pub async fn save(self) -> Result<Vec<u8>> {
        tokio::task::spawn_blocking(move || self.into_bytes())
            .await
            .context("Workbook save task failed")?
    }

    /// Final file bytes; the original bytes when nothing was written.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        self.package
            .save(&self.edits)
            .context("Failed to write workbook")
    }

    /// Names of the data worksheets, in workbook order. Chart sheets are left out.
    pub fn sheet_names(&self) -> Vec<String> {
        self.package
            .sheets()
            .iter()
            .filter(|sheet| sheet.kind == SheetKind::Worksheet)
            .map(|sheet| sheet.name.clone())
            .collect()
    }

    /// Collect every literal text cell containing source-script characters.
    ///
    /// Cells come out sheet by sheet in workbook order, row-major within a
    /// sheet. When `only_sheets` is given, other sheets are skipped.
    pub fn translatable_cells(&self, only_sheets: Option<&[String]>) -> Vec<TranslatableCell> {
        let mut cells = Vec::new();

        for name in self.sheet_names() {
            if let Some(filter) = only_sheets {
                if !filter.iter().any(|s| *s == name) {
                    continue;
                }
            }
            let Some(sheet) = self.book.get_sheet_by_name(&name) else {
                continue;
            };

            let mut sheet_cells: Vec<TranslatableCell> = sheet
                .get_cell_collection()
                .into_iter()
                .filter_map(|cell| {
                    let text = literal_text(cell)?;
                    if !has_translatable_text(&text) {
                        return None;
                    }
                    Some(TranslatableCell {
                        reference: cell_ref(&name, cell),
                        text,
                    })
                })
                .collect();

            sheet_cells.sort_by_key(|c| (c.reference.row, c.reference.column));
            cells.extend(sheet_cells);
        }

        cells
    }

    /// Overwrite one existing cell's value with a plain string, keeping its style.
    ///
    /// Returns false when the sheet is not a worksheet or the cell is absent.
    pub fn write_text(&mut self, reference: &CellRef, text: &str) -> bool {
        if self.package.worksheet(&reference.sheet).is_none() {
            return false;
        }
        let Some(sheet) = self.book.get_sheet_by_name_mut(&reference.sheet) else {
            return false;
        };
        let position = (reference.column, reference.row);
        if sheet.get_cell(position).is_none() {
            return false;
        }

        sheet.get_cell_mut(position).set_value_string(text);
        self.edits
            .entry(reference.sheet.clone())
            .or_default()
            .insert(position, text.to_string());
        true
    }

    /// Current value of a cell, if the cell exists
    pub fn cell_value(&self, sheet: &str, coordinate: &str) -> Option<String> {
        self.book
            .get_sheet_by_name(sheet)?
            .get_cell(coordinate)
            .map(|cell| cell.get_value().into_owned())
    }
}

/// Text of a cell that holds a literal string; formulas never qualify.
fn literal_text(cell: &Cell) -> Option<String> {
    if cell.is_formula() {
        return None;
    }
    match cell.get_raw_value() {
        CellRawValue::String(_) | CellRawValue::RichText(_) => {
            let value = cell.get_value();
            if value.is_empty() {
                None
            } else {
                Some(value.into_owned())
            }
        }
        _ => None,
    }
}

fn cell_ref(sheet: &str, cell: &Cell) -> CellRef {
    let coordinate = cell.get_coordinate();
    CellRef {
        sheet: sheet.to_string(),
        coordinate: coordinate.get_coordinate(),
        column: coordinate.get_col_num().to_owned(),
        row: coordinate.get_row_num().to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_book() -> Spreadsheet {
        let mut book = umya_spreadsheet::new_file();
        {
            let sheet = book
                .get_sheet_by_name_mut("Sheet1")
                .expect("default sheet exists");
            sheet.get_cell_mut("B2").set_value_string("自動化ツール");
            sheet.get_cell_mut("A1").set_value_string("給与計算");
            sheet.get_cell_mut("C1").set_value_string("Total");
            sheet.get_cell_mut("A2").set_value_number(42);
            sheet.get_cell_mut("A3").set_value_string("");
            sheet.get_cell_mut("B1").set_value_string("データ");
        }
        {
            let data = book.new_sheet("Data").expect("new sheet");
            data.get_cell_mut("A1").set_value_string("中文内容");
            data.get_cell_mut("A2").set_formula("CONCATENATE(\"合\",\"計\")");
        }
        book
    }

    fn load(book: &Spreadsheet) -> Workbook {
        Workbook::from_spreadsheet(book).expect("should serialize")
    }

    fn reload(workbook: Workbook) -> Workbook {
        let bytes = workbook.into_bytes().expect("should save");
        Workbook::from_bytes(&bytes).expect("should reload")
    }

    fn coordinates(cells: &[TranslatableCell]) -> Vec<(String, String)> {
        cells
            .iter()
            .map(|c| (c.reference.sheet.clone(), c.reference.coordinate.clone()))
            .collect()
    }

    #[test]
    fn test_sheet_names_in_order() {
        let workbook = load(&sample_book());
        assert_eq!(workbook.sheet_names(), vec!["Sheet1", "Data"]);
    }

    #[test]
    fn test_extracts_in_sheet_then_row_major_order() {
        let workbook = load(&sample_book());
        let cells = workbook.translatable_cells(None);

        assert_eq!(
            coordinates(&cells),
            vec![
                ("Sheet1".to_string(), "A1".to_string()),
                ("Sheet1".to_string(), "B1".to_string()),
                ("Sheet1".to_string(), "B2".to_string()),
                ("Data".to_string(), "A1".to_string()),
            ]
        );
        assert_eq!(cells[0].text, "給与計算");
        assert_eq!(cells[0].reference.column, 1);
        assert_eq!(cells[0].reference.row, 1);
        assert_eq!(cells[2].reference.column, 2);
        assert_eq!(cells[2].reference.row, 2);
    }

    #[test]
    fn test_skips_numbers_latin_empty_and_formulas() {
        let workbook = load(&sample_book());
        let cells = workbook.translatable_cells(None);

        assert!(cells.iter().all(|c| c.text != "Total"));
        assert!(!cells
            .iter()
            .any(|c| c.reference.sheet == "Data" && c.reference.coordinate == "A2"));
        assert!(cells.iter().all(|c| c.reference.coordinate != "A3"));
    }

    #[test]
    fn test_sheet_filter() {
        let workbook = load(&sample_book());
        let only = vec!["Data".to_string(), "Missing".to_string()];
        let cells = workbook.translatable_cells(Some(&only));

        assert_eq!(
            coordinates(&cells),
            vec![("Data".to_string(), "A1".to_string())]
        );
    }

    #[test]
    fn test_extraction_is_deterministic_after_round_trip() {
        let first = reload(load(&sample_book())).translatable_cells(None);
        let second = reload(load(&sample_book())).translatable_cells(None);
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
    }

    #[test]
    fn test_unedited_workbook_saves_byte_identical() {
        let bytes = load(&sample_book()).into_bytes().expect("should save");
        let workbook = Workbook::from_bytes(&bytes).expect("should load");
        assert_eq!(workbook.into_bytes().expect("should save"), bytes);
    }

    #[test]
    fn test_write_text_only_touches_target_cell() {
        let mut workbook = load(&sample_book());
        let cells = workbook.translatable_cells(None);

        assert!(workbook.write_text(&cells[0].reference, "Payroll"));
        assert_eq!(workbook.cell_value("Sheet1", "A1").as_deref(), Some("Payroll"));

        let reloaded = reload(workbook);
        assert_eq!(reloaded.cell_value("Sheet1", "A1").as_deref(), Some("Payroll"));
        assert_eq!(reloaded.cell_value("Sheet1", "B1").as_deref(), Some("データ"));
        assert_eq!(reloaded.cell_value("Sheet1", "C1").as_deref(), Some("Total"));
        assert_eq!(reloaded.cell_value("Sheet1", "A2").as_deref(), Some("42"));
        assert_eq!(reloaded.cell_value("Data", "A1").as_deref(), Some("中文内容"));
    }

    #[test]
    fn test_numeric_looking_translation_stays_text() {
        let mut workbook = load(&sample_book());
        let cells = workbook.translatable_cells(None);

        assert!(workbook.write_text(&cells[0].reference, "2024"));

        let reloaded = reload(workbook);
        let sheet = reloaded
            .book
            .get_sheet_by_name("Sheet1")
            .expect("sheet exists");
        let cell = sheet.get_cell("A1").expect("cell exists");
        assert_eq!(cell.get_value(), "2024");
        assert!(matches!(
            cell.get_raw_value(),
            CellRawValue::String(_) | CellRawValue::RichText(_)
        ));
    }

    #[test]
    fn test_write_text_unknown_sheet() {
        let mut workbook = load(&sample_book());
        let reference = CellRef {
            sheet: "Nope".to_string(),
            coordinate: "A1".to_string(),
            column: 1,
            row: 1,
        };
        assert!(!workbook.write_text(&reference, "x"));
    }

    #[test]
    fn test_write_text_absent_cell() {
        let mut workbook = load(&sample_book());
        let reference = CellRef {
            sheet: "Sheet1".to_string(),
            coordinate: "Z99".to_string(),
            column: 26,
            row: 99,
        };
        assert!(!workbook.write_text(&reference, "x"));
        assert!(workbook.cell_value("Sheet1", "Z99").is_none());
    }

    #[test]
    fn test_formula_survives_round_trip() {
        let workbook = reload(load(&sample_book()));
        let sheet = workbook
            .book
            .get_sheet_by_name("Data")
            .expect("sheet exists");
        let cell = sheet.get_cell("A2").expect("cell exists");
        assert!(cell.is_formula());
    }

    #[tokio::test]
    async fn test_load_and_save_off_the_runtime() {
        let bytes = load(&sample_book()).into_bytes().expect("should save");
        let mut workbook = Workbook::load(bytes).await.expect("should load");
        let cells = workbook.translatable_cells(None);
        assert!(workbook.write_text(&cells[0].reference, "Payroll"));

        let saved = workbook.save().await.expect("should save");
        let reloaded = Workbook::from_bytes(&saved).expect("should reload");
        assert_eq!(reloaded.cell_value("Sheet1", "A1").as_deref(), Some("Payroll"));
    }

    #[test]
    fn test_corrupt_bytes_fail_to_load() {
        let err = match Workbook::from_bytes(b"definitely not a zip archive") {
            Ok(_) => panic!("garbage should not load"),
            Err(e) => e.to_string(),
        };
        assert!(err.contains("Failed to read workbook"));
    }
}
