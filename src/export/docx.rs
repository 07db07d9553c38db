use std::io::Cursor;

use docx_rs::{Docx, Paragraph, Run, Table, TableCell, TableRow};

use super::tabular::{TabularDocument, HEADER};
use crate::error::ExportError;

/// Column widths in twentieths of a point (1 cm = 567).
const COLUMN_WIDTHS: [usize; 6] = [680, 1020, 567, 2551, 2268, 1701];

/// Lay out a tabular document as a .docx package.
pub fn encode(doc: &TabularDocument) -> Result<Vec<u8>, ExportError> {
    let mut docx = Docx::new().add_paragraph(
        Paragraph::new().add_run(Run::new().add_text(&doc.title).bold().size(36)),
    );

    for (key, value) in &doc.metadata {
        docx = docx.add_paragraph(text_paragraph(&format!("{}：{}", key, value)));
    }

    for block in &doc.blocks {
        if let Some(heading) = &block.heading {
            docx = docx.add_paragraph(
                Paragraph::new().add_run(Run::new().add_text(heading).bold().size(28)),
            );
        }

        let mut rows = vec![TableRow::new(
            HEADER
                .iter()
                .map(|h| TableCell::new().add_paragraph(
                    Paragraph::new().add_run(Run::new().add_text(*h).bold()),
                ))
                .collect(),
        )];
        rows.extend(block.rows.iter().map(|r| {
            TableRow::new(r.iter().map(|cell| text_cell(cell)).collect())
        }));

        docx = docx
            .add_table(Table::new(rows).set_grid(COLUMN_WIDTHS.to_vec()))
            .add_paragraph(Paragraph::new());
    }

    let mut buf = Cursor::new(Vec::new());
    docx.build()
        .pack(&mut buf)
        .map_err(|e| ExportError::Encode(e.to_string()))?;
    Ok(buf.into_inner())
}

fn text_paragraph(text: &str) -> Paragraph {
    Paragraph::new().add_run(Run::new().add_text(text))
}

/// Multi-line cell text becomes one paragraph per line.
fn text_cell(text: &str) -> TableCell {
    let mut cell = TableCell::new();
    if text.is_empty() {
        return cell.add_paragraph(Paragraph::new());
    }
    for line in text.lines() {
        cell = cell.add_paragraph(text_paragraph(line));
    }
    cell
}
