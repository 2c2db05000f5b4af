//! Per-format text extraction for ingested documents.
//!
//! Given a file path and its declared format, returns the raw extracted
//! text or a format-specific [`ExtractError`]. The rest of the pipeline
//! treats this as an opaque function: an extraction failure marks the
//! document failed, it never panics or kills the process.
//!
//! Formats: `pdf` (via `pdf-extract`), `docx`/`xlsx` (ZIP + streaming XML),
//! `csv`, and `txt`/`md` (UTF-8 with lossy fallback).

use std::io::Read;
use std::path::Path;

use thiserror::Error;

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum worksheets processed per xlsx.
const XLSX_MAX_SHEETS: usize = 100;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
}

/// Lowercased file extension, used as the format key.
pub fn detect_format(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
}

/// Extract plain text from `path` according to `format`.
pub fn extract_text(path: &Path, format: &str) -> Result<String, ExtractError> {
    let bytes = std::fs::read(path).map_err(|source| ExtractError::Io {
        path: path.display().to_string(),
        source,
    })?;

    match format {
        "pdf" => extract_pdf(&bytes),
        "docx" => extract_docx(&bytes),
        "xlsx" => extract_xlsx(&bytes),
        "csv" => Ok(extract_csv(&bytes)),
        "txt" | "md" => Ok(extract_plain(&bytes)),
        other => Err(ExtractError::UnsupportedFormat(other.to_string())),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn extract_plain(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .replace("\r\n", "\n")
        .replace('\r', "\n")
}

/// Render CSV rows ` | `-separated, labeling the first row as headers.
fn extract_csv(bytes: &[u8]) -> String {
    let text = extract_plain(bytes);
    let mut out = Vec::new();

    for (row_num, line) in text.lines().enumerate() {
        let cells: Vec<String> = line
            .split(',')
            .map(|cell| cell.trim().trim_matches('"').to_string())
            .filter(|cell| !cell.is_empty())
            .collect();
        if cells.is_empty() {
            continue;
        }
        if row_num == 0 {
            out.push(format!("Headers: {}", cells.join(" | ")));
        } else {
            out.push(cells.join(" | "));
        }
    }

    out.join("\n")
}

// ============ OOXML (docx / xlsx) ============

fn open_archive(bytes: &[u8]) -> Result<zip::ZipArchive<std::io::Cursor<&[u8]>>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let doc_xml = read_zip_entry_bounded(&mut archive, "word/document.xml")?;

    // Collect <w:t> text runs; paragraph ends become newlines.
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(doc_xml.as_slice());
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text_run = true;
                }
            }
            Ok(quick_xml::events::Event::Text(t)) if in_text_run => {
                out.push_str(t.unescape().unwrap_or_default().as_ref());
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;

    let shared = if archive.index_for_name("xl/sharedStrings.xml").is_some() {
        let xml = read_zip_entry_bounded(&mut archive, "xl/sharedStrings.xml")?;
        parse_shared_strings(&xml)?
    } else {
        Vec::new()
    };

    let mut sheet_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|n| n.to_string())
        .collect();
    sheet_names.sort();
    sheet_names.truncate(XLSX_MAX_SHEETS);

    let mut parts = Vec::new();
    for name in &sheet_names {
        let label = name
            .trim_start_matches("xl/worksheets/")
            .trim_end_matches(".xml");
        parts.push(format!("[Sheet: {}]", label));

        let xml = read_zip_entry_bounded(&mut archive, name)?;
        let rows = parse_sheet_rows(&xml, &shared)?;
        if !rows.is_empty() {
            parts.push(rows.join("\n"));
        }
        parts.push(String::new());
    }

    Ok(parts.join("\n"))
}

fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(t)) => {
                if let Some(ref mut s) = current {
                    s.push_str(t.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"si" {
                    strings.push(current.take().unwrap_or_default());
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(strings)
}

/// Render each row's non-empty cells ` | `-separated, resolving shared
/// string references.
fn parse_sheet_rows(xml: &[u8], shared: &[String]) -> Result<Vec<String>, ExtractError> {
    let mut rows = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut row_cells: Vec<String> = Vec::new();
    let mut cell_is_shared = false;
    let mut in_value = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => row_cells.clear(),
                b"c" => {
                    cell_is_shared = e.attributes().flatten().any(|a| {
                        a.key.local_name().as_ref() == b"t" && a.value.as_ref() == b"s"
                    });
                }
                b"v" => in_value = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(t)) if in_value => {
                let raw = t.unescape().unwrap_or_default().to_string();
                let value = if cell_is_shared {
                    raw.parse::<usize>()
                        .ok()
                        .and_then(|i| shared.get(i).cloned())
                        .unwrap_or(raw)
                } else {
                    raw
                };
                if !value.trim().is_empty() {
                    row_cells.push(value);
                }
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_value = false,
                b"row" => {
                    if !row_cells.is_empty() {
                        rows.push(row_cells.join(" | "));
                    }
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            for (name, content) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(content.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_detect_format_lowercases_extension() {
        assert_eq!(detect_format(Path::new("Report.PDF")), Some("pdf".into()));
        assert_eq!(detect_format(Path::new("notes.txt")), Some("txt".into()));
        assert_eq!(detect_format(Path::new("no_extension")), None);
    }

    #[test]
    fn test_plain_text_normalizes_line_endings() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_file(&tmp, "a.txt", b"line one\r\nline two\rline three");
        let text = extract_text(&path, "txt").unwrap();
        assert_eq!(text, "line one\nline two\nline three");
    }

    #[test]
    fn test_csv_renders_headers_and_rows() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_file(&tmp, "a.csv", b"name,age\nalice,30\n,\nbob,25");
        let text = extract_text(&path, "csv").unwrap();
        assert_eq!(text, "Headers: name | age\nalice | 30\nbob | 25");
    }

    #[test]
    fn test_unsupported_format_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_file(&tmp, "a.bin", b"data");
        let err = extract_text(&path, "bin").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let err = extract_text(Path::new("/nonexistent/file.txt"), "txt").unwrap_err();
        assert!(matches!(err, ExtractError::Io { .. }));
    }

    #[test]
    fn test_docx_extracts_text_runs_per_paragraph() {
        let document = r#"<?xml version="1.0"?>
            <w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
              <w:body>
                <w:p><w:r><w:t>First paragraph.</w:t></w:r></w:p>
                <w:p><w:r><w:t>Second </w:t></w:r><w:r><w:t>paragraph.</w:t></w:r></w:p>
              </w:body>
            </w:document>"#;
        let bytes = build_zip(&[("word/document.xml", document)]);

        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_file(&tmp, "a.docx", &bytes);
        let text = extract_text(&path, "docx").unwrap();
        assert!(text.contains("First paragraph.\n"));
        assert!(text.contains("Second paragraph.\n"));
    }

    #[test]
    fn test_docx_without_document_xml_fails() {
        let bytes = build_zip(&[("other.xml", "<x/>")]);
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_file(&tmp, "a.docx", &bytes);
        assert!(matches!(
            extract_text(&path, "docx").unwrap_err(),
            ExtractError::Ooxml(_)
        ));
    }

    #[test]
    fn test_xlsx_resolves_shared_strings() {
        let shared = r#"<?xml version="1.0"?>
            <sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
              <si><t>widget</t></si>
              <si><t>gadget</t></si>
            </sst>"#;
        let sheet = r#"<?xml version="1.0"?>
            <worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
              <sheetData>
                <row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1"><v>42</v></c></row>
                <row r="2"><c r="A2" t="s"><v>1</v></c><c r="B2"><v>7</v></c></row>
              </sheetData>
            </worksheet>"#;
        let bytes = build_zip(&[
            ("xl/sharedStrings.xml", shared),
            ("xl/worksheets/sheet1.xml", sheet),
        ]);

        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_file(&tmp, "a.xlsx", &bytes);
        let text = extract_text(&path, "xlsx").unwrap();
        assert!(text.contains("[Sheet: sheet1]"));
        assert!(text.contains("widget | 42"));
        assert!(text.contains("gadget | 7"));
    }
}
