//! Integration tests for PDF/DOCX document ingestion end to end: byte-level extraction
//! (`extract.rs`) wired through `ingestor ingest` into storage, FTS search, and `get`.

use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn ingestor_binary() -> std::path::PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.push("ingestor");
    path
}

/// Minimal valid PDF containing the given phrase, with a byte-correct xref table so
/// `pdf-extract` can parse it.
fn minimal_pdf_with_phrase(phrase: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    let stream = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET\n", phrase);
    out.extend_from_slice(
        format!("4 0 obj << /Length {} >> stream\n{}endstream endobj\n", stream.len(), stream)
            .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n");
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o1).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o2).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o3).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o4).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o5).as_bytes());
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

/// Minimal docx (ZIP) containing `word/document.xml` with `<w:t>{phrase}</w:t>`.
fn minimal_docx_with_text(phrase: &str) -> Vec<u8> {
    use std::io::Write;
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            phrase
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

/// A structurally valid ZIP with no `word/document.xml` entry at all.
fn zip_without_document_xml() -> Vec<u8> {
    use std::io::Write;
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("readme.txt", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"not a word document").unwrap();
        zip.finish().unwrap();
    }
    buf
}

fn setup_env() -> (TempDir, std::path::PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("files")).unwrap();

    let config_content = format!(
        r#"[storage]
dir = "{}/data"
"#,
        root.display()
    );
    let config_path = root.join("config").join("ingestor.toml");
    fs::write(&config_path, config_content).unwrap();
    (tmp, config_path)
}

fn run_ingestor(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = ingestor_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ingestor binary at {:?}: {}", binary, e));
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn ingest_pdf_extracts_text_and_is_searchable() {
    let (tmp, config_path) = setup_env();
    run_ingestor(&config_path, &["init"]);

    let path = tmp.path().join("files").join("spec.pdf");
    fs::write(&path, minimal_pdf_with_phrase("spec test phrase")).unwrap();

    let (stdout, stderr, success) = run_ingestor(&config_path, &["ingest", path.to_str().unwrap()]);
    assert!(success, "pdf ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.starts_with("Ingested "));

    let (search_out, _, success) = run_ingestor(&config_path, &["search", "spec test phrase"]);
    assert!(success, "search failed");
    assert!(
        search_out.contains("id:"),
        "expected a search hit for the extracted PDF text, got: {}",
        search_out
    );
}

#[test]
fn ingest_docx_extracts_text_and_is_searchable() {
    let (tmp, config_path) = setup_env();
    run_ingestor(&config_path, &["init"]);

    let path = tmp.path().join("files").join("spec.docx");
    fs::write(&path, minimal_docx_with_text("office test phrase")).unwrap();

    let (stdout, stderr, success) = run_ingestor(&config_path, &["ingest", path.to_str().unwrap()]);
    assert!(success, "docx ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.starts_with("Ingested "));

    let (search_out, _, success) = run_ingestor(&config_path, &["search", "office test phrase"]);
    assert!(success, "search failed");
    assert!(
        search_out.contains("id:"),
        "expected a search hit for the extracted DOCX text, got: {}",
        search_out
    );
}

#[test]
fn ingest_corrupt_pdf_fails() {
    let (tmp, config_path) = setup_env();
    run_ingestor(&config_path, &["init"]);

    let path = tmp.path().join("files").join("bad.pdf");
    fs::write(&path, b"%PDF-1.4\nnot actually a valid pdf body").unwrap();

    let (stdout, stderr, success) = run_ingestor(&config_path, &["ingest", path.to_str().unwrap()]);
    assert!(!success, "ingest of a corrupt pdf should fail, got stdout: {}", stdout);
    assert!(!stderr.is_empty(), "expected an error message on stderr");
}

#[test]
fn ingest_docx_without_document_xml_fails() {
    let (tmp, config_path) = setup_env();
    run_ingestor(&config_path, &["init"]);

    let path = tmp.path().join("files").join("bad.docx");
    fs::write(&path, zip_without_document_xml()).unwrap();

    let (stdout, stderr, success) = run_ingestor(&config_path, &["ingest", path.to_str().unwrap()]);
    assert!(!success, "ingest of a docx with no document.xml should fail, got stdout: {}", stdout);
    assert!(!stderr.is_empty(), "expected an error message on stderr");
}

#[test]
fn content_type_is_stored_for_pdf() {
    let (tmp, config_path) = setup_env();
    run_ingestor(&config_path, &["init"]);

    let path = tmp.path().join("files").join("spec.pdf");
    fs::write(&path, minimal_pdf_with_phrase("content type probe")).unwrap();

    let (stdout, _, success) = run_ingestor(&config_path, &["ingest", path.to_str().unwrap()]);
    assert!(success, "ingest failed: {}", stdout);
    let id = stdout.trim_start_matches("Ingested ").split_whitespace().next().unwrap();

    let (get_out, _, success) = run_ingestor(&config_path, &["get", id]);
    assert!(success, "get failed");
    assert!(
        get_out.contains("application/pdf"),
        "stored content should report content_type application/pdf, got: {}",
        get_out
    );
}

#[test]
fn content_type_is_stored_for_docx() {
    let (tmp, config_path) = setup_env();
    run_ingestor(&config_path, &["init"]);

    let path = tmp.path().join("files").join("spec.docx");
    fs::write(&path, minimal_docx_with_text("content type probe")).unwrap();

    let (stdout, _, success) = run_ingestor(&config_path, &["ingest", path.to_str().unwrap()]);
    assert!(success, "ingest failed: {}", stdout);
    let id = stdout.trim_start_matches("Ingested ").split_whitespace().next().unwrap();

    let (get_out, _, success) = run_ingestor(&config_path, &["get", id]);
    assert!(success, "get failed");
    assert!(
        get_out.contains("vnd.openxmlformats-officedocument.wordprocessingml.document"),
        "stored content should report the docx content_type, got: {}",
        get_out
    );
}
