use super::*;
use tempfile::TempDir;

fn write(dir: &Path, relative: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("should create parent");
    }
    fs::write(&path, contents).expect("should write file");
    path
}

#[test]
fn kind_from_extension_ignores_case() {
    assert_eq!(
        DocumentKind::from_path(Path::new("a/report.PDF")),
        Some(DocumentKind::Pdf)
    );
    assert_eq!(
        DocumentKind::from_path(Path::new("notes.Txt")),
        Some(DocumentKind::Text)
    );
    assert_eq!(DocumentKind::from_path(Path::new("image.png")), None);
    assert_eq!(DocumentKind::from_path(Path::new("README")), None);
}

#[test]
fn missing_directory_is_empty_report() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let report = load_documents(&temp_dir.path().join("nope"));

    assert!(report.is_empty());
    assert_eq!(report.failure_count(), 0);
}

#[test]
fn loads_text_files_recursively_in_path_order() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let dir = temp_dir.path();
    write(dir, "b.txt", b"second file");
    write(dir, "a.TXT", b"first file");
    write(dir, "nested/c.txt", b"nested file");
    write(dir, "ignored.md", b"# not loaded");

    let report = load_documents(dir);

    let names: Vec<_> = report
        .documents
        .iter()
        .map(|d| d.source.strip_prefix(dir).expect("inside dir").to_path_buf())
        .collect();
    assert_eq!(
        names,
        vec![
            PathBuf::from("a.TXT"),
            PathBuf::from("b.txt"),
            PathBuf::from("nested/c.txt")
        ]
    );
    assert!(report.documents.iter().all(|d| d.kind == DocumentKind::Text));
    assert_eq!(report.documents[0].text, "first file");
}

#[test]
fn empty_text_files_are_skipped() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    write(temp_dir.path(), "blank.txt", b"  \n\t\n");
    write(temp_dir.path(), "real.txt", b"content");

    let report = load_documents(temp_dir.path());

    assert_eq!(report.documents.len(), 1);
    assert_eq!(report.skipped_empty.len(), 1);
    assert!(report.skipped_empty[0].ends_with("blank.txt"));
}

#[test]
fn invalid_utf8_is_decoded_lossily() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    write(temp_dir.path(), "latin1.txt", b"caf\xe9 au lait");

    let report = load_documents(temp_dir.path());

    assert_eq!(report.documents.len(), 1);
    assert_eq!(report.documents[0].text, "caf\u{FFFD} au lait");
}

#[test]
fn broken_pdf_does_not_stop_text_loading() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    write(temp_dir.path(), "broken.pdf", b"this is not a pdf");
    write(temp_dir.path(), "france.txt", b"The capital of France is Paris.");

    let report = load_documents(temp_dir.path());

    assert_eq!(report.documents.len(), 1);
    assert_eq!(report.documents[0].kind, DocumentKind::Text);
    assert_eq!(report.file_failures.len(), 1);
    assert!(report.file_failures[0].path.ends_with("broken.pdf"));
    assert!(report.kind_failures.is_empty());
}

#[test]
fn whitespace_normalization() {
    let raw = "Title\r\n\r\n\r\n  \nFirst   line\twith\t\tgaps\nsecond line\n\n\n";
    assert_eq!(
        normalize_whitespace(raw),
        "Title\n\nFirst line\twith gaps\nsecond line"
    );
}

#[test]
fn count_includes_both_kinds() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    write(temp_dir.path(), "a.pdf", b"x");
    write(temp_dir.path(), "sub/b.txt", b"y");
    write(temp_dir.path(), "c.docx", b"z");

    assert_eq!(count_documents(temp_dir.path()), 2);
    assert_eq!(count_documents(&temp_dir.path().join("missing")), 0);
}

#[test]
fn add_copies_supported_files_only() {
    let source_dir = TempDir::new().expect("should create temp dir");
    let data_dir = TempDir::new().expect("should create temp dir");
    let txt = write(source_dir.path(), "notes.txt", b"hello");
    let png = write(source_dir.path(), "photo.png", b"binary");
    let missing = source_dir.path().join("gone.txt");

    let report = add_documents(&[txt, png.clone(), missing.clone()], &data_dir.path().join("data"))
        .expect("add should succeed");

    assert_eq!(report.added, vec![data_dir.path().join("data/notes.txt")]);
    assert_eq!(report.rejected, vec![png, missing]);
    assert!(report.already_present.is_empty());
    assert_eq!(
        fs::read_to_string(data_dir.path().join("data/notes.txt")).expect("copied"),
        "hello"
    );
}

#[test]
fn adding_a_file_already_in_the_data_dir_keeps_its_contents() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let data_dir = temp_dir.path().join("data");
    let notes = write(&data_dir, "notes.txt", b"The capital of France is Paris.");
    let via_dot = data_dir.join(".").join("notes.txt");

    let report = add_documents(&[notes.clone(), via_dot], &data_dir).expect("add should succeed");

    assert!(report.added.is_empty());
    assert_eq!(report.already_present, vec![notes.clone(), notes.clone()]);
    assert_eq!(
        fs::read_to_string(&notes).expect("still readable"),
        "The capital of France is Paris."
    );
}

#[test]
fn clear_removes_everything_but_the_directory() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    write(temp_dir.path(), "a.txt", b"a");
    write(temp_dir.path(), "nested/b.pdf", b"b");

    let report = clear_documents(temp_dir.path());

    assert_eq!(report.removed, 2);
    assert!(report.failures.is_empty());
    assert!(temp_dir.path().is_dir());
    assert_eq!(count_documents(temp_dir.path()), 0);

    let again = clear_documents(&temp_dir.path().join("missing"));
    assert_eq!(again.removed, 0);
    assert!(again.failures.is_empty());
}
